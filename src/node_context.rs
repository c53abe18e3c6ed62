//! # Node Worker
//!
//! [`NodeContext`] binds a [`Node`] to its queues and runs it. The graph
//! builds one context per registered node on start and spawns its
//! [`run`](NodeContext::run) future as a dedicated task.
//!
//! ## Round
//!
//! ```text
//! Idle ──► Collecting ──► Executing ──► Dispatching ──► Idle
//!   │           │              │               │
//!   └───────────┴──────────────┴───────────────┴──► Cancelled
//! ```
//!
//! 1. **Idle**: wait at the pause gate.
//! 2. **Collecting**: receive exactly one message from every input queue, in
//!    edge registration order. Messages that arrive early on one edge simply
//!    wait in that edge's bounded queue until their round.
//! 3. **Executing**: apply pending parameter changes, publish the round
//!    watermark and call `operate`. Parameters are read once per round, so
//!    anything published before the round's last input arrived is in effect.
//! 4. **Dispatching**: send every output to every output queue, waiting while
//!    a queue is full.
//!
//! Every wait races against the graph's cancellation token (biased towards
//! cancellation), so a worker stops promptly even when parked on a queue that
//! will never be written again. A cancelled round is abandoned: collected
//! inputs are dropped and `operate` is not called.

use crate::channels::{MsgReceiver, MsgSender};
use crate::error::{OrderingViolation, RuntimeError};
use crate::message::MsgRef;
use crate::node::Node;
use crate::params::ParamsWatch;
use crate::supervision::{Supervisor, panic_message};
use crate::time::{EdgeClock, Watermark, round_watermark};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where a worker is within its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
  Idle,
  Collecting,
  Executing,
  Dispatching,
  Cancelled,
}

/// Why a worker stopped.
#[derive(Debug)]
enum Exit {
  /// The graph was cancelled.
  Cancelled,
  /// An input queue was closed and drained.
  EndOfStream(String),
  /// Every output queue lost its consumer.
  NoConsumers,
  /// A runtime fault; the graph is shut down.
  Failed(RuntimeError),
}

/// Read side of one incoming edge (or of the ingress queue).
pub(crate) struct InputEdge {
  rx: MsgReceiver,
  clock: EdgeClock,
}

impl InputEdge {
  pub(crate) fn new(label: impl Into<String>, rx: MsgReceiver) -> Self {
    Self {
      rx,
      clock: EdgeClock::new(label),
    }
  }
}

/// Write side of one outgoing edge (or of the egress queue).
pub(crate) struct OutputEdge {
  tx: MsgSender,
  label: String,
  /// Only egress is checked on the sending side; edges between nodes are
  /// checked by the receiving worker.
  clock: Option<EdgeClock>,
}

impl OutputEdge {
  pub(crate) fn downstream(label: impl Into<String>, tx: MsgSender) -> Self {
    Self {
      tx,
      label: label.into(),
      clock: None,
    }
  }

  pub(crate) fn egress(label: impl Into<String>, tx: MsgSender) -> Self {
    let label = label.into();
    Self {
      tx,
      clock: Some(EdgeClock::new(label.clone())),
      label,
    }
  }
}

/// Runtime wrapper of a node: its queues, its shared handles and its state.
pub(crate) struct NodeContext {
  name: String,
  node: Box<dyn Node>,
  inputs: Vec<InputEdge>,
  outputs: Vec<OutputEdge>,
  time_ticked: bool,
  watermark: Watermark,
  params: Option<ParamsWatch>,
  pause: watch::Receiver<bool>,
  cancel: CancellationToken,
  supervisor: Supervisor,
  state: WorkerState,
  rounds: u64,
}

/// Shared handles every worker of a graph receives.
pub(crate) struct WorkerEnv {
  pub(crate) time_ticked: bool,
  pub(crate) pause: watch::Receiver<bool>,
  pub(crate) cancel: CancellationToken,
  pub(crate) supervisor: Supervisor,
}

impl NodeContext {
  pub(crate) fn new(
    node: Box<dyn Node>,
    inputs: Vec<InputEdge>,
    outputs: Vec<OutputEdge>,
    watermark: Watermark,
    params: Option<ParamsWatch>,
    env: WorkerEnv,
  ) -> Self {
    Self {
      name: node.name().to_string(),
      node,
      inputs,
      outputs,
      time_ticked: env.time_ticked,
      watermark,
      params,
      pause: env.pause,
      cancel: env.cancel,
      supervisor: env.supervisor,
      state: WorkerState::Idle,
      rounds: 0,
    }
  }

  /// Runs rounds until cancellation, end of stream or a runtime fault.
  pub(crate) async fn run(mut self) {
    debug!(
      inputs = self.inputs.len(),
      outputs = self.outputs.len(),
      "node worker started"
    );
    self.node.on_start();
    let exit = self.run_rounds().await;
    self.node.on_close();

    match exit {
      Exit::Cancelled => {
        self.transition(WorkerState::Cancelled);
        debug!(rounds = self.rounds, "node worker cancelled");
      }
      Exit::EndOfStream(edge) => {
        debug!(rounds = self.rounds, edge = %edge, "input closed, node worker finished");
      }
      Exit::NoConsumers => {
        debug!(rounds = self.rounds, "all consumers gone, node worker finished");
      }
      Exit::Failed(error) => self.supervisor.fail(&self.name, error),
    }
  }

  async fn run_rounds(&mut self) -> Exit {
    loop {
      if let Err(exit) = self.round().await {
        return exit;
      }
      self.rounds += 1;
    }
  }

  async fn round(&mut self) -> Result<(), Exit> {
    self.transition(WorkerState::Idle);
    self.wait_unpaused().await?;

    self.transition(WorkerState::Collecting);
    let inputs = self.collect().await?;

    self.transition(WorkerState::Executing);
    self.refresh_params();
    let outputs = self.execute(inputs)?;

    self.transition(WorkerState::Dispatching);
    self.dispatch(outputs).await
  }

  fn transition(&mut self, next: WorkerState) {
    trace!(from = ?self.state, to = ?next, round = self.rounds, "worker state");
    self.state = next;
  }

  async fn wait_unpaused(&mut self) -> Result<(), Exit> {
    loop {
      if !*self.pause.borrow_and_update() {
        return Ok(());
      }
      trace!("paused");
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Err(Exit::Cancelled),
        changed = self.pause.changed() => {
          if changed.is_err() {
            // The graph is gone; its drop cancels the token.
            return Err(Exit::Cancelled);
          }
        }
      }
    }
  }

  fn refresh_params(&mut self) {
    let Some(watch) = self.params.as_mut() else {
      return;
    };
    if let Some((params, events)) = watch.refresh() {
      debug!(changes = events.len(), "applying parameter changes");
      self.node.on_params(&params, &events);
    }
  }

  async fn collect(&mut self) -> Result<Vec<MsgRef>, Exit> {
    let mut inputs = Vec::with_capacity(self.inputs.len());
    for edge in self.inputs.iter_mut() {
      let received = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Err(Exit::Cancelled),
        msg = edge.rx.recv() => msg,
      };
      let Some(msg) = received else {
        return Err(Exit::EndOfStream(edge.clock.edge().to_string()));
      };
      if self.time_ticked {
        edge
          .clock
          .observe(msg.time_tick())
          .map_err(|v| Exit::Failed(v.into()))?;
      }
      inputs.push(msg);
    }
    Ok(inputs)
  }

  fn execute(&mut self, inputs: Vec<MsgRef>) -> Result<Vec<MsgRef>, Exit> {
    let watermark = round_watermark(&inputs);
    if let Some(w) = watermark {
      self.watermark.advance_to(w);
    }

    let node = &mut self.node;
    let outputs = catch_unwind(AssertUnwindSafe(|| node.operate(inputs))).map_err(|payload| {
      Exit::Failed(RuntimeError::NodePanicked(panic_message(payload.as_ref())))
    })?;

    if self.time_ticked {
      if let Some(watermark) = watermark {
        if let Some(ahead) = outputs.iter().find(|m| m.time_tick() > watermark) {
          return Err(Exit::Failed(
            OrderingViolation::AheadOfWatermark {
              emitted: ahead.time_tick(),
              watermark,
            }
            .into(),
          ));
        }
      }
    }
    trace!(outputs = outputs.len(), "operate finished");
    Ok(outputs)
  }

  async fn dispatch(&mut self, outputs: Vec<MsgRef>) -> Result<(), Exit> {
    if self.outputs.is_empty() {
      if !outputs.is_empty() {
        trace!(dropped = outputs.len(), "no egress consumer, outputs discarded");
      }
      return Ok(());
    }

    for msg in outputs {
      let mut i = 0;
      while i < self.outputs.len() {
        let edge = &mut self.outputs[i];
        if self.time_ticked {
          if let Some(clock) = edge.clock.as_mut() {
            clock
              .observe(msg.time_tick())
              .map_err(|v| Exit::Failed(v.into()))?;
          }
        }
        let sent = tokio::select! {
          biased;
          _ = self.cancel.cancelled() => return Err(Exit::Cancelled),
          sent = edge.tx.send(Arc::clone(&msg)) => sent,
        };
        if sent.is_err() {
          debug!(edge = %edge.label, "consumer gone, edge pruned");
          self.outputs.remove(i);
          if self.outputs.is_empty() {
            return Err(Exit::NoConsumers);
          }
          continue;
        }
        i += 1;
      }
    }
    Ok(())
  }
}
