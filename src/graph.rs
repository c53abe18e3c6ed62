//! # FlowGraph
//!
//! This module defines [`FlowGraph`], the name-keyed registry of nodes and edges
//! that owns construction-time validation and the lifecycle of its workers.
//!
//! ## Structure Management (Synchronous)
//!
//! Nodes live in an arena indexed by name; edges are stored as adjacency lists
//! of arena indices. Construction calls validate everything before touching
//! the graph, so a failed call leaves it exactly as it was:
//!
//! - [`add_node`](FlowGraph::add_node) rejects duplicate names;
//! - [`set_edges`](FlowGraph::set_edges) rejects unknown endpoints, duplicate
//!   edges and any edge that would close a cycle (depth-first search from each
//!   new target back to the upstream node).
//!
//! ## Execution (Asynchronous)
//!
//! [`start`](FlowGraph::start) resolves every edge into a bounded queue and
//! spawns one worker task per node (see [`node_context`](crate::node_context)).
//! Topology is frozen from then on. [`close`](FlowGraph::close) cancels every
//! worker and waits for all of them; it is idempotent.
//!
//! ```text
//! Constructing ──start()──► Running ──close()──► Closed
//!       └──────────────────close()─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use flowgraph::FlowGraph;
//! use flowgraph::nodes::MapNode;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = FlowGraph::new("ingest");
//! graph.add_node(Box::new(MapNode::new("source", |inputs| inputs)))?;
//! graph.add_node(Box::new(MapNode::new("sink", |inputs| inputs)))?;
//! graph.set_edges("source", ["sink"])?;
//!
//! let ingress = graph.ingress("source")?;
//! let mut egress = graph.take_egress("sink")?;
//! graph.start()?;
//! // ... push through `ingress`, drain `egress` ...
//! graph.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::channels::{self, Egress, Ingress, MsgReceiver, MsgSender};
use crate::config::FlowGraphConfig;
use crate::error::{ConfigurationError, FlowGraphError, GraphState};
use crate::node::Node;
use crate::node_context::{InputEdge, NodeContext, OutputEdge, WorkerEnv};
use crate::params::{self, ParamsPublisher, ParamsWatch};
use crate::supervision::{FailureReport, Supervisor, panic_message};
use crate::time::Watermark;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Index of a node in the graph's arena.
type NodeId = usize;

/// Registry entry of one node.
struct NodeSlot {
  name: String,
  /// Moved into the worker on start.
  node: Option<Box<dyn Node>>,
  max_queue_length: usize,
  /// Upstream nodes, in edge registration order.
  upstream: Vec<NodeId>,
  /// Downstream nodes, in edge registration order.
  downstream: Vec<NodeId>,
  ingress: Option<(MsgSender, MsgReceiver)>,
  egress: Option<MsgSender>,
  watermark: Watermark,
  /// Kept so the channel outlives the caller's publisher.
  publisher: Option<ParamsPublisher>,
  /// Moved into the worker on start.
  params_watch: Option<ParamsWatch>,
}

/// A directed acyclic graph of nodes connected by bounded queues.
///
/// See the [module documentation](self) for the lifecycle.
pub struct FlowGraph {
  /// The name of the graph.
  name: String,
  config: FlowGraphConfig,
  /// Arena of nodes; a node's index never changes.
  slots: Vec<NodeSlot>,
  /// Name to arena index.
  index: HashMap<String, NodeId>,
  state: GraphState,
  /// Cancels every worker.
  cancel: CancellationToken,
  /// `true` while the graph is paused.
  pause: watch::Sender<bool>,
  failures_tx: mpsc::UnboundedSender<FailureReport>,
  failures_rx: Option<mpsc::UnboundedReceiver<FailureReport>>,
  /// Worker handles, keyed by node name.
  workers: Vec<(String, JoinHandle<()>)>,
}

impl FlowGraph {
  /// Creates an empty graph with the default configuration.
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_config(name, FlowGraphConfig::default())
  }

  /// Creates an empty graph with the given configuration.
  pub fn with_config(name: impl Into<String>, config: FlowGraphConfig) -> Self {
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    let (pause, _) = watch::channel(false);
    Self {
      name: name.into(),
      config,
      slots: Vec::new(),
      index: HashMap::new(),
      state: GraphState::Constructing,
      cancel: CancellationToken::new(),
      pause,
      failures_tx,
      failures_rx: Some(failures_rx),
      workers: Vec::new(),
    }
  }

  /// Returns the name of the graph.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the configuration the graph was created with.
  pub fn config(&self) -> &FlowGraphConfig {
    &self.config
  }

  /// Returns `true` if the time-tick discipline is enforced.
  pub fn is_time_ticked(&self) -> bool {
    self.config.time_ticked
  }

  /// Returns the lifecycle state.
  ///
  /// A running graph that was cancelled by a runtime fault is `Closed`: its
  /// workers are stopping and it accepts no further lifecycle calls besides
  /// `close` and `wait_for_completion`, which join them.
  pub fn state(&self) -> GraphState {
    if self.state == GraphState::Running && self.cancel.is_cancelled() {
      return GraphState::Closed;
    }
    self.state
  }

  /// Returns the number of registered nodes.
  pub fn node_count(&self) -> usize {
    self.slots.len()
  }

  /// Returns the number of edges.
  pub fn edge_count(&self) -> usize {
    self.slots.iter().map(|s| s.downstream.len()).sum()
  }

  /// Returns `true` if a node with this name is registered.
  pub fn contains_node(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Returns the upstream nodes of `name`, in edge registration order.
  pub fn upstream_of(&self, name: &str) -> Result<Vec<&str>, ConfigurationError> {
    let id = self.lookup(name)?;
    Ok(self.names(&self.slots[id].upstream))
  }

  /// Returns the downstream nodes of `name`, in edge registration order.
  pub fn downstream_of(&self, name: &str) -> Result<Vec<&str>, ConfigurationError> {
    let id = self.lookup(name)?;
    Ok(self.names(&self.slots[id].downstream))
  }

  /// Returns the nodes without incoming edges, in registration order.
  pub fn sources(&self) -> Vec<&str> {
    self
      .slots
      .iter()
      .filter(|s| s.upstream.is_empty())
      .map(|s| s.name.as_str())
      .collect()
  }

  /// Returns the nodes without outgoing edges, in registration order.
  pub fn sinks(&self) -> Vec<&str> {
    self
      .slots
      .iter()
      .filter(|s| s.downstream.is_empty())
      .map(|s| s.name.as_str())
      .collect()
  }

  /// Adds a node to the graph.
  ///
  /// Every queue feeding the node will hold up to `node.max_queue_length()`
  /// messages.
  ///
  /// # Errors
  ///
  /// - [`ConfigurationError::InvalidState`] once the graph has started
  /// - [`ConfigurationError::DuplicateNode`] if the name is taken
  /// - [`ConfigurationError::InvalidQueueLength`] if the capacity is zero
  pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<(), ConfigurationError> {
    self.expect_state(GraphState::Constructing)?;
    let name = node.name().to_string();
    if self.index.contains_key(&name) {
      return Err(ConfigurationError::DuplicateNode(name));
    }
    let max_queue_length = node.max_queue_length();
    if max_queue_length == 0 {
      return Err(ConfigurationError::InvalidQueueLength(name));
    }

    debug!(graph = %self.name, node = %name, max_queue_length, "node added");
    self.index.insert(name.clone(), self.slots.len());
    self.slots.push(NodeSlot {
      name,
      node: Some(node),
      max_queue_length,
      upstream: Vec::new(),
      downstream: Vec::new(),
      ingress: None,
      egress: None,
      watermark: Watermark::new(),
      publisher: None,
      params_watch: None,
    });
    Ok(())
  }

  /// Connects `from` to every node of `to`.
  ///
  /// `from` becomes the next upstream edge of each target (its messages are
  /// the next element of the target's `operate` inputs), and the targets are
  /// appended to the downstream list of `from`. An empty `to` is a no-op.
  ///
  /// # Errors
  ///
  /// - [`ConfigurationError::InvalidState`] once the graph has started
  /// - [`ConfigurationError::UnknownNode`] for an unregistered endpoint
  /// - [`ConfigurationError::DuplicateEdge`] if an edge already exists or is
  ///   listed twice
  /// - [`ConfigurationError::Cycle`] if an edge would close a cycle
  /// - [`ConfigurationError::NotASink`] if `from` already handed out its egress
  /// - [`ConfigurationError::NotASource`] if a target already handed out its
  ///   ingress
  ///
  /// Nothing is modified when an error is returned.
  pub fn set_edges<I, S>(&mut self, from: &str, to: I) -> Result<(), ConfigurationError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.expect_state(GraphState::Constructing)?;
    let from_id = self.lookup(from)?;
    let mut to = to.into_iter().peekable();
    if to.peek().is_some() && self.slots[from_id].egress.is_some() {
      return Err(ConfigurationError::NotASink(from.to_string()));
    }

    let mut targets: Vec<NodeId> = Vec::new();
    for name in to {
      let name = name.as_ref();
      let to_id = self.lookup(name)?;
      if targets.contains(&to_id) || self.slots[from_id].downstream.contains(&to_id) {
        return Err(ConfigurationError::DuplicateEdge {
          from: from.to_string(),
          to: name.to_string(),
        });
      }
      // New edges all leave `from`, so a cycle needs an existing path back to it.
      if self.reaches(to_id, from_id) {
        return Err(ConfigurationError::Cycle {
          from: from.to_string(),
          to: name.to_string(),
        });
      }
      if self.slots[to_id].ingress.is_some() {
        return Err(ConfigurationError::NotASource(name.to_string()));
      }
      targets.push(to_id);
    }

    for to_id in targets {
      debug!(graph = %self.name, from = %from, to = %self.slots[to_id].name, "edge added");
      self.slots[to_id].upstream.push(from_id);
      self.slots[from_id].downstream.push(to_id);
    }
    Ok(())
  }

  /// Returns a handle for pushing messages into the source node `name`.
  ///
  /// The queue holds up to the node's `max_queue_length` messages and accepts
  /// sends before the graph starts. Handles are cloneable; when all of them
  /// are dropped the source drains its queue and finishes, and end of stream
  /// propagates downstream.
  ///
  /// # Errors
  ///
  /// - [`ConfigurationError::InvalidState`] once the graph has started
  /// - [`ConfigurationError::UnknownNode`] for an unregistered name
  /// - [`ConfigurationError::NotASource`] if the node has incoming edges
  pub fn ingress(&mut self, name: &str) -> Result<Ingress, ConfigurationError> {
    self.expect_state(GraphState::Constructing)?;
    let id = self.lookup(name)?;
    let slot = &mut self.slots[id];
    if !slot.upstream.is_empty() {
      return Err(ConfigurationError::NotASource(name.to_string()));
    }
    let capacity = slot.max_queue_length;
    let (tx, _) = slot
      .ingress
      .get_or_insert_with(|| channels::bounded(capacity));
    Ok(Ingress::new(name, tx.clone()))
  }

  /// Takes the receiver of the sink node `name`'s outputs.
  ///
  /// The queue holds up to the node's `max_queue_length` messages; a consumer
  /// that stops draining it stalls the pipeline. Outputs of sinks whose egress
  /// was never taken are discarded.
  ///
  /// # Errors
  ///
  /// - [`ConfigurationError::InvalidState`] once the graph has started
  /// - [`ConfigurationError::UnknownNode`] for an unregistered name
  /// - [`ConfigurationError::NotASink`] if the node has outgoing edges
  /// - [`ConfigurationError::EgressTaken`] if it was already taken
  pub fn take_egress(&mut self, name: &str) -> Result<Egress, ConfigurationError> {
    self.expect_state(GraphState::Constructing)?;
    let id = self.lookup(name)?;
    let slot = &mut self.slots[id];
    if !slot.downstream.is_empty() {
      return Err(ConfigurationError::NotASink(name.to_string()));
    }
    if slot.egress.is_some() {
      return Err(ConfigurationError::EgressTaken(name.to_string()));
    }
    let (tx, rx) = channels::bounded(slot.max_queue_length);
    slot.egress = Some(tx);
    Ok(Egress::new(name, rx))
  }

  /// Returns the safe watermark of node `name`.
  pub fn watermark(&self, name: &str) -> Result<Watermark, ConfigurationError> {
    let id = self.lookup(name)?;
    Ok(self.slots[id].watermark.clone())
  }

  /// Returns the publisher of node `name`'s out-of-band parameters.
  ///
  /// Parameters can be published at any time; the node's worker picks up the
  /// latest snapshot between rounds. Only parameter channels requested before
  /// start are wired into workers.
  pub fn params(&mut self, name: &str) -> Result<ParamsPublisher, ConfigurationError> {
    let id = self.lookup(name)?;
    if let Some(publisher) = &self.slots[id].publisher {
      return Ok(publisher.clone());
    }
    self.expect_state(GraphState::Constructing)?;
    let (publisher, watch) = params::channel();
    let slot = &mut self.slots[id];
    slot.publisher = Some(publisher.clone());
    slot.params_watch = Some(watch);
    Ok(publisher)
  }

  /// Takes the receiver of runtime failure reports.
  ///
  /// Returns `None` if it was already taken.
  pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<FailureReport>> {
    self.failures_rx.take()
  }

  /// Returns the node names in a topological order (every node after all of
  /// its upstream nodes; ties in registration order).
  pub fn topological_order(&self) -> Vec<&str> {
    let mut in_degree: Vec<usize> = self.slots.iter().map(|s| s.upstream.len()).collect();
    let mut queue: VecDeque<NodeId> = (0..self.slots.len())
      .filter(|&id| in_degree[id] == 0)
      .collect();

    let mut order = Vec::with_capacity(self.slots.len());
    while let Some(id) = queue.pop_front() {
      order.push(self.slots[id].name.as_str());
      for &next in &self.slots[id].downstream {
        in_degree[next] -= 1;
        if in_degree[next] == 0 {
          queue.push_back(next);
        }
      }
    }
    order
  }

  /// Resolves every edge into a bounded queue and spawns one worker per node.
  ///
  /// Must be called from within a tokio runtime.
  ///
  /// # Errors
  ///
  /// - [`ConfigurationError::InvalidState`] unless the graph is constructing
  /// - [`FlowGraphError::NoRuntime`] outside a tokio runtime
  pub fn start(&mut self) -> Result<(), FlowGraphError> {
    self.expect_state(GraphState::Constructing)?;
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|_| FlowGraphError::NoRuntime(self.name.clone()))?;

    let order: Vec<NodeId> = self
      .topological_order()
      .into_iter()
      .map(|name| self.index[name])
      .collect();

    // One queue per edge, sized by the downstream node.
    let mut outputs: Vec<Vec<OutputEdge>> = self.slots.iter().map(|_| Vec::new()).collect();
    let mut pending: HashMap<(NodeId, NodeId), MsgReceiver> = HashMap::new();
    for (from, slot) in self.slots.iter().enumerate() {
      for &to in &slot.downstream {
        let target = &self.slots[to];
        let (tx, rx) = channels::bounded(target.max_queue_length);
        outputs[from].push(OutputEdge::downstream(edge_label(&slot.name, &target.name), tx));
        pending.insert((from, to), rx);
      }
    }

    let names: Vec<String> = self.slots.iter().map(|s| s.name.clone()).collect();
    let supervisor = Supervisor::new(&self.name, self.failures_tx.clone(), self.cancel.clone());
    for id in order {
      let slot = &mut self.slots[id];
      let Some(node) = slot.node.take() else {
        continue;
      };

      let inputs = if slot.upstream.is_empty() {
        // Dropping our sender leaves the external handles as the only writers.
        let rx = match slot.ingress.take() {
          Some((_, rx)) => rx,
          None => channels::bounded(slot.max_queue_length).1,
        };
        vec![InputEdge::new(format!("ingress -> {}", slot.name), rx)]
      } else {
        slot.ingress = None;
        slot
          .upstream
          .iter()
          .filter_map(|&from| pending.remove(&(from, id)).map(|rx| (from, rx)))
          .map(|(from, rx)| InputEdge::new(edge_label(&names[from], &slot.name), rx))
          .collect()
      };

      let mut node_outputs = std::mem::take(&mut outputs[id]);
      if let Some(tx) = slot.egress.take() {
        node_outputs.push(OutputEdge::egress(format!("{} -> egress", slot.name), tx));
      }

      let env = WorkerEnv {
        time_ticked: self.config.time_ticked,
        pause: self.pause.subscribe(),
        cancel: self.cancel.clone(),
        supervisor: supervisor.clone(),
      };
      let context = NodeContext::new(
        node,
        inputs,
        node_outputs,
        slot.watermark.clone(),
        slot.params_watch.take(),
        env,
      );
      let span = info_span!("flowgraph_node", graph = %self.name, node = %slot.name);
      let handle = runtime.spawn(context.run().instrument(span));
      self.workers.push((slot.name.clone(), handle));
    }

    self.state = GraphState::Running;
    info!(graph = %self.name, nodes = self.slots.len(), edges = self.edge_count(), time_ticked = self.config.time_ticked, "flow graph started");
    Ok(())
  }

  /// Holds every worker at its next round boundary.
  ///
  /// Rounds already in progress complete; cancellation still takes effect
  /// while paused. A graph paused before `start` holds its workers before
  /// their first round.
  pub fn pause(&self) -> Result<(), ConfigurationError> {
    self.expect_open()?;
    debug!(graph = %self.name, "flow graph paused");
    self.pause.send_replace(true);
    Ok(())
  }

  /// Releases workers held by [`pause`](Self::pause).
  pub fn resume(&self) -> Result<(), ConfigurationError> {
    self.expect_open()?;
    debug!(graph = %self.name, "flow graph resumed");
    self.pause.send_replace(false);
    Ok(())
  }

  /// Returns `true` once the graph was cancelled, by `close` or by a runtime fault.
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Completes once the graph is cancelled, by `close` or by a runtime fault.
  pub async fn cancelled(&self) {
    self.cancel.cancelled().await
  }

  /// Cancels every worker and waits until all of them have terminated.
  ///
  /// Each worker gets the configured grace period; a worker still running
  /// after it is aborted. Aborting only takes effect at the worker's next
  /// suspension point, so a worker stuck inside a blocking `operate` may still
  /// be running when `close` returns; it stops as soon as `operate` does.
  /// Calling `close` again is a no-op.
  ///
  /// # Errors
  ///
  /// Returns [`FlowGraphError::WorkerPanicked`] if a worker task panicked.
  pub async fn close(&mut self) -> Result<(), FlowGraphError> {
    if self.state == GraphState::Closed {
      return Ok(());
    }
    debug!(graph = %self.name, "closing flow graph");
    self.cancel.cancel();
    let grace = self.config.close_grace_period();
    self.join_workers(Some(grace)).await
  }

  /// Waits until every worker finishes on its own (end of stream on every
  /// source, or a runtime fault), then marks the graph closed.
  ///
  /// # Errors
  ///
  /// Returns [`FlowGraphError::WorkerPanicked`] if a worker task panicked.
  pub async fn wait_for_completion(&mut self) -> Result<(), FlowGraphError> {
    if self.state == GraphState::Closed {
      return Ok(());
    }
    self.join_workers(None).await
  }

  async fn join_workers(&mut self, grace: Option<Duration>) -> Result<(), FlowGraphError> {
    let workers = std::mem::take(&mut self.workers);
    let results = futures::future::join_all(
      workers
        .into_iter()
        .map(|(node, handle)| join_worker(node, handle, grace)),
    )
    .await;

    self.state = GraphState::Closed;
    self.cancel.cancel();
    info!(graph = %self.name, "flow graph closed");
    results.into_iter().collect()
  }

  fn expect_state(&self, expected: GraphState) -> Result<(), ConfigurationError> {
    if self.state != expected {
      return Err(ConfigurationError::InvalidState {
        graph: self.name.clone(),
        state: self.state,
        expected,
      });
    }
    Ok(())
  }

  fn expect_open(&self) -> Result<(), ConfigurationError> {
    let state = self.state();
    if state == GraphState::Closed {
      return Err(ConfigurationError::InvalidState {
        graph: self.name.clone(),
        state,
        expected: GraphState::Running,
      });
    }
    Ok(())
  }

  fn lookup(&self, name: &str) -> Result<NodeId, ConfigurationError> {
    self
      .index
      .get(name)
      .copied()
      .ok_or_else(|| ConfigurationError::UnknownNode(name.to_string()))
  }

  fn names(&self, ids: &[NodeId]) -> Vec<&str> {
    ids.iter().map(|&id| self.slots[id].name.as_str()).collect()
  }

  /// Depth-first search: is there a path from `start` to `target`?
  fn reaches(&self, start: NodeId, target: NodeId) -> bool {
    let mut visited = vec![false; self.slots.len()];
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
      if id == target {
        return true;
      }
      if std::mem::replace(&mut visited[id], true) {
        continue;
      }
      stack.extend(self.slots[id].downstream.iter().copied());
    }
    false
  }
}

impl Drop for FlowGraph {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

impl std::fmt::Debug for FlowGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FlowGraph")
      .field("name", &self.name)
      .field("state", &self.state)
      .field("nodes", &self.index.keys().collect::<Vec<_>>())
      .field("edges", &self.edge_count())
      .finish()
  }
}

fn edge_label(from: &str, to: &str) -> String {
  format!("{} -> {}", from, to)
}

async fn join_worker(
  node: String,
  mut handle: JoinHandle<()>,
  grace: Option<Duration>,
) -> Result<(), FlowGraphError> {
  let joined = match grace {
    Some(grace) => match tokio::time::timeout(grace, &mut handle).await {
      Ok(joined) => joined,
      Err(_) => {
        warn!(node = %node, grace_ms = grace.as_millis() as u64, "worker did not stop within grace period, aborting");
        // Takes effect at the worker's next await; not joined here.
        handle.abort();
        return Ok(());
      }
    },
    None => handle.await,
  };

  match joined {
    Ok(()) => Ok(()),
    Err(e) if e.is_cancelled() => Ok(()),
    Err(e) => Err(FlowGraphError::WorkerPanicked {
      node,
      reason: panic_message(&*e.into_panic()),
    }),
  }
}
