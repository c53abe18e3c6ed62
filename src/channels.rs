//! # Bounded Queues
//!
//! Every queue in a flow graph is a bounded `tokio::sync::mpsc` channel of
//! [`MsgRef`]:
//!
//! - one per edge, owned (read side) by the downstream node and sized by its
//!   `max_queue_length`;
//! - one ingress queue per source node, written by an external producer
//!   through [`Ingress`];
//! - one egress queue per sink node, drained by an external consumer through
//!   [`Egress`].
//!
//! Sends block while the queue is full. That is the only backpressure
//! mechanism: a consumer that stops draining stalls its producers, and
//! transitively everything upstream of them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn example(graph: &mut flowgraph::FlowGraph) -> Result<(), Box<dyn std::error::Error>> {
//! use flowgraph::time::{Timestamp, Timestamped};
//! use std::sync::Arc;
//!
//! let ingress = graph.ingress("source")?;
//! let mut egress = graph.take_egress("sink")?;
//! graph.start()?;
//!
//! ingress.send(Arc::new(Timestamped::new(1u32, Timestamp::new(1)))).await?;
//! if let Some(msg) = egress.recv().await {
//!     println!("{:?}", msg);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::IngressError;
use crate::message::MsgRef;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

/// Sending half of a flow-graph queue.
pub(crate) type MsgSender = mpsc::Sender<MsgRef>;

/// Receiving half of a flow-graph queue.
pub(crate) type MsgReceiver = mpsc::Receiver<MsgRef>;

/// Creates a bounded queue.
pub(crate) fn bounded(capacity: usize) -> (MsgSender, MsgReceiver) {
  mpsc::channel(capacity)
}

/// Handle for pushing messages into a source node.
///
/// Cloneable; the source node finishes once every clone has been dropped and
/// its queue has drained.
#[derive(Clone, Debug)]
pub struct Ingress {
  node: String,
  tx: MsgSender,
}

impl Ingress {
  pub(crate) fn new(node: impl Into<String>, tx: MsgSender) -> Self {
    Self {
      node: node.into(),
      tx,
    }
  }

  /// Name of the source node this handle feeds.
  pub fn node(&self) -> &str {
    &self.node
  }

  /// Pushes a message, waiting while the queue is full.
  ///
  /// # Errors
  ///
  /// Returns [`IngressError::Closed`] with the message if the source node is
  /// no longer running.
  pub async fn send(&self, msg: MsgRef) -> Result<(), IngressError> {
    trace!(node = %self.node, tick = %msg.time_tick(), "Ingress::send()");
    self.tx.send(msg).await.map_err(|e| IngressError::Closed {
      node: self.node.clone(),
      msg: e.0,
    })
  }

  /// Pushes a message without waiting.
  ///
  /// # Errors
  ///
  /// Returns [`IngressError::Full`] if the queue is at capacity, or
  /// [`IngressError::Closed`] if the source node is no longer running.
  pub fn try_send(&self, msg: MsgRef) -> Result<(), IngressError> {
    self.tx.try_send(msg).map_err(|e| match e {
      TrySendError::Full(msg) => IngressError::Full {
        node: self.node.clone(),
        msg,
      },
      TrySendError::Closed(msg) => IngressError::Closed {
        node: self.node.clone(),
        msg,
      },
    })
  }

  /// Number of free slots in the queue.
  pub fn capacity(&self) -> usize {
    self.tx.capacity()
  }

  /// Maximum number of queued messages.
  pub fn max_capacity(&self) -> usize {
    self.tx.max_capacity()
  }

  /// Returns `true` once the source node stopped receiving.
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

/// Handle for draining the outputs of a sink node.
///
/// Yields `None` once the sink has finished and every queued output was read.
#[derive(Debug)]
pub struct Egress {
  node: String,
  rx: MsgReceiver,
}

impl Egress {
  pub(crate) fn new(node: impl Into<String>, rx: MsgReceiver) -> Self {
    Self {
      node: node.into(),
      rx,
    }
  }

  /// Name of the sink node this handle drains.
  pub fn node(&self) -> &str {
    &self.node
  }

  /// Receives the next output, waiting until one is available.
  pub async fn recv(&mut self) -> Option<MsgRef> {
    self.rx.recv().await
  }

  /// Receives the next output if one is already queued.
  ///
  /// # Errors
  ///
  /// Returns [`TryRecvError::Empty`] if nothing is queued yet, or
  /// [`TryRecvError::Disconnected`] once the sink has finished and every
  /// queued output was read.
  pub fn try_recv(&mut self) -> Result<MsgRef, TryRecvError> {
    self.rx.try_recv()
  }

  /// Converts the handle into a `Stream` of outputs.
  pub fn into_stream(self) -> ReceiverStream<MsgRef> {
    ReceiverStream::new(self.rx)
  }
}
