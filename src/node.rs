//! # Node
//!
//! This module defines the [`Node`] trait, the unit of computation of a flow graph.
//!
//! ## Execution Model
//!
//! A node never touches queues. Its worker:
//!
//! 1. Collects exactly one message from every incoming edge (or one from the
//!    ingress queue for a source node)
//! 2. Calls [`Node::operate`] with those messages, ordered by edge registration
//! 3. Broadcasts every returned message to every downstream edge (or to the
//!    egress queue for a sink node)
//!
//! Returning an empty vector drops the round, which is how filters and sinks
//! that only have side effects behave.
//!
//! `operate` is synchronous and is expected not to block; a transform that
//! performs blocking I/O owns that latency.
//!
//! ## Example
//!
//! ```rust
//! use flowgraph::message::MsgRef;
//! use flowgraph::node::Node;
//!
//! struct Forward {
//!     name: String,
//! }
//!
//! impl Node for Forward {
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//!
//!     fn operate(&mut self, inputs: Vec<MsgRef>) -> Vec<MsgRef> {
//!         inputs
//!     }
//! }
//! ```

use crate::message::MsgRef;
use crate::params::{NodeParams, ParamsEvent};

/// Queue capacity used when a node does not choose its own.
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 1024;

/// The capability every flow-graph node implements.
///
/// Nodes are stored and dispatched as `Box<dyn Node>`; the graph owns them and
/// moves each into its own worker on start.
pub trait Node: Send {
  /// Returns the unique name of the node within its graph.
  fn name(&self) -> &str;

  /// Capacity of every queue feeding this node (one per incoming edge, plus
  /// ingress for a source and egress for a sink).
  ///
  /// Read once when the node is registered.
  fn max_queue_length(&self) -> usize {
    DEFAULT_MAX_QUEUE_LENGTH
  }

  /// Processes one round.
  ///
  /// # Arguments
  ///
  /// * `inputs` - One message per incoming edge, in edge registration order.
  ///   A source node receives the single message taken from its ingress.
  ///
  /// # Returns
  ///
  /// The messages to broadcast downstream. May be empty.
  fn operate(&mut self, inputs: Vec<MsgRef>) -> Vec<MsgRef>;

  /// Called by the worker before the first round.
  fn on_start(&mut self) {}

  /// Called between rounds when the node's parameters changed.
  ///
  /// `params` is the snapshot that stays in effect for the rounds that follow;
  /// `events` describes what changed since the previous snapshot.
  fn on_params(&mut self, _params: &NodeParams, _events: &[ParamsEvent]) {}

  /// Called by the worker after its last round, whatever ended it.
  fn on_close(&mut self) {}
}

/// Name and queue capacity shared by most node implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseNode {
  name: String,
  max_queue_length: usize,
}

impl BaseNode {
  /// Creates a base with [`DEFAULT_MAX_QUEUE_LENGTH`].
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
    }
  }

  /// Sets the queue capacity.
  pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
    self.max_queue_length = max_queue_length;
    self
  }

  /// Returns the node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the queue capacity.
  pub fn max_queue_length(&self) -> usize {
    self.max_queue_length
  }
}
