//! # Map Node
//!
//! A node whose round is a closure over the collected inputs.
//!
//! ```rust
//! use flowgraph::message::MsgRef;
//! use flowgraph::nodes::MapNode;
//! use flowgraph::time::Timestamped;
//! use std::sync::Arc;
//!
//! let square = MapNode::new("square", |inputs: Vec<MsgRef>| {
//!   inputs
//!     .iter()
//!     .filter_map(|m| m.downcast_ref::<Timestamped<i64>>())
//!     .map(|m| Arc::new(Timestamped::new(m.payload() * m.payload(), m.time())) as MsgRef)
//!     .collect()
//! });
//! ```

use crate::message::MsgRef;
use crate::node::{BaseNode, Node};

/// A node that applies a closure to each round's inputs.
///
/// The closure receives one message per incoming edge, in edge registration
/// order, and returns the messages to broadcast downstream.
pub struct MapNode<F> {
  base: BaseNode,
  function: F,
}

impl<F> MapNode<F>
where
  F: FnMut(Vec<MsgRef>) -> Vec<MsgRef> + Send,
{
  /// Creates a map node with the default queue capacity.
  pub fn new(name: impl Into<String>, function: F) -> Self {
    Self {
      base: BaseNode::new(name),
      function,
    }
  }

  /// Sets the capacity of every queue feeding this node.
  pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
    self.base = self.base.with_max_queue_length(max_queue_length);
    self
  }
}

impl<F> Node for MapNode<F>
where
  F: FnMut(Vec<MsgRef>) -> Vec<MsgRef> + Send,
{
  fn name(&self) -> &str {
    self.base.name()
  }

  fn max_queue_length(&self) -> usize {
    self.base.max_queue_length()
  }

  fn operate(&mut self, inputs: Vec<MsgRef>) -> Vec<MsgRef> {
    (self.function)(inputs)
  }
}
