//! # Pass-Through Node
//!
//! Forwards every input of a round, in edge order.
//!
//! With a single input this is tick-safe in a time-ticked graph. With several
//! inputs the later ones can carry ticks above the round watermark, which a
//! time-ticked graph rejects as `AheadOfWatermark`.

use crate::message::MsgRef;
use crate::node::{BaseNode, Node};

/// A node that returns its inputs unchanged.
#[derive(Debug, Clone)]
pub struct PassThroughNode {
  base: BaseNode,
}

impl PassThroughNode {
  /// Creates a pass-through node with the default queue capacity.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      base: BaseNode::new(name),
    }
  }

  /// Sets the capacity of every queue feeding this node.
  pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
    self.base = self.base.with_max_queue_length(max_queue_length);
    self
  }
}

impl Node for PassThroughNode {
  fn name(&self) -> &str {
    self.base.name()
  }

  fn max_queue_length(&self) -> usize {
    self.base.max_queue_length()
  }

  fn operate(&mut self, inputs: Vec<MsgRef>) -> Vec<MsgRef> {
    inputs
  }
}
