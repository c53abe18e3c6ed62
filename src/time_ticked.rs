//! # TimeTickedFlowGraph
//!
//! A [`FlowGraph`] that always enforces the time-tick discipline:
//!
//! - ticks on every edge (ingress and egress included) never decrease;
//! - a node never emits a tick greater than the minimum tick of the inputs of
//!   the round that produced it (the round watermark).
//!
//! A violation is fatal: the offending worker reports it on the failure
//! channel and the whole graph is cancelled. Everything else (construction,
//! queues, lifecycle) is the plain [`FlowGraph`], reachable through `Deref`.
//!
//! A node that needs to emit ahead of its inputs (a multi-input pass-through,
//! for instance) belongs in a plain [`FlowGraph`].

use crate::config::FlowGraphConfig;
use crate::graph::FlowGraph;
use std::ops::{Deref, DerefMut};

/// A flow graph with the time-tick discipline enforced.
#[derive(Debug)]
pub struct TimeTickedFlowGraph {
  graph: FlowGraph,
}

impl TimeTickedFlowGraph {
  /// Creates an empty time-ticked graph.
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_config(name, FlowGraphConfig::default())
  }

  /// Creates an empty time-ticked graph; `config.time_ticked` is forced on.
  pub fn with_config(name: impl Into<String>, config: FlowGraphConfig) -> Self {
    Self {
      graph: FlowGraph::with_config(name, config.with_time_ticked(true)),
    }
  }

  /// Wraps a graph built with `time_ticked` set.
  pub(crate) fn from_graph(graph: FlowGraph) -> Self {
    debug_assert!(graph.is_time_ticked());
    Self { graph }
  }

  /// Returns the underlying graph.
  pub fn into_inner(self) -> FlowGraph {
    self.graph
  }
}

impl Deref for TimeTickedFlowGraph {
  type Target = FlowGraph;

  fn deref(&self) -> &FlowGraph {
    &self.graph
  }
}

impl DerefMut for TimeTickedFlowGraph {
  fn deref_mut(&mut self) -> &mut FlowGraph {
    &mut self.graph
  }
}
