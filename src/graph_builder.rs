//! # FlowGraphBuilder
//!
//! Builder pattern for constructing flow graphs with a fluent API.
//!
//! The builder records nodes and edges and replays them against a fresh
//! [`FlowGraph`] in [`build`](FlowGraphBuilder::build), so every
//! construction error surfaces there, in the order the calls were made.
//!
//! ```rust,no_run
//! use flowgraph::FlowGraphBuilder;
//! use flowgraph::nodes::{MapNode, PassThroughNode};
//!
//! # fn example() -> Result<(), flowgraph::ConfigurationError> {
//! let graph = FlowGraphBuilder::new("ingest")
//!   .node(Box::new(PassThroughNode::new("source")))
//!   .node(Box::new(MapNode::new("sink", |inputs| inputs)))
//!   .edges("source", ["sink"])
//!   .build_time_ticked()?;
//! # Ok(())
//! # }
//! ```

use crate::config::FlowGraphConfig;
use crate::error::ConfigurationError;
use crate::graph::FlowGraph;
use crate::node::Node;
use crate::time_ticked::TimeTickedFlowGraph;

/// Builder for [`FlowGraph`] and [`TimeTickedFlowGraph`].
pub struct FlowGraphBuilder {
  /// The name of the graph being built.
  name: String,
  config: FlowGraphConfig,
  nodes: Vec<Box<dyn Node>>,
  /// `(from, to)` batches, replayed through `set_edges`.
  edges: Vec<(String, Vec<String>)>,
}

impl FlowGraphBuilder {
  /// Creates a builder for a graph named `name` with the default configuration.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      config: FlowGraphConfig::default(),
      nodes: Vec::new(),
      edges: Vec::new(),
    }
  }

  /// Replaces the configuration.
  pub fn config(mut self, config: FlowGraphConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets whether the time-tick discipline is enforced.
  pub fn time_ticked(mut self, time_ticked: bool) -> Self {
    self.config.time_ticked = time_ticked;
    self
  }

  /// Adds a node.
  pub fn node(mut self, node: Box<dyn Node>) -> Self {
    self.nodes.push(node);
    self
  }

  /// Connects `from` to every node of `to`.
  pub fn edges<I, S>(mut self, from: &str, to: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.edges.push((
      from.to_string(),
      to.into_iter().map(|s| s.as_ref().to_string()).collect(),
    ));
    self
  }

  /// Builds the graph.
  ///
  /// # Errors
  ///
  /// Returns the first error raised by `add_node` or `set_edges`.
  pub fn build(self) -> Result<FlowGraph, ConfigurationError> {
    let mut graph = FlowGraph::with_config(self.name, self.config);
    for node in self.nodes {
      graph.add_node(node)?;
    }
    for (from, to) in self.edges {
      graph.set_edges(&from, &to)?;
    }
    Ok(graph)
  }

  /// Builds a time-ticked graph, enforcing the time-tick discipline whatever
  /// the configuration says.
  pub fn build_time_ticked(self) -> Result<TimeTickedFlowGraph, ConfigurationError> {
    self.time_ticked(true).build().map(TimeTickedFlowGraph::from_graph)
  }
}
