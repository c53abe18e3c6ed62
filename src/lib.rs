//! # flowgraph
//!
//! Time-ticked flow-graph execution engine for streaming data-plane pipelines.
//!
//! A flow graph is a directed acyclic graph of processing nodes connected by
//! bounded queues. Every node runs on its own tokio task, in rounds: it
//! collects exactly one message from each incoming edge, calls
//! [`Node::operate`] and broadcasts the results to every downstream edge.
//! Full queues block their producers, which is the only backpressure
//! mechanism.
//!
//! A [`TimeTickedFlowGraph`] additionally checks that every edge delivers
//! non-decreasing time ticks and that no node emits ahead of the minimum tick
//! of its inputs (its watermark).
//!
//! ## Key Features
//!
//! - **Fan-in barrier**: a round waits for one message on every incoming edge
//! - **Broadcast fan-out**: outputs are shared (`Arc`) with every downstream node
//! - **Bounded queues**: sized per node, blocking sends as backpressure
//! - **Watermarks**: per-node safe watermark readable while the graph runs
//! - **Cancellation**: `close()` stops every worker, whatever it is waiting on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowgraph::nodes::MapNode;
//! use flowgraph::time::{Timestamp, Timestamped};
//! use flowgraph::{MsgRef, TimeTickedFlowGraph};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = TimeTickedFlowGraph::new("pipeline");
//! graph.add_node(Box::new(MapNode::new("double", |inputs: Vec<MsgRef>| {
//!   inputs
//!     .iter()
//!     .filter_map(|m| m.downcast_ref::<Timestamped<i64>>())
//!     .map(|m| Arc::new(Timestamped::new(m.payload() * 2, m.time())) as MsgRef)
//!     .collect()
//! })))?;
//!
//! let ingress = graph.ingress("double")?;
//! let mut egress = graph.take_egress("double")?;
//! graph.start()?;
//!
//! ingress.send(Arc::new(Timestamped::new(21i64, Timestamp::new(1)))).await?;
//! let doubled = egress.recv().await;
//! graph.close().await?;
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Bounded queues, ingress and egress handles.
pub mod channels;
/// Engine configuration.
pub mod config;
/// Error types.
pub mod error;
/// The flow graph: construction and lifecycle.
pub mod graph;
/// Fluent construction of flow graphs.
pub mod graph_builder;
/// The message contract.
pub mod message;
/// The node contract.
pub mod node;
mod node_context;
/// Built-in nodes.
pub mod nodes;
/// Out-of-band node parameters.
pub mod params;
/// Failure reporting.
pub mod supervision;
/// Time ticks and watermarks.
pub mod time;
/// Flow graph with the time-tick discipline enforced.
pub mod time_ticked;


pub use channels::{Egress, Ingress, TryRecvError};
pub use config::{ConfigError, FlowGraphConfig};
pub use error::{
  ConfigurationError, FlowGraphError, GraphState, IngressError, OrderingViolation, RuntimeError,
};
pub use graph::FlowGraph;
pub use graph_builder::FlowGraphBuilder;
pub use message::{Msg, MsgRef};
pub use node::{BaseNode, DEFAULT_MAX_QUEUE_LENGTH, Node};
pub use params::{NodeParams, ParamsEvent, ParamsEventKind, ParamsPublisher};
pub use supervision::FailureReport;
pub use time::{Timestamp, Timestamped, Watermark};
pub use time_ticked::TimeTickedFlowGraph;
