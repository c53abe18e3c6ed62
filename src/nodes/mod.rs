//! # Built-in Nodes
//!
//! Small general-purpose [`Node`](crate::node::Node) implementations:
//!
//! - [`MapNode`]: runs a closure over each round's inputs;
//! - [`PassThroughNode`]: forwards every input unchanged.
//!
//! Real transforms usually implement [`Node`](crate::node::Node) directly.

pub mod map_node;
pub mod pass_through_node;

pub use map_node::MapNode;
pub use pass_through_node::PassThroughNode;
