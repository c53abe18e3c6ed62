//! # Error Handling
//!
//! Error taxonomy of the flow-graph engine.
//!
//! ## Overview
//!
//! - **[`ConfigurationError`]**: raised synchronously while the graph is being
//!   constructed (duplicate names, unresolved edge endpoints, cycles, calls made
//!   in the wrong lifecycle state). The graph is left exactly as it was.
//! - **[`RuntimeError`]**: raised inside a running worker (time-tick ordering
//!   violations, a panicking node). Runtime errors are never returned to a
//!   caller; they are reported out-of-band as a
//!   [`FailureReport`](crate::supervision::FailureReport) and trigger a
//!   graph-wide shutdown.
//! - **[`FlowGraphError`]**: what the lifecycle API (`start`, `close`) returns.
//! - **[`IngressError`]**: returned when pushing into a source node fails.
//!
//! Cancellation is not an error. An empty `operate` result is not an error
//! either: the round is simply dropped.

use crate::message::MsgRef;
use crate::time::Timestamp;
use thiserror::Error;

/// Lifecycle states of a flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
  /// Nodes and edges may still be added.
  Constructing,
  /// Workers are running; topology is frozen.
  Running,
  /// Workers have been cancelled and joined. Terminal.
  Closed,
}

impl std::fmt::Display for GraphState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      GraphState::Constructing => write!(f, "constructing"),
      GraphState::Running => write!(f, "running"),
      GraphState::Closed => write!(f, "closed"),
    }
  }
}

/// Construction-time failure. The graph is unmodified when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
  /// A node with this name is already registered.
  #[error("node '{0}' already exists")]
  DuplicateNode(String),
  /// An edge endpoint or lookup refers to an unregistered node.
  #[error("node '{0}' does not exist")]
  UnknownNode(String),
  /// The same `from -> to` edge was requested twice.
  #[error("edge '{from}' -> '{to}' already exists")]
  DuplicateEdge {
    /// Upstream node.
    from: String,
    /// Downstream node.
    to: String,
  },
  /// The edge would close a path back to its own upstream node.
  #[error("edge '{from}' -> '{to}' would create a cycle")]
  Cycle {
    /// Upstream node.
    from: String,
    /// Downstream node.
    to: String,
  },
  /// Nodes must accept at least one queued message per edge.
  #[error("node '{0}' has a max queue length of zero")]
  InvalidQueueLength(String),
  /// Ingress is only available for nodes without incoming edges.
  #[error("node '{0}' has incoming edges and cannot receive ingress")]
  NotASource(String),
  /// Egress is only available for nodes without outgoing edges.
  #[error("node '{0}' has outgoing edges and has no egress")]
  NotASink(String),
  /// The egress receiver of this node was already handed out.
  #[error("egress of node '{0}' was already taken")]
  EgressTaken(String),
  /// The operation is not valid in the graph's current lifecycle state.
  #[error("flow graph '{graph}' is {state}, operation requires {expected}")]
  InvalidState {
    /// Graph name.
    graph: String,
    /// Current state.
    state: GraphState,
    /// State the operation needs.
    expected: GraphState,
  },
}

/// Violation of the time-tick discipline of a time-ticked graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingViolation {
  /// An edge delivered a tick smaller than one it delivered before.
  #[error("time tick regressed on edge {edge}: {current} after {previous}")]
  Regression {
    /// Edge label, `from -> to`.
    edge: String,
    /// Previously delivered tick.
    previous: Timestamp,
    /// Offending tick.
    current: Timestamp,
  },
  /// A node emitted a tick larger than the minimum of its round's inputs.
  #[error("emitted time tick {emitted} is ahead of round watermark {watermark}")]
  AheadOfWatermark {
    /// Tick of the emitted message.
    emitted: Timestamp,
    /// Minimum input tick of the round.
    watermark: Timestamp,
  },
}

/// Fatal failure of a running node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
  /// Time-tick ordering was violated; downstream watermarks are unreliable.
  #[error(transparent)]
  Ordering(#[from] OrderingViolation),
  /// `operate` panicked.
  #[error("node panicked while operating: {0}")]
  NodePanicked(String),
}

/// Error returned by the flow-graph lifecycle API.
#[derive(Error, Debug)]
pub enum FlowGraphError {
  /// Construction or lifecycle misuse.
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),
  /// `start` was called outside a tokio runtime.
  #[error("flow graph '{0}' must be started from within a tokio runtime")]
  NoRuntime(String),
  /// A worker task panicked outside of `operate`.
  #[error("worker for node '{node}' panicked: {reason}")]
  WorkerPanicked {
    /// Node whose worker panicked.
    node: String,
    /// Panic payload, when it was a string.
    reason: String,
  },
}

/// Failure to push a message into a source node.
///
/// The rejected message is handed back to the caller.
#[derive(Error, Debug)]
pub enum IngressError {
  /// The source node is no longer running.
  #[error("ingress of node '{node}' is closed")]
  Closed {
    /// Source node.
    node: String,
    /// The message that was not delivered.
    msg: MsgRef,
  },
  /// The queue is full (only returned by `try_send`).
  #[error("ingress of node '{node}' is full")]
  Full {
    /// Source node.
    node: String,
    /// The message that was not delivered.
    msg: MsgRef,
  },
}

impl IngressError {
  /// Returns the message that could not be delivered.
  pub fn into_msg(self) -> MsgRef {
    match self {
      IngressError::Closed { msg, .. } | IngressError::Full { msg, .. } => msg,
    }
  }
}
