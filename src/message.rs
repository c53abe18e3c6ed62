//! Message types that traverse flow-graph edges.
//!
//! # Overview
//!
//! - [`Msg`]: the capability every message implements; it exposes the message's
//!   time tick and allows recovering the concrete payload by downcasting.
//! - [`MsgRef`]: the shared handle (`Arc<dyn Msg>`) actually carried by queues.
//!
//! Messages are immutable once sent. Broadcasting one output to several
//! downstream edges clones the `Arc`, never the payload.
//!
//! # Example
//!
//! ```rust
//! use flowgraph::message::{Msg, MsgRef};
//! use flowgraph::time::{Timestamp, Timestamped};
//! use std::sync::Arc;
//!
//! let msg: MsgRef = Arc::new(Timestamped::new(42i64, Timestamp::new(7)));
//! assert_eq!(msg.time_tick(), Timestamp::new(7));
//! assert_eq!(msg.downcast_ref::<Timestamped<i64>>().map(|m| m.payload), Some(42));
//! ```

use crate::time::Timestamp;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to a message in flight.
pub type MsgRef = Arc<dyn Msg>;

/// Upcast helper so that `dyn Msg` can be downcast to its concrete type.
pub trait AsAny: Any {
  /// Returns `self` as `&dyn Any`.
  fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// A unit of data flowing along an edge.
///
/// The only thing the engine needs from a message is its logical timestamp;
/// everything else is opaque and interpreted by nodes.
pub trait Msg: AsAny + Debug + Send + Sync {
  /// Returns the logical timestamp of this message.
  fn time_tick(&self) -> Timestamp;
}

impl dyn Msg {
  /// Returns the concrete message if it is of type `T`.
  pub fn downcast_ref<T: Msg>(&self) -> Option<&T> {
    self.as_any().downcast_ref::<T>()
  }

  /// Returns `true` if the concrete message is of type `T`.
  pub fn is<T: Msg>(&self) -> bool {
    self.as_any().is::<T>()
  }
}
