//! Logical time for flow-graph ordering and progress.
//!
//! This module provides [`Timestamp`] (the time tick carried by every message),
//! [`Timestamped`] (a ready-made message pairing a payload with a tick),
//! [`Watermark`] (the per-node safe watermark published by workers) and
//! [`EdgeClock`] (the per-edge monotonicity check used by time-ticked graphs).
//!
//! Logical time is not wall-clock time; it is whatever monotonic counter the
//! producer stamps onto messages (a log position, a hybrid timestamp, a batch id).
//!
//! ## Progress contract
//!
//! - **Per-edge monotonicity**: along a single edge, ticks never decrease. A
//!   time-ticked graph treats a regression as a fatal ordering violation.
//! - **Watermark**: once a node has collected one message per incoming edge, the
//!   minimum of their ticks is its safe watermark. `watermark.less_than(t)` means
//!   "this node may still see data with tick < t".

use crate::error::OrderingViolation;
use crate::message::Msg;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Logical time tick attached to every message.
///
/// Implements [`Ord`] and [`Default`] (0) so it can be used as a totally ordered
/// timestamp.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The smallest possible tick.
    pub const MIN: Timestamp = Timestamp(0);

    /// Creates a new timestamp from a raw value.
    #[inline]
    pub const fn new(t: u64) -> Self {
        Self(t)
    }

    /// Returns the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(t: u64) -> Self {
        Self(t)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A payload with an attached time tick.
///
/// The general-purpose message type: any `Debug + Send + Sync` payload becomes a
/// [`Msg`] once wrapped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Timestamped<T> {
    /// The time tick of this item.
    pub time: Timestamp,
    /// The payload.
    pub payload: T,
}

impl<T> Timestamped<T> {
    /// Creates a new timestamped item.
    #[inline]
    pub const fn new(payload: T, time: Timestamp) -> Self {
        Self { time, payload }
    }

    /// Returns a reference to the payload.
    #[inline]
    pub const fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns the time tick.
    #[inline]
    pub const fn time(&self) -> Timestamp {
        self.time
    }
}

impl<T> Msg for Timestamped<T>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    fn time_tick(&self) -> Timestamp {
        self.time
    }
}

/// Shared, forward-only safe watermark of a node.
///
/// Written by the node's worker after every collected round, read by anyone
/// holding a clone (checkpoint/flush coordinators, tests).
#[derive(Clone, Debug, Default)]
pub struct Watermark(Arc<AtomicU64>);

impl Watermark {
    /// Creates a watermark at [`Timestamp::MIN`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current watermark.
    #[inline]
    pub fn get(&self) -> Timestamp {
        Timestamp(self.0.load(AtomicOrdering::Acquire))
    }

    /// Advances the watermark to at least `t`. Smaller values are ignored.
    #[inline]
    pub(crate) fn advance_to(&self, t: Timestamp) {
        self.0.fetch_max(t.as_u64(), AtomicOrdering::AcqRel);
    }

    /// Returns whether the node may still see a tick less than `t`.
    #[inline]
    pub fn less_than(&self, t: Timestamp) -> bool {
        self.get() < t
    }
}

/// Last tick observed on one edge.
#[derive(Clone, Debug)]
pub(crate) struct EdgeClock {
    edge: String,
    last: Option<Timestamp>,
}

impl EdgeClock {
    pub(crate) fn new(edge: impl Into<String>) -> Self {
        Self {
            edge: edge.into(),
            last: None,
        }
    }

    pub(crate) fn edge(&self) -> &str {
        &self.edge
    }

    /// Records `tick`, failing if it is smaller than the previous one.
    pub(crate) fn observe(&mut self, tick: Timestamp) -> Result<(), OrderingViolation> {
        if let Some(previous) = self.last {
            if tick < previous {
                return Err(OrderingViolation::Regression {
                    edge: self.edge.clone(),
                    previous,
                    current: tick,
                });
            }
        }
        self.last = Some(tick);
        Ok(())
    }
}

/// Minimum tick of a round's inputs, or `None` for an empty round.
pub(crate) fn round_watermark(inputs: &[crate::message::MsgRef]) -> Option<Timestamp> {
    inputs.iter().map(|m| m.time_tick()).min()
}
