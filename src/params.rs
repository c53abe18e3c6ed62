//! Out-of-band node parameters.
//!
//! An external configuration subsystem (file or key-value store refreshers)
//! updates node parameters without going through message queues. It holds a
//! [`ParamsPublisher`]; the node's worker holds the matching [`ParamsWatch`].
//!
//! The worker reads parameters once per round, between rounds: if the
//! published snapshot changed since the last round it computes the
//! [`ParamsEvent`]s (created, updated and deleted keys) against the snapshot
//! it last saw and hands both to [`Node::on_params`](crate::node::Node::on_params).
//! Intermediate snapshots published within a single round are coalesced.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Immutable snapshot of a node's parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeParams(Arc<BTreeMap<String, String>>);

impl NodeParams {
  /// Creates a snapshot from key/value pairs.
  pub fn from_map(map: BTreeMap<String, String>) -> Self {
    Self(Arc::new(map))
  }

  /// Returns the raw value of `key`.
  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  /// Parses the value of `key`, returning `None` if it is absent or malformed.
  pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
    self.get(key).and_then(|v| v.parse().ok())
  }

  /// Returns the number of keys.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Returns `true` if there are no keys.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Iterates over keys and values in key order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Computes the events that turn `self` into `next`, in key order.
  pub fn diff(&self, next: &NodeParams) -> Vec<ParamsEvent> {
    let mut events = Vec::new();
    for (key, value) in next.0.iter() {
      match self.0.get(key) {
        None => events.push(ParamsEvent::new(key, ParamsEventKind::Created, Some(value))),
        Some(old) if old != value => {
          events.push(ParamsEvent::new(key, ParamsEventKind::Updated, Some(value)))
        }
        Some(_) => {}
      }
    }
    for key in self.0.keys() {
      if !next.0.contains_key(key) {
        events.push(ParamsEvent::new(key, ParamsEventKind::Deleted, None));
      }
    }
    events.sort_by(|a, b| a.key.cmp(&b.key));
    events
  }
}

/// What happened to a parameter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamsEventKind {
  /// The key did not exist before.
  Created,
  /// The key existed with a different value.
  Updated,
  /// The key was removed.
  Deleted,
}

/// A single parameter change delivered to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsEvent {
  /// Parameter key.
  pub key: String,
  /// Kind of change.
  pub kind: ParamsEventKind,
  /// New value; `None` for deletions.
  pub value: Option<String>,
}

impl ParamsEvent {
  fn new(key: &str, kind: ParamsEventKind, value: Option<&String>) -> Self {
    Self {
      key: key.to_string(),
      kind,
      value: value.cloned(),
    }
  }
}

/// Write side, held by the external configuration subsystem.
#[derive(Debug, Clone)]
pub struct ParamsPublisher {
  tx: Arc<watch::Sender<NodeParams>>,
}

impl ParamsPublisher {
  /// Sets `key` to `value`.
  pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
    let (key, value) = (key.into(), value.into());
    trace!(key = %key, value = %value, "ParamsPublisher::set()");
    self.tx.send_modify(|params| {
      let mut map = (*params.0).clone();
      map.insert(key, value);
      *params = NodeParams::from_map(map);
    });
  }

  /// Removes `key`. Publishing is skipped if the key was absent.
  pub fn remove(&self, key: &str) {
    trace!(key = %key, "ParamsPublisher::remove()");
    self.tx.send_if_modified(|params| {
      if !params.0.contains_key(key) {
        return false;
      }
      let mut map = (*params.0).clone();
      map.remove(key);
      *params = NodeParams::from_map(map);
      true
    });
  }

  /// Replaces the whole parameter set, as a refresher does after reloading its source.
  pub fn replace(&self, map: BTreeMap<String, String>) {
    trace!(keys = map.len(), "ParamsPublisher::replace()");
    self.tx.send_replace(NodeParams::from_map(map));
  }

  /// Returns the latest published snapshot.
  pub fn current(&self) -> NodeParams {
    self.tx.borrow().clone()
  }
}

/// Read side, owned by the node's worker.
#[derive(Debug)]
pub(crate) struct ParamsWatch {
  rx: watch::Receiver<NodeParams>,
  seen: NodeParams,
}

impl ParamsWatch {
  /// Returns the new snapshot and its change events if anything was published
  /// since the previous call.
  pub(crate) fn refresh(&mut self) -> Option<(NodeParams, Vec<ParamsEvent>)> {
    // A closed channel just means the publisher is gone; keep the last snapshot.
    if !self.rx.has_changed().unwrap_or(false) {
      return None;
    }
    let next = self.rx.borrow_and_update().clone();
    let events = self.seen.diff(&next);
    self.seen = next.clone();
    if events.is_empty() {
      return None;
    }
    Some((next, events))
  }
}

/// Creates a connected publisher/watch pair starting from an empty snapshot.
pub(crate) fn channel() -> (ParamsPublisher, ParamsWatch) {
  let (tx, rx) = watch::channel(NodeParams::default());
  (
    ParamsPublisher { tx: Arc::new(tx) },
    ParamsWatch {
      rx,
      seen: NodeParams::default(),
    },
  )
}
