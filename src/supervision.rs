//! Failure reporting for node workers.
//!
//! A runtime fault (a time-tick ordering violation, a panic inside `operate`)
//! is fatal to the worker that hit it and to the whole graph: downstream
//! watermarks can no longer be trusted, and there is no degraded
//! partial-operation mode. The worker hands a [`FailureReport`] to the
//! [`Supervisor`], which logs it, publishes it on the failure channel and
//! cancels every worker of the graph.

use crate::error::RuntimeError;
use std::any::Any;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Report of a node worker failure sent to the failure channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReport {
  /// Graph the node belongs to.
  pub graph: String,
  /// Node that failed.
  pub node: String,
  /// What went wrong.
  pub error: RuntimeError,
}

/// Shared by every worker of a graph: reports failures and shuts the graph down.
#[derive(Clone, Debug)]
pub(crate) struct Supervisor {
  graph: String,
  failures: mpsc::UnboundedSender<FailureReport>,
  cancel: CancellationToken,
}

impl Supervisor {
  pub(crate) fn new(
    graph: impl Into<String>,
    failures: mpsc::UnboundedSender<FailureReport>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      graph: graph.into(),
      failures,
      cancel,
    }
  }

  /// Reports a fatal failure of `node` and cancels the graph.
  pub(crate) fn fail(&self, node: &str, error: RuntimeError) {
    error!(graph = %self.graph, node = %node, error = %error, "node failed, closing flow graph");
    let report = FailureReport {
      graph: self.graph.clone(),
      node: node.to_string(),
      error,
    };
    // Nobody listening is fine: the log line above is the report of record.
    let _ = self.failures.send(report);
    self.cancel.cancel();
  }
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::OrderingViolation;
  use crate::time::Timestamp;

  #[tokio::test]
  async fn fail_publishes_report_and_cancels() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new("g", tx, cancel.clone());

    let violation = RuntimeError::from(OrderingViolation::AheadOfWatermark {
      emitted: Timestamp::new(4),
      watermark: Timestamp::new(2),
    });
    supervisor.fail("n", violation.clone());

    assert!(cancel.is_cancelled());
    let report = rx.recv().await.unwrap();
    assert_eq!(report.graph, "g");
    assert_eq!(report.node, "n");
    assert_eq!(report.error, violation);
  }

  #[test]
  fn panic_message_handles_str_and_string() {
    let payload: Box<dyn Any + Send> = Box::new("static");
    assert_eq!(panic_message(payload.as_ref()), "static");
    let payload: Box<dyn Any + Send> = Box::new(format!("owned {}", 1));
    assert_eq!(panic_message(payload.as_ref()), "owned 1");
    let payload: Box<dyn Any + Send> = Box::new(7u8);
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
  }

  #[test]
  fn fail_without_listener_still_cancels() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let cancel = CancellationToken::new();
    Supervisor::new("g", tx, cancel.clone()).fail("n", RuntimeError::NodePanicked("boom".into()));
    assert!(cancel.is_cancelled());
  }
}
