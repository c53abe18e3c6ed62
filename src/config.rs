//! Engine configuration.
//!
//! [`FlowGraphConfig`] holds the knobs of the engine itself (not of individual
//! nodes; those travel through [`params`](crate::params)). It deserializes
//! from JSON with every field optional:
//!
//! ```json
//! { "time_ticked": true, "close_grace_period_ms": 2000 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default time `close()` waits for each worker before aborting it.
pub const DEFAULT_CLOSE_GRACE_PERIOD_MS: u64 = 5_000;

/// Error loading or validating a [`FlowGraphConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
  /// The configuration file could not be read.
  #[error("failed to read flow graph config: {0}")]
  Io(#[from] std::io::Error),
  /// The configuration is not valid JSON for this schema.
  #[error("failed to parse flow graph config: {0}")]
  Parse(#[from] serde_json::Error),
  /// A field has an unusable value.
  #[error("invalid flow graph config: {0}")]
  Invalid(String),
}

/// Configuration of a flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowGraphConfig {
  /// Enforce the time-tick discipline on every edge.
  pub time_ticked: bool,
  /// How long `close()` waits for each worker, in milliseconds.
  pub close_grace_period_ms: u64,
}

impl Default for FlowGraphConfig {
  fn default() -> Self {
    Self {
      time_ticked: false,
      close_grace_period_ms: DEFAULT_CLOSE_GRACE_PERIOD_MS,
    }
  }
}

impl FlowGraphConfig {
  /// Parses and validates a JSON document.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads, parses and validates a JSON file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Self::from_json_str(&contents)
  }

  /// Checks field values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.close_grace_period_ms == 0 {
      return Err(ConfigError::Invalid(
        "close_grace_period_ms must be greater than zero".to_string(),
      ));
    }
    Ok(())
  }

  /// Sets whether the time-tick discipline is enforced.
  pub fn with_time_ticked(mut self, time_ticked: bool) -> Self {
    self.time_ticked = time_ticked;
    self
  }

  /// Sets the close grace period.
  pub fn with_close_grace_period(mut self, grace: Duration) -> Self {
    self.close_grace_period_ms = grace.as_millis() as u64;
    self
  }

  /// Returns the close grace period.
  pub fn close_grace_period(&self) -> Duration {
    Duration::from_millis(self.close_grace_period_ms)
  }
}
