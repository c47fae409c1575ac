//! Read-ahead reader configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`crate::reader::ReadAheadEntryReader`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAheadConfig {
    /// Pause threshold of the entry queue.
    #[serde(default = "default_max_records")]
    pub read_ahead_max_records: usize,

    /// Number of entries requested from each `readNext` call.
    #[serde(default = "default_batch_size")]
    pub read_ahead_batch_size: usize,

    /// Idle check period in milliseconds. The detector is disabled when this
    /// is `<= 0` or `>= i64::MAX`.
    #[serde(default = "default_idle_warn_threshold_millis")]
    pub reader_idle_warn_threshold_millis: i64,

    /// When true, positioning at truncated offsets is allowed instead of
    /// raising `AlreadyTruncated`.
    #[serde(default)]
    pub ignore_truncation_status: bool,

    /// When true, positioning inside a partially truncated segment logs a
    /// warning even if the position is otherwise allowed.
    #[serde(default)]
    pub alert_when_positioning_on_truncated: bool,
}

impl Default for ReadAheadConfig {
    fn default() -> Self {
        Self {
            read_ahead_max_records: default_max_records(),
            read_ahead_batch_size: default_batch_size(),
            reader_idle_warn_threshold_millis: default_idle_warn_threshold_millis(),
            ignore_truncation_status: false,
            alert_when_positioning_on_truncated: false,
        }
    }
}

fn default_max_records() -> usize {
    2000
}

fn default_batch_size() -> usize {
    10
}

fn default_idle_warn_threshold_millis() -> i64 {
    120_000
}

impl ReadAheadConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: ReadAheadConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.read_ahead_max_records == 0 {
            return Err(Error::Config(
                "read_ahead_max_records must be greater than zero".into(),
            ));
        }
        if self.read_ahead_batch_size == 0 {
            return Err(Error::Config(
                "read_ahead_batch_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Whether the idle detector should run at all.
    pub fn idle_detector_enabled(&self) -> bool {
        self.reader_idle_warn_threshold_millis > 0
            && self.reader_idle_warn_threshold_millis < i64::MAX
    }

    /// Idle check / idle-tick period as a `Duration`. Only meaningful when
    /// [`Self::idle_detector_enabled`] is true.
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.reader_idle_warn_threshold_millis.max(0) as u64)
    }
}
