// src/config/model.rs

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::logging::LogLevel;

pub const DEFAULT_STATE_FLUSH_FREQUENCY: Duration = Duration::from_millis(100);

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// concurrency = 8
/// continue_on_error = false
/// state_flush_frequency = "100ms"
///
/// [logging]
/// level = "debug"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: RawSchedulerSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSchedulerSection {
    /// Maximum number of jobs running at once. Omitted means unbounded.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Keep dispatching independent jobs after a failure.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Period of scheduler state emission, e.g. `"100ms"` or `"1s"`.
    #[serde(default = "default_state_flush_frequency")]
    pub state_flush_frequency: String,
}

fn default_state_flush_frequency() -> String {
    "100ms".to_string()
}

impl Default for RawSchedulerSection {
    fn default() -> Self {
        Self {
            concurrency: None,
            continue_on_error: false,
            state_flush_frequency: default_state_flush_frequency(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<LogLevel>,
}

/// Validated configuration.
///
/// Constructed through `TryFrom<RawConfigFile>` (see `config::validate`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(scheduler: SchedulerConfig, logging: LoggingSection) -> Self {
        Self { scheduler, logging }
    }
}

/// Settings consumed by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// `None` = unbounded.
    pub concurrency: Option<NonZeroUsize>,
    pub continue_on_error: bool,
    pub state_flush_frequency: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            continue_on_error: false,
            state_flush_frequency: DEFAULT_STATE_FLUSH_FREQUENCY,
        }
    }
}

impl SchedulerConfig {
    /// Limit concurrently running jobs; `0` lifts the limit.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = NonZeroUsize::new(limit);
        self
    }

    pub fn with_continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn with_state_flush_frequency(mut self, every: Duration) -> Self {
        self.state_flush_frequency = every;
        self
    }
}
