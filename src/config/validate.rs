// src/config/validate.rs

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile, RawSchedulerSection, SchedulerConfig};
use crate::errors::{Result, TaskdagError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let scheduler = validate_scheduler(&raw.scheduler)?;
        Ok(ConfigFile::new_unchecked(scheduler, raw.logging))
    }
}

fn validate_scheduler(section: &RawSchedulerSection) -> Result<SchedulerConfig> {
    let concurrency = match section.concurrency {
        None => None,
        Some(n) => Some(NonZeroUsize::new(n).ok_or_else(|| {
            TaskdagError::Config(
                "[scheduler].concurrency must be >= 1 (got 0); omit it for no limit".to_string(),
            )
        })?),
    };

    let state_flush_frequency = parse_duration(&section.state_flush_frequency).map_err(|e| {
        TaskdagError::Config(format!("[scheduler].state_flush_frequency: {e}"))
    })?;
    if state_flush_frequency.is_zero() {
        return Err(TaskdagError::Config(
            "[scheduler].state_flush_frequency must be greater than zero".to_string(),
        ));
    }

    Ok(SchedulerConfig {
        concurrency,
        continue_on_error: section.continue_on_error,
        state_flush_frequency,
    })
}

/// Parse durations like `"250ms"`, `"3s"`, `"2m"` or `"1h"`.
///
/// Units are case-insensitive and may be separated from the number by
/// whitespace.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration missing unit suffix in '{s}'"))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration number '{digits}': {e}"))?;

    let unit = unit.trim().to_ascii_lowercase();
    let millis_per_unit: u64 = match unit.as_str() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => {
            return Err(format!(
                "unsupported duration unit '{other}'; expected ms, s, m or h"
            ));
        }
    };

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
