// src/config/mod.rs

//! Configuration for the execution engine and logging.
//!
//! - `model.rs`: TOML-backed raw model and the validated model.
//! - `loader.rs`: reading a file or string.
//! - `validate.rs`: `RawConfigFile` → `ConfigFile` conversion.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{from_toml_str, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, DEFAULT_STATE_FLUSH_FREQUENCY, LoggingSection, RawConfigFile,
    RawSchedulerSection, SchedulerConfig,
};
pub use validate::parse_duration;
