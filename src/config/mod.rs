// src/config/mod.rs

//! Configuration loading and validation for watchrun.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate trigger definitions before anything is watched (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    DEFAULT_CONFIG_FILE, config_root_dir, load_and_validate, load_from_path, load_from_str,
};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, RetryConfig, TriggerConfig};
