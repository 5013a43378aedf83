// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::engine::{validate_trigger_name, validate_triggers};
use crate::errors::{Result, WatchError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.trigger))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_triggers(cfg)?;
    validate_global_config(cfg)?;
    validate_trigger_sections(cfg)?;
    Ok(())
}

fn ensure_has_triggers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.trigger.is_empty() {
        return Err(WatchError::ConfigError(
            "config must contain at least one [trigger.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.debounce_ms == 0 {
        return Err(WatchError::ConfigError(
            "[config].debounce_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_trigger_sections(cfg: &RawConfigFile) -> Result<()> {
    for (name, trigger) in &cfg.trigger {
        validate_trigger_name(name)?;
        if trigger.cmd.trim().is_empty() {
            return Err(WatchError::ConfigError(format!(
                "trigger '{name}': cmd must not be empty"
            )));
        }
        if trigger.teardown.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(WatchError::ConfigError(format!(
                "trigger '{name}': teardown must not be empty when set"
            )));
        }
    }

    // Flag combinations and retry sanity are the engine's rules; check them
    // on the triggers that would actually be scheduled.
    let triggers: Vec<_> = cfg
        .trigger
        .iter()
        .map(|(name, t)| t.to_trigger(name))
        .collect();
    validate_triggers(&triggers)
}
