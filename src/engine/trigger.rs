// src/engine/trigger.rs

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::engine::retry::RetryPolicy;
use crate::engine::routine::Routine;
use crate::errors::{Result, WatchError};
use crate::expression::Expression;
use crate::types::generate_short_id;

static TRIGGER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9\-_]+$").expect("static regex is valid"));

/// A rule pairing a path expression with a routine to run on matching changes.
///
/// Defaults: interruptible, not persistent, runs once at startup, no retries.
#[derive(Clone)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub expression: Expression,
    /// Cancel the running routine on new changes instead of queuing behind it.
    pub interruptible: bool,
    /// Long-running routine that is restarted whenever it stops.
    pub persistent: bool,
    /// Run once (with no changed files) as soon as the watch is ready.
    pub initial_run: bool,
    pub retry: RetryPolicy,
    pub on_change: Arc<dyn Routine>,
    pub on_teardown: Option<Arc<dyn Routine>>,
}

impl Trigger {
    pub fn new(name: impl Into<String>, expression: Expression, on_change: impl Routine + 'static) -> Self {
        Self {
            id: generate_short_id(),
            name: name.into(),
            expression,
            interruptible: true,
            persistent: false,
            initial_run: true,
            retry: RetryPolicy::default(),
            on_change: Arc::new(on_change),
            on_teardown: None,
        }
    }

    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn initial_run(mut self, initial_run: bool) -> Self {
        self.initial_run = initial_run;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn on_teardown(mut self, routine: impl Routine + 'static) -> Self {
        self.on_teardown = Some(Arc::new(routine));
        self
    }

    /// Check the invariants a trigger must satisfy before it can be scheduled.
    pub fn validate(&self) -> Result<()> {
        validate_trigger_name(&self.name)?;

        if self.persistent && !self.initial_run {
            return Err(WatchError::InvalidArgument(format!(
                "trigger '{}': persistent triggers must have initial_run enabled",
                self.name
            )));
        }

        let retry = &self.retry;
        if !retry.factor.is_finite() || retry.factor < 1.0 {
            return Err(WatchError::InvalidArgument(format!(
                "trigger '{}': retry factor must be >= 1 (got {})",
                self.name, retry.factor
            )));
        }
        if retry.min_delay > retry.max_delay {
            return Err(WatchError::InvalidArgument(format!(
                "trigger '{}': retry min delay {:?} exceeds max delay {:?}",
                self.name, retry.min_delay, retry.max_delay
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("interruptible", &self.interruptible)
            .field("persistent", &self.persistent)
            .field("initial_run", &self.initial_run)
            .field("retry", &self.retry)
            .field("has_teardown", &self.on_teardown.is_some())
            .finish_non_exhaustive()
    }
}

/// Names must match `[a-z0-9-_]+`.
pub fn validate_trigger_name(name: &str) -> Result<()> {
    if TRIGGER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(WatchError::InvalidArgument(format!(
            "trigger name '{name}' must match [a-z0-9-_]+"
        )))
    }
}

/// Validate each trigger and make sure names are unique.
pub fn validate_triggers(triggers: &[Trigger]) -> Result<()> {
    let mut names = HashSet::new();
    for trigger in triggers {
        trigger.validate()?;
        if !names.insert(trigger.name.as_str()) {
            return Err(WatchError::InvalidArgument(format!(
                "duplicate trigger name '{}'",
                trigger.name
            )));
        }
    }
    Ok(())
}
