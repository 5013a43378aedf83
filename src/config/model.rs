// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{CommandRoutine, RetryPolicy, Trigger, WatchConfig};
use crate::expression::Expression;
use crate::types::BackendChoice;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// debounce_ms = 500
///
/// [trigger.build]
/// cmd = "cargo build"
/// expression = ["match", "*.rs"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All triggers from `[trigger.<name>]`, keyed by trigger name.
    #[serde(default)]
    pub trigger: BTreeMap<String, TriggerConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub trigger: BTreeMap<String, TriggerConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, trigger: BTreeMap<String, TriggerConfig>) -> Self {
        Self { config, trigger }
    }

    /// Absolute project root. A relative `project` is resolved against
    /// `config_dir`, the directory holding the config file.
    pub fn project_root(&self, config_dir: &Path) -> PathBuf {
        let joined = config_dir.join(&self.config.project);
        let absolute = if joined.is_absolute() {
            joined
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&joined))
                .unwrap_or(joined)
        };
        absolute.canonicalize().unwrap_or(absolute)
    }

    /// Build one [`Trigger`] per `[trigger.<name>]` section, in name order.
    pub fn build_triggers(&self) -> Vec<Trigger> {
        self.trigger
            .iter()
            .map(|(name, cfg)| cfg.to_trigger(name))
            .collect()
    }

    pub fn to_watch_config(&self, config_dir: &Path) -> WatchConfig {
        WatchConfig {
            project: self.project_root(config_dir),
            debounce: Duration::from_millis(self.config.debounce_ms),
            use_hash: self.config.use_hash,
            kill_grace: Duration::from_millis(self.config.kill_grace_ms),
            triggers: self.build_triggers(),
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Directory to watch, relative to the config file.
    #[serde(default = "default_project")]
    pub project: PathBuf,

    /// Quiet period after the last change before a batch is delivered.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Skip changes that leave a file's content hash unchanged.
    #[serde(default)]
    pub use_hash: bool,

    /// `"auto"`, `"native"` or `"poll"`.
    #[serde(default)]
    pub backend: BackendChoice,

    /// How long a subprocess tree gets to exit after SIGTERM before SIGKILL.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_project() -> PathBuf {
    PathBuf::from(".")
}

fn default_debounce_ms() -> u64 {
    1_000
}

fn default_kill_grace_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            project: default_project(),
            debounce_ms: default_debounce_ms(),
            use_hash: false,
            backend: BackendChoice::default(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

/// `[trigger.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    /// Shell command run on every matching change.
    pub cmd: String,

    /// Which paths fire this trigger, e.g.
    /// `["allof", ["match", "*.rs"], ["not", ["dirname", "target"]]]`.
    pub expression: Expression,

    #[serde(default = "default_true")]
    pub interruptible: bool,

    #[serde(default)]
    pub persistent: bool,

    #[serde(default = "default_true")]
    pub initial_run: bool,

    /// Shell command run once when the watch shuts down.
    #[serde(default)]
    pub teardown: Option<String>,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl TriggerConfig {
    pub fn to_trigger(&self, name: &str) -> Trigger {
        let mut trigger = Trigger::new(name, self.expression.clone(), CommandRoutine::new(&self.cmd))
            .interruptible(self.interruptible)
            .persistent(self.persistent)
            .initial_run(self.initial_run)
            .retry(self.retry.to_policy());
        if let Some(teardown) = &self.teardown {
            trigger = trigger.on_teardown(CommandRoutine::new(teardown));
        }
        trigger
    }
}

/// `[trigger.<name>.retry]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::retries(self.max_retries)
            .with_delays(
                Duration::from_millis(self.min_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_factor(self.factor)
    }
}
