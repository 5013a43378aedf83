// src/engine/mod.rs

//! Trigger scheduling engine.
//!
//! This module ties together:
//! - the trigger model and its retry policy
//! - the user routine seam ([`Routine`]) and the context it receives
//! - the per-trigger scheduler ([`Subscription`]) enforcing the
//!   interruptible / queued / persistent rules
//! - the watch orchestrator that connects a backend to all subscriptions and
//!   owns the shutdown sequence

pub mod orchestrator;
pub mod retry;
pub mod routine;
pub mod subscription;
pub mod trigger;

pub use orchestrator::{Watch, WatchConfig, start_watch};
pub use retry::RetryPolicy;
pub use routine::{BoxFuture, ChangeContext, CommandRoutine, Routine};
pub use subscription::{Subscription, TaskHandle, TaskOutcome};
pub use trigger::{Trigger, validate_trigger_name, validate_triggers};
