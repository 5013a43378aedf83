// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`spawn`] runs shell commands on behalf of a task, tied to the task's
//!   cancellation token.
//! - [`kill_tree`] terminates a process and all of its descendants, used
//!   when a task is interrupted or the watch shuts down.

pub mod kill_tree;
pub mod spawn;

pub use kill_tree::{terminate, DEFAULT_GRACE_PERIOD};
pub use spawn::Spawner;
