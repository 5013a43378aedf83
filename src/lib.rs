// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod expression;
pub mod logging;
pub mod types;
pub mod watch;

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, config_root_dir, load_and_validate};
use crate::engine::start_watch;
use crate::watch::select_backend;

pub use crate::engine::{
    ChangeContext, CommandRoutine, RetryPolicy, Routine, Subscription, TaskHandle, TaskOutcome,
    Trigger, Watch, WatchConfig,
};
pub use crate::errors::WatchError;
pub use crate::expression::{Expression, MatchScope};
pub use crate::types::{BackendChoice, ChangeEvent};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - backend selection
/// - the watch session (change queue + one subscription per trigger)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root_dir = config_root_dir(&config_path);

    if args.dry_run {
        print_dry_run(&cfg, &root_dir);
        return Ok(());
    }

    let watch_config = cfg.to_watch_config(&root_dir);
    let choice = args.backend.unwrap_or(cfg.config.backend);
    let backend = select_backend(&watch_config.project, choice)?;
    info!(backend = backend.label(), project = %watch_config.project.display(), "selected watch backend");

    let watch = start_watch(watch_config, backend).await?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => info!("received Ctrl-C; shutting down"),
                Err(e) => eprintln!("failed to listen for Ctrl+C: {e}"),
            }
            watch.shutdown().await;
        }
        _ = watch.stopped() => {
            info!("watch stopped on its own");
        }
    }

    Ok(())
}

/// Simple dry-run output: print global settings and every trigger.
fn print_dry_run(cfg: &ConfigFile, root_dir: &std::path::Path) {
    println!("watchrun dry-run");
    println!("  config.project = {}", cfg.project_root(root_dir).display());
    println!("  config.debounce_ms = {}", cfg.config.debounce_ms);
    println!("  config.use_hash = {}", cfg.config.use_hash);
    println!("  config.backend = {}", cfg.config.backend);
    println!("  config.kill_grace_ms = {}", cfg.config.kill_grace_ms);
    println!();

    println!("triggers ({}):", cfg.trigger.len());
    for (name, trigger) in cfg.trigger.iter() {
        println!("  - {name}");
        println!("      cmd: {}", trigger.cmd);
        println!("      expression: {}", trigger.expression);
        if !trigger.interruptible {
            println!("      interruptible: false");
        }
        if trigger.persistent {
            println!("      persistent: true");
        }
        if !trigger.initial_run {
            println!("      initial_run: false");
        }
        if let Some(ref teardown) = trigger.teardown {
            println!("      teardown: {teardown}");
        }
        if trigger.retry.max_retries > 0 {
            println!(
                "      retry: {} times, {}ms..{}ms, factor {}",
                trigger.retry.max_retries,
                trigger.retry.min_delay_ms,
                trigger.retry.max_delay_ms,
                trigger.retry.factor
            );
        }
    }

    debug!("dry-run complete (nothing watched)");
}
