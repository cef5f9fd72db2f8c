//! `drover run` command: drive an engine over a task file until it is done.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use drover_core::display::Display;
use drover_core::engine::{Engine, EngineRegistry};
use drover_core::looping::{LoopConfig, LoopError, LoopOutcome, TaskFile, run_loop};

use crate::config::DroverConfig;

/// Exit code when the iteration budget ran out with work pending.
pub const EXIT_MAX_ITERATIONS: i32 = 2;
/// Exit code after an interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Options specific to `drover run`.
#[derive(Debug)]
pub struct RunOptions {
    pub tasks: PathBuf,
    pub preamble: Option<PathBuf>,
    pub dry_run: bool,
}

/// Build the configured engine from the default registry.
pub fn create_engine(config: &DroverConfig) -> Result<Box<dyn Engine>> {
    let registry = EngineRegistry::with_defaults();
    registry
        .create(&config.engine_name, &config.engine)
        .with_context(|| {
            format!(
                "unknown engine {:?} (available: {})",
                config.engine_name,
                registry.list().join(", ")
            )
        })
}

/// Cancel `token` on the first Ctrl+C; exit on the second.
pub fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(EXIT_INTERRUPTED);
            }
            eprintln!("\nStopping the engine (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    cancel
}

/// Run the loop and map its outcome to a process exit code.
pub async fn run_tasks(config: &DroverConfig, options: RunOptions) -> Result<i32> {
    let engine = create_engine(config)?;

    let preamble = match &options.preamble {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read preamble {}", path.display()))?,
        ),
        None => None,
    };

    let source = TaskFile::new(&options.tasks);
    // Fail early on a missing or broken file, before any engine output.
    source.load()?;

    let loop_config = LoopConfig {
        max_iterations: config.max_iterations,
        dry_run: options.dry_run,
        retry: config.retry.clone(),
        preamble,
    };

    let display = Display::stdout();
    let cancel = cancel_on_interrupt();

    let result = run_loop(engine.as_ref(), &source, &display, &loop_config, &cancel).await;

    match result {
        Ok(LoopOutcome::Complete { iterations }) => {
            display.summary(iterations, "complete");
            Ok(0)
        }
        Ok(LoopOutcome::MaxIterations { iterations }) => {
            display.summary(iterations, "max iterations reached");
            Ok(EXIT_MAX_ITERATIONS)
        }
        Ok(LoopOutcome::DryRun) => Ok(0),
        Err(LoopError::Cancelled { partial_output }) => {
            display.stop_spinner();
            debug!(output_bytes = partial_output.len(), "run interrupted");
            display.warn("interrupted");
            Ok(EXIT_INTERRUPTED)
        }
        Err(LoopError::Execution { iteration, source }) => {
            display.summary(iteration, "failed");
            eprintln!("drover: execution failed in iteration {iteration}: {source}");
            Ok(1)
        }
        Err(e @ LoopError::TaskSource(_)) => Err(e.into()),
    }
}
