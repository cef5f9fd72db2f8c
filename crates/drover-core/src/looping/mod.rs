//! Iteration loop: hand pending work to an engine until none remains.
//!
//! Each iteration re-reads the task source, renders a prompt for the next
//! pending item, runs the engine through the retry wrapper and decides
//! whether to stop. A completion marker in the engine's output is only
//! believed once the task source agrees that nothing is pending.

pub mod prompt;
pub mod retry;
pub mod tasks;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::display::Display;
use crate::engine::Engine;
use crate::event::RunResult;
pub use retry::{AttemptError, RetryPolicy, execute_with_retry, is_retryable};
pub use tasks::{TaskFile, TaskSource, TaskSourceError, WorkItem};

/// Loop settings.
#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// `None` runs until the work is done.
    pub max_iterations: Option<u32>,
    /// Show the next item and stop without running anything.
    pub dry_run: bool,
    pub retry: RetryPolicy,
    /// Text placed at the top of every prompt.
    pub preamble: Option<String>,
}

/// How a loop that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No pending work remains.
    Complete { iterations: u32 },
    /// The iteration budget ran out with work still pending.
    MaxIterations { iterations: u32 },
    /// Nothing was executed.
    DryRun,
}

impl LoopOutcome {
    pub fn iterations(&self) -> u32 {
        match self {
            LoopOutcome::Complete { iterations } | LoopOutcome::MaxIterations { iterations } => {
                *iterations
            }
            LoopOutcome::DryRun => 0,
        }
    }
}

/// Errors that end the loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("execution failed in iteration {iteration}: {source}")]
    Execution {
        iteration: u32,
        #[source]
        source: AttemptError,
    },

    #[error("run cancelled")]
    Cancelled { partial_output: String },

    #[error(transparent)]
    TaskSource(#[from] TaskSourceError),
}

/// Drive `engine` over the work in `source` until it is done.
pub async fn run_loop(
    engine: &dyn Engine,
    source: &dyn TaskSource,
    display: &Display,
    config: &LoopConfig,
    cancel: &CancellationToken,
) -> Result<LoopOutcome, LoopError> {
    let mut iterations = 0u32;

    loop {
        if cancel.is_cancelled() {
            display.stop_spinner();
            return Err(LoopError::Cancelled {
                partial_output: String::new(),
            });
        }

        // The engine may have edited the task file since the last pass.
        let Some(item) = source.next_pending()? else {
            info!(iterations, "no pending work remains");
            return Ok(LoopOutcome::Complete { iterations });
        };

        if config.dry_run {
            display.dry_run(engine.name(), &item.label(), &item.description, &item.acceptance);
            return Ok(LoopOutcome::DryRun);
        }

        if config.max_iterations.is_some_and(|max| iterations >= max) {
            info!(iterations, task = %item.id, "iteration budget exhausted");
            return Ok(LoopOutcome::MaxIterations { iterations });
        }

        iterations += 1;
        info!(iteration = iterations, task = %item.id, engine = engine.name(), "starting iteration");
        display.header(
            engine.name(),
            engine.config().model(),
            &format!("[{iterations}] {}", item.label()),
        );

        let prompt = prompt::render(&item, &source.location(), config.preamble.as_deref());
        let result = execute_with_retry(&config.retry, cancel, |attempt| {
            let prompt = &prompt;
            async move {
                if attempt > 0 {
                    debug!(attempt, "re-running engine");
                }
                let result = engine.execute(cancel, prompt, display).await?;
                match &result.error {
                    Some(message) if !result.success => {
                        Err(AttemptError::Unsuccessful(message.clone()))
                    }
                    _ => Ok(result),
                }
            }
            .boxed()
        })
        .await;

        let result: RunResult = match result {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                let partial_output = match e {
                    AttemptError::Exec(exec) => {
                        exec.partial_output().unwrap_or_default().to_string()
                    }
                    AttemptError::Unsuccessful(_) => String::new(),
                };
                display.stop_spinner();
                return Err(LoopError::Cancelled { partial_output });
            }
            Err(e) => {
                display.error(&e.to_string());
                return Err(LoopError::Execution {
                    iteration: iterations,
                    source: e,
                });
            }
        };

        if !result.success {
            warn!(
                iteration = iterations,
                task = %item.id,
                "engine reported an unsuccessful run without an error message; continuing"
            );
            display.warn("engine reported failure without a message; moving on");
            continue;
        }

        if result.complete {
            let pending = source.pending_count()?;
            if pending == 0 {
                info!(iterations, "completion confirmed by task source");
                return Ok(LoopOutcome::Complete { iterations });
            }
            warn!(
                iteration = iterations,
                pending, "engine claimed completion but work is still pending; continuing"
            );
            display.warn(&format!(
                "completion claimed but {pending} task{} still pending",
                if pending == 1 { " is" } else { "s are" }
            ));
        }
    }
}
