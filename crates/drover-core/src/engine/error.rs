//! Errors surfaced by the execution contract.

use std::time::Duration;

/// Failure of one engine invocation.
///
/// Timeouts and cancellations keep whatever the engine had written to
/// standard output before it was stopped.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{program}: executable not found -- is it installed and on PATH?")]
    NotFound { program: String },

    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution timed out after {}", format_duration(.after))]
    TimedOut {
        after: Duration,
        partial_output: String,
    },

    #[error("execution cancelled")]
    Cancelled { partial_output: String },

    #[error("{engine} exited with {}: {}", exit_label(.code), stderr_summary(.stderr))]
    Failed {
        engine: String,
        code: Option<i32>,
        stderr: String,
        partial_output: String,
    },

    #[error("i/o error while reading engine output: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Output captured before the failure, if any was kept.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ExecError::TimedOut { partial_output, .. }
            | ExecError::Cancelled { partial_output }
            | ExecError::Failed { partial_output, .. } => Some(partial_output),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::TimedOut { .. })
    }

    /// Errors that no amount of retrying can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecError::NotFound { .. }
                | ExecError::Spawn { .. }
                | ExecError::TimedOut { .. }
                | ExecError::Cancelled { .. }
        )
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

fn stderr_summary(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return "no error output".to_string();
    }
    // The tail of stderr is where CLIs put the actual failure.
    let lines: Vec<&str> = trimmed.lines().collect();
    let tail = &lines[lines.len().saturating_sub(3)..];
    tail.join(" | ")
}

/// Render a duration the way Go prints one (`15m0s`, `1h2m3s`, `1.5s`).
pub fn format_duration(d: &Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let ms = total_ms % 60_000;
    let seconds = if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        let s = format!("{:.3}", ms as f64 / 1000.0);
        format!("{}s", s.trim_end_matches('0'))
    };
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}")
    } else {
        seconds
    }
}
