//! Supporting types for the engine adapters.

use std::time::Duration;

/// Timeout applied when the configuration does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Optional per-engine overrides, consumed when an adapter is built.
///
/// Every field may be absent; absence means "use the adapter's default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub timeout: Option<Duration>,
}

impl EngineConfig {
    /// Configured model, treating an empty string as unset.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    /// Configured provider, treating an empty string as unset.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// Configured timeout, falling back to [`DEFAULT_TIMEOUT`] when unset or zero.
    pub fn timeout(&self) -> Duration {
        self.timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Which output format an invocation asks the engine for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Newline-delimited structured records.
    Stream,
    /// Plain text, used by the non-streaming prompt.
    Text,
}

/// A fully built command line for one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's standard input, which is then closed.
    /// `None` means the prompt travels as an argument and stdin is null.
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `flag value` when `value` is present.
    pub fn opt(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.arg(flag).arg(v),
            None => self,
        }
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}
