//! The `Engine` trait -- the adapter interface for agent CLIs.
//!
//! Each concrete engine (Claude Code, Codex, OpenCode) implements this
//! trait. The trait is object-safe so engines can be handed around as
//! `Box<dyn Engine>` by the [`super::EngineRegistry`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::ExecError;
use super::exec;
use super::parse::ParserState;
use super::types::{EngineConfig, Invocation, OutputMode};
use crate::event::{Event, RunResult};

/// Line-by-line translator from one engine's wire format to [`Event`]s.
///
/// A parser is created fresh for every invocation and owns its state.
pub trait LineParser: Send {
    /// Translate one output line. Lines that are malformed or carry
    /// nothing of interest yield `None` and leave the state untouched.
    fn parse_line(&mut self, line: &str) -> Option<Event>;

    /// Accumulated state for the invocation.
    fn state(&self) -> &ParserState;

    /// Final success determination for the whole invocation.
    fn succeeded(&self) -> bool {
        let state = self.state();
        state.last_result() == Some(true) && !state.failed()
    }
}

/// Receiver for normalized events.
pub trait EventSink: Send + Sync {
    fn show_event(&self, event: &Event);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn show_event(&self, _event: &Event) {}
}

/// Adapter interface for driving an external coding-agent CLI.
///
/// Implementors only describe *how* to invoke their tool and *how* to
/// read its output; spawning, streaming, timeouts and cancellation are
/// shared and provided by the default methods.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Registry name (e.g. "claude").
    fn name(&self) -> &str;

    /// Overrides this engine was built with.
    fn config(&self) -> &EngineConfig;

    /// Build the command line for a prompt.
    fn invocation(&self, prompt: &str, mode: OutputMode) -> Invocation;

    /// Fresh parser for one streaming invocation.
    fn parser(&self) -> Box<dyn LineParser>;

    /// Accept output from `prompt` despite a non-zero exit, provided
    /// something was printed and standard error stayed empty.
    fn tolerates_exit_code(&self) -> bool {
        false
    }

    /// Run the engine with streaming output, forwarding every event to
    /// `sink`.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        sink: &dyn EventSink,
    ) -> Result<RunResult, ExecError> {
        exec::execute(self, cancel, prompt, sink).await
    }

    /// Run the engine in plain-text mode and return its output.
    async fn prompt(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, ExecError> {
        exec::prompt(self, cancel, prompt).await
    }

    /// Stream like [`Engine::execute`] but return only the assistant text.
    async fn stream_prompt(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        sink: &dyn EventSink,
    ) -> Result<String, ExecError> {
        exec::stream_prompt(self, cancel, prompt, sink).await
    }
}

// Compile-time assertion: Engine must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Engine) {}
};
