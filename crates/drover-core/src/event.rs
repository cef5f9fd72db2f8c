//! The normalized event vocabulary shared by every engine adapter.
//!
//! Adapters translate their tool's native stream into [`Event`] values;
//! the display and the iteration loop only ever see these types (plus
//! [`RunResult`]), never an engine's raw wire format.

use std::time::Duration;

/// Kind of a normalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Session start. May carry the model identifier.
    Init,
    /// The agent invoked a tool.
    Tool,
    /// Assistant-authored text.
    Text,
    /// Internal reasoning started or finished.
    Thinking,
    /// End of a turn, with success and usage.
    Result,
    /// The engine reported an error.
    Error,
    /// Anything else. Adapters normally drop these instead of emitting them.
    Unknown,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Init => "init",
            EventKind::Tool => "tool",
            EventKind::Text => "text",
            EventKind::Thinking => "thinking",
            EventKind::Result => "result",
            EventKind::Error => "error",
            EventKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Optional payload attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventData {
    /// Model identifier, once the engine has revealed it.
    pub model: Option<String>,
    /// Turn outcome (only meaningful on `Result`).
    pub success: Option<bool>,
    /// Running token total for the invocation.
    pub tokens: u64,
    /// Turn duration as reported by the engine.
    pub duration_ms: Option<u64>,
    /// Free-form message (error text, result text).
    pub message: Option<String>,
}

/// One normalized unit of progress information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Lowercase verb-like label such as `read`, `run`, `fetch`.
    pub tool: String,
    /// Display-sized argument (path, command, query).
    pub detail: String,
    pub data: EventData,
}

impl Event {
    fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            tool: String::new(),
            detail: String::new(),
            data: EventData::default(),
        }
    }

    pub fn init(model: Option<String>) -> Self {
        let mut event = Self::bare(EventKind::Init);
        event.data.model = model;
        event
    }

    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            detail: detail.into(),
            ..Self::bare(EventKind::Tool)
        }
    }

    pub fn text(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            ..Self::bare(EventKind::Text)
        }
    }

    pub fn thinking(detail: impl Into<String>) -> Self {
        Self {
            tool: "thinking".to_string(),
            detail: detail.into(),
            ..Self::bare(EventKind::Thinking)
        }
    }

    pub fn result(success: bool, tokens: u64) -> Self {
        let mut event = Self::bare(EventKind::Result);
        event.data.success = Some(success);
        event.data.tokens = tokens;
        event
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut event = Self::bare(EventKind::Error);
        event.data.message = Some(message.into());
        event
    }

    /// Attach a model identifier.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.data.model = model;
        self
    }

    /// Attach a duration reported by the engine.
    pub fn with_duration_ms(mut self, duration_ms: Option<u64>) -> Self {
        self.data.duration_ms = duration_ms;
        self
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.data.message = Some(message.into());
        self
    }

    /// Whether this is a `Result` event reporting success.
    pub fn is_success(&self) -> bool {
        self.kind == EventKind::Result && self.data.success == Some(true)
    }
}

/// Terminal outcome of one external-process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// The adapter's own success determination.
    pub success: bool,
    /// A completion marker appeared in the output. Advisory only.
    pub complete: bool,
    /// Everything read from the engine's standard output.
    pub output: String,
    pub duration: Duration,
    pub tokens: u64,
    pub error: Option<String>,
}
