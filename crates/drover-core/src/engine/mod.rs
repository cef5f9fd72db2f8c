//! Engine adapter interface for external coding-agent CLIs.
//!
//! This module defines the [`Engine`] trait every adapter implements, the
//! per-invocation [`LineParser`] that normalizes a tool's output into
//! [`Event`](crate::event::Event)s, and the [`EngineRegistry`] used to
//! look engines up by name.
//!
//! # Architecture
//!
//! ```text
//! Loop / CLI
//!     |
//!     v
//! EngineRegistry --create("codex", &config)--> Box<dyn Engine>
//!     |                                            |
//!     |   execute(cancel, prompt, sink) -----------+
//!     |        |
//!     |        v
//!     |   spawn (setsid, NO_COLOR) --> stdout lines
//!     |        |
//!     |   parser.parse_line(line) --> Event --> sink.show_event
//!     |        |
//!     |        v
//!     |   RunResult { success, complete, output, tokens, ... }
//!     |
//!     |   prompt(cancel, prompt)         --> String
//!     |   stream_prompt(cancel, prompt)  --> String
//! ```

pub mod claude_code;
pub mod codex;
pub mod error;
pub(crate) mod exec;
pub mod opencode;
pub mod parse;
pub mod registry;
pub mod trait_def;
pub mod types;

// Re-export the primary public API at the module level.
pub use claude_code::ClaudeCodeEngine;
pub use codex::CodexEngine;
pub use error::ExecError;
pub use exec::COMPLETION_MARKER;
pub use opencode::OpenCodeEngine;
pub use registry::EngineRegistry;
pub use trait_def::{Engine, EventSink, LineParser, NullSink};
pub use types::{DEFAULT_TIMEOUT, EngineConfig, Invocation, OutputMode};
