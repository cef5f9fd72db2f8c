//! Claude Code engine adapter.
//!
//! Runs `claude -p --output-format stream-json` with the prompt on stdin
//! and parses its JSONL output into [`Event`] values.

use serde_json::Value;
use tracing::debug;

use super::parse::{
    self, ParserState, QUERY_BUDGET, TEXT_BUDGET, command_detail, shorten_path, str_field,
    truncate, u64_field,
};
use super::trait_def::{Engine, LineParser};
use super::types::{EngineConfig, Invocation, OutputMode};
use crate::event::Event;

/// Engine adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Debug, Clone)]
pub struct ClaudeCodeEngine {
    /// Path to the `claude` binary. Defaults to `"claude"` (found via `$PATH`).
    binary: String,
    config: EngineConfig,
}

impl ClaudeCodeEngine {
    pub const NAME: &'static str = "claude";

    /// Create an engine that will look for `claude` on `$PATH`.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_binary("claude", config)
    }

    /// Create an engine with a custom binary path.
    ///
    /// Useful for testing or when `claude` is installed in a non-standard
    /// location.
    pub fn with_binary(path: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            binary: path.into(),
            config,
        }
    }
}

impl Engine for ClaudeCodeEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn invocation(&self, prompt: &str, mode: OutputMode) -> Invocation {
        let inv = Invocation::new(&self.binary).arg("-p").arg("--output-format");
        let inv = match mode {
            OutputMode::Stream => inv
                .arg("stream-json")
                .arg("--verbose")
                .arg("--include-partial-messages"),
            OutputMode::Text => inv.arg("text"),
        };
        // Long prompts are silently cut when passed as an argument.
        inv.opt("--model", self.config.model()).stdin(prompt)
    }

    fn parser(&self) -> Box<dyn LineParser> {
        Box::new(ClaudeParser::default())
    }
}

// ---------------------------------------------------------------------------
// JSONL parsing
// ---------------------------------------------------------------------------

/// Per-invocation parser for Claude Code's stream-json output.
#[derive(Debug, Default)]
pub struct ClaudeParser {
    state: ParserState,
}

impl LineParser for ClaudeParser {
    fn parse_line(&mut self, line: &str) -> Option<Event> {
        let v = parse::parse_json(line)?;
        match str_field(&v, "type").unwrap_or("") {
            // ----------------------------------------------------------------
            // system/init -- session start, model known immediately
            // ----------------------------------------------------------------
            "system" => {
                if str_field(&v, "subtype") != Some("init") {
                    return None;
                }
                self.state.reveal_model(str_field(&v, "model"));
                Some(Event::init(self.state.model().map(str::to_string)))
            }

            // ----------------------------------------------------------------
            // assistant -- a message with content blocks
            // ----------------------------------------------------------------
            "assistant" => self.assistant(v.get("message")?),

            // ----------------------------------------------------------------
            // stream_event -- partial message deltas (thinking lifecycle)
            // ----------------------------------------------------------------
            "stream_event" => self.stream_event(v.get("event")?),

            // ----------------------------------------------------------------
            // result -- end of turn, explicit success flag
            // ----------------------------------------------------------------
            "result" => {
                let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                let success = !is_error && str_field(&v, "subtype") == Some("success");
                if !success {
                    let message = str_field(&v, "result")
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            format!(
                                "turn ended with {}",
                                str_field(&v, "subtype").unwrap_or("an error")
                            )
                        });
                    self.state.set_error(message);
                }
                if let Some(usage) = v.get("usage") {
                    self.state.add_tokens(summed_usage(usage));
                }
                self.state.take_failed();
                self.state.record_result(success);

                let mut event = Event::result(success, self.state.tokens())
                    .with_model(self.state.model().map(str::to_string))
                    .with_duration_ms(v.get("duration_ms").and_then(Value::as_u64));
                if let Some(text) = str_field(&v, "result") {
                    event = event.with_message(text);
                }
                Some(event)
            }

            "error" => {
                let message = v
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .or_else(|| str_field(&v, "message"))
                    .unwrap_or("unknown error")
                    .to_string();
                self.state.mark_failed(Some(message.clone()));
                Some(Event::error(message))
            }

            // user records carry tool results; nothing to show.
            other => {
                debug!(event_type = other, "ignoring claude stream-json record");
                None
            }
        }
    }

    fn state(&self) -> &ParserState {
        &self.state
    }
}

impl ClaudeParser {
    fn assistant(&mut self, message: &Value) -> Option<Event> {
        self.state.reveal_model(str_field(message, "model"));
        let blocks = message.get("content")?.as_array()?;

        // One record normally holds one block; when several arrive together
        // the tool call is the more useful thing to show.
        let mut text_event = None;
        let mut tool_event = None;
        for block in blocks {
            match str_field(block, "type").unwrap_or("") {
                "text" => {
                    if let Some(text) = str_field(block, "text") {
                        self.state.collect_text(text);
                        if !text.trim().is_empty() {
                            text_event = Some(Event::text(truncate(text, TEXT_BUDGET)));
                        }
                    }
                }
                "tool_use" => {
                    let name = str_field(block, "name").unwrap_or("unknown");
                    let input = block.get("input").unwrap_or(&Value::Null);
                    let (tool, detail) = tool_summary(name, input);
                    if let Some(event) = self.state.tool(&tool, detail) {
                        tool_event.get_or_insert(event);
                    }
                }
                // Thinking arrives through stream_event deltas.
                _ => {}
            }
        }
        tool_event.or(text_event)
    }

    fn stream_event(&mut self, event: &Value) -> Option<Event> {
        match str_field(event, "type").unwrap_or("") {
            "content_block_start" => {
                let block_type = event
                    .get("content_block")
                    .and_then(|b| str_field(b, "type"));
                (block_type == Some("thinking")).then(|| self.state.thinking_start())
            }
            "content_block_delta" => {
                let delta = event.get("delta")?;
                if str_field(delta, "type") == Some("thinking_delta") {
                    self.state
                        .thinking_delta(str_field(delta, "thinking").unwrap_or(""));
                }
                None
            }
            "content_block_stop" => self.state.thinking_end(),
            _ => None,
        }
    }
}

/// Sum every usage field Claude reports for a turn.
fn summed_usage(usage: &Value) -> u64 {
    u64_field(usage, "input_tokens")
        + u64_field(usage, "output_tokens")
        + u64_field(usage, "cache_read_input_tokens")
        + u64_field(usage, "cache_creation_input_tokens")
}

/// Map a Claude Code tool call to a display verb and detail.
fn tool_summary(name: &str, input: &Value) -> (String, String) {
    let field = |key: &str| str_field(input, key).unwrap_or("");
    let path = || {
        let p = str_field(input, "file_path")
            .or_else(|| str_field(input, "path"))
            .or_else(|| str_field(input, "notebook_path"))
            .unwrap_or("");
        shorten_path(p)
    };
    match name {
        "Read" | "NotebookRead" => ("read".into(), path()),
        "Write" => ("write".into(), path()),
        "Edit" | "MultiEdit" | "NotebookEdit" => ("edit".into(), path()),
        "Bash" => ("run".into(), command_detail(field("command"))),
        "Grep" | "Glob" => ("search".into(), truncate(field("pattern"), QUERY_BUDGET)),
        "WebFetch" => ("fetch".into(), truncate(field("url"), QUERY_BUDGET)),
        "WebSearch" => ("fetch".into(), truncate(field("query"), QUERY_BUDGET)),
        "Task" => ("agent".into(), truncate(field("description"), TEXT_BUDGET)),
        "TodoWrite" => ("plan".into(), String::new()),
        other => (other.to_lowercase(), String::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
