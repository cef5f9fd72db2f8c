//! Codex engine adapter.
//!
//! Runs `codex exec --json` with the prompt on stdin. Codex reports
//! progress as thread/turn/item records; items are announced when they
//! start and again when they complete.

use serde_json::Value;
use tracing::debug;

use super::parse::{
    self, COMMAND_BUDGET, ParserState, QUERY_BUDGET, TEXT_BUDGET, command_detail, shorten_path,
    str_field, truncate, u64_field, unwrap_argv,
};
use super::trait_def::{Engine, LineParser};
use super::types::{EngineConfig, Invocation, OutputMode};
use crate::event::Event;

/// Engine adapter for the OpenAI Codex CLI.
#[derive(Debug, Clone)]
pub struct CodexEngine {
    binary: String,
    config: EngineConfig,
}

impl CodexEngine {
    pub const NAME: &'static str = "codex";

    pub fn new(config: EngineConfig) -> Self {
        Self::with_binary("codex", config)
    }

    pub fn with_binary(path: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            binary: path.into(),
            config,
        }
    }
}

impl Engine for CodexEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn invocation(&self, prompt: &str, mode: OutputMode) -> Invocation {
        let inv = Invocation::new(&self.binary).arg("exec");
        let inv = match mode {
            OutputMode::Stream => inv.arg("--json"),
            OutputMode::Text => inv,
        };
        // A lone "-" makes codex read the prompt from stdin.
        inv.arg("--skip-git-repo-check")
            .opt("-m", self.config.model())
            .arg("-")
            .stdin(prompt)
    }

    fn parser(&self) -> Box<dyn LineParser> {
        Box::new(CodexParser::default())
    }
}

/// Per-invocation parser for `codex exec --json` output.
#[derive(Debug, Default)]
pub struct CodexParser {
    state: ParserState,
}

impl LineParser for CodexParser {
    fn parse_line(&mut self, line: &str) -> Option<Event> {
        let v = parse::parse_json(line)?;
        match str_field(&v, "type").unwrap_or("") {
            // Codex never names the model in its stream.
            "thread.started" => Some(Event::init(None)),

            "item.started" | "item.updated" => self.item(v.get("item")?, false),
            "item.completed" => self.item(v.get("item")?, true),

            "turn.completed" => {
                if let Some(usage) = v.get("usage") {
                    match usage.get("total_tokens").and_then(Value::as_u64) {
                        Some(total) => self.state.replace_tokens(total),
                        None => self.state.add_tokens(
                            u64_field(usage, "input_tokens") + u64_field(usage, "output_tokens"),
                        ),
                    };
                }
                // Only `turn.failed` fails a turn. Earlier `error` records
                // (reconnect notices) are shown but not held against it.
                self.state.take_failed();
                self.state.record_result(true);
                Some(Event::result(true, self.state.tokens()))
            }

            // One failed Result carries the message; a separate Error
            // event would print the same failure twice.
            "turn.failed" => {
                let message = error_message(&v);
                self.state.mark_failed(Some(message.clone()));
                self.state.take_failed();
                self.state.record_result(false);
                Some(Event::result(false, self.state.tokens()).with_message(message))
            }

            "error" => {
                let message = error_message(&v);
                self.state.mark_failed(Some(message.clone()));
                Some(Event::error(message))
            }

            other => {
                debug!(event_type = other, "ignoring codex record");
                None
            }
        }
    }

    fn state(&self) -> &ParserState {
        &self.state
    }
}

impl CodexParser {
    fn item(&mut self, item: &Value, completed: bool) -> Option<Event> {
        match str_field(item, "type").unwrap_or("") {
            "command_execution" => {
                let detail = match item.get("command") {
                    Some(Value::Array(argv)) => truncate(&unwrap_argv(argv), COMMAND_BUDGET),
                    Some(Value::String(cmd)) => command_detail(cmd),
                    _ => String::new(),
                };
                self.state.tool("run", detail)
            }
            "file_change" => {
                let path = item
                    .get("changes")
                    .and_then(Value::as_array)
                    .and_then(|changes| changes.first())
                    .and_then(|change| str_field(change, "path"))
                    .or_else(|| str_field(item, "path"))
                    .unwrap_or("");
                self.state.tool("edit", shorten_path(path))
            }
            "web_search" => {
                let query = str_field(item, "query").unwrap_or("");
                self.state.tool("fetch", truncate(query, QUERY_BUDGET))
            }
            "mcp_tool_call" => {
                let tool = str_field(item, "tool").unwrap_or("mcp").to_lowercase();
                let server = str_field(item, "server").unwrap_or("");
                self.state.tool(&tool, truncate(server, QUERY_BUDGET))
            }
            // Message and reasoning items only carry their text once complete.
            "agent_message" if completed => {
                let text = str_field(item, "text")?;
                self.state.collect_text(text);
                (!text.trim().is_empty()).then(|| Event::text(truncate(text, TEXT_BUDGET)))
            }
            "reasoning" if completed => {
                let text = str_field(item, "text")?;
                Some(Event::thinking(truncate(text.trim_matches('*'), TEXT_BUDGET)))
            }
            "error" => {
                let message = str_field(item, "message").unwrap_or("unknown error").to_string();
                self.state.mark_failed(Some(message.clone()));
                Some(Event::error(message))
            }
            _ => None,
        }
    }
}

fn error_message(v: &Value) -> String {
    v.get("error")
        .and_then(|e| str_field(e, "message").or_else(|| e.as_str()))
        .or_else(|| str_field(v, "message"))
        .unwrap_or("unknown error")
        .to_string()
}
