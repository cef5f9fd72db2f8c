//! OpenCode engine adapter.
//!
//! `opencode run --format json` takes the prompt as its final argument and
//! reports each step as a `step_start` .. `step_finish` pair. Its finish
//! record has no success flag, so success is inferred from the failures
//! observed during the step.

use serde_json::Value;
use tracing::debug;

use super::parse::{
    self, ParserState, QUERY_BUDGET, TEXT_BUDGET, command_detail, shorten_path, str_field,
    truncate, u64_field,
};
use super::trait_def::{Engine, LineParser};
use super::types::{EngineConfig, Invocation, OutputMode};
use crate::event::Event;

/// Engine adapter for [OpenCode](https://opencode.ai).
#[derive(Debug, Clone)]
pub struct OpenCodeEngine {
    binary: String,
    config: EngineConfig,
}

impl OpenCodeEngine {
    pub const NAME: &'static str = "opencode";

    pub fn new(config: EngineConfig) -> Self {
        Self::with_binary("opencode", config)
    }

    pub fn with_binary(path: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            binary: path.into(),
            config,
        }
    }

    /// `provider/model` when both are configured, the bare model otherwise.
    fn model_arg(&self) -> Option<String> {
        let model = self.config.model()?;
        Some(match self.config.provider() {
            Some(provider) if !model.contains('/') => format!("{provider}/{model}"),
            _ => model.to_string(),
        })
    }
}

impl Engine for OpenCodeEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn invocation(&self, prompt: &str, mode: OutputMode) -> Invocation {
        let inv = Invocation::new(&self.binary).arg("run");
        let inv = match mode {
            OutputMode::Stream => inv.arg("--format").arg("json"),
            OutputMode::Text => inv,
        };
        inv.opt("-m", self.model_arg().as_deref()).arg(prompt)
    }

    fn parser(&self) -> Box<dyn LineParser> {
        Box::new(OpenCodeParser::default())
    }

    // opencode run sometimes exits 1 after a complete answer.
    fn tolerates_exit_code(&self) -> bool {
        true
    }
}

/// Per-invocation parser for `opencode run --format json` output.
#[derive(Debug, Default)]
pub struct OpenCodeParser {
    state: ParserState,
    started: bool,
}

impl LineParser for OpenCodeParser {
    fn parse_line(&mut self, line: &str) -> Option<Event> {
        let v = parse::parse_json(line)?;
        let part = v.get("part").unwrap_or(&Value::Null);
        match str_field(&v, "type").unwrap_or("") {
            "step_start" => {
                if self.started {
                    return None;
                }
                self.started = true;
                // The model is unknown until the first text part names it.
                Some(Event::init(None))
            }

            "text" => {
                let model = str_field(part, "modelID").or_else(|| str_field(&v, "modelID"));
                self.state.reveal_model(model);
                let text = str_field(part, "text")?;
                self.state.collect_text(text);
                if text.trim().is_empty() {
                    return None;
                }
                Some(
                    Event::text(truncate(text, TEXT_BUDGET))
                        .with_model(self.state.model().map(str::to_string)),
                )
            }

            "reasoning" => {
                let text = str_field(part, "text").unwrap_or("");
                Some(Event::thinking(truncate(text, TEXT_BUDGET)))
            }

            "tool_use" => self.tool_use(part),

            "step_finish" => {
                if let Some(tokens) = part.get("tokens") {
                    self.state.add_tokens(summed_tokens(tokens));
                }
                let success = !self.state.take_failed();
                self.state.record_result(success);
                Some(
                    Event::result(success, self.state.tokens())
                        .with_model(self.state.model().map(str::to_string)),
                )
            }

            "error" => {
                let message = error_message(&v);
                self.state.mark_failed(Some(message.clone()));
                Some(Event::error(message))
            }

            other => {
                debug!(event_type = other, "ignoring opencode record");
                None
            }
        }
    }

    fn state(&self) -> &ParserState {
        &self.state
    }
}

impl OpenCodeParser {
    fn tool_use(&mut self, part: &Value) -> Option<Event> {
        let name = str_field(part, "tool").unwrap_or("unknown");
        let state = part.get("state").unwrap_or(&Value::Null);

        let errored = str_field(state, "status") == Some("error");
        let exit = state
            .get("metadata")
            .and_then(|m| m.get("exit"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if errored || exit != 0 {
            let message = str_field(state, "error")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{name} exited with status {exit}"));
            debug!(tool = name, exit, "opencode tool call failed");
            self.state.mark_failed(Some(message));
        }

        let input = state.get("input").unwrap_or(&Value::Null);
        let (tool, detail) = tool_summary(name, input);
        self.state.tool(&tool, detail)
    }
}

fn summed_tokens(tokens: &Value) -> u64 {
    let cache = tokens.get("cache").unwrap_or(&Value::Null);
    u64_field(tokens, "input")
        + u64_field(tokens, "output")
        + u64_field(tokens, "reasoning")
        + u64_field(cache, "read")
        + u64_field(cache, "write")
}

fn tool_summary(name: &str, input: &Value) -> (String, String) {
    let field = |key: &str| str_field(input, key).unwrap_or("");
    let path = || {
        let p = str_field(input, "filePath")
            .or_else(|| str_field(input, "path"))
            .unwrap_or("");
        shorten_path(p)
    };
    match name {
        "read" => ("read".into(), path()),
        "write" => ("write".into(), path()),
        "edit" | "multiedit" | "patch" => ("edit".into(), path()),
        "bash" => ("run".into(), command_detail(field("command"))),
        "grep" | "glob" => ("search".into(), truncate(field("pattern"), QUERY_BUDGET)),
        "list" => ("search".into(), path()),
        "webfetch" => ("fetch".into(), truncate(field("url"), QUERY_BUDGET)),
        "websearch" => ("fetch".into(), truncate(field("query"), QUERY_BUDGET)),
        "task" => ("agent".into(), truncate(field("description"), TEXT_BUDGET)),
        "todowrite" | "todoread" => ("plan".into(), String::new()),
        other => (other.to_lowercase(), String::new()),
    }
}

fn error_message(v: &Value) -> String {
    let error = v.get("error").unwrap_or(&Value::Null);
    error
        .get("data")
        .and_then(|d| str_field(d, "message"))
        .or_else(|| str_field(error, "message"))
        .or_else(|| str_field(error, "name"))
        .or_else(|| error.as_str())
        .or_else(|| str_field(v, "message"))
        .unwrap_or("unknown error")
        .to_string()
}
