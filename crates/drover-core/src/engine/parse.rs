//! Parsing helpers shared by the engine adapters.
//!
//! [`ParserState`] holds everything one adapter instance accumulates
//! across the lines of a single invocation. The free functions turn raw
//! tool arguments into display-sized details.

use serde_json::Value;
use tracing::{debug, warn};

use crate::event::Event;

/// Display budget for filesystem paths.
pub const PATH_BUDGET: usize = 50;
/// Display budget for shell commands.
pub const COMMAND_BUDGET: usize = 60;
/// Display budget for search patterns, queries and URLs.
pub const QUERY_BUDGET: usize = 60;
/// Display budget for free text (descriptions, thinking summaries).
pub const TEXT_BUDGET: usize = 80;

/// Per-invocation parser state.
///
/// Owned by exactly one adapter instance and mutated only from its
/// `parse_line`. A fresh state is created for every invocation.
#[derive(Debug, Default)]
pub struct ParserState {
    tokens: u64,
    failed: bool,
    thinking: bool,
    thought: String,
    last_tool: Option<(String, String)>,
    model: Option<String>,
    collected: String,
    last_result: Option<bool>,
    last_error: Option<String>,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running token total.
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Add a per-turn usage figure to the running total.
    pub fn add_tokens(&mut self, n: u64) -> u64 {
        self.tokens = self.tokens.saturating_add(n);
        self.tokens
    }

    /// Replace the running total with a cumulative figure reported by the
    /// engine. A smaller figure than the one already recorded is ignored.
    pub fn replace_tokens(&mut self, total: u64) -> u64 {
        if total < self.tokens {
            warn!(
                reported = total,
                recorded = self.tokens,
                "engine reported a smaller cumulative token total; keeping the larger"
            );
        } else {
            self.tokens = total;
        }
        self.tokens
    }

    /// Whether a failure has been observed since the last folded result.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Record a failure signal. The flag stays set until [`Self::take_failed`].
    pub fn mark_failed(&mut self, message: Option<String>) {
        self.failed = true;
        if message.is_some() {
            self.last_error = message;
        }
    }

    /// Fold the sticky failure flag into a result and reset it.
    pub fn take_failed(&mut self) -> bool {
        std::mem::take(&mut self.failed)
    }

    /// Record the success value of an emitted `Result` event.
    pub fn record_result(&mut self, success: bool) {
        self.last_result = Some(success);
        self.last_tool = None;
    }

    /// Success value of the most recent `Result`, if one was emitted.
    pub fn last_result(&self) -> Option<bool> {
        self.last_result
    }

    /// The most recent error message seen in the stream.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Set the model the first time it becomes known.
    ///
    /// Returns `true` if this call revealed the model.
    pub fn reveal_model(&mut self, model: Option<&str>) -> bool {
        match model.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) if self.model.is_none() => {
                self.model = Some(m.to_string());
                true
            }
            _ => false,
        }
    }

    /// Accumulate assistant text for `stream_prompt`.
    pub fn collect_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if !self.collected.is_empty() {
            self.collected.push('\n');
        }
        self.collected.push_str(text);
        self.last_tool = None;
    }

    pub fn collected_text(&self) -> &str {
        &self.collected
    }

    /// Build a `Tool` event, suppressing an exact repeat of the previous one.
    ///
    /// Any unterminated thinking lifecycle is treated as ended.
    pub fn tool(&mut self, tool: &str, detail: String) -> Option<Event> {
        if self.thinking {
            debug!("tool invocation closed an unterminated thinking block");
            self.thinking = false;
            self.thought.clear();
        }
        let key = (tool.to_string(), detail);
        if self.last_tool.as_ref() == Some(&key) {
            return None;
        }
        let event = Event::tool(&key.0, &key.1);
        self.last_tool = Some(key);
        Some(event)
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    /// Begin a thinking block. A start while already thinking restarts it.
    pub fn thinking_start(&mut self) -> Event {
        self.thinking = true;
        self.thought.clear();
        Event::thinking("")
    }

    /// Append reasoning text. Ignored unless a block is open.
    pub fn thinking_delta(&mut self, text: &str) {
        if self.thinking {
            self.thought.push_str(text);
        }
    }

    /// Close the open thinking block, returning a summary event.
    ///
    /// Returns `None` for an orphaned end.
    pub fn thinking_end(&mut self) -> Option<Event> {
        if !self.thinking {
            return None;
        }
        self.thinking = false;
        let summary = truncate(&self.thought, TEXT_BUDGET);
        self.thought.clear();
        Some(Event::thinking(summary))
    }
}

/// Parse a line as a JSON object. Blank and non-JSON lines yield `None`.
pub fn parse_json(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) if v.is_object() => Some(v),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "skipping non-JSON output line");
            None
        }
    }
}

/// String field lookup.
pub fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

/// Unsigned integer field lookup; missing or malformed counts as zero.
pub fn u64_field(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Collapse all whitespace runs to single spaces.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten to one line and cut to `max` characters, ellipsis included.
pub fn truncate(s: &str, max: usize) -> String {
    let flat = single_line(s);
    if flat.chars().count() <= max {
        return flat;
    }
    let keep = max.saturating_sub(1);
    let mut out: String = flat.chars().take(keep).collect();
    out.push('…');
    out
}

/// Keep only the last two segments of a long path.
pub fn shorten_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    let short = if segments.len() > 2 {
        format!("…/{}", segments[segments.len() - 2..].join("/"))
    } else {
        trimmed.to_string()
    };
    truncate(&short, PATH_BUDGET)
}

const SHELLS: &[&str] = &["bash", "sh", "zsh", "dash", "fish"];

/// Strip a `bash -lc '<cmd>'` style wrapper, returning the inner command.
pub fn unwrap_shell(command: &str) -> String {
    let trimmed = command.trim();
    let mut parts = trimmed.splitn(3, char::is_whitespace);
    let (Some(program), Some(flag), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return trimmed.to_string();
    };
    let program = program.rsplit('/').next().unwrap_or(program);
    if !SHELLS.contains(&program) || !flag.starts_with('-') || !flag.contains('c') {
        return trimmed.to_string();
    }
    strip_quotes(rest.trim()).to_string()
}

/// Inner command of an argv-style invocation such as `["bash", "-lc", "ls"]`.
pub fn unwrap_argv(argv: &[Value]) -> String {
    let words: Vec<&str> = argv.iter().filter_map(Value::as_str).collect();
    match words.as_slice() {
        [shell, flag, inner] => {
            let name = shell.rsplit('/').next().unwrap_or(shell);
            if SHELLS.contains(&name) && flag.starts_with('-') && flag.contains('c') {
                (*inner).to_string()
            } else {
                words.join(" ")
            }
        }
        _ => words.join(" "),
    }
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Detail for a shell command: unwrapped and cut to the command budget.
pub fn command_detail(command: &str) -> String {
    truncate(&unwrap_shell(command), COMMAND_BUDGET)
}
