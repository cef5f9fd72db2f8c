//! Live terminal progress display.
//!
//! [`Display`] renders [`Event`]s as permanent lines plus one animated
//! status line that is redrawn in place. The animation runs as its own
//! tokio task.
//!
//! # Locking
//!
//! ```text
//! render  : Arc<Mutex<RenderState>>     message, frame, FSM, writer, stats
//! spinner : Mutex<Option<SpinnerTask>>  animation task + its cancel token
//! ```
//!
//! Neither lock is ever taken while the other is held. The tick checks its
//! cancel token under the render lock, so once [`Display::stop_spinner`]
//! has cleared the line no further frame can be drawn.

pub mod spinner;

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::EventSink;
use crate::engine::error::format_duration;
use crate::event::{Event, EventKind};
pub use spinner::{SpinnerFsm, SpinnerState, TransitionError};

/// Braille spinner frames.
pub const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Animation tick interval.
pub const TICK: Duration = Duration::from_millis(80);

/// Accent gradient cycled once per frame.
const GRADIENT: [(u8, u8, u8); 6] = [
    (255, 95, 135),
    (255, 135, 95),
    (255, 175, 95),
    (175, 215, 135),
    (95, 175, 255),
    (175, 135, 255),
];

const DIM: Color = Color::DarkGrey;
const RED: Color = Color::Red;
const GREEN: Color = Color::Green;
const YELLOW: Color = Color::Yellow;
const CYAN: Color = Color::Cyan;

/// Budget for the first line of assistant text.
const TEXT_WIDTH: usize = 80;

/// Everything the animation tick reads or writes.
struct RenderState {
    out: Box<dyn Write + Send>,
    interactive: bool,
    fsm: SpinnerFsm,
    frame: usize,
    /// The status line is currently drawn and must be cleared first.
    live: bool,
    last_tool: Option<(String, String)>,
    /// Session-wide token total.
    total_tokens: u64,
    /// Running total of the current invocation already counted.
    invocation_tokens: u64,
    session_start: Option<Instant>,
}

struct SpinnerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Concurrency-safe progress display. Implements [`EventSink`].
pub struct Display {
    render: Arc<Mutex<RenderState>>,
    spinner: Mutex<Option<SpinnerTask>>,
    interactive: bool,
}

impl Display {
    /// Display on standard output, animated when it is a terminal.
    pub fn stdout() -> Self {
        let interactive = io::stdout().is_terminal();
        Self::with_writer(Box::new(io::stdout()), interactive)
    }

    /// Display on an arbitrary writer. Non-interactive displays never emit
    /// colour or cursor control and never animate.
    pub fn with_writer(out: Box<dyn Write + Send>, interactive: bool) -> Self {
        Self {
            render: Arc::new(Mutex::new(RenderState {
                out,
                interactive,
                fsm: SpinnerFsm::new(),
                frame: 0,
                live: false,
                last_tool: None,
                total_tokens: 0,
                invocation_tokens: 0,
                session_start: None,
            })),
            spinner: Mutex::new(None),
            interactive,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Current spinner state.
    pub fn state(&self) -> SpinnerState {
        self.lock_render().fsm.state()
    }

    /// Session-wide token total.
    pub fn total_tokens(&self) -> u64 {
        self.lock_render().total_tokens
    }

    /// Time since the first header was rendered.
    pub fn elapsed(&self) -> Duration {
        self.lock_render()
            .session_start
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn is_spinning(&self) -> bool {
        self.lock_spinner().is_some()
    }

    /// Iteration header. The first call starts the session clock.
    pub fn header(&self, engine: &str, model: Option<&str>, item: &str) {
        let mut r = self.lock_render();
        r.session_start.get_or_insert_with(Instant::now);
        let model = model.map(|m| format!(" ({m})")).unwrap_or_default();
        r.line(Some(CYAN), &format!("▸ {engine}{model} · {item}"));
    }

    pub fn info(&self, message: &str) {
        self.lock_render().line(Some(DIM), &format!("  {message}"));
    }

    pub fn warn(&self, message: &str) {
        self.lock_render().line(Some(YELLOW), &format!("  ⚠ {message}"));
    }

    /// Error line. Ends any running activity.
    pub fn error(&self, message: &str) {
        self.stop_spinner();
        let mut r = self.lock_render();
        r.line(Some(RED), &format!("  ✗ {message}"));
        r.enter(SpinnerState::Error, message);
        r.enter(SpinnerState::Idle, "");
    }

    /// Preview of the work a dry run would hand to the engine.
    pub fn dry_run(&self, engine: &str, title: &str, description: &str, acceptance: &[String]) {
        let mut r = self.lock_render();
        r.line(Some(YELLOW), &format!("▸ dry run · {engine} would work on: {title}"));
        for line in description.lines().filter(|l| !l.trim().is_empty()) {
            r.line(None, &format!("  {}", line.trim_end()));
        }
        if !acceptance.is_empty() {
            r.line(Some(DIM), "  acceptance:");
            for check in acceptance {
                r.line(Some(DIM), &format!("    - {check}"));
            }
        }
    }

    /// Final run summary.
    pub fn summary(&self, iterations: u32, outcome: &str) {
        self.stop_spinner();
        let elapsed = self.elapsed();
        let mut r = self.lock_render();
        let text = format!(
            "── {outcome} · {iterations} iteration{} · {} tokens · {}",
            if iterations == 1 { "" } else { "s" },
            group_digits(r.total_tokens),
            format_duration(&round_secs(elapsed)),
        );
        r.line(Some(CYAN), &text);
    }

    /// Stop the animation and clear the status line.
    pub fn stop_spinner(&self) {
        let task = self.lock_spinner().take();
        if let Some(task) = task {
            task.cancel.cancel();
            debug!("spinner stopped");
        }
        self.lock_render().clear_live();
    }

    fn start_spinner(&self) {
        if !self.interactive {
            return;
        }
        let mut slot = self.lock_spinner();
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime; spinner animation disabled");
            return;
        };
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(animate(Arc::clone(&self.render), cancel.clone()));
        *slot = Some(SpinnerTask { cancel, handle });
    }

    fn lock_render(&self) -> MutexGuard<'_, RenderState> {
        self.render.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_spinner(&self) -> MutexGuard<'_, Option<SpinnerTask>> {
        self.spinner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for Display {
    fn show_event(&self, event: &Event) {
        let active = {
            let mut r = self.lock_render();
            r.apply(event);
            r.fsm.state().is_active()
        };
        // Render lock released before touching the spinner lock.
        if active {
            self.start_spinner();
        } else {
            self.stop_spinner();
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        if let Some(task) = self.lock_spinner().take() {
            task.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("interactive", &self.interactive)
            .field("state", &self.state())
            .finish()
    }
}

async fn animate(render: Arc<Mutex<RenderState>>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let mut r = render.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            break;
        }
        r.frame = r.frame.wrapping_add(1);
        r.draw_live();
    }
}

impl RenderState {
    fn apply(&mut self, event: &Event) {
        match event.kind {
            EventKind::Init => {
                // A new invocation restarts the engine's running total.
                self.invocation_tokens = 0;
                self.last_tool = None;
                if let Some(model) = &event.data.model {
                    self.line(Some(DIM), &format!("  model {model}"));
                }
                self.enter(SpinnerState::Thinking, "starting");
            }
            EventKind::Tool => {
                let label = tool_label(&event.tool, &event.detail);
                let key = (event.tool.clone(), event.detail.clone());
                if self.last_tool.as_ref() == Some(&key) {
                    self.fsm.set_message(label);
                    self.draw_live();
                    return;
                }
                self.last_tool = Some(key);
                self.line(None, &format!("  {} {label}", glyph(&event.tool)));
                self.enter(SpinnerState::ToolActivity, &label);
            }
            EventKind::Thinking => {
                if !event.detail.is_empty() {
                    self.line(Some(DIM), &format!("  ∴ {}", event.detail));
                }
                if self.fsm.state() == SpinnerState::Thinking {
                    self.fsm.set_message("thinking");
                    self.draw_live();
                } else {
                    self.enter(SpinnerState::Thinking, "thinking");
                }
            }
            EventKind::Text => {
                self.last_tool = None;
                let first = event.detail.lines().next().unwrap_or("");
                if !first.trim().is_empty() {
                    let text = crate::engine::parse::truncate(first, TEXT_WIDTH);
                    self.line(None, &format!("  {text}"));
                }
            }
            EventKind::Result => {
                self.last_tool = None;
                self.count_tokens(event.data.tokens);
                let mut parts = Vec::new();
                if event.data.tokens > 0 {
                    parts.push(format!("{} tokens", group_digits(event.data.tokens)));
                }
                if let Some(ms) = event.data.duration_ms {
                    parts.push(format_duration(&Duration::from_millis(ms)));
                }
                let stats = if parts.is_empty() {
                    String::new()
                } else {
                    format!(" · {}", parts.join(" · "))
                };
                if event.is_success() {
                    self.line(Some(GREEN), &format!("  ✓ done{stats}"));
                    self.enter(SpinnerState::Completion, "done");
                } else {
                    let reason = event
                        .data
                        .message
                        .as_deref()
                        .map(|m| format!(": {}", crate::engine::parse::truncate(m, TEXT_WIDTH)))
                        .unwrap_or_default();
                    self.line(Some(RED), &format!("  ✗ failed{reason}{stats}"));
                    self.enter(SpinnerState::Error, "failed");
                }
                self.enter(SpinnerState::Idle, "");
            }
            EventKind::Error => {
                let message = event.data.message.as_deref().unwrap_or("unknown error");
                self.line(Some(RED), &format!("  ✗ {message}"));
                self.enter(SpinnerState::Error, message);
                self.enter(SpinnerState::Idle, "");
            }
            EventKind::Unknown => {}
        }
    }

    /// Add the growth of the invocation's running total to the session.
    fn count_tokens(&mut self, running: u64) {
        if running == 0 {
            return;
        }
        if running < self.invocation_tokens {
            // Started over without an Init.
            self.invocation_tokens = 0;
        }
        self.total_tokens += running - self.invocation_tokens;
        self.invocation_tokens = running;
    }

    /// Transition, resetting through `Idle` when the edge is not allowed.
    fn enter(&mut self, to: SpinnerState, message: &str) {
        let Err(e) = self.fsm.transition(to, message) else {
            return;
        };
        debug!(error = %e, "resetting spinner to idle");
        self.fsm.reset();
        for step in route_from_idle(to) {
            if let Err(e) = self.fsm.transition(*step, message) {
                warn!(error = %e, "spinner recovery failed");
                self.fsm.reset();
                return;
            }
        }
    }

    /// Print a permanent line above the status line. Clearing, printing
    /// and redrawing go out in one flush.
    fn line(&mut self, color: Option<Color>, text: &str) {
        let result = self.queue_clear().and_then(|()| {
            match (self.interactive, color) {
                (true, Some(color)) => queue!(
                    self.out,
                    SetForegroundColor(color),
                    Print(text),
                    ResetColor,
                    Print("\n")
                ),
                _ => queue!(self.out, Print(text), Print("\n")),
            }
        });
        let result = result.and_then(|()| self.queue_live());
        self.finish(result);
    }

    fn draw_live(&mut self) {
        let result = self.queue_live();
        self.finish(result);
    }

    fn clear_live(&mut self) {
        if !self.live {
            return;
        }
        let result = self.queue_clear();
        self.finish(result);
    }

    fn queue_live(&mut self) -> io::Result<()> {
        if !self.interactive || !self.fsm.state().is_active() {
            return Ok(());
        }
        let (r, g, b) = GRADIENT[self.frame % GRADIENT.len()];
        let frame = FRAMES[self.frame % FRAMES.len()];
        let message = self.fsm.message().to_string();
        self.live = true;
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            SetForegroundColor(Color::Rgb { r, g, b }),
            Print(frame),
            ResetColor,
            Print(" "),
            SetForegroundColor(DIM),
            Print(message),
            ResetColor
        )
    }

    fn queue_clear(&mut self) -> io::Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))
    }

    fn finish(&mut self, queued: io::Result<()>) {
        if let Err(e) = queued.and_then(|()| self.out.flush()) {
            debug!(error = %e, "display write failed");
        }
    }
}

/// Legal path from `Idle` to `to`.
fn route_from_idle(to: SpinnerState) -> &'static [SpinnerState] {
    match to {
        SpinnerState::Idle => &[],
        SpinnerState::Thinking => &[SpinnerState::Thinking],
        SpinnerState::ToolActivity => &[SpinnerState::Thinking, SpinnerState::ToolActivity],
        SpinnerState::Completion => &[SpinnerState::Thinking, SpinnerState::Completion],
        SpinnerState::Error => &[SpinnerState::Thinking, SpinnerState::Error],
    }
}

fn tool_label(tool: &str, detail: &str) -> String {
    if detail.is_empty() {
        tool.to_string()
    } else {
        format!("{tool} {detail}")
    }
}

fn glyph(tool: &str) -> char {
    match tool {
        "read" => '→',
        "write" | "edit" => '✎',
        "run" => '$',
        "search" => '⌕',
        "fetch" => '↓',
        "agent" => '◆',
        "plan" => '☰',
        _ => '•',
    }
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
