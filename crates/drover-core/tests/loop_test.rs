//! Iteration loop tests with a scripted engine and a real task file.
//!
//! The scripted engine plays back canned outcomes and can mark tasks done
//! in the file, the way a real agent edits it between iterations.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use drover_core::display::Display;
use drover_core::engine::claude_code::ClaudeParser;
use drover_core::engine::{
    Engine, EngineConfig, EventSink, ExecError, Invocation, LineParser, OutputMode,
};
use drover_core::event::{Event, RunResult};
use drover_core::looping::tasks::TaskList;
use drover_core::looping::{
    AttemptError, LoopConfig, LoopError, LoopOutcome, RetryPolicy, TaskFile, run_loop,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const TASKS: &str = r#"
[project]
name = "demo"

[[tasks]]
id = "T1"
title = "Scaffold"
description = "Create the crate layout."
acceptance = ["cargo build succeeds"]

[[tasks]]
id = "T2"
title = "Parser"
"#;

enum Step {
    Run {
        result: RunResult,
        mark_done: Option<&'static str>,
    },
    Fail(ExecError),
    /// Show a tool call, then fail the way an interrupted run does.
    FailMidTool(ExecError),
}

fn ok(complete: bool, mark_done: Option<&'static str>) -> Step {
    Step::Run {
        result: RunResult {
            success: true,
            complete,
            tokens: 10,
            ..Default::default()
        },
        mark_done,
    }
}

fn unsuccessful(error: Option<&str>) -> Step {
    Step::Run {
        result: RunResult {
            success: false,
            error: error.map(str::to_string),
            ..Default::default()
        },
        mark_done: None,
    }
}

struct ScriptedEngine {
    config: EngineConfig,
    task_file: PathBuf,
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicU32,
}

impl ScriptedEngine {
    fn new(task_file: &Path, steps: Vec<Step>) -> Self {
        Self {
            config: EngineConfig {
                model: Some("scripted-1".into()),
                ..Default::default()
            },
            task_file: task_file.to_path_buf(),
            steps: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn invocation(&self, prompt: &str, _mode: OutputMode) -> Invocation {
        Invocation::new("true").stdin(prompt)
    }

    fn parser(&self) -> Box<dyn LineParser> {
        Box::new(ClaudeParser::default())
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        prompt: &str,
        sink: &dyn EventSink,
    ) -> Result<RunResult, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .expect("engine called more often than scripted");
        match step {
            Step::Run { result, mark_done } => {
                if let Some(id) = mark_done {
                    mark_task_done(&self.task_file, id);
                }
                sink.show_event(&Event::result(result.success, result.tokens));
                Ok(result)
            }
            Step::Fail(err) => Err(err),
            Step::FailMidTool(err) => {
                sink.show_event(&Event::tool("Bash", "cargo test"));
                Err(err)
            }
        }
    }
}

fn mark_task_done(path: &Path, id: &str) {
    let mut list = TaskFile::new(path).load().unwrap();
    for task in list.tasks.iter_mut().filter(|t| t.id == id) {
        task.done = true;
    }
    let content = toml::to_string(&list).unwrap();
    // Sanity: what we write must still parse.
    TaskList::parse(&content, path).unwrap();
    std::fs::write(path, content).unwrap();
}

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    source: TaskFile,
    display: Display,
    out: Buffer,
}

fn harness(content: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.toml");
    std::fs::write(&path, content).unwrap();
    let out = Buffer::default();
    Harness {
        source: TaskFile::new(path),
        display: Display::with_writer(Box::new(out.clone()), false),
        out,
        _dir: dir,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_completes_once_every_task_is_done() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![ok(false, Some("T1")), ok(true, Some("T2"))],
    );

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, LoopOutcome::Complete { iterations: 2 });
    assert_eq!(engine.calls(), 2);

    let prompts = engine.prompts.lock().unwrap();
    assert!(prompts[0].contains("# Task T1: Scaffold"));
    assert!(prompts[1].contains("# Task T2: Parser"));

    let out = h.out.text();
    assert!(out.contains("▸ scripted (scripted-1) · [1] T1 Scaffold"));
    assert!(out.contains("[2] T2 Parser"));
}

#[tokio::test]
async fn completion_claim_with_pending_work_keeps_iterating() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![
            // Claims completion but only finishes the first task.
            ok(true, Some("T1")),
            ok(true, Some("T2")),
        ],
    );

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, LoopOutcome::Complete { iterations: 2 });
    assert!(
        h.out
            .text()
            .contains("completion claimed but 1 task is still pending")
    );
}

#[tokio::test]
async fn loop_stops_when_source_is_empty_even_without_marker() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![ok(false, Some("T1")), ok(false, Some("T2"))],
    );

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, LoopOutcome::Complete { iterations: 2 });
}

#[tokio::test]
async fn nothing_pending_completes_without_running() {
    let h = harness("[[tasks]]\nid = \"A\"\ndone = true\n");
    let engine = ScriptedEngine::new(h.source.path(), vec![]);

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, LoopOutcome::Complete { iterations: 0 });
    assert_eq!(engine.calls(), 0);
}

// ---------------------------------------------------------------------------
// Budget and dry run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn iteration_budget_is_respected() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(h.source.path(), vec![ok(false, None), ok(false, None)]);
    let config = LoopConfig {
        max_iterations: Some(2),
        ..Default::default()
    };

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &config,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, LoopOutcome::MaxIterations { iterations: 2 });
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn dry_run_never_invokes_the_engine() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(h.source.path(), vec![]);
    let config = LoopConfig {
        dry_run: true,
        ..Default::default()
    };

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &config,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, LoopOutcome::DryRun);
    assert_eq!(engine.calls(), 0);
    let out = h.out.text();
    assert!(out.contains("dry run · scripted would work on: T1 Scaffold"));
    assert!(out.contains("    - cargo build succeeds"));
}

// ---------------------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_within_the_iteration() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![
            Step::Fail(ExecError::Failed {
                engine: "scripted".into(),
                code: Some(1),
                stderr: "API Error: 429 Too Many Requests".into(),
                partial_output: String::new(),
            }),
            ok(false, Some("T1")),
            ok(true, Some("T2")),
        ],
    );
    let config = LoopConfig {
        retry: fast_retry(),
        ..Default::default()
    };

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &config,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, LoopOutcome::Complete { iterations: 2 });
    assert_eq!(engine.calls(), 3);
}

#[tokio::test]
async fn permanent_failure_ends_the_loop() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(h.source.path(), vec![unsuccessful(Some("invalid api key"))]);

    let err = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    match &err {
        LoopError::Execution { iteration, source } => {
            assert_eq!(*iteration, 1);
            assert!(matches!(source, AttemptError::Unsuccessful(m) if m == "invalid api key"));
        }
        other => panic!("expected Execution, got {other:?}"),
    }
    assert_eq!(engine.calls(), 1);
    assert!(h.out.text().contains("✗ invalid api key"));
}

#[tokio::test]
async fn timeout_is_never_retried() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![Step::Fail(ExecError::TimedOut {
            after: Duration::from_secs(900),
            partial_output: "half".into(),
        })],
    );

    let err = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LoopError::Execution { iteration: 1, .. }));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn unsuccessful_run_without_message_moves_on() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![unsuccessful(None), ok(false, Some("T1")), ok(true, Some("T2"))],
    );

    let outcome = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, LoopOutcome::Complete { iterations: 3 });
    assert!(h.out.text().contains("failure without a message"));
}

#[tokio::test]
async fn cancelled_engine_run_surfaces_partial_output() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![Step::Fail(ExecError::Cancelled {
            partial_output: "working on T1".into(),
        })],
    );

    let err = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    match err {
        LoopError::Cancelled { partial_output } => assert_eq!(partial_output, "working on T1"),
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_during_tool_call_leaves_no_spinner_running() {
    let h = harness(TASKS);
    let out = Buffer::default();
    let display = Display::with_writer(Box::new(out.clone()), true);
    let engine = ScriptedEngine::new(
        h.source.path(),
        vec![Step::FailMidTool(ExecError::Cancelled {
            partial_output: String::new(),
        })],
    );

    let err = run_loop(
        &engine,
        &h.source,
        &display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, LoopError::Cancelled { .. }));
    assert!(!display.is_spinning());
    assert!(out.text().contains("cargo test"));
}

#[tokio::test]
async fn cancelled_token_stops_before_any_iteration() {
    let h = harness(TASKS);
    let engine = ScriptedEngine::new(h.source.path(), vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_loop(&engine, &h.source, &h.display, &LoopConfig::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LoopError::Cancelled { .. }));
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn broken_task_file_is_a_source_error() {
    let h = harness("[[tasks]]\nid = \"A\"\n[[tasks]]\nid = \"A\"\n");
    let engine = ScriptedEngine::new(h.source.path(), vec![]);

    let err = run_loop(
        &engine,
        &h.source,
        &h.display,
        &LoopConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LoopError::TaskSource(_)));
    assert_eq!(err.to_string(), "duplicate task id: \"A\"");
}
