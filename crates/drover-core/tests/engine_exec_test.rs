//! Execution contract tests against fake engine binaries.
//!
//! Each test writes a small shell script that imitates an agent CLI and
//! points an engine at it with `with_binary`.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use drover_core::engine::{
    ClaudeCodeEngine, CodexEngine, Engine, EngineConfig, EventSink, ExecError, NullSink,
    OpenCodeEngine,
};
use drover_core::event::{Event, EventKind};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Event>>);

impl EventSink for Recorder {
    fn show_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl Recorder {
    fn kinds(&self) -> Vec<EventKind> {
        self.0.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

fn claude(script: &Path) -> ClaudeCodeEngine {
    ClaudeCodeEngine::with_binary(script.to_str().unwrap(), EngineConfig::default())
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_streams_events_and_reads_prompt_from_stdin() {
    let tmp = tempfile::tempdir().unwrap();
    let prompt_copy = tmp.path().join("prompt.txt");
    let script = write_script(
        tmp.path(),
        "fake_claude.sh",
        &format!(
            "cat > '{}'\n\
             echo '{{\"type\":\"system\",\"subtype\":\"init\",\"model\":\"claude-test\"}}'\n\
             echo '{{\"type\":\"assistant\",\"message\":{{\"content\":[{{\"type\":\"tool_use\",\"name\":\"Read\",\"input\":{{\"file_path\":\"/w/src/lib.rs\"}}}}]}}}}'\n\
             echo '{{\"type\":\"assistant\",\"message\":{{\"content\":[{{\"type\":\"text\",\"text\":\"All tasks done <promise>COMPLETE</promise>\"}}]}}}}'\n\
             echo '{{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"usage\":{{\"input_tokens\":100,\"output_tokens\":20}}}}'\n",
            prompt_copy.display()
        ),
    );

    let sink = Recorder::default();
    let result = claude(&script)
        .execute(&CancellationToken::new(), "implement T1", &sink)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.complete);
    assert_eq!(result.tokens, 120);
    assert_eq!(result.error, None);
    assert_eq!(
        sink.kinds(),
        vec![EventKind::Init, EventKind::Tool, EventKind::Text, EventKind::Result]
    );
    assert_eq!(std::fs::read_to_string(&prompt_copy).unwrap(), "implement T1");
}

#[tokio::test]
async fn execute_skips_malformed_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "noisy_claude.sh",
        "echo 'warming up...'\n\
         echo ''\n\
         echo '{\"type\":\"result\",'\n\
         echo '{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"usage\":{\"output_tokens\":5}}'\n\
         echo 'trailing garbage {{{{'\n",
    );

    let sink = Recorder::default();
    let result = claude(&script)
        .execute(&CancellationToken::new(), "hi", &sink)
        .await
        .unwrap();
    assert!(result.success);
    assert!(!result.complete);
    assert_eq!(result.tokens, 5);
    assert_eq!(sink.kinds(), vec![EventKind::Result]);
    assert!(result.output.contains("warming up..."));
}

#[tokio::test]
async fn execute_reports_failed_turn_message() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "fake_codex.sh",
        "cat > /dev/null\n\
         echo '{\"type\":\"thread.started\",\"thread_id\":\"t\"}'\n\
         echo '{\"type\":\"turn.failed\",\"error\":{\"message\":\"rate limit exceeded\"}}'\n",
    );
    let engine = CodexEngine::with_binary(script.to_str().unwrap(), EngineConfig::default());

    let result = engine
        .execute(&CancellationToken::new(), "go", &NullSink)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("rate limit exceeded"));
}

#[tokio::test]
async fn nonzero_exit_without_result_is_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "crashing.sh",
        "echo 'Error: API Error: 529 overloaded' >&2\nexit 3\n",
    );

    let err = claude(&script)
        .execute(&CancellationToken::new(), "go", &NullSink)
        .await
        .unwrap_err();
    match &err {
        ExecError::Failed { code, stderr, .. } => {
            assert_eq!(*code, Some(3));
            assert!(stderr.contains("529 overloaded"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn missing_binary_is_not_found() {
    let engine = claude(Path::new("/nonexistent/path/to/claude"));
    let err = engine
        .execute(&CancellationToken::new(), "go", &NullSink)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::NotFound { .. }), "got {err:?}");
    assert!(err.to_string().contains("not found"));
}

// ---------------------------------------------------------------------------
// Cancellation and timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_preserves_exact_partial_output() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "slow.sh", "printf 'abc'\nsleep 30\n");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = claude(&script)
        .execute(&cancel, "go", &NullSink)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "got {err:?}");
    assert_eq!(err.partial_output(), Some("abc"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn cancellation_keeps_complete_and_partial_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "slow_lines.sh",
        "echo 'line one'\necho 'line two'\nprintf 'partial'\nsleep 30\n",
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = claude(&script)
        .execute(&cancel, "go", &NullSink)
        .await
        .unwrap_err();
    assert_eq!(err.partial_output(), Some("line one\nline two\npartial"));
}

#[tokio::test]
async fn timeout_is_reported_with_partial_output() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "hang.sh",
        "echo '{\"type\":\"system\",\"subtype\":\"init\"}'\nprintf 'tail'\nsleep 30\n",
    );
    let engine = ClaudeCodeEngine::with_binary(
        script.to_str().unwrap(),
        EngineConfig {
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        },
    );

    let err = engine
        .execute(&CancellationToken::new(), "go", &NullSink)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
    assert_eq!(err.to_string(), "execution timed out after 300ms");
    assert_eq!(
        err.partial_output(),
        Some("{\"type\":\"system\",\"subtype\":\"init\"}\ntail")
    );
    assert!(err.is_fatal());
}

#[tokio::test]
async fn background_child_holding_stdout_does_not_stall_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "leaves_server.sh",
        "sleep 30 &\n\
         echo '{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"started dev server\"}]}}'\n\
         echo '{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false}'\n\
         exit 0\n",
    );
    let engine = ClaudeCodeEngine::with_binary(
        script.to_str().unwrap(),
        EngineConfig {
            timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        },
    );

    let sink = Recorder::default();
    let started = std::time::Instant::now();
    let result = engine
        .execute(&CancellationToken::new(), "go", &sink)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.output.contains("started dev server"));
    assert_eq!(sink.kinds(), vec![EventKind::Text, EventKind::Result]);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "run waited for the background child: {:?}",
        started.elapsed()
    );
}

// ---------------------------------------------------------------------------
// Prompt and StreamPrompt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_returns_raw_output() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "text_claude.sh", "cat\n");

    let out = claude(&script)
        .prompt(&CancellationToken::new(), "echo me")
        .await
        .unwrap();
    assert_eq!(out, "echo me");
}

#[tokio::test]
async fn opencode_prompt_tolerates_flaky_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    // The prompt arrives as the last argument.
    let script = write_script(
        tmp.path(),
        "fake_opencode.sh",
        "for last; do :; done\necho \"answer to: $last\"\nexit 1\n",
    );
    let engine = OpenCodeEngine::with_binary(script.to_str().unwrap(), EngineConfig::default());

    let out = engine
        .prompt(&CancellationToken::new(), "question")
        .await
        .unwrap();
    assert_eq!(out.trim(), "answer to: question");
}

#[tokio::test]
async fn opencode_prompt_fails_when_stderr_has_content() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "broken_opencode.sh",
        "echo 'partial answer'\necho 'provider error' >&2\nexit 1\n",
    );
    let engine = OpenCodeEngine::with_binary(script.to_str().unwrap(), EngineConfig::default());

    let err = engine
        .prompt(&CancellationToken::new(), "question")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Failed { .. }));
    assert_eq!(err.partial_output(), Some("partial answer\n"));
}

#[tokio::test]
async fn claude_prompt_does_not_tolerate_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "exit1.sh", "cat > /dev/null\necho 'output'\nexit 1\n");

    let err = claude(&script)
        .prompt(&CancellationToken::new(), "q")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Failed { code: Some(1), .. }));
}

#[tokio::test]
async fn stream_prompt_returns_only_assistant_text() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "chatty_codex.sh",
        "cat > /dev/null\n\
         echo '{\"type\":\"thread.started\"}'\n\
         echo '{\"type\":\"item.completed\",\"item\":{\"type\":\"reasoning\",\"text\":\"thinking hard\"}}'\n\
         echo '{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"first\"}}'\n\
         echo '{\"type\":\"item.started\",\"item\":{\"type\":\"command_execution\",\"command\":\"ls\"}}'\n\
         echo '{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"second\"}}'\n\
         echo '{\"type\":\"turn.completed\",\"usage\":{\"total_tokens\":10}}'\n",
    );
    let engine = CodexEngine::with_binary(script.to_str().unwrap(), EngineConfig::default());

    let sink = Recorder::default();
    let text = engine
        .stream_prompt(&CancellationToken::new(), "go", &sink)
        .await
        .unwrap();
    assert_eq!(text, "first\nsecond");
    assert!(sink.kinds().contains(&EventKind::Tool));
}
