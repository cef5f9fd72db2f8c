//! Process runner shared by every [`Engine`]'s default methods.
//!
//! Spawns the engine detached from the controlling terminal, feeds the
//! prompt, reads standard output line by line and stops the child on
//! timeout or cancellation without losing what it already printed.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ExecError;
use super::trait_def::{Engine, EventSink, LineParser};
use super::types::{Invocation, OutputMode};
use crate::event::RunResult;

/// Literal an engine prints to claim that all work is finished.
pub const COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

/// How long a child gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on draining pipes after the child has gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A child that ran to completion.
struct Finished {
    stdout: Vec<u8>,
    stderr: String,
    status: ExitStatus,
}

enum Stop {
    Cancelled,
    TimedOut,
}

/// What woke the read loop.
enum Step {
    Read(io::Result<usize>),
    Exited(io::Result<ExitStatus>),
    Stop(Stop),
}

/// Streaming invocation: every event goes to `sink`.
pub(crate) async fn execute<E>(
    engine: &E,
    cancel: &CancellationToken,
    prompt: &str,
    sink: &dyn EventSink,
) -> Result<RunResult, ExecError>
where
    E: Engine + ?Sized,
{
    let started = Instant::now();
    let (finished, parser) = stream(engine, cancel, prompt, sink).await?;
    let output = String::from_utf8_lossy(&finished.stdout).into_owned();
    let state = parser.state();

    let success = parser.succeeded();
    let error = if success {
        None
    } else {
        state
            .last_error()
            .map(str::to_string)
            .or_else(|| non_empty(&finished.stderr))
    };

    let result = RunResult {
        success,
        complete: output.contains(COMPLETION_MARKER),
        duration: started.elapsed(),
        tokens: state.tokens(),
        error,
        output,
    };

    info!(
        engine = engine.name(),
        success = result.success,
        complete = result.complete,
        tokens = result.tokens,
        duration_ms = result.duration.as_millis() as u64,
        "engine invocation finished"
    );

    Ok(result)
}

/// Streaming invocation that returns only the assistant-authored text.
pub(crate) async fn stream_prompt<E>(
    engine: &E,
    cancel: &CancellationToken,
    prompt: &str,
    sink: &dyn EventSink,
) -> Result<String, ExecError>
where
    E: Engine + ?Sized,
{
    let (_, parser) = stream(engine, cancel, prompt, sink).await?;
    Ok(parser.state().collected_text().to_string())
}

/// Plain-text invocation returning raw standard output.
pub(crate) async fn prompt<E>(
    engine: &E,
    cancel: &CancellationToken,
    prompt: &str,
) -> Result<String, ExecError>
where
    E: Engine + ?Sized,
{
    let invocation = engine.invocation(prompt, OutputMode::Text);
    let finished = run(engine, cancel, invocation, |_| {}).await?;
    let output = String::from_utf8_lossy(&finished.stdout).into_owned();

    if finished.status.success() {
        return Ok(output);
    }

    if engine.tolerates_exit_code()
        && !output.trim().is_empty()
        && finished.stderr.trim().is_empty()
    {
        warn!(
            engine = engine.name(),
            code = ?finished.status.code(),
            "ignoring non-zero exit: output was produced and stderr is empty"
        );
        return Ok(output);
    }

    Err(ExecError::Failed {
        engine: engine.name().to_string(),
        code: finished.status.code(),
        stderr: finished.stderr,
        partial_output: output,
    })
}

/// Run in stream mode through a fresh parser.
///
/// A non-zero exit is only an error when the parser never saw a result
/// record; otherwise the parser's verdict stands.
async fn stream<E>(
    engine: &E,
    cancel: &CancellationToken,
    prompt: &str,
    sink: &dyn EventSink,
) -> Result<(Finished, Box<dyn LineParser>), ExecError>
where
    E: Engine + ?Sized,
{
    let mut parser = engine.parser();
    let invocation = engine.invocation(prompt, OutputMode::Stream);
    let finished = run(engine, cancel, invocation, |line| {
        if let Some(event) = parser.parse_line(line) {
            sink.show_event(&event);
        }
    })
    .await?;

    if !finished.status.success() && parser.state().last_result().is_none() {
        return Err(ExecError::Failed {
            engine: engine.name().to_string(),
            code: finished.status.code(),
            stderr: finished.stderr,
            partial_output: String::from_utf8_lossy(&finished.stdout).into_owned(),
        });
    }

    Ok((finished, parser))
}

/// Spawn, feed and drain one engine process.
async fn run<E, F>(
    engine: &E,
    cancel: &CancellationToken,
    invocation: Invocation,
    mut on_line: F,
) -> Result<Finished, ExecError>
where
    E: Engine + ?Sized,
    F: FnMut(&str),
{
    let timeout = engine.config().timeout();
    let mut child = spawn(&invocation)?;
    debug!(
        engine = engine.name(),
        pid = child.id(),
        program = %invocation.program,
        "spawned engine process"
    );

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), invocation.stdin) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(error = %e, "failed to write prompt to engine stdin");
            }
            // stdin is dropped here, closing the pipe so the engine starts.
        });
    }

    let stderr_task: Option<JoinHandle<Vec<u8>>> = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Io(io::Error::other("engine stdout was not captured")))?;
    let mut reader = BufReader::new(stdout);
    let mut captured = Vec::new();
    let mut line = Vec::new();

    let pid = child.id();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    // Read until EOF or until the child exits. A background process the
    // engine left behind may hold stdout open long after the engine is gone.
    let mut exited = None;
    loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Stop(Stop::Cancelled),
            _ = &mut deadline => Step::Stop(Stop::TimedOut),
            read = reader.read_until(b'\n', &mut line) => Step::Read(read),
            status = child.wait(), if exited.is_none() => Step::Exited(status),
        };
        match step {
            Step::Read(Ok(0)) => break,
            Step::Read(Ok(_)) => deliver(&mut line, &mut captured, &mut on_line),
            Step::Read(Err(e)) => {
                terminate(&mut child).await;
                return Err(ExecError::Io(e));
            }
            Step::Exited(status) => {
                exited = Some(status?);
                break;
            }
            Step::Stop(stop) => {
                // An interrupted read leaves its bytes in `line`.
                captured.extend_from_slice(&line);
                return Err(abort(engine.name(), &mut child, reader, captured, stop, timeout).await);
            }
        }
    }

    let status = match exited {
        Some(status) => {
            let closed = drain_lines(&mut reader, &mut line, &mut captured, &mut on_line).await;
            if !line.is_empty() {
                deliver(&mut line, &mut captured, &mut on_line);
            }
            if !closed {
                debug!(engine = engine.name(), "stdout still open after exit, stopping leftovers");
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, libc::SIGTERM);
                }
            }
            status
        }
        None => tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(abort(engine.name(), &mut child, reader, captured, Stop::Cancelled, timeout).await);
            }
            _ = &mut deadline => {
                return Err(abort(engine.name(), &mut child, reader, captured, Stop::TimedOut, timeout).await);
            }
            status = child.wait() => status?,
        },
    };

    let stderr = match stderr_task {
        Some(handle) => tokio::time::timeout(DRAIN_TIMEOUT, handle)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => Vec::new(),
    };

    debug!(engine = engine.name(), ?status, "engine process exited");

    Ok(Finished {
        stdout: captured,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        status,
    })
}

/// Hand one complete (or final) line to `on_line` and keep its bytes.
fn deliver<F: FnMut(&str)>(line: &mut Vec<u8>, captured: &mut Vec<u8>, on_line: &mut F) {
    captured.extend_from_slice(line);
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\n', '\r']);
    if !text.trim().is_empty() {
        on_line(text);
    }
    line.clear();
}

/// Read what the exited child left in the pipe, for at most
/// [`DRAIN_TIMEOUT`]. An unfinished line stays in `line`. Returns whether
/// the pipe reached EOF.
async fn drain_lines<F: FnMut(&str)>(
    reader: &mut BufReader<ChildStdout>,
    line: &mut Vec<u8>,
    captured: &mut Vec<u8>,
    on_line: &mut F,
) -> bool {
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        loop {
            match reader.read_until(b'\n', line).await {
                Ok(0) => return true,
                Ok(_) => deliver(line, captured, on_line),
                Err(e) => {
                    debug!(error = %e, "reading leftover engine output failed");
                    return true;
                }
            }
        }
    })
    .await;
    drained.unwrap_or(false)
}

/// Stop the child and build the error carrying everything it printed.
async fn abort(
    engine: &str,
    child: &mut Child,
    mut reader: BufReader<ChildStdout>,
    mut captured: Vec<u8>,
    stop: Stop,
    timeout: Duration,
) -> ExecError {
    terminate(child).await;
    // Whatever the child wrote before dying is still buffered or in the pipe.
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, reader.read_to_end(&mut captured)).await;
    let partial_output = String::from_utf8_lossy(&captured).into_owned();

    match stop {
        Stop::Cancelled => {
            info!(engine, output_bytes = captured.len(), "engine invocation cancelled");
            ExecError::Cancelled { partial_output }
        }
        Stop::TimedOut => {
            warn!(
                engine,
                timeout_secs = timeout.as_secs(),
                output_bytes = captured.len(),
                "engine invocation timed out"
            );
            ExecError::TimedOut {
                after: timeout,
                partial_output,
            }
        }
    }
}

fn spawn(invocation: &Invocation) -> Result<Child, ExecError> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .env("NO_COLOR", "1")
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // New session: no controlling terminal, and its own process group so
    // the whole tree can be signalled at once.
    #[cfg(unix)]
    {
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    cmd.spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ExecError::NotFound {
                program: invocation.program.clone(),
            }
        } else {
            ExecError::Spawn {
                program: invocation.program.clone(),
                source: e,
            }
        }
    })
}

/// SIGTERM the child's process group, then SIGKILL if it lingers.
async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    #[cfg(unix)]
    signal_group(pid, libc::SIGTERM);

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(pid, ?status, "engine exited after SIGTERM"),
        _ => {
            debug!(pid, "engine did not exit after SIGTERM, sending SIGKILL");
            #[cfg(unix)]
            signal_group(pid, libc::SIGKILL);
            let _ = child.kill().await;
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: i32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: the child called setsid, so -pgid names only its own group.
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret != 0 {
        debug!(pid, signal, "signalling engine process group failed");
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
