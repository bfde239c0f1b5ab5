//! Subprocess supervision for external encoder invocations.
//!
//! Runs one encoder process and turns it into a bounded, observable
//! operation: output is captured in small chunks through reader tasks
//! feeding a channel (never a blocking line read, since an encoder can go
//! silent for long stretches without exiting), a polling loop enforces a
//! hard wall-clock timeout independent of output activity, and the last
//! lines of output are kept in a ring buffer for diagnostics. The child is
//! always reaped before returning, on every exit path.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// How often the supervising loop checks elapsed time and child exit.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Informational heartbeat cadence while the encoder runs.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How many trailing output lines are retained for diagnostics.
pub const TAIL_CAPACITY: usize = 200;

/// How many of the retained lines go into failure messages.
const ERROR_TAIL_LINES: usize = 50;

/// Read size for each chunk pulled off the child's pipes.
const READ_CHUNK: usize = 4096;

/// Budget for draining already-produced output after the child exits.
const DRAIN_BUDGET: Duration = Duration::from_secs(2);

/// Sink invoked with each parsed `out_time_ms=<integer>` value.
pub type ProgressSink = Box<dyn Fn(i64) + Send + Sync>;

/// One external encoder invocation: argument vector, label and hard budget.
#[derive(Debug, Clone)]
pub struct EncoderInvocation {
    /// Binary to execute (name resolved via PATH, or an absolute path)
    pub program: String,
    /// Arguments, passed as a vector (no shell interpolation)
    pub args: Vec<String>,
    /// Short label used in logs and error messages (e.g. "poster", "mp4")
    pub label: String,
    /// Hard wall-clock budget, measured from process start
    pub timeout: Duration,
}

impl EncoderInvocation {
    /// Create a new invocation.
    pub fn new(program: impl Into<String>, label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            label: label.into(),
            timeout,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render the full command line for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Outcome of a successful stage.
#[derive(Debug)]
pub struct StageReport {
    /// Wall-clock time the stage took
    pub elapsed: Duration,
}

/// Bounded ring buffer of trailing output lines.
struct TailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Join the last `count` lines for an error message.
    fn render(&self, count: usize) -> String {
        let skip = self.lines.len().saturating_sub(count);
        self.lines
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse one output line against the progress pattern `out_time_ms=<integer>`.
fn parse_out_time_ms(line: &str) -> Option<i64> {
    let (key, value) = line.split_once('=')?;
    if key == "out_time_ms" {
        value.parse().ok()
    } else {
        None
    }
}

/// Split complete lines out of `pending`, record them in the tail and feed
/// progress matches to the sink. Incomplete trailing data stays in `pending`.
fn drain_lines(pending: &mut Vec<u8>, tail: &mut TailBuffer, sink: Option<&ProgressSink>) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if line.is_empty() {
            continue;
        }
        if let (Some(ms), Some(sink)) = (parse_out_time_ms(&line), sink) {
            sink(ms);
        }
        tail.push(line);
    }
}

/// Record any incomplete trailing output before returning.
fn flush_partial(pending: &mut Vec<u8>, tail: &mut TailBuffer) {
    if !pending.is_empty() {
        let line = String::from_utf8_lossy(pending).trim().to_string();
        if !line.is_empty() {
            tail.push(line);
        }
        pending.clear();
    }
}

/// Forward raw chunks from one child pipe into the supervisor's channel.
async fn pump_chunks<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// Kill the child and wait for it so no zombie is left behind.
async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill encoder process");
    }
    let _ = child.wait().await;
}

/// Pull whatever the reader tasks already produced after the child exited.
async fn drain_channel(
    rx: &mut mpsc::Receiver<Vec<u8>>,
    pending: &mut Vec<u8>,
    tail: &mut TailBuffer,
    sink: Option<&ProgressSink>,
) {
    // The pipes are at EOF once the child is gone, so the reader tasks
    // finish and close the channel; the budget only guards pathological
    // cases where a grandchild keeps a pipe open.
    let _ = tokio::time::timeout(DRAIN_BUDGET, async {
        while let Some(chunk) = rx.recv().await {
            pending.extend_from_slice(&chunk);
            drain_lines(pending, tail, sink);
        }
    })
    .await;
    flush_partial(pending, tail);
}

/// Run one encoder invocation to completion.
///
/// Output from stdout and stderr is treated as a single text stream. Each
/// complete line is matched against `out_time_ms=<integer>`; matches are
/// forwarded to `progress`. The timeout is wall-clock from process start
/// and fires even if the encoder produces no output at all. A nonzero exit
/// and a timeout both fail with the command line and the output tail.
pub async fn run_encoder(
    inv: &EncoderInvocation,
    progress: Option<ProgressSink>,
) -> MediaResult<StageReport> {
    which::which(&inv.program).map_err(|_| MediaError::EncoderNotFound(inv.program.clone()))?;

    debug!(label = %inv.label, "running encoder: {}", inv.command_line());

    let start = Instant::now();
    let mut child = Command::new(&inv.program)
        .args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_chunks(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_chunks(stderr, tx.clone()));
    }
    drop(tx);

    let sink = progress;
    let mut tail = TailBuffer::new(TAIL_CAPACITY);
    let mut pending: Vec<u8> = Vec::new();
    let mut pipes_open = true;
    let mut last_heartbeat = start;
    let mut last_data = start;

    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            chunk = rx.recv(), if pipes_open => match chunk {
                Some(chunk) => {
                    pending.extend_from_slice(&chunk);
                    last_data = Instant::now();
                    drain_lines(&mut pending, &mut tail, sink.as_ref());
                }
                None => pipes_open = false,
            },
            _ = poll.tick() => {
                let elapsed = start.elapsed();

                // Hard timeout, even when the encoder is silent
                if elapsed >= inv.timeout {
                    kill_and_reap(&mut child).await;
                    drain_channel(&mut rx, &mut pending, &mut tail, sink.as_ref()).await;
                    return Err(MediaError::StageTimeout {
                        label: inv.label.clone(),
                        command: inv.command_line(),
                        timeout_secs: inv.timeout.as_secs(),
                        tail: tail.render(ERROR_TAIL_LINES),
                    });
                }

                if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                    info!(
                        label = %inv.label,
                        elapsed_secs = elapsed.as_secs(),
                        silent_secs = last_data.elapsed().as_secs(),
                        "encoder alive"
                    );
                    last_heartbeat = Instant::now();
                }

                if let Some(status) = child.try_wait()? {
                    drain_channel(&mut rx, &mut pending, &mut tail, sink.as_ref()).await;

                    if !status.success() {
                        return Err(MediaError::StageFailed {
                            label: inv.label.clone(),
                            command: inv.command_line(),
                            exit_code: status.code(),
                            tail: tail.render(ERROR_TAIL_LINES),
                        });
                    }

                    let elapsed = start.elapsed();
                    info!(label = %inv.label, elapsed_secs = elapsed.as_secs(), "encoder completed");
                    return Ok(StageReport { elapsed });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn sh(script: &str, label: &str, timeout: Duration) -> EncoderInvocation {
        EncoderInvocation::new("/bin/sh", label, timeout).args(["-c", script])
    }

    #[test]
    fn parses_progress_lines() {
        assert_eq!(parse_out_time_ms("out_time_ms=5000000"), Some(5_000_000));
        assert_eq!(parse_out_time_ms("out_time_ms=0"), Some(0));
        assert_eq!(parse_out_time_ms("out_time=00:00:05.000000"), None);
        assert_eq!(parse_out_time_ms("frame=120"), None);
        assert_eq!(parse_out_time_ms("out_time_ms=abc"), None);
        assert_eq!(parse_out_time_ms("no equals sign"), None);
    }

    #[test]
    fn tail_buffer_caps_and_renders() {
        let mut tail = TailBuffer::new(3);
        for i in 0..5 {
            tail.push(format!("line{i}"));
        }
        assert_eq!(tail.lines.len(), 3);
        assert_eq!(tail.render(2), "line3\nline4");
        assert_eq!(tail.render(10), "line2\nline3\nline4");
    }

    #[test]
    fn drain_lines_keeps_partial_data() {
        let mut tail = TailBuffer::new(10);
        let mut pending = b"first\nsecond\npart".to_vec();
        drain_lines(&mut pending, &mut tail, None);
        assert_eq!(pending, b"part");
        assert_eq!(tail.render(10), "first\nsecond");
        flush_partial(&mut pending, &mut tail);
        assert!(pending.is_empty());
        assert_eq!(tail.render(10), "first\nsecond\npart");
    }

    #[tokio::test]
    async fn successful_run_feeds_progress_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Box::new(move |ms| sink_seen.lock().unwrap().push(ms));

        let inv = sh(
            "echo out_time_ms=1000000; echo noise; echo out_time_ms=2000000",
            "test",
            Duration::from_secs(10),
        );
        let report = run_encoder(&inv, Some(sink)).await.unwrap();
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(*seen.lock().unwrap(), vec![1_000_000, 2_000_000]);
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_tail_and_command() {
        let inv = sh("echo boom splat; exit 3", "test", Duration::from_secs(10));
        let err = run_encoder(&inv, None).await.unwrap_err();
        match err {
            MediaError::StageFailed {
                exit_code,
                ref tail,
                ref command,
                ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(tail.contains("boom splat"));
                assert!(command.contains("/bin/sh"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_process_is_killed_at_the_timeout() {
        let inv = sh("sleep 30", "test", Duration::from_secs(1));
        let start = Instant::now();
        let err = run_encoder(&inv, None).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout(), "expected timeout, got: {err:?}");
        // Killed within timeout + a few polling cycles, not when sleep ends
        assert!(
            elapsed < Duration::from_secs(3),
            "timeout took too long: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn stderr_lines_are_captured_too() {
        let inv = sh("echo to-stderr 1>&2; exit 1", "test", Duration::from_secs(10));
        let err = run_encoder(&inv, None).await.unwrap_err();
        match err {
            MediaError::StageFailed { ref tail, .. } => assert!(tail.contains("to-stderr")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let inv = EncoderInvocation::new("definitely-not-a-real-encoder", "test", Duration::from_secs(1));
        let err = run_encoder(&inv, None).await.unwrap_err();
        assert!(matches!(err, MediaError::EncoderNotFound(_)));
    }
}
