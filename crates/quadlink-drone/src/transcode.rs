//! Transcode pipeline supervision
//!
//! The drone emits a raw H.264 elementary stream over UDP; players want a
//! proper container. An external transcoder (ffmpeg) re-muxes the stream
//! without re-encoding and serves it over local HTTP. This module owns that
//! process: spawn with a fixed low-latency argument template, drain stderr,
//! and report exactly one terminal outcome per invocation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

use quadlink_core::events::{PipelineEvent, TranscodeOutcome};
use quadlink_core::prelude::*;

/// Stderr lines retained for failure reports.
const STDERR_TAIL_LINES: usize = 40;

/// How long to wait for the stderr reader to reach EOF after a failed exit,
/// so the failure log holds the transcoder's parting diagnostics.
const STDERR_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// Counter for transcode session identifiers
static NEXT_TRANSCODE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one transcoder invocation.
///
/// Stamped on every pipeline event so the orchestrator can discard events
/// from an invocation that has already been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TranscodeId(u64);

impl TranscodeId {
    fn next() -> Self {
        Self(NEXT_TRANSCODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TranscodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolve the transcoder binary before spawning.
///
/// `name` is either a bare binary name looked up on PATH or an explicit
/// path. Launch is rejected here, not mid-spawn, when the binary is missing.
pub fn resolve_transcoder(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::transcoder_not_found(name))
}

/// The local HTTP endpoint the re-muxed stream is served on.
pub fn egress_url(http_port: u16) -> String {
    format!("http://127.0.0.1:{http_port}/")
}

/// Fixed argument template for the re-mux invocation.
///
/// Ingest: the raw elementary stream on the local video port, with demuxer
/// buffering off and corrupt frames dropped so latency stays bounded.
/// Egress: stream-copied fragmented MP4 over HTTP, fragmented at keyframes
/// so a player can attach mid-stream.
pub fn build_args(video_port: u16, http_port: u16) -> Vec<String> {
    let ingress = format!("udp://0.0.0.0:{video_port}?fifo_size=50000&overrun_nonfatal=1");
    let egress = egress_url(http_port);

    [
        "-hide_banner",
        "-loglevel",
        "warning",
        "-fflags",
        "nobuffer+discardcorrupt",
        "-flags",
        "low_delay",
        "-analyzeduration",
        "500000",
        "-probesize",
        "512000",
        "-f",
        "h264",
        "-i",
        ingress.as_str(),
        "-c:v",
        "copy",
        "-an",
        "-muxdelay",
        "0",
        "-muxpreload",
        "0",
        "-movflags",
        "frag_keyframe+empty_moov+default_base_moof",
        "-f",
        "mp4",
        "-listen",
        "1",
        egress.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Manages one external transcoder process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background
/// task that calls `child.wait()`, so the real exit status is captured and
/// emitted as exactly one `PipelineEvent::Exited { outcome }`.
///
/// `TranscodePipeline` retains a kill channel ([`kill_tx`]) for `cancel()`,
/// an atomic flag ([`exited`]) for synchronous `has_exited()` checks, and a
/// [`Notify`] handle so teardown can await the exit without polling.
pub struct TranscodePipeline {
    id: TranscodeId,
    /// OS pid, for log correlation
    pid: Option<u32>,
    /// Tells the wait task to kill the child. `None` once consumed by
    /// `cancel()` or `drop`.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Flipped by the wait task when the child is gone.
    exited: Arc<AtomicBool>,
    /// Woken by the wait task right after `exited` flips.
    exit_notify: Arc<Notify>,
}

impl TranscodePipeline {
    /// Spawn the transcoder for the given ports.
    ///
    /// Non-blocking: returns as soon as the host accepts the spawn. The
    /// terminal outcome arrives later on `event_tx`.
    pub async fn spawn(
        transcoder: &str,
        video_port: u16,
        http_port: u16,
        event_tx: mpsc::Sender<PipelineEvent>,
    ) -> Result<Self> {
        let program = resolve_transcoder(transcoder)?;
        let args = build_args(video_port, http_port);
        Self::spawn_with(&program, &args, event_tx)
    }

    /// Spawn an explicit command under pipeline supervision.
    ///
    /// `spawn` builds the re-mux invocation on top of this; tests drive the
    /// supervision machinery through it with stand-in commands.
    pub fn spawn_with(
        program: &Path,
        args: &[String],
        event_tx: mpsc::Sender<PipelineEvent>,
    ) -> Result<Self> {
        let id = TranscodeId::next();
        info!(
            "spawning transcoder {id}: {} {}",
            program.display(),
            args.join(" ")
        );

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::pipeline_spawn(e.to_string()))?;

        let pid = child.id();
        info!("transcoder {id} started with PID: {:?}", pid);

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        // Stderr reader keeps the tail ring current and forwards each line.
        let stderr = child.stderr.take().expect("stderr was configured");
        let stderr_task = tokio::spawn(Self::stderr_reader(
            stderr,
            event_tx.clone(),
            Arc::clone(&stderr_tail),
        ));

        // Exit state shared between the handle and the wait task
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());

        // Kill channel: this handle keeps the sender, the wait task the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // The wait task owns `child` from here on.
        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            stderr_task,
            stderr_tail,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            id,
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits exactly one
    /// `PipelineEvent::Exited`.
    ///
    /// Ends either when `child.wait()` resolves on its own, or when
    /// `kill_rx` fires and the child is killed then reaped.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<PipelineEvent>,
        stderr_task: JoinHandle<()>,
        stderr_tail: Arc<Mutex<VecDeque<String>>>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        enum ExitKind {
            Natural(std::process::ExitStatus),
            WaitError(std::io::Error),
            Killed,
        }

        let kind = tokio::select! {
            result = child.wait() => match result {
                Ok(status) => ExitKind::Natural(status),
                Err(e) => ExitKind::WaitError(e),
            },
            // Cancel path: kill_tx was sent (by cancel or drop)
            _ = kill_rx => {
                info!("cancel signal received, killing transcoder");
                if let Err(e) = child.kill().await {
                    // Lost the race against a natural exit; harmless.
                    debug!("kill after exit: {e}");
                }
                let _ = child.wait().await;
                ExitKind::Killed
            }
        };

        let outcome = match kind {
            ExitKind::Natural(status) if status.success() => {
                info!("transcoder exited cleanly");
                TranscodeOutcome::Success
            }
            ExitKind::Natural(status) => {
                warn!("transcoder exited with status: {:?}", status.code());
                // Let the stderr reader reach EOF so the tail holds the
                // transcoder's parting diagnostics.
                let _ = tokio::time::timeout(STDERR_DRAIN_LIMIT, stderr_task).await;
                let log = failure_log(&stderr_tail, status.code()).await;
                TranscodeOutcome::Failed { log }
            }
            ExitKind::WaitError(e) => {
                error!("error waiting for transcoder: {e}");
                TranscodeOutcome::Failed { log: e.to_string() }
            }
            ExitKind::Killed => TranscodeOutcome::Cancelled,
        };

        // Mark exited and wake waiters before sending the event, so
        // `has_exited()` is true by the time callers observe the outcome.
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        debug!("sending PipelineEvent::Exited ({})", outcome.summary());
        let _ = event_tx.send(PipelineEvent::Exited { outcome }).await;
    }

    /// Read stderr lines, keep the tail ring current, forward each line.
    async fn stderr_reader(
        stderr: tokio::process::ChildStderr,
        tx: mpsc::Sender<PipelineEvent>,
        tail: Arc<Mutex<VecDeque<String>>>,
    ) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("transcoder: {}", line);

            {
                let mut tail = tail.lock().await;
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
            }

            if tx.send(PipelineEvent::Stderr(line)).await.is_err() {
                debug!("stderr channel closed");
                break;
            }
        }

        debug!("stderr reader finished");
    }

    pub fn id(&self) -> TranscodeId {
        self.id
    }

    /// Get the OS process ID
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the wait task to kill the process.
    ///
    /// Idempotent best-effort: the first call consumes the kill channel;
    /// later calls, and calls after the terminal outcome, are no-ops.
    pub fn cancel(&mut self) {
        if self.has_exited() {
            debug!("cancel on already-terminal pipeline {}", self.id);
            return;
        }
        if let Some(tx) = self.kill_tx.take() {
            info!("cancelling transcode pipeline {}", self.id);
            // Send can fail only if the wait task just finished; fine.
            let _ = tx.send(());
        }
    }

    /// Check if the process has already exited.
    ///
    /// Non-blocking synchronous check backed by an atomic flag set by the
    /// `wait_for_exit` task.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Wait (bounded) for the terminal outcome. Returns whether the process
    /// had exited by the deadline.
    ///
    /// Race-free: the `notified()` future is created before the final
    /// `has_exited()` check so a notification between check and await cannot
    /// be missed.
    pub async fn wait_until_exited(&self, limit: Duration) -> bool {
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return true;
        }
        tokio::time::timeout(limit, notified).await.is_ok()
    }
}

impl Drop for TranscodePipeline {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("pipeline {} dropped while process may still be running", self.id);
            // Send the kill signal so the wait task tears the child down and
            // still reports its outcome. If cancel() already consumed the
            // sender this is a no-op.
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        // If the wait task never gets to handle the kill, kill_on_drop on
        // the Child still reaps the process.
        debug!("pipeline {} dropped", self.id);
    }
}

impl std::fmt::Debug for TranscodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodePipeline")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

/// Compose the failure log from the stderr tail.
async fn failure_log(tail: &Arc<Mutex<VecDeque<String>>>, code: Option<i32>) -> String {
    let lines = tail.lock().await;
    if lines.is_empty() {
        format!("transcoder exited with code {code:?} and no diagnostics")
    } else {
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}
