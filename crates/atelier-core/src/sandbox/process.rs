//! Running one command inside a mount.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::output::{detect_server_ready, strip_control_sequences, OutputBuffer, Utf8Decoder};
use super::{RunEvent, SandboxError};

/// How long to wait for output pipes to drain once a step is over.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a step ended.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// Exit code; `None` when killed by a signal
    Exited(Option<i32>),
    Stopped,
    TimedOut(Duration),
    Error(SandboxError),
}

impl StepOutcome {
    pub(crate) fn succeeded(&self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Exited(Some(code)) => format!("exited with status {code}"),
            Self::Exited(None) => "terminated by a signal".to_string(),
            Self::Stopped => "stopped".to_string(),
            Self::TimedOut(limit) => format!("timed out after {}s", limit.as_secs()),
            Self::Error(e) => e.to_string(),
        }
    }
}

/// Fan-out point for everything a run produces.
#[derive(Clone)]
pub(crate) struct OutputSink {
    events: mpsc::UnboundedSender<RunEvent>,
    buffer: Arc<Mutex<OutputBuffer>>,
    server_ready: Arc<AtomicBool>,
}

impl OutputSink {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<RunEvent>,
        buffer: Arc<Mutex<OutputBuffer>>,
    ) -> Self {
        Self {
            events,
            buffer,
            server_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    fn retain(&self, text: &str) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(text);
        }
    }

    pub(crate) fn output(&self, raw: &str) {
        let text = strip_control_sequences(raw);
        if text.is_empty() {
            return;
        }
        self.retain(&text);
        let ready = detect_server_ready(&text);
        let _ = self.events.send(RunEvent::Output(text));

        if let Some((host, port)) = ready {
            if !self.server_ready.swap(true, Ordering::SeqCst) {
                tracing::info!(%host, port, "Server ready");
                let _ = self.events.send(RunEvent::ServerReady { host, port });
            }
        }
    }

    pub(crate) fn notice(&self, text: impl Into<String>) {
        let text = text.into();
        self.retain(&format!("{text}\n"));
        let _ = self.events.send(RunEvent::Notice(text));
    }

    pub(crate) fn status(&self, status: super::RunStatus) {
        let _ = self.events.send(RunEvent::Status(status));
    }
}

fn spawn(command: &[String], cwd: &Path) -> Result<Child, SandboxError> {
    let (program, args) = command.split_first().ok_or(SandboxError::EmptyCommand)?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env("FORCE_COLOR", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group so the whole tree can be killed at once
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|source| SandboxError::Spawn {
        program: program.clone(),
        source,
    })
}

fn pump<R>(mut reader: R, sink: OutputSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut decoder = Utf8Decoder::default();
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => sink.output(&decoder.decode(&buf[..n])),
                Err(e) => {
                    tracing::debug!(error = %e, "Output pipe closed");
                    break;
                }
            }
        }
        sink.output(&decoder.finish());
    })
}

/// Kill the process group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; an unknown group yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Kill the child and everything it started.
async fn kill_tree(pid: Option<u32>, child: &mut Child) {
    kill_group(pid);
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Child already exited");
    }
}

/// Run `command` in `cwd`, streaming output into `sink` until it exits, is
/// stopped, or exceeds `limit`.
pub(crate) async fn run_step(
    command: &[String],
    cwd: &Path,
    sink: &OutputSink,
    stop: &mut oneshot::Receiver<()>,
    limit: Option<Duration>,
) -> StepOutcome {
    let mut child = match spawn(command, cwd) {
        Ok(child) => child,
        Err(e) => return StepOutcome::Error(e),
    };
    // Captured up front: the id is gone once the child has been reaped
    let pid = child.id();
    tracing::debug!(command = ?command, pid = ?pid, "Spawned step");

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(pump(stdout, sink.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(pump(stderr, sink.clone()));
    }

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => StepOutcome::Exited(status.code()),
            Err(e) => StepOutcome::Error(SandboxError::Process(e)),
        },
        _ = &mut *stop => StepOutcome::Stopped,
        _ = deadline => StepOutcome::TimedOut(limit.unwrap_or_default()),
    };

    // Reap leftovers such as servers started in the background
    kill_tree(pid, &mut child).await;

    for mut task in pumps {
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
    outcome
}
