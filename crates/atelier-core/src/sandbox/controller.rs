use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use atelier_protocol::FileTree;
use futures::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::manifest::plan_run;
use super::mount::Mount;
use super::output::OutputBuffer;
use super::process::{run_step, OutputSink, StepOutcome};
use super::{RunEvent, RunStatus, SandboxError};
use crate::config::SandboxConfig;
use crate::sync::Workspace;

/// How long `stop` waits for a run to wind down.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Runs one workspace snapshot at a time.
///
/// Starting a run stops the previous one. Dropping the controller stops
/// the active run as well.
pub struct SandboxController {
    config: SandboxConfig,
    next_run: u64,
    active: Option<ActiveRun>,
}

struct ActiveRun {
    id: u64,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    status: watch::Receiver<RunStatus>,
}

/// Consumer side of a run: its event stream, status and transcript.
pub struct RunHandle {
    id: u64,
    events: mpsc::UnboundedReceiver<RunEvent>,
    status: watch::Receiver<RunStatus>,
    output: Arc<Mutex<OutputBuffer>>,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Retained output so far, oldest chunks first.
    pub fn output(&self) -> String {
        self.output
            .lock()
            .map(|buffer| buffer.contents())
            .unwrap_or_default()
    }

    /// Drain remaining events and return the final status.
    pub async fn wait(&mut self) -> RunStatus {
        while self.events.recv().await.is_some() {}
        self.status()
    }
}

impl Stream for RunHandle {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        self.events.poll_recv(cx)
    }
}

impl SandboxController {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            next_run: 0,
            active: None,
        }
    }

    /// Status of the current run, `Idle` if none was started.
    pub fn status(&self) -> RunStatus {
        self.active
            .as_ref()
            .map(|run| *run.status.borrow())
            .unwrap_or(RunStatus::Idle)
    }

    pub fn active_run(&self) -> Option<u64> {
        self.active.as_ref().map(|run| run.id)
    }

    /// Run the workspace's current local tree.
    pub async fn run_workspace(&mut self, workspace: &Workspace) -> RunHandle {
        self.run(workspace.snapshot_tree()).await
    }

    /// Start a run of `snapshot`, stopping any run in progress.
    pub async fn run(&mut self, snapshot: FileTree) -> RunHandle {
        self.stop().await;

        self.next_run += 1;
        let id = self.next_run;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RunStatus::Idle);
        let (stop_tx, stop_rx) = oneshot::channel();
        let output = Arc::new(Mutex::new(OutputBuffer::new(self.config.max_output_bytes)));

        let run = Run {
            id,
            config: self.config.clone(),
            sink: OutputSink::new(events_tx, output.clone()),
            status: status_tx,
        };
        let task = tokio::spawn(run.execute(snapshot, stop_rx));
        tracing::info!(run_id = id, "Started sandbox run");

        self.active = Some(ActiveRun {
            id,
            stop: Some(stop_tx),
            task,
            status: status_rx.clone(),
        });
        RunHandle {
            id,
            events: events_rx,
            status: status_rx,
            output,
        }
    }

    /// Stop the active run. Returns `false` if nothing was running.
    pub async fn stop(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        let was_live = !active.status.borrow().is_terminal();
        if let Some(stop) = active.stop.take() {
            let _ = stop.send(());
        }
        match tokio::time::timeout(STOP_GRACE, &mut active.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(run_id = active.id, error = %e, "Sandbox run task failed"),
            Err(_) => {
                tracing::warn!(run_id = active.id, "Sandbox run did not stop in time; aborting");
                active.task.abort();
            }
        }
        was_live
    }
}

struct Run {
    id: u64,
    config: SandboxConfig,
    sink: OutputSink,
    status: watch::Sender<RunStatus>,
}

impl Run {
    fn set_status(&self, status: RunStatus) {
        self.status.send_replace(status);
        self.sink.status(status);
    }

    async fn execute(self, snapshot: FileTree, mut stop: oneshot::Receiver<()>) {
        let status = self.drive(snapshot, &mut stop).await;
        tracing::info!(run_id = self.id, %status, "Sandbox run finished");
        self.set_status(status);
    }

    async fn drive(&self, snapshot: FileTree, stop: &mut oneshot::Receiver<()>) -> RunStatus {
        let plan = match plan_run(snapshot, &self.config) {
            Ok(plan) => plan,
            Err(e) => {
                self.sink.notice(e.to_string());
                return RunStatus::Failed;
            }
        };
        for notice in &plan.notices {
            self.sink.notice(notice.as_str());
        }

        let mount = match Mount::create(&plan.tree).await {
            Ok(mount) => mount,
            Err(e) => {
                self.sink.notice(e.to_string());
                return RunStatus::Failed;
            }
        };

        if let Some(install) = &plan.install {
            self.set_status(RunStatus::Installing);
            let outcome = run_step(
                install,
                mount.path(),
                &self.sink,
                stop,
                self.config.install_timeout(),
            )
            .await;
            if matches!(outcome, StepOutcome::Stopped) {
                self.sink.notice("Run stopped");
                return RunStatus::Stopped;
            }
            if !outcome.succeeded() {
                let err = SandboxError::InstallationFailed(outcome.describe());
                tracing::warn!(run_id = self.id, error = %err, "Install step failed");
                self.sink.notice(err.to_string());
                return RunStatus::Failed;
            }
        }

        self.set_status(RunStatus::Running);
        let outcome = run_step(
            &plan.start,
            mount.path(),
            &self.sink,
            stop,
            self.config.run_timeout(),
        )
        .await;
        match outcome {
            StepOutcome::Exited(Some(0)) => {
                self.sink.notice("Process exited");
                RunStatus::Stopped
            }
            StepOutcome::Stopped => {
                self.sink.notice("Run stopped");
                RunStatus::Stopped
            }
            StepOutcome::TimedOut(_) => {
                self.sink
                    .notice(format!("Run {}; process stopped", outcome.describe()));
                RunStatus::Stopped
            }
            other => {
                self.sink.notice(format!("Process {}", other.describe()));
                RunStatus::Failed
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sandbox::MANIFEST;
    use futures::StreamExt;

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn config() -> SandboxConfig {
        SandboxConfig {
            install_command: shell("echo installing"),
            start_command: shell("cat package.json"),
            ..SandboxConfig::default()
        }
    }

    fn tree(files: &[(&str, &str)]) -> FileTree {
        let mut tree = FileTree::new();
        for (path, contents) in files {
            tree.write_file(*path, *contents).unwrap();
        }
        tree
    }

    async fn collect(handle: &mut RunHandle) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[RunEvent]) -> Vec<RunStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Status(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn manifest_run_fixes_start_before_install() {
        let mut controller = SandboxController::new(config());
        let mut handle = controller
            .run(tree(&[(MANIFEST, r#"{"name":"demo"}"#), ("server.js", "")]))
            .await;
        let events = collect(&mut handle).await;

        assert_eq!(
            statuses(&events),
            vec![RunStatus::Installing, RunStatus::Running, RunStatus::Stopped]
        );
        let notice = events
            .iter()
            .position(|e| matches!(e, RunEvent::Notice(n) if n.contains("node server.js")))
            .unwrap();
        let install_output = events
            .iter()
            .position(|e| matches!(e, RunEvent::Output(o) if o.contains("installing")))
            .unwrap();
        assert!(notice < install_output);
        assert!(handle.output().contains(r#""start": "node server.js""#));
        assert_eq!(handle.status(), RunStatus::Stopped);
    }

    #[tokio::test]
    async fn failing_install_fails_the_run() {
        let mut controller = SandboxController::new(SandboxConfig {
            install_command: shell("echo broken >&2; exit 3"),
            ..config()
        });
        let mut handle = controller
            .run(tree(&[(MANIFEST, r#"{"scripts":{"start":"x"}}"#)]))
            .await;
        let events = collect(&mut handle).await;

        assert_eq!(statuses(&events), vec![RunStatus::Installing, RunStatus::Failed]);
        assert!(handle.output().contains("broken"));
        assert!(events.iter().any(
            |e| matches!(e, RunEvent::Notice(n) if n.contains("installation failed") && n.contains("3"))
        ));
    }

    #[tokio::test]
    async fn nothing_runnable_fails_without_installing() {
        let mut controller = SandboxController::new(config());
        let mut handle = controller.run(tree(&[("README.md", "# hi")])).await;

        assert_eq!(handle.wait().await, RunStatus::Failed);
        assert!(handle.output().contains("no runnable file"));
    }

    #[tokio::test]
    async fn direct_script_streams_output() {
        let mut controller = SandboxController::new(config());
        let mut handle = controller
            .run(tree(&[(
                "run.sh",
                "printf '\\033[31mhello\\033[0m\\n'; echo 'listening on port 4321'",
            )]))
            .await;
        let events = collect(&mut handle).await;

        assert_eq!(statuses(&events), vec![RunStatus::Running, RunStatus::Stopped]);
        assert!(events.contains(&RunEvent::ServerReady {
            host: "localhost".into(),
            port: 4321
        }));
        let output = handle.output();
        assert!(output.contains("hello\n"));
        assert!(!output.contains('\x1b'));
    }

    #[tokio::test]
    async fn stop_kills_the_process_tree() {
        let mut controller = SandboxController::new(config());
        let mut handle = controller
            .run(tree(&[("run.sh", "echo started; sleep 30 & wait")]))
            .await;

        while let Some(event) = handle.next_event().await {
            if matches!(&event, RunEvent::Output(o) if o.contains("started")) {
                break;
            }
        }
        assert!(controller.stop().await);
        assert_eq!(handle.wait().await, RunStatus::Stopped);
        assert!(handle.output().ends_with("Run stopped\n"));
        assert!(!controller.stop().await);
    }

    #[tokio::test]
    async fn new_run_stops_the_previous_one() {
        let mut controller = SandboxController::new(config());
        let mut first = controller.run(tree(&[("run.sh", "sleep 30")])).await;
        let mut second = controller.run(tree(&[("run.sh", "echo second")])).await;

        assert_eq!(first.wait().await, RunStatus::Stopped);
        assert_eq!(second.wait().await, RunStatus::Stopped);
        assert_eq!(controller.active_run(), Some(second.id()));
        assert!(second.output().contains("second"));
    }

    #[tokio::test]
    async fn run_timeout_stops_the_process() {
        let mut controller = SandboxController::new(SandboxConfig {
            run_timeout_secs: 1,
            ..config()
        });
        let mut handle = controller.run(tree(&[("run.sh", "sleep 30")])).await;

        assert_eq!(handle.wait().await, RunStatus::Stopped);
        assert!(handle.output().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let mut controller = SandboxController::new(config());
        let mut handle = controller.run(tree(&[("run.sh", "exit 7")])).await;

        assert_eq!(handle.wait().await, RunStatus::Failed);
        assert!(handle.output().contains("exited with status 7"));
    }
}
