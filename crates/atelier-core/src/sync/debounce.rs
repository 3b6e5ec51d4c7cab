//! Debounced full-tree saves.

use std::sync::Arc;
use std::time::Duration;

use atelier_protocol::FileTree;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::TreeSink;

enum SaveCommand {
    Schedule(FileTree),
    /// Swap the waiting snapshot without scheduling a new save
    Refresh(FileTree),
    Cancel,
    Flush(oneshot::Sender<()>),
}

/// Collapses bursts of edits into one save after a quiet window.
///
/// Only the latest scheduled snapshot is ever written. Dropping the saver
/// writes any pending snapshot before the background task exits.
pub struct DebouncedSaver {
    tx: mpsc::UnboundedSender<SaveCommand>,
    task: JoinHandle<()>,
}

impl DebouncedSaver {
    pub fn spawn(sink: Arc<dyn TreeSink>, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, sink, window));
        Self { tx, task }
    }

    /// Replace the pending snapshot and restart the quiet window.
    pub fn schedule(&self, tree: FileTree) {
        if self.tx.send(SaveCommand::Schedule(tree)).is_err() {
            warn!("tree saver stopped; edit not persisted");
        }
    }

    /// Replace the pending snapshot if one is waiting.
    ///
    /// Used when the local tree moves on without a local edit (an AI merge
    /// the server already persisted): a waiting save must not write the
    /// older tree, but nothing new needs saving otherwise.
    pub fn refresh(&self, tree: FileTree) {
        let _ = self.tx.send(SaveCommand::Refresh(tree));
    }

    /// Drop the pending snapshot without saving it.
    pub fn cancel(&self) {
        let _ = self.tx.send(SaveCommand::Cancel);
    }

    /// Save the pending snapshot now, if any.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(SaveCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Flush and wait for the background task to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<SaveCommand>,
    sink: Arc<dyn TreeSink>,
    window: Duration,
) {
    let mut pending: Option<FileTree> = None;

    loop {
        let command = if pending.is_some() {
            tokio::select! {
                command = rx.recv() => command,
                _ = tokio::time::sleep(window) => {
                    if let Some(tree) = pending.take() {
                        persist(sink.as_ref(), tree).await;
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(SaveCommand::Schedule(tree)) => pending = Some(tree),
            Some(SaveCommand::Refresh(tree)) => {
                if pending.is_some() {
                    pending = Some(tree);
                }
            }
            Some(SaveCommand::Cancel) => {
                if pending.take().is_some() {
                    debug!("pending file tree save discarded");
                }
            }
            Some(SaveCommand::Flush(done)) => {
                if let Some(tree) = pending.take() {
                    persist(sink.as_ref(), tree).await;
                }
                let _ = done.send(());
            }
            None => {
                if let Some(tree) = pending.take() {
                    persist(sink.as_ref(), tree).await;
                }
                break;
            }
        }
    }
}

async fn persist(sink: &dyn TreeSink, tree: FileTree) {
    let entries = tree.len();
    match sink.save_tree(tree).await {
        Ok(()) => debug!(entries, "file tree saved"),
        Err(e) => warn!(error = %e, "failed to persist file tree"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        saves: Mutex<Vec<FileTree>>,
    }

    #[async_trait]
    impl TreeSink for Recording {
        async fn save_tree(&self, tree: FileTree) -> anyhow::Result<()> {
            self.saves.lock().await.push(tree);
            Ok(())
        }
    }

    fn snapshot(contents: &str) -> FileTree {
        let mut tree = FileTree::new();
        tree.write_file("a.js", contents).unwrap();
        tree
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_save() {
        let sink = Arc::new(Recording::default());
        let saver = DebouncedSaver::spawn(sink.clone(), Duration::from_millis(1_500));

        for contents in ["a", "ab", "abc"] {
            saver.schedule(snapshot(contents));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(sink.saves.lock().await.is_empty());

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        let saves = sink.saves.lock().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].file_contents("a.js"), Some("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn separated_edits_save_separately() {
        let sink = Arc::new(Recording::default());
        let saver = DebouncedSaver::spawn(sink.clone(), Duration::from_millis(1_500));

        saver.schedule(snapshot("one"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        saver.schedule(snapshot("two"));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(sink.saves.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_and_shutdown_write_pending() {
        let sink = Arc::new(Recording::default());
        let saver = DebouncedSaver::spawn(sink.clone(), Duration::from_millis(1_500));

        saver.schedule(snapshot("now"));
        saver.flush().await;
        assert_eq!(sink.saves.lock().await.len(), 1);

        // Nothing pending: flush is a no-op
        saver.flush().await;
        saver.schedule(snapshot("later"));
        saver.shutdown().await;

        let saves = sink.saves.lock().await;
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].file_contents("a.js"), Some("later"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_only_replaces_a_waiting_snapshot() {
        let sink = Arc::new(Recording::default());
        let saver = DebouncedSaver::spawn(sink.clone(), Duration::from_millis(1_500));

        // Nothing waiting: no save is created
        saver.refresh(snapshot("merged"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sink.saves.lock().await.is_empty());

        saver.schedule(snapshot("edit"));
        saver.refresh(snapshot("edit+merged"));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let saves = sink.saves.lock().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].file_contents("a.js"), Some("edit+merged"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_the_waiting_snapshot() {
        let sink = Arc::new(Recording::default());
        let saver = DebouncedSaver::spawn(sink.clone(), Duration::from_millis(1_500));

        saver.schedule(snapshot("stale"));
        saver.cancel();
        saver.flush().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(sink.saves.lock().await.is_empty());
    }
}
