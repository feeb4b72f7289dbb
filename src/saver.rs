use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::events::SaveReport;
use crate::models::Task;
use crate::storage::TaskStore;

enum Job {
    Save { seq: u64, snapshot: Vec<Task> },
    Flush(oneshot::Sender<()>),
}

/// Runs snapshot saves off the interactive loop, one at a time, in the order
/// they were submitted.
///
/// A single worker drains the job channel and waits for each blocking save before
/// taking the next one, so a later snapshot can never be overwritten by an
/// earlier one.
pub struct SaveQueue {
    jobs: mpsc::UnboundedSender<Job>,
    next_seq: AtomicU64,
    worker: JoinHandle<()>,
}

impl SaveQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(store: Arc<dyn TaskStore>) -> (Self, mpsc::UnboundedReceiver<SaveReport>) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(store, jobs_rx, reports_tx));
        let queue = Self {
            jobs: jobs_tx,
            next_seq: AtomicU64::new(1),
            worker,
        };
        (queue, reports_rx)
    }

    /// Queues a full snapshot and returns its sequence number.
    pub fn submit(&self, snapshot: Vec<Task>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if self.jobs.send(Job::Save { seq, snapshot }).is_err() {
            log::warn!("save worker stopped, dropping snapshot seq={seq}");
        }
        seq
    }

    /// Resolves once every snapshot submitted before this call has been written or failed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.jobs.send(Job::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Finishes pending saves and stops the worker.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(err) = self.worker.await {
            log::error!("save worker ended abnormally: {err}");
        }
    }
}

async fn run_worker(
    store: Arc<dyn TaskStore>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    reports: mpsc::UnboundedSender<SaveReport>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Save { seq, snapshot } => {
                let count = snapshot.len();
                let store = Arc::clone(&store);
                let result =
                    tokio::task::spawn_blocking(move || store.save_tasks(&snapshot)).await;
                let report = match result {
                    Ok(Ok(())) => SaveReport::Saved { seq, count },
                    Ok(Err(err)) => {
                        log::warn!("save failed seq={seq} err={err}");
                        SaveReport::Failed {
                            seq,
                            error: err.to_string(),
                        }
                    }
                    Err(err) => {
                        log::error!("save panicked seq={seq} err={err}");
                        SaveReport::Failed {
                            seq,
                            error: format!("save did not complete: {err}"),
                        }
                    }
                };
                // The interactive loop may already be gone during shutdown.
                let _ = reports.send(report);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("save worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{encode_tasks, FileTaskStore, StoreError};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the order snapshots arrive in; the first save is slow so later jobs pile up.
    struct RecordingStore {
        saved: Mutex<Vec<String>>,
    }

    impl TaskStore for RecordingStore {
        fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
            Ok(Vec::new())
        }

        fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
            let mut saved = self.saved.lock().unwrap();
            if saved.is_empty() {
                std::thread::sleep(Duration::from_millis(50));
            }
            saved.push(tasks[0].title().to_string());
            Ok(())
        }
    }

    struct FailingStore;

    impl TaskStore for FailingStore {
        fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
            Ok(Vec::new())
        }

        fn save_tasks(&self, _tasks: &[Task]) -> Result<(), StoreError> {
            Err(StoreError::Save {
                path: "tasks.txt".into(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn later_snapshot_wins_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileTaskStore::new(dir.path().join("tasks.txt")));
        let (queue, mut reports) = SaveQueue::start(store.clone());

        let a: Vec<Task> = (0..200).map(|i| Task::with_id(format!("a{i}"), "A", false)).collect();
        let b = vec![Task::with_id("b", "B", true)];
        let seq_a = queue.submit(a);
        let seq_b = queue.submit(b.clone());
        assert!(seq_a < seq_b);
        queue.flush().await;

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, encode_tasks(&b));
        assert_eq!(reports.recv().await.unwrap().seq(), seq_a);
        assert_eq!(
            reports.recv().await.unwrap(),
            SaveReport::Saved { seq: seq_b, count: 1 }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saves_run_in_submission_order() {
        let store = Arc::new(RecordingStore {
            saved: Mutex::new(Vec::new()),
        });
        let (queue, _reports) = SaveQueue::start(store.clone());
        for i in 0..20 {
            queue.submit(vec![Task::with_id("x", format!("{i}"), false)]);
        }
        queue.shutdown().await;

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(*store.saved.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn failures_are_reported_back() {
        let (queue, mut reports) = SaveQueue::start(Arc::new(FailingStore));
        let seq = queue.submit(Vec::new());
        queue.flush().await;

        let report = reports.recv().await.unwrap();
        assert_eq!(report.seq(), seq);
        assert!(report.is_failure());
        assert!(report.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_returns() {
        let (queue, mut reports) = SaveQueue::start(Arc::new(FailingStore));
        queue.flush().await;
        queue.shutdown().await;
        assert!(reports.recv().await.is_none());
    }
}
