// Deferred deletion of uploaded files
//
// One task owns a time-ordered queue of pending deletions. Handles talk to it
// over a channel, so entries can be listed or cancelled before they fire.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

/// Identifier of one scheduled deletion
pub type TaskId = u64;

/// A file waiting for its TTL to run out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub id: TaskId,
    pub path: PathBuf,
    pub ttl: Duration,
    pub due: Instant,
}

/// What happened when a deletion fired
#[derive(Debug)]
pub enum DeletionOutcome {
    Removed,
    /// The file had already been deleted or moved
    AlreadyGone,
    Failed(io::Error),
}

/// Remove a file, treating a missing file as a non-error outcome
pub async fn delete_file(path: &Path) -> DeletionOutcome {
    match tokio::fs::remove_file(path).await {
        Ok(()) => DeletionOutcome::Removed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => DeletionOutcome::AlreadyGone,
        Err(e) => DeletionOutcome::Failed(e),
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    Schedule {
        path: PathBuf,
        ttl: Duration,
        reply: oneshot::Sender<TaskId>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Pending {
        reply: oneshot::Sender<Vec<PendingDeletion>>,
    },
}

/// Handle for communicating with the scheduler
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Delete `path` once `ttl` has elapsed
    pub async fn schedule(&self, path: PathBuf, ttl: Duration) -> Result<TaskId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Schedule { path, ttl, reply })
            .ok()
            .context("Deletion scheduler is not running")?;
        rx.await.context("Deletion scheduler dropped the request")
    }

    /// Cancel a pending deletion. Returns false if it already fired or never existed.
    pub async fn cancel(&self, id: TaskId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Cancel { id, reply })
            .ok()
            .context("Deletion scheduler is not running")?;
        rx.await.context("Deletion scheduler dropped the request")
    }

    /// Snapshot of the queue, earliest first
    pub async fn pending(&self) -> Result<Vec<PendingDeletion>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Pending { reply })
            .ok()
            .context("Deletion scheduler is not running")?;
        rx.await.context("Deletion scheduler dropped the request")
    }
}

/// Owner of the deletion queue
pub struct DeletionScheduler {
    queue: BTreeMap<(Instant, TaskId), PendingDeletion>,
    next_id: TaskId,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
}

impl DeletionScheduler {
    /// Create a scheduler and its handle without starting it
    pub fn new() -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            queue: BTreeMap::new(),
            next_id: 0,
            rx,
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Start the scheduler on the current runtime
    pub fn spawn() -> SchedulerHandle {
        let (scheduler, handle) = Self::new();
        tokio::spawn(scheduler.run());
        handle
    }

    /// Run until every handle is gone and the queue has drained
    pub async fn run(mut self) {
        tracing::debug!("Deletion scheduler started");
        let mut accepting = true;

        loop {
            let next_due = self.queue.keys().next().map(|(due, _)| *due);
            if !accepting && next_due.is_none() {
                break;
            }
            let wake = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                cmd = self.rx.recv(), if accepting => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => accepting = false,
                },
                _ = sleep_until(wake), if next_due.is_some() => {
                    self.fire_due().await;
                }
            }
        }

        tracing::debug!("Deletion scheduler stopped");
    }

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Schedule { path, ttl, reply } => {
                self.next_id += 1;
                let id = self.next_id;
                let due = Instant::now() + ttl;
                tracing::info!(
                    "Timer started for file {:?} (ttl={}s, task {})",
                    path,
                    ttl.as_secs_f64(),
                    id
                );
                self.queue.insert(
                    (due, id),
                    PendingDeletion {
                        id,
                        path,
                        ttl,
                        due,
                    },
                );
                let _ = reply.send(id);
            }
            SchedulerCommand::Cancel { id, reply } => {
                let key = self.queue.keys().find(|(_, task)| *task == id).copied();
                let cancelled = match key {
                    Some(key) => {
                        if let Some(task) = self.queue.remove(&key) {
                            tracing::info!("Cancelled deletion of {:?} (task {})", task.path, id);
                        }
                        true
                    }
                    None => false,
                };
                let _ = reply.send(cancelled);
            }
            SchedulerCommand::Pending { reply } => {
                let _ = reply.send(self.queue.values().cloned().collect());
            }
        }
    }

    async fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            match delete_file(&task.path).await {
                DeletionOutcome::Removed => {
                    tracing::info!("Timed-delete: removed file {:?}", task.path);
                }
                DeletionOutcome::AlreadyGone => {
                    tracing::info!("Timed-delete: {:?} was already gone", task.path);
                }
                DeletionOutcome::Failed(e) => {
                    tracing::warn!("Timed-delete: removing {:?} failed: {}", task.path, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_removed_after_ttl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"bye").unwrap();

        let handle = DeletionScheduler::spawn();
        handle
            .schedule(path.clone(), Duration::from_millis(200))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!path.exists());
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, b"stay").unwrap();

        let handle = DeletionScheduler::spawn();
        let id = handle
            .schedule(path.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(handle.cancel(id).await.unwrap());
        assert!(!handle.cancel(id).await.unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_pending_is_time_ordered() {
        let dir = tempdir().unwrap();
        let handle = DeletionScheduler::spawn();

        let late = handle
            .schedule(dir.path().join("late"), Duration::from_secs(60))
            .await
            .unwrap();
        let soon = handle
            .schedule(dir.path().join("soon"), Duration::from_secs(30))
            .await
            .unwrap();

        let pending = handle.pending().await.unwrap();
        let ids: Vec<TaskId> = pending.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![soon, late]);
    }

    #[tokio::test]
    async fn test_duplicate_paths_fire_independently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("twice.bin");
        std::fs::write(&path, b"x").unwrap();

        let handle = DeletionScheduler::spawn();
        handle.schedule(path.clone(), Duration::from_millis(50)).await.unwrap();
        handle.schedule(path.clone(), Duration::from_millis(100)).await.unwrap();
        assert_eq!(handle.pending().await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!path.exists());
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_distinguishes_missing_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ghost");
        assert!(matches!(delete_file(&path).await, DeletionOutcome::AlreadyGone));

        std::fs::write(&path, b"boo").unwrap();
        assert!(matches!(delete_file(&path).await, DeletionOutcome::Removed));

        // A directory cannot be unlinked as a file
        let sub = dir.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        assert!(matches!(delete_file(&sub).await, DeletionOutcome::Failed(_)));
    }
}
