//! Live control state of running backup tasks.
//!
//! The registry holds one authoritative in-memory copy of every task between
//! registration and deregistration. Pause, resume and cancel requests arrive
//! on arbitrary threads; the copy engine reads the state before every node on
//! its worker thread. Every inspect-and-transition happens under one lock, so
//! two concurrent requests can never both move a task out of the same status.
//!
//! The task store is a write-behind mirror: each accepted change is saved
//! before the lock is released, and reads fall back to the store only once a
//! task is no longer live.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{BackupTask, SizeMb, TaskId, TaskStatus};
use crate::store::TaskStore;

/// How a job ended, as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed {
        file_count: u64,
        total_size_mb: SizeMb,
        message: Option<String>,
    },
    Failed(String),
    Cancelled,
}

pub struct TaskRegistry {
    live: Mutex<HashMap<TaskId, BackupTask>>,
    changed: Condvar,
    store: Arc<dyn TaskStore>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        TaskRegistry {
            live: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            store,
        }
    }

    /// Make `task` live. Called once per task before its walk starts.
    pub fn register(&self, task: BackupTask) {
        info!(task_id = %task.id, status = %task.status, "task registered");
        self.live.lock().insert(task.id, task);
        self.changed.notify_all();
    }

    /// Live snapshot if the task is running, otherwise the stored record.
    pub fn get(&self, id: TaskId) -> Result<Option<BackupTask>, EngineError> {
        if let Some(task) = self.live.lock().get(&id) {
            return Ok(Some(task.clone()));
        }
        Ok(self.store.find_by_id(id)?)
    }

    /// Current status of a live task; `None` once it is deregistered.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.live.lock().get(&id).map(|task| task.status)
    }

    pub fn is_live(&self, id: TaskId) -> bool {
        self.live.lock().contains_key(&id)
    }

    /// Snapshots of every live task, in id order.
    pub fn live_tasks(&self) -> Vec<BackupTask> {
        let mut tasks: Vec<_> = self.live.lock().values().cloned().collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    /// RUNNING -> PAUSED. Returns false for any other current status.
    pub fn pause(&self, id: TaskId) -> bool {
        self.control(id, TaskStatus::Paused)
    }

    /// PAUSED -> RUNNING. The first pause timestamp is kept.
    pub fn resume(&self, id: TaskId) -> bool {
        self.control(id, TaskStatus::Running)
    }

    /// RUNNING or PAUSED -> CANCELLED.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.control(id, TaskStatus::Cancelled)
    }

    fn control(&self, id: TaskId, next: TaskStatus) -> bool {
        let mut live = self.live.lock();
        let Some(task) = live.get_mut(&id) else {
            warn!(task_id = %id, requested = %next, "control request for a task that is not running");
            return false;
        };
        if let Err(e) = task.transition(next) {
            warn!(task_id = %id, "{}", e);
            return false;
        }
        self.mirror(task);
        drop(live);

        info!(task_id = %id, status = %next, "control request accepted");
        self.changed.notify_all();
        true
    }

    /// Block while the task is still in `observed`, for at most `timeout`.
    ///
    /// Returns the status seen on wake-up, `None` if the task is no longer
    /// live. Wakes early on any registry change.
    pub fn wait_while(&self, id: TaskId, observed: TaskStatus, timeout: Duration) -> Option<TaskStatus> {
        let mut live = self.live.lock();
        if live.get(&id).map(|task| task.status) == Some(observed) {
            self.changed.wait_for(&mut live, timeout);
        }
        live.get(&id).map(|task| task.status)
    }

    /// Apply the job's outcome to the live record and persist it.
    ///
    /// A task cancelled before settlement stays CANCELLED. A task still
    /// PAUSED is resumed first so it passes through a valid transition.
    /// Returns `None` if the task is not live.
    pub fn settle(&self, id: TaskId, settlement: Settlement) -> Option<BackupTask> {
        let mut live = self.live.lock();
        let task = live.get_mut(&id)?;

        if !task.status.is_terminal() {
            if task.status == TaskStatus::Paused && settlement != Settlement::Cancelled {
                if let Err(e) = task.transition(TaskStatus::Running) {
                    warn!(task_id = %id, "{}", e);
                }
            }
            let outcome = match settlement {
                Settlement::Completed {
                    file_count,
                    total_size_mb,
                    message,
                } => {
                    task.file_count = file_count;
                    task.total_size_mb = total_size_mb;
                    task.error_message = message;
                    task.transition(TaskStatus::Completed)
                }
                Settlement::Failed(message) => {
                    task.error_message = Some(message);
                    task.transition(TaskStatus::Failed)
                }
                Settlement::Cancelled => task.transition(TaskStatus::Cancelled),
            };
            if let Err(e) = outcome {
                warn!(task_id = %id, "{}", e);
            }
        }
        task.mark_finished();
        self.mirror(task);

        let settled = task.clone();
        drop(live);
        self.changed.notify_all();
        Some(settled)
    }

    /// Drop the live entry; later reads come from the store.
    pub fn unregister(&self, id: TaskId) -> Option<BackupTask> {
        let removed = self.live.lock().remove(&id);
        if removed.is_some() {
            info!(task_id = %id, "task unregistered");
        }
        self.changed.notify_all();
        removed
    }

    /// Wait until `id` is no longer live. Returns false on timeout.
    pub fn wait_released(&self, id: TaskId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.live.lock();
        while live.contains_key(&id) {
            if self.changed.wait_until(&mut live, deadline).timed_out() {
                return !live.contains_key(&id);
            }
        }
        true
    }

    fn mirror(&self, task: &BackupTask) {
        if let Err(e) = self.store.save(task) {
            warn!(task_id = %task.id, error = %e, "failed to persist task state");
        }
    }
}
