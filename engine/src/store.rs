//! Durable task records.
//!
//! The engine only depends on the `TaskStore` trait. Two stores are provided:
//! `MemoryTaskStore` for embedding and tests, and `JsonTaskStore`, which keeps
//! the same map mirrored to a JSON file so history survives restarts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::model::{BackupTask, TaskId};

/// Storage for task records, keyed by task id.
///
/// Implementations serialize writes per record; callers never hold a
/// store lock across calls.
pub trait TaskStore: Send + Sync {
    /// Store a new record, assigning it the next id.
    fn insert(&self, task: BackupTask) -> Result<BackupTask, StoreError>;

    /// Replace the record with the same id.
    fn save(&self, task: &BackupTask) -> Result<(), StoreError>;

    fn find_by_id(&self, id: TaskId) -> Result<Option<BackupTask>, StoreError>;

    /// All records in id order.
    fn find_all(&self) -> Result<Vec<BackupTask>, StoreError>;

    /// The RUNNING or PAUSED task for this source/destination pair, if any.
    fn find_active_by_pair(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<Option<BackupTask>, StoreError> {
        Ok(self.find_all()?.into_iter().find(|task| {
            task.is_active() && task.source_path == source && task.destination_path == destination
        }))
    }

    /// The most recently finished task.
    fn find_latest_finished(&self) -> Result<Option<BackupTask>, StoreError> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|task| task.finished_at.is_some())
            .max_by_key(|task| task.finished_at))
    }
}

#[derive(Debug, Default)]
struct Records {
    tasks: BTreeMap<TaskId, BackupTask>,
    last_id: u64,
}

impl Records {
    fn insert(&mut self, mut task: BackupTask) -> BackupTask {
        self.last_id += 1;
        task.id = TaskId(self.last_id);
        self.tasks.insert(task.id, task.clone());
        task
    }
}

/// In-process store; records vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<Records>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert(&self, task: BackupTask) -> Result<BackupTask, StoreError> {
        Ok(self.records.lock().insert(task))
    }

    fn save(&self, task: &BackupTask) -> Result<(), StoreError> {
        self.records.lock().tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn find_by_id(&self, id: TaskId) -> Result<Option<BackupTask>, StoreError> {
        Ok(self.records.lock().tasks.get(&id).cloned())
    }

    fn find_all(&self) -> Result<Vec<BackupTask>, StoreError> {
        Ok(self.records.lock().tasks.values().cloned().collect())
    }
}

/// Store backed by a JSON array on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonTaskStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut records = Records::default();

        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            if !raw.trim().is_empty() {
                let tasks: Vec<BackupTask> = serde_json::from_str(&raw)?;
                for task in tasks {
                    records.last_id = records.last_id.max(task.id.0);
                    records.tasks.insert(task.id, task);
                }
            }
        }

        Ok(JsonTaskStore {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let tasks: Vec<&BackupTask> = records.tasks.values().collect();
        let json = serde_json::to_string_pretty(&tasks)?;

        let tmp = self.path.with_extension("json.tmp");
        let io_err = |e: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source: e,
        };
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl TaskStore for JsonTaskStore {
    fn insert(&self, task: BackupTask) -> Result<BackupTask, StoreError> {
        let mut records = self.records.lock();
        let task = records.insert(task);
        self.persist(&records)?;
        Ok(task)
    }

    fn save(&self, task: &BackupTask) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        records.tasks.insert(task.id, task.clone());
        self.persist(&records)
    }

    fn find_by_id(&self, id: TaskId) -> Result<Option<BackupTask>, StoreError> {
        Ok(self.records.lock().tasks.get(&id).cloned())
    }

    fn find_all(&self) -> Result<Vec<BackupTask>, StoreError> {
        Ok(self.records.lock().tasks.values().cloned().collect())
    }
}
