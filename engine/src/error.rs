//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`, which represents request- and
//! task-level errors. Node-level problems (a single file or directory that
//! cannot be read or written) are never raised as `EngineError`; the copy
//! engine records them in the task's `warnings.log` and keeps walking.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{TaskId, TaskStatus};

/// Errors that stop a request or a whole task.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source directory not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Source is not a directory: {}", .path.display())]
    SourceNotDirectory { path: PathBuf },

    /// Source directory has no entries to back up
    #[error("Source directory is empty: {}", .path.display())]
    SourceEmpty { path: PathBuf },

    #[error("Destination directory not found: {}", .path.display())]
    DestinationNotFound { path: PathBuf },

    #[error("Destination is not a directory: {}", .path.display())]
    DestinationNotDirectory { path: PathBuf },

    /// The mirror would land inside the source, or on top of it
    #[error("Destination {} overlaps source {}", .destination_path.display(), .source_path.display())]
    OverlappingPaths {
        source_path: PathBuf,
        destination_path: PathBuf,
    },

    /// Batch request with empty or unequal source/destination lists
    #[error("Sources and destinations must be non-empty lists of equal length ({sources} vs {destinations})")]
    MismatchedPairs { sources: usize, destinations: usize },

    /// A RUNNING or PAUSED task already exists for this pair
    #[error("Backup already active for {} -> {} (task {task_id})", .source_path.display(), .destination_path.display())]
    ActivePairConflict {
        source_path: PathBuf,
        destination_path: PathBuf,
        task_id: TaskId,
    },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The traversal itself could not proceed
    #[error("Failed to walk directory tree at {}: {source}", .path.display())]
    WalkFailed { path: PathBuf, source: io::Error },

    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    #[error("Failed to read warnings log {}: {source}", .path.display())]
    WarningsUnreadable { path: PathBuf, source: io::Error },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Failed to read configuration {}: {source}", .path.display())]
    ConfigUnreadable { path: PathBuf, source: io::Error },

    #[error("Malformed configuration {}: {source}", .path.display())]
    ConfigMalformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to start backup worker: {source}")]
    WorkerSpawnFailed { source: io::Error },

    /// The worker pool no longer accepts jobs
    #[error("Backup service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True for errors raised before any task record exists.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::SourceNotDirectory { .. }
                | Self::SourceEmpty { .. }
                | Self::DestinationNotFound { .. }
                | Self::DestinationNotDirectory { .. }
                | Self::OverlappingPaths { .. }
        )
    }
}

/// Errors raised by a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task store I/O error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Task store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_include_paths() {
        let err = EngineError::SourceEmpty {
            path: PathBuf::from("/data/empty"),
        };
        assert_eq!(err.to_string(), "Source directory is empty: /data/empty");
        assert!(err.is_validation());

        let err = EngineError::ActivePairConflict {
            source_path: PathBuf::from("/a"),
            destination_path: PathBuf::from("/b"),
            task_id: TaskId(7),
        };
        assert_eq!(err.to_string(), "Backup already active for /a -> /b (task 7)");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_walk_failure_keeps_io_message() {
        let err = EngineError::WalkFailed {
            path: PathBuf::from("/gone"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such directory"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to walk directory tree at /gone: no such directory"
        );
    }
}
