//! Core data model for backup tasks.
//!
//! This module defines the main data structures for representing backup operations:
//! - BackupTask: one source-to-destination backup and its lifecycle
//! - TaskStatus: the lifecycle state machine
//! - SizeMb: fixed-point megabyte size used for task totals
//! - Progress: ephemeral progress value published while a copy runs, tagged
//!   with a ProgressKind

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Ordinal identifier of a backup task, assigned by the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a backup task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Copy in progress (initial state)
    Running,
    /// Copy blocked by an operator pause
    Paused,
    /// Walk finished; some nodes may have been skipped with warnings
    Completed,
    /// Task-level failure; see the error message
    Failed,
    /// Stopped by an operator; copied files are kept
    Cancelled,
}

impl TaskStatus {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns true if a task may move from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.pad(name)
    }
}

/// A size in megabytes with two decimal places, stored as hundredths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeMb(u64);

impl SizeMb {
    const BYTES_PER_MB: u128 = 1024 * 1024;

    /// Convert a byte count, rounding half up to two decimals.
    pub fn from_bytes(bytes: u64) -> Self {
        let scaled = bytes as u128 * 100;
        let hundredths = (scaled + Self::BYTES_PER_MB / 2) / Self::BYTES_PER_MB;
        SizeMb(hundredths as u64)
    }

    pub fn from_hundredths(hundredths: u64) -> Self {
        SizeMb(hundredths)
    }

    pub fn hundredths(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for SizeMb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for SizeMb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for SizeMb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() || value < 0.0 {
            return Err(serde::de::Error::custom("size must be a non-negative number"));
        }
        Ok(SizeMb((value * 100.0).round() as u64))
    }
}

/// Represents a single backup task (one source/destination pair).
///
/// The record is shared between the durable task store and the live
/// registry entry while the task runs. `status`, `paused` and `cancelled`
/// only change through [`BackupTask::transition`], which keeps them in step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupTask {
    /// Identifier assigned by the task store
    pub id: TaskId,

    /// Source directory being backed up
    pub source_path: PathBuf,

    /// Destination directory chosen by the operator
    pub destination_path: PathBuf,

    /// Current lifecycle state
    pub status: TaskStatus,

    /// Failure message, or the warning summary of a completed task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Regular files found by the scanner
    #[serde(default)]
    pub file_count: u64,

    /// Total size found by the scanner
    #[serde(default)]
    pub total_size_mb: SizeMb,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// First time the task was paused; kept as history after resume
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub cancelled: bool,
}

impl BackupTask {
    /// Create a new RUNNING task. The id is replaced when the store inserts it.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        BackupTask {
            id: TaskId(0),
            source_path: source.into(),
            destination_path: destination.into(),
            status: TaskStatus::Running,
            error_message: None,
            file_count: 0,
            total_size_mb: SizeMb::default(),
            started_at: Utc::now(),
            finished_at: None,
            paused_at: None,
            paused: false,
            cancelled: false,
        }
    }

    /// Move the task to `next`, updating flags and timestamps.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidTransition` for any move outside the
    /// transition table; the task is left untouched.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::Paused => {
                self.paused = true;
                self.paused_at.get_or_insert(now);
            }
            TaskStatus::Running => self.paused = false,
            TaskStatus::Cancelled => {
                self.paused = false;
                self.cancelled = true;
            }
            TaskStatus::Completed | TaskStatus::Failed => self.paused = false,
        }
        if next.is_terminal() {
            self.mark_finished();
        }
        self.status = next;
        Ok(())
    }

    /// Set the finish timestamp unless it is already set.
    pub fn mark_finished(&mut self) {
        self.finished_at.get_or_insert_with(Utc::now);
    }

    /// Is this task still RUNNING or PAUSED?
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Directory the tree is mirrored into: `<destination>/<source folder name>`.
    pub fn mirror_root(&self) -> PathBuf {
        match self.source_path.file_name() {
            Some(name) => self.destination_path.join(name),
            None => self.destination_path.clone(),
        }
    }

    /// Wall-clock time between start and finish, once finished.
    pub fn duration(&self) -> Option<Duration> {
        let finished = self.finished_at?;
        (finished - self.started_at).to_std().ok()
    }
}

/// Format a duration as `HH:MM:SS`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// A progress notification for one task. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub task_id: TaskId,

    /// Whole percent, 0 to 100
    pub percent: u8,

    /// File just copied, or the node the walk is waiting on
    pub current_file: String,

    pub processed: u64,

    /// Scanner estimate; excluded files are counted here but never processed
    pub total: u64,

    pub kind: ProgressKind,
}

/// What a progress notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Totals are known and the walk is about to begin
    Started,
    /// `current_file` was copied
    Copied,
    /// The walk is holding before `current_file`
    Paused,
    /// The walk continues after a pause
    Resumed,
}

impl Progress {
    /// `floor(processed * 100 / total)`, 0 when total is 0, capped at 100.
    pub fn percent_of(processed: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let percent = processed as u128 * 100 / total as u128;
        percent.min(100) as u8
    }
}
