//! # BackUP Engine - Directory Backup Library
//!
//! A headless backup engine that mirrors source directories into
//! destination directories on a bounded pool of worker threads.
//! Designed as the foundation for multiple front ends (CLI, HTTP, GUI).
//!
//! ## Overview
//!
//! Each backup copies `<source>` to `<destination>/<source folder name>`.
//! The engine features:
//! - Pre-counted totals for percentage progress
//! - Exclusion of symlinks, special files and a deny-list of folder names
//! - Per-node error isolation; skipped nodes are listed in `warnings.log`
//! - Cooperative pause, resume and cancel while a backup runs
//! - Progress reporting via a sink trait (decoupled from UI technology)
//! - Task history through a pluggable store
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use backup_engine::{BackupService, EngineConfig, MemoryTaskStore, ProgressHub};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Arc::new(ProgressHub::new());
//! let service = BackupService::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryTaskStore::new()),
//!     hub.clone(),
//! )?;
//!
//! let id = service.submit("/home/me/Documents", "/mnt/backup")?;
//! if let Some(task) = service.wait_for(id, Duration::from_secs(3600))? {
//!     println!("{}: {} ({} files)", task.id, task.status, task.file_count);
//! }
//! service.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Task records, status machine, progress snapshots
//! - **error**: Error types and handling
//! - **config**: Engine configuration
//! - **scanner**: Pre-copy file counting
//! - **exclusion**: Which nodes are skipped
//! - **fs_ops**: Low-level filesystem operations
//! - **warnings**: The per-backup `warnings.log`
//! - **copier**: Tree walk with pause/cancel checkpoints
//! - **registry**: Live task states shared with workers
//! - **store**: Task persistence
//! - **progress**: Progress sink trait and broadcast hub
//! - **pool**: Bounded worker threads
//! - **orchestrator**: The `BackupService` entry point

pub mod model;
pub mod error;
pub mod config;
pub mod scanner;
pub mod exclusion;
pub mod fs_ops;
pub mod warnings;
pub mod copier;
pub mod registry;
pub mod store;
pub mod progress;
pub mod pool;
pub mod orchestrator;

// Re-export main types and functions
pub use model::{format_duration, BackupTask, Progress, ProgressKind, SizeMb, TaskId, TaskStatus};
pub use error::{EngineError, StoreError};
pub use config::EngineConfig;
pub use scanner::{scan_tree, TreeTotals};
pub use exclusion::{Exclusion, ExclusionPolicy};
pub use store::{JsonTaskStore, MemoryTaskStore, TaskStore};
pub use progress::{ControlEvent, ProgressEvent, ProgressHub, ProgressSink, TerminalEvent};
pub use orchestrator::{BackupService, BatchSubmission, RejectedPair, WarningsReport};
