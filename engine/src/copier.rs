//! Copy engine: mirrors a source tree into a destination.
//!
//! The walk is pre-order. Before every node the engine asks the task
//! registry whether to continue, wait (paused) or stop (cancelled or no
//! longer registered). Problems with a single node become warnings in
//! `warnings.log` and never stop the walk; only a failure to walk the root
//! at all is fatal.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::exclusion::ExclusionPolicy;
use crate::fs_ops;
use crate::model::{Progress, ProgressKind, TaskId, TaskStatus};
use crate::progress::ProgressSink;
use crate::registry::TaskRegistry;
use crate::warnings::WarningLog;

/// Result of one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub warnings: usize,
    pub processed: u64,
    /// The walk stopped early because the task was cancelled
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    Proceed,
    Abort,
}

/// Counters for the task being copied.
struct Walk {
    task_id: TaskId,
    total: u64,
    processed: u64,
    log: WarningLog,
}

impl Walk {
    fn progress(&self, current: &Path, kind: ProgressKind) -> Progress {
        Progress {
            task_id: self.task_id,
            percent: Progress::percent_of(self.processed, self.total),
            current_file: current.display().to_string(),
            processed: self.processed,
            total: self.total,
            kind,
        }
    }

    fn report(&self, cancelled: bool) -> CopyReport {
        CopyReport {
            warnings: self.log.count(),
            processed: self.processed,
            cancelled,
        }
    }
}

pub struct CopyEngine {
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn ProgressSink>,
    policy: ExclusionPolicy,
    poll_interval: Duration,
}

impl CopyEngine {
    pub fn new(
        registry: Arc<TaskRegistry>,
        sink: Arc<dyn ProgressSink>,
        policy: ExclusionPolicy,
        poll_interval: Duration,
    ) -> Self {
        CopyEngine {
            registry,
            sink,
            policy,
            poll_interval,
        }
    }

    /// Copy `source` into `destination` for task `task_id`.
    ///
    /// `total_files` is the scanner's estimate, used only for percentages.
    /// Warnings go to `destination/warnings.log`.
    ///
    /// # Errors
    /// `EngineError::WalkFailed` when the source root itself cannot be walked.
    pub fn copy_tree(
        &self,
        source: &Path,
        destination: &Path,
        task_id: TaskId,
        total_files: u64,
    ) -> Result<CopyReport, EngineError> {
        let mut walk = Walk {
            task_id,
            total: total_files,
            processed: 0,
            log: WarningLog::new(destination),
        };
        let mut walker = WalkDir::new(source).follow_links(false).into_iter();

        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(source).to_path_buf();
                    if err.depth() == 0 {
                        walk.log.record("Failed to walk directory tree", &path);
                        let cause = err
                            .into_io_error()
                            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                        return Err(EngineError::WalkFailed { path, source: cause });
                    }
                    walk.log.record(&format!("Failed to visit ({})", err), &path);
                    continue;
                }
            };
            let path = entry.path();

            if self.checkpoint(&walk, path) == Checkpoint::Abort {
                info!(task_id = %task_id, processed = walk.processed, "walk stopped by cancellation");
                return Ok(walk.report(true));
            }

            let target = match path.strip_prefix(source) {
                Ok(rel) if rel.as_os_str().is_empty() => destination.to_path_buf(),
                Ok(rel) => destination.join(rel),
                Err(_) => {
                    walk.log.record("Entry outside of source tree", path);
                    continue;
                }
            };
            let file_type = entry.file_type();

            if let Some(reason) = self.policy.check(path, file_type) {
                walk.log.record(&reason.describe(), path);
                if file_type.is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            if file_type.is_dir() {
                if let Err(e) = fs_ops::mirror_dir(&target) {
                    walk.log.record(&describe_failure("Failed to create directory", &e), path);
                    walker.skip_current_dir();
                }
                continue;
            }

            match fs_ops::copy_file_with_metadata(path, &target) {
                Ok(bytes) => {
                    walk.processed += 1;
                    debug!(task_id = %task_id, bytes, file = %path.display(), "file copied");
                    self.sink.publish(&walk.progress(path, ProgressKind::Copied));
                }
                Err(e) => walk.log.record(&describe_failure("Failed to copy file", &e), path),
            }
        }

        // A pause that lands after the last node still holds the task here.
        let cancelled = self.checkpoint(&walk, source) == Checkpoint::Abort;
        Ok(walk.report(cancelled))
    }

    /// Consult the registry before visiting `node`.
    ///
    /// Blocks while the task is paused, publishing one paused notification
    /// when the pause is first seen and one resumed notification when it
    /// ends. Cancellation is checked on every iteration.
    fn checkpoint(&self, walk: &Walk, node: &Path) -> Checkpoint {
        let mut announced = false;
        loop {
            match self.registry.status(walk.task_id) {
                None => return Checkpoint::Abort,
                Some(status) if status.is_terminal() => return Checkpoint::Abort,
                Some(TaskStatus::Paused) => {
                    if !announced {
                        info!(task_id = %walk.task_id, "walk paused");
                        self.sink.publish(&walk.progress(node, ProgressKind::Paused));
                        announced = true;
                    }
                    self.registry
                        .wait_while(walk.task_id, TaskStatus::Paused, self.poll_interval);
                }
                Some(_) => {
                    if announced {
                        info!(task_id = %walk.task_id, "walk resumed");
                        self.sink.publish(&walk.progress(node, ProgressKind::Resumed));
                    }
                    return Checkpoint::Proceed;
                }
            }
        }
    }
}

fn describe_failure(action: &str, err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::PermissionDenied {
        format!("{}: access denied", action)
    } else {
        format!("{} ({})", action, err)
    }
}
