//! Backup orchestration and the operator control surface.
//!
//! `BackupService` validates requests, creates task records, hands jobs to
//! the worker pool and finalizes every task. A job's lifecycle:
//! 1. validate source and destination (before any record exists)
//! 2. insert a RUNNING record and register it in the task registry
//! 3. on a worker: scan totals, publish 0%, run the copy engine
//! 4. settle COMPLETED / FAILED / CANCELLED, publish the terminal event
//! 5. deregister (always, through a drop guard)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::copier::{CopyEngine, CopyReport};
use crate::error::EngineError;
use crate::exclusion::ExclusionPolicy;
use crate::fs_ops;
use crate::model::{BackupTask, Progress, ProgressKind, TaskId, TaskStatus};
use crate::pool::WorkerPool;
use crate::progress::{ControlEvent, ProgressSink, TerminalEvent};
use crate::registry::{Settlement, TaskRegistry};
use crate::scanner::{self, TreeTotals};
use crate::store::TaskStore;
use crate::warnings::WARNINGS_FILE_NAME;

/// Outcome of a batch request: one entry per pair.
#[derive(Debug, Default)]
pub struct BatchSubmission {
    pub started: Vec<TaskId>,
    pub rejected: Vec<RejectedPair>,
}

#[derive(Debug)]
pub struct RejectedPair {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub error: EngineError,
}

/// Contents of a task's `warnings.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningsReport {
    pub task_id: TaskId,
    pub path: PathBuf,
    /// `None` when the log was never written
    pub contents: Option<String>,
}

impl WarningsReport {
    /// Read `warnings.log` from the task's mirror root.
    pub fn read(task: &BackupTask) -> Result<Self, EngineError> {
        let path = task.mirror_root().join(WARNINGS_FILE_NAME);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(EngineError::WarningsUnreadable { path, source: e }),
        };
        Ok(WarningsReport {
            task_id: task.id,
            path,
            contents,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.contents.as_deref().map_or(true, |c| c.trim().is_empty())
    }
}

/// Message stored on a COMPLETED task that skipped some nodes.
pub fn warnings_message(warnings: usize, mirror_root: &Path) -> Option<String> {
    (warnings > 0).then(|| {
        format!(
            "Completed with {} warning(s); see {} in {}",
            warnings,
            WARNINGS_FILE_NAME,
            mirror_root.display()
        )
    })
}

/// State shared between the service handle and the worker threads.
struct Shared {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn ProgressSink>,
    engine: CopyEngine,
}

pub struct BackupService {
    shared: Arc<Shared>,
    submissions: Mutex<()>,
    pool: WorkerPool,
}

impl BackupService {
    /// Start the worker pool.
    ///
    /// Records left RUNNING or PAUSED in the store by an earlier process are
    /// marked FAILED, since nothing is copying them any more.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        fail_interrupted(store.as_ref())?;

        let registry = Arc::new(TaskRegistry::new(Arc::clone(&store)));
        let engine = CopyEngine::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
            ExclusionPolicy::new(config.excluded_names.iter().cloned()),
            config.poll_interval,
        );
        let pool = WorkerPool::new(config.workers)?;
        info!(workers = pool.size(), "backup service started");

        Ok(BackupService {
            shared: Arc::new(Shared {
                store,
                registry,
                sink,
                engine,
            }),
            submissions: Mutex::new(()),
            pool,
        })
    }

    /// Validate and queue one backup.
    ///
    /// # Errors
    /// A validation error when the source is missing, not a directory or
    /// empty, the destination is missing or not a directory, or the two
    /// overlap. No task record is created in that case.
    pub fn submit(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
    ) -> Result<TaskId, EngineError> {
        let _submitting = self.submissions.lock();
        self.submit_unlocked(source.as_ref(), destination.as_ref())
    }

    fn submit_unlocked(&self, source: &Path, destination: &Path) -> Result<TaskId, EngineError> {
        fs_ops::validate_source(source)?;
        fs_ops::validate_destination(destination)?;
        fs_ops::validate_pair(source, destination)?;

        let task = self.shared.store.insert(BackupTask::new(source, destination))?;
        let id = task.id;
        self.shared.registry.register(task.clone());
        info!(task_id = %id, source = %source.display(), destination = %destination.display(), "backup submitted");

        let shared = Arc::clone(&self.shared);
        if let Err(e) = self.pool.execute(move || shared.run(task)) {
            self.shared.registry.settle(id, Settlement::Failed(e.to_string()));
            self.shared.registry.unregister(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Queue one job per pair. A rejected pair does not affect the others.
    pub fn submit_batch<I, P, Q>(&self, pairs: I) -> BatchSubmission
    where
        I: IntoIterator<Item = (P, Q)>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let _submitting = self.submissions.lock();
        self.submit_batch_unlocked(pairs)
    }

    fn submit_batch_unlocked<I, P, Q>(&self, pairs: I) -> BatchSubmission
    where
        I: IntoIterator<Item = (P, Q)>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut batch = BatchSubmission::default();
        for (source, destination) in pairs {
            let (source, destination) = (source.as_ref(), destination.as_ref());
            match self.submit_unlocked(source, destination) {
                Ok(id) => batch.started.push(id),
                Err(error) => {
                    warn!(source = %source.display(), "backup rejected: {}", error);
                    batch.rejected.push(RejectedPair {
                        source: source.to_path_buf(),
                        destination: destination.to_path_buf(),
                        error,
                    });
                }
            }
        }
        batch
    }

    /// Start backups for paired source and destination lists.
    ///
    /// # Errors
    /// `MismatchedPairs` for empty or unequal lists, `ActivePairConflict` if
    /// any pair already has a RUNNING or PAUSED task. Both are checked before
    /// any job starts.
    pub fn start_backup(
        &self,
        sources: &[PathBuf],
        destinations: &[PathBuf],
    ) -> Result<BatchSubmission, EngineError> {
        if sources.is_empty() || sources.len() != destinations.len() {
            return Err(EngineError::MismatchedPairs {
                sources: sources.len(),
                destinations: destinations.len(),
            });
        }

        let _submitting = self.submissions.lock();
        for (source, destination) in sources.iter().zip(destinations) {
            if let Some(active) = self.shared.store.find_active_by_pair(source, destination)? {
                return Err(EngineError::ActivePairConflict {
                    source_path: source.clone(),
                    destination_path: destination.clone(),
                    task_id: active.id,
                });
            }
        }
        Ok(self.submit_batch_unlocked(sources.iter().zip(destinations)))
    }

    pub fn pause(&self, id: TaskId) -> bool {
        self.control(id, TaskRegistry::pause, ControlEvent::Paused, TaskStatus::Paused)
    }

    pub fn resume(&self, id: TaskId) -> bool {
        self.control(id, TaskRegistry::resume, ControlEvent::Resumed, TaskStatus::Running)
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        self.control(id, TaskRegistry::cancel, ControlEvent::Cancelled, TaskStatus::Cancelled)
    }

    fn control(
        &self,
        id: TaskId,
        apply: fn(&TaskRegistry, TaskId) -> bool,
        event: ControlEvent,
        status: TaskStatus,
    ) -> bool {
        let accepted = apply(&self.shared.registry, id);
        if accepted {
            self.shared.sink.publish_control(event, id, status);
        }
        accepted
    }

    /// Live snapshot while running, stored record afterwards.
    pub fn status(&self, id: TaskId) -> Result<BackupTask, EngineError> {
        self.shared
            .registry
            .get(id)?
            .ok_or(EngineError::TaskNotFound(id))
    }

    /// Every RUNNING or PAUSED task, in id order.
    pub fn list_active(&self) -> Vec<BackupTask> {
        // A task cancelled while queued stays registered until a worker takes it.
        self.shared
            .registry
            .live_tasks()
            .into_iter()
            .filter(BackupTask::is_active)
            .collect()
    }

    /// All known tasks, newest first; live snapshots win over stored records.
    pub fn history(&self) -> Result<Vec<BackupTask>, EngineError> {
        let mut tasks = self.shared.store.find_all()?;
        for task in tasks.iter_mut() {
            if let Ok(Some(live)) = self.shared.registry.get(task.id) {
                *task = live;
            }
        }
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(tasks)
    }

    /// Block until the task reaches a terminal state.
    ///
    /// Returns `Ok(None)` if `timeout` passes first.
    pub fn wait_for(&self, id: TaskId, timeout: Duration) -> Result<Option<BackupTask>, EngineError> {
        if !self.shared.registry.wait_released(id, timeout) {
            return Ok(None);
        }
        self.shared
            .store
            .find_by_id(id)?
            .map(Some)
            .ok_or(EngineError::TaskNotFound(id))
    }

    /// Read the warnings log of a task's mirror.
    pub fn warnings_report(&self, id: TaskId) -> Result<WarningsReport, EngineError> {
        let task = self.status(id)?;
        WarningsReport::read(&task)
    }

    /// Warnings log of the most recently finished task, if any.
    pub fn latest_warnings_report(&self) -> Result<Option<WarningsReport>, EngineError> {
        match self.shared.store.find_latest_finished()? {
            Some(task) => WarningsReport::read(&task).map(Some),
            None => Ok(None),
        }
    }

    /// Stop accepting work and wait for queued and running jobs to finish.
    pub fn shutdown(self) {
        info!("backup service shutting down");
        drop(self.pool);
    }
}

impl Shared {
    /// Worker-side body of one job.
    fn run(&self, task: BackupTask) {
        let id = task.id;
        let registration = Registration {
            registry: &self.registry,
            id,
        };

        let settlement = if !self.still_wanted(id) {
            info!(task_id = %id, "backup cancelled before it started");
            Settlement::Cancelled
        } else {
            self.outcome(&task)
        };

        let Some(finished) = self.registry.settle(id, settlement) else {
            error!(task_id = %id, "task left the registry before it finished");
            return;
        };
        info!(task_id = %id, status = %finished.status, "backup finished");
        self.sink.publish_terminal(&terminal_event(&finished));
        drop(registration);
    }

    /// False once the task was cancelled or dropped while it sat in the queue.
    fn still_wanted(&self, id: TaskId) -> bool {
        matches!(self.registry.status(id), Some(status) if !status.is_terminal())
    }

    fn outcome(&self, task: &BackupTask) -> Settlement {
        let id = task.id;
        match self.execute(task) {
            Ok((_, report)) if report.cancelled => Settlement::Cancelled,
            Ok((totals, report)) => Settlement::Completed {
                file_count: totals.file_count,
                total_size_mb: totals.size_mb(),
                message: warnings_message(report.warnings, &task.mirror_root()),
            },
            Err(e) => {
                error!(task_id = %id, "backup failed: {}", e);
                Settlement::Failed(e.to_string())
            }
        }
    }

    fn execute(&self, task: &BackupTask) -> Result<(TreeTotals, CopyReport), EngineError> {
        // The source may have changed while the job was queued.
        fs_ops::validate_source(&task.source_path)?;

        let totals = scanner::scan_tree(&task.source_path);
        self.sink.publish(&Progress {
            task_id: task.id,
            percent: 0,
            current_file: String::new(),
            processed: 0,
            total: totals.file_count,
            kind: ProgressKind::Started,
        });

        let mirror = task.mirror_root();
        fs::create_dir_all(&mirror).map_err(|e| EngineError::DirectoryCreationFailed {
            path: mirror.clone(),
            source: e,
        })?;

        let report = self
            .engine
            .copy_tree(&task.source_path, &mirror, task.id, totals.file_count)?;
        Ok((totals, report))
    }
}

/// Deregisters the task when the job ends, even by panic.
struct Registration<'a> {
    registry: &'a TaskRegistry,
    id: TaskId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.registry.settle(
                self.id,
                Settlement::Failed("Backup job stopped unexpectedly".to_string()),
            );
        }
        self.registry.unregister(self.id);
    }
}

fn terminal_event(task: &BackupTask) -> TerminalEvent {
    match task.status {
        TaskStatus::Cancelled => TerminalEvent::Cancelled { task_id: task.id },
        TaskStatus::Failed => TerminalEvent::Failed {
            task_id: task.id,
            error: task.error_message.clone().unwrap_or_default(),
        },
        _ => TerminalEvent::Completed {
            task_id: task.id,
            message: task.error_message.clone(),
        },
    }
}

fn fail_interrupted(store: &dyn TaskStore) -> Result<(), EngineError> {
    for mut task in store.find_all()?.into_iter().filter(BackupTask::is_active) {
        if task.status == TaskStatus::Paused {
            task.transition(TaskStatus::Running)?;
        }
        task.error_message = Some("Interrupted: the engine stopped before this backup finished".to_string());
        task.transition(TaskStatus::Failed)?;
        warn!(task_id = %task.id, "marking interrupted backup as failed");
        store.save(&task)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, ProgressHub};
    use crate::store::{JsonTaskStore, MemoryTaskStore};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use walkdir::WalkDir;

    const WAIT: Duration = Duration::from_secs(10);

    // Test helper: forwards to a hub, but the worker running task 1 stops at
    // its first progress notification until the release side sends or drops.
    struct HoldingSink {
        hub: Arc<ProgressHub>,
        release: Mutex<Option<Receiver<()>>>,
    }

    impl ProgressSink for HoldingSink {
        fn publish(&self, progress: &Progress) {
            self.hub.publish(progress);
            if progress.task_id == TaskId(1) {
                let release = self.release.lock().take();
                if let Some(release) = release {
                    let _ = release.recv();
                }
            }
        }

        fn publish_control(&self, event: ControlEvent, task_id: TaskId, status: TaskStatus) {
            self.hub.publish_control(event, task_id, status);
        }

        fn publish_terminal(&self, event: &TerminalEvent) {
            self.hub.publish_terminal(event);
        }
    }

    struct Fixture {
        temp_dir: tempfile::TempDir,
        hub: Arc<ProgressHub>,
        service: BackupService,
    }

    fn build(workers: usize, hub: Arc<ProgressHub>, sink: Arc<dyn ProgressSink>) -> Fixture {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = EngineConfig {
            workers,
            poll_interval: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let service = BackupService::new(config, Arc::new(MemoryTaskStore::new()), sink)
            .expect("Failed to start service");
        Fixture {
            temp_dir,
            hub,
            service,
        }
    }

    fn fixture(workers: usize) -> Fixture {
        let hub = Arc::new(ProgressHub::new());
        build(workers, hub.clone(), hub)
    }

    /// Task 1 holds its worker before copying until the sender fires or drops.
    fn held_fixture(workers: usize) -> (Fixture, Sender<()>) {
        let hub = Arc::new(ProgressHub::new());
        let (release_tx, release_rx) = bounded(1);
        let sink = Arc::new(HoldingSink {
            hub: hub.clone(),
            release: Mutex::new(Some(release_rx)),
        });
        (build(workers, hub, sink), release_tx)
    }

    fn copied_files(root: &Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .count()
    }

    fn event_task_id(event: &ProgressEvent) -> TaskId {
        match event {
            ProgressEvent::Progress(p) => p.task_id,
            ProgressEvent::Control { task_id, .. } => *task_id,
            ProgressEvent::Terminal(t) => t.task_id(),
        }
    }

    fn source_tree(root: &Path, name: &str, files: &[&str]) -> PathBuf {
        let src = root.join(name);
        for file in files {
            let path = src.join(file);
            fs::create_dir_all(path.parent().unwrap()).expect("Failed to create dirs");
            fs::write(&path, file.as_bytes()).expect("Failed to write file");
        }
        src
    }

    fn destination(root: &Path, name: &str) -> PathBuf {
        let dst = root.join(name);
        fs::create_dir_all(&dst).expect("Failed to create dst");
        dst
    }

    #[test]
    fn test_completed_backup() {
        let f = fixture(2);
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt", "sub/b.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");

        let id = f.service.submit(&src, &dst).unwrap();
        let task = f.service.wait_for(id, WAIT).unwrap().expect("task finished");

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.file_count, 2);
        assert!(task.error_message.is_none());
        assert!(task.finished_at.is_some());
        assert_eq!(fs::read_to_string(dst.join("docs/sub/b.txt")).unwrap(), "sub/b.txt");
        assert!(f.service.list_active().is_empty());

        let report = f.service.warnings_report(id).unwrap();
        assert!(report.contents.is_none());
        assert!(report.is_clean());
    }

    #[test]
    fn test_validation_errors_create_no_task() {
        let f = fixture(1);
        let empty = destination(f.temp_dir.path(), "empty");
        let dst = destination(f.temp_dir.path(), "backup");

        assert!(matches!(
            f.service.submit(f.temp_dir.path().join("missing"), &dst),
            Err(EngineError::SourceNotFound { .. })
        ));
        assert!(matches!(
            f.service.submit(&empty, &dst),
            Err(EngineError::SourceEmpty { .. })
        ));
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt"]);
        assert!(matches!(
            f.service.submit(&src, f.temp_dir.path().join("nowhere")),
            Err(EngineError::DestinationNotFound { .. })
        ));
        assert!(f.service.history().unwrap().is_empty());
    }

    #[test]
    fn test_completed_with_warnings() {
        let f = fixture(1);
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt", "b.txt", "AppData/c.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");

        let id = f.service.submit(&src, &dst).unwrap();
        let task = f.service.wait_for(id, WAIT).unwrap().unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.file_count, 3);
        let message = task.error_message.expect("warning summary");
        assert!(message.starts_with("Completed with 1 warning(s)"));

        let report = f.service.latest_warnings_report().unwrap().unwrap();
        assert_eq!(report.task_id, id);
        assert!(!report.is_clean());
        assert_eq!(report.contents.unwrap().lines().count(), 1);
    }

    #[test]
    fn test_pause_resume_gives_same_output() {
        let (f, release) = held_fixture(1);
        let files: Vec<String> = (0..20).map(|i| format!("dir{}/file{}.txt", i % 3, i)).collect();
        let names: Vec<&str> = files.iter().map(String::as_str).collect();
        let src = source_tree(f.temp_dir.path(), "docs", &names);
        let dst = destination(f.temp_dir.path(), "backup");
        let events = f.hub.subscribe();

        let id = f.service.submit(&src, &dst).unwrap();
        assert!(f.service.pause(id));
        assert!(!f.service.pause(id));
        assert_eq!(f.service.status(id).unwrap().status, TaskStatus::Paused);

        release.send(()).expect("Failed to release worker");
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(f.service.status(id).unwrap().status, TaskStatus::Paused);
        assert_eq!(copied_files(&dst), 0, "paused walk must not copy");

        assert!(f.service.resume(id));
        let task = f.service.wait_for(id, WAIT).unwrap().expect("task finished");

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.paused_at.is_some());
        for file in &files {
            assert!(dst.join("docs").join(file).is_file(), "{} missing", file);
        }

        let progress: Vec<Progress> = events
            .try_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress(p) if p.task_id == id => Some(p),
                _ => None,
            })
            .collect();
        let kinds: Vec<ProgressKind> = progress.iter().take(3).map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![ProgressKind::Started, ProgressKind::Paused, ProgressKind::Resumed]
        );
        assert!(progress.windows(2).all(|w| w[0].processed <= w[1].processed));
        assert_eq!(progress.last().map(|p| p.processed), Some(20));
    }

    #[test]
    fn test_cancel_while_paused() {
        let (f, release) = held_fixture(1);
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt", "b.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");
        let events = f.hub.subscribe();

        let id = f.service.submit(&src, &dst).unwrap();
        assert!(f.service.pause(id));
        assert!(f.service.cancel(id));
        assert!(!f.service.cancel(id), "terminal task cannot be cancelled again");
        assert!(!f.service.resume(id));
        drop(release);

        let task = f.service.wait_for(id, WAIT).unwrap().expect("task finished");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.cancelled);
        assert!(!task.paused);
        assert!(task.paused_at.is_some());
        assert!(task.finished_at.is_some());
        assert_eq!(copied_files(&dst), 0);

        let terminal: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, ProgressEvent::Terminal(_)))
            .collect();
        assert_eq!(
            terminal,
            vec![ProgressEvent::Terminal(TerminalEvent::Cancelled { task_id: id })]
        );
    }

    #[test]
    fn test_cancelled_queued_task_does_no_work() {
        let (f, release) = held_fixture(1);
        let first = source_tree(f.temp_dir.path(), "first", &["a.txt"]);
        let second = source_tree(f.temp_dir.path(), "second", &["b.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");
        let events = f.hub.subscribe();

        let blocker = f.service.submit(&first, &dst).unwrap();
        let queued = f.service.submit(&second, &dst).unwrap();
        assert!(f.service.cancel(queued));

        let active: Vec<TaskId> = f.service.list_active().iter().map(|t| t.id).collect();
        assert_eq!(active, vec![blocker]);

        drop(release);
        let task = f.service.wait_for(queued, WAIT).unwrap().expect("task finished");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.finished_at.is_some());
        assert_eq!(task.file_count, 0);
        let done = f.service.wait_for(blocker, WAIT).unwrap().expect("task finished");
        assert_eq!(done.status, TaskStatus::Completed);

        assert!(!dst.join("second").exists());
        let queued_events: Vec<ProgressEvent> = events
            .try_iter()
            .filter(|e| event_task_id(e) == queued)
            .collect();
        assert!(queued_events
            .iter()
            .all(|e| !matches!(e, ProgressEvent::Progress(_))));
        assert_eq!(
            queued_events.last(),
            Some(&ProgressEvent::Terminal(TerminalEvent::Cancelled { task_id: queued }))
        );
        assert!(f.service.list_active().is_empty());
    }

    #[test]
    fn test_destination_inside_source_rejected() {
        let f = fixture(1);
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt"]);
        let nested = destination(&src, "backup");

        assert!(matches!(
            f.service.submit(&src, &nested),
            Err(EngineError::OverlappingPaths { .. })
        ));
        assert!(matches!(
            f.service.submit(&src, f.temp_dir.path()),
            Err(EngineError::OverlappingPaths { .. })
        ));
        assert!(f.service.history().unwrap().is_empty());
        assert_eq!(copied_files(&nested), 0);
    }

    #[test]
    fn test_start_backup_rejects_active_pair() {
        let (f, release) = held_fixture(1);
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");

        let first = f.service.start_backup(&[src.clone()], &[dst.clone()]).unwrap();
        assert_eq!(first.started.len(), 1);
        let id = first.started[0];

        let running = f.service.start_backup(&[src.clone()], &[dst.clone()]);
        assert!(matches!(
            running,
            Err(EngineError::ActivePairConflict { task_id, .. }) if task_id == id
        ));
        assert!(f.service.pause(id));
        let paused = f.service.start_backup(&[src.clone()], &[dst.clone()]);
        assert!(matches!(
            paused,
            Err(EngineError::ActivePairConflict { task_id, .. }) if task_id == id
        ));
        assert!(f.service.resume(id));
        drop(release);
        f.service.wait_for(id, WAIT).unwrap().expect("task finished");

        let again = f.service.start_backup(&[src], &[dst]).unwrap();
        assert_eq!(again.started.len(), 1);
    }

    #[test]
    fn test_start_backup_validates_lists() {
        let f = fixture(1);
        let dst = destination(f.temp_dir.path(), "backup");

        assert!(matches!(
            f.service.start_backup(&[], &[]),
            Err(EngineError::MismatchedPairs { .. })
        ));
        assert!(matches!(
            f.service.start_backup(&[dst.clone(), dst.clone()], &[dst]),
            Err(EngineError::MismatchedPairs { sources: 2, destinations: 1 })
        ));
    }

    #[test]
    fn test_batch_rejection_does_not_stop_siblings() {
        let f = fixture(2);
        let good = source_tree(f.temp_dir.path(), "docs", &["a.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");
        let missing = f.temp_dir.path().join("missing");

        let batch = f.service.submit_batch(vec![(&missing, &dst), (&good, &dst)]);

        assert_eq!(batch.started.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].source, missing);
        let task = f.service.wait_for(batch.started[0], WAIT).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_source_removed_while_queued_fails_task() {
        let (f, release) = held_fixture(1);
        let dst = destination(f.temp_dir.path(), "backup");
        let first = source_tree(f.temp_dir.path(), "first", &["a.txt"]);
        let second = source_tree(f.temp_dir.path(), "second", &["x.txt"]);

        let _blocker = f.service.submit(&first, &dst).unwrap();
        let queued = f.service.submit(&second, &dst).unwrap();
        fs::remove_dir_all(&second).unwrap();
        drop(release);

        let task = f.service.wait_for(queued, WAIT).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("Source directory not found"));
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_status_and_history() {
        let f = fixture(1);
        let src = source_tree(f.temp_dir.path(), "docs", &["a.txt"]);
        let dst = destination(f.temp_dir.path(), "backup");

        assert!(matches!(
            f.service.status(TaskId(42)),
            Err(EngineError::TaskNotFound(TaskId(42)))
        ));

        let first = f.service.submit(&src, &dst).unwrap();
        f.service.wait_for(first, WAIT).unwrap().unwrap();
        let second = f.service.submit(&src, &dst).unwrap();
        f.service.wait_for(second, WAIT).unwrap().unwrap();

        let ids: Vec<TaskId> = f.service.history().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert!(!f.service.pause(first));
        assert!(!f.service.resume(first));
        assert_eq!(f.service.status(first).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_interrupted_records_fail_on_startup() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("history.json");
        {
            let store = JsonTaskStore::open(&path).unwrap();
            store.insert(BackupTask::new("/a", "/b")).unwrap();
            let mut paused = store.insert(BackupTask::new("/c", "/d")).unwrap();
            paused.transition(TaskStatus::Paused).unwrap();
            store.save(&paused).unwrap();
        }

        let store = Arc::new(JsonTaskStore::open(&path).unwrap());
        let service = BackupService::new(
            EngineConfig::default(),
            store.clone(),
            Arc::new(ProgressHub::new()),
        )
        .unwrap();

        let history = service.history().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|t| t.status == TaskStatus::Failed));
        assert!(history.iter().all(|t| t.finished_at.is_some()));
        assert!(history.iter().any(|t| t.paused_at.is_some()));
        service.shutdown();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        let result = BackupService::new(
            config,
            Arc::new(MemoryTaskStore::new()),
            Arc::new(ProgressHub::new()),
        );
        assert!(matches!(result, Err(EngineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_shutdown_waits_for_queued_jobs() {
        let f = fixture(1);
        let dst = destination(f.temp_dir.path(), "backup");
        let ids: Vec<TaskId> = (0..3)
            .map(|i| {
                let src = source_tree(f.temp_dir.path(), &format!("src{}", i), &["a.txt"]);
                f.service.submit(&src, &dst).unwrap()
            })
            .collect();

        let Fixture { temp_dir, hub: _hub, service } = f;
        service.shutdown();

        for i in 0..ids.len() {
            assert!(temp_dir.path().join(format!("backup/src{}/a.txt", i)).is_file());
        }
    }
}
