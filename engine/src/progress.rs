//! Progress reporting.
//!
//! This module defines the `ProgressSink` trait, which decouples the backup
//! engine from whatever transport pushes progress to observers (terminal,
//! server-sent events, a GUI channel). Delivery is fire-and-forget: a sink
//! never reports failure back to the engine.
//!
//! `ProgressHub` is the provided sink. It broadcasts every event to any
//! number of channel subscribers and silently drops subscribers that hung up.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::model::{Progress, TaskId, TaskStatus};

/// An accepted operator control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEvent {
    Paused,
    Resumed,
    Cancelled,
}

/// Final notification for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalEvent {
    Completed {
        task_id: TaskId,
        message: Option<String>,
    },
    Cancelled {
        task_id: TaskId,
    },
    Failed {
        task_id: TaskId,
        error: String,
    },
}

impl TerminalEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TerminalEvent::Completed { task_id, .. }
            | TerminalEvent::Cancelled { task_id }
            | TerminalEvent::Failed { task_id, .. } => *task_id,
        }
    }
}

/// Everything a subscriber can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(Progress),
    Control {
        kind: ControlEvent,
        task_id: TaskId,
        status: TaskStatus,
    },
    Terminal(TerminalEvent),
}

/// Receiver of progress notifications.
///
/// All methods are called synchronously from worker or caller threads and
/// must not block for long.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, progress: &Progress);

    fn publish_control(&self, event: ControlEvent, task_id: TaskId, status: TaskStatus);

    fn publish_terminal(&self, event: &TerminalEvent);
}

/// Broadcast sink backed by crossbeam channels.
#[derive(Debug, Default)]
pub struct ProgressHub {
    subscribers: Mutex<Vec<Sender<ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn broadcast(&self, event: ProgressEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl ProgressSink for ProgressHub {
    fn publish(&self, progress: &Progress) {
        self.broadcast(ProgressEvent::Progress(progress.clone()));
    }

    fn publish_control(&self, event: ControlEvent, task_id: TaskId, status: TaskStatus) {
        self.broadcast(ProgressEvent::Control {
            kind: event,
            task_id,
            status,
        });
    }

    fn publish_terminal(&self, event: &TerminalEvent) {
        self.broadcast(ProgressEvent::Terminal(event.clone()));
    }
}
