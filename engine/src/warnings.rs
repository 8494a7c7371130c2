//! Append-only `warnings.log` at the root of a task's mirror.
//!
//! One line per warning: `[timestamp] message: path`. Writing is best effort:
//! a failed append is reported through tracing and otherwise ignored, and
//! the warning still counts.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

pub const WARNINGS_FILE_NAME: &str = "warnings.log";

#[derive(Debug)]
pub struct WarningLog {
    path: PathBuf,
    count: usize,
}

impl WarningLog {
    /// Log file inside `root`. Nothing is created until the first warning.
    pub fn new(root: &Path) -> Self {
        WarningLog {
            path: root.join(WARNINGS_FILE_NAME),
            count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn record(&mut self, message: &str, subject: &Path) {
        self.count += 1;
        warn!(path = %subject.display(), "{}", message);

        let line = format_line(message, subject);
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = appended {
            debug!(log = %self.path.display(), error = %e, "could not append to warnings log");
        }
    }
}

fn format_line(message: &str, subject: &Path) -> String {
    format!(
        "[{}] {}: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        message,
        subject.display()
    )
}
