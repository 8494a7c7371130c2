//! Tree scanner: file count and aggregate size of a source tree.
//!
//! The totals are an upper-bound estimate used as the percent-complete
//! denominator. Excluded entries are still counted here; the copy engine
//! applies the exclusion policy at walk time.

use std::path::Path;

use walkdir::WalkDir;

use crate::model::SizeMb;

/// Totals for one source tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeTotals {
    pub file_count: u64,
    pub total_bytes: u64,
}

impl TreeTotals {
    pub fn size_mb(&self) -> SizeMb {
        SizeMb::from_bytes(self.total_bytes)
    }
}

/// Count regular files and sum their sizes, recursively.
///
/// Unreadable subtrees contribute nothing instead of failing the scan.
/// Symbolic links to files are counted by their target; links to
/// directories are not descended.
pub fn scan_tree(root: &Path) -> TreeTotals {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| entry.path().metadata().ok())
        .filter(|metadata| metadata.is_file())
        .fold(TreeTotals::default(), |mut totals, metadata| {
            totals.file_count += 1;
            totals.total_bytes += metadata.len();
            totals
        })
}
