//! Exclusion policy: which filesystem entries the copy engine skips.
//!
//! An entry is skipped when it is a symbolic link, when it is neither a
//! regular file nor a directory, or when its full path contains any
//! deny-listed name as a plain substring. The substring test is coarse on
//! purpose (`MyFavorites2024` matches `Favorites`) and must stay that way.

use std::fs::FileType;
use std::path::Path;

use crate::config::DEFAULT_EXCLUDED_NAMES;

/// Why an entry was excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    SymbolicLink,
    SpecialFile,
    DeniedName(String),
}

impl Exclusion {
    pub fn describe(&self) -> String {
        match self {
            Exclusion::SymbolicLink => "Skipped symbolic link".to_string(),
            Exclusion::SpecialFile => "Skipped special file".to_string(),
            Exclusion::DeniedName(name) => format!("Skipped excluded folder ({})", name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    denied_names: Vec<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        ExclusionPolicy::new(DEFAULT_EXCLUDED_NAMES.iter().map(|s| s.to_string()))
    }
}

impl ExclusionPolicy {
    pub fn new<I, S>(denied_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExclusionPolicy {
            denied_names: denied_names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        }
    }

    /// Decide whether the entry at `path` must be skipped.
    ///
    /// `file_type` must come from `symlink_metadata` (not followed) so that
    /// links are recognised.
    pub fn check(&self, path: &Path, file_type: FileType) -> Option<Exclusion> {
        if file_type.is_symlink() {
            return Some(Exclusion::SymbolicLink);
        }
        if !file_type.is_file() && !file_type.is_dir() {
            return Some(Exclusion::SpecialFile);
        }

        let full = path.to_string_lossy();
        self.denied_names
            .iter()
            .find(|name| full.contains(name.as_str()))
            .map(|name| Exclusion::DeniedName(name.clone()))
    }

    pub fn is_excluded(&self, path: &Path, file_type: FileType) -> bool {
        self.check(path, file_type).is_some()
    }
}
