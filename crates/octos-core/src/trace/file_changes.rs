//! Working-tree snapshots used to report which files an agent touched.
//!
//! Detection keys on modification time only. A file rewritten with the
//! same mtime is not reported.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

/// Directories never scanned besides dot-prefixed ones.
const IGNORED_DIRS: &[&str] = &["node_modules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// Renders as `+ path`, `M path` or `- path`.
impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.kind {
            ChangeKind::Added => "+",
            ChangeKind::Modified => "M",
            ChangeKind::Deleted => "-",
        };
        write!(f, "{} {}", marker, self.path)
    }
}

/// Relative path → modification time for every regular file under a root.
#[derive(Debug, Clone, Default)]
pub struct FileSnapshot {
    files: BTreeMap<String, SystemTime>,
}

impl FileSnapshot {
    /// Walk `root`, skipping hidden entries, dependency caches and
    /// `extra_excludes` (e.g. the state directory when it is not hidden).
    pub fn capture(root: impl AsRef<Path>, extra_excludes: &[PathBuf]) -> Self {
        let root = root.as_ref();
        let mut files = BTreeMap::new();

        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry, extra_excludes));

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                continue;
            };
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.insert(relative.to_string_lossy().replace('\\', "/"), modified);
        }

        Self { files }
    }

    /// Changes from `self` (before) to `after`, sorted by path.
    pub fn diff(&self, after: &FileSnapshot) -> Vec<FileChange> {
        let mut changes = Vec::new();

        for (path, after_time) in &after.files {
            match self.files.get(path) {
                None => changes.push(FileChange {
                    path: path.clone(),
                    kind: ChangeKind::Added,
                }),
                Some(before_time) if after_time > before_time => changes.push(FileChange {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                }),
                Some(_) => {}
            }
        }

        for path in self.files.keys() {
            if !after.files.contains_key(path) {
                changes.push(FileChange {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                });
            }
        }

        changes.sort();
        changes
    }
}

fn is_excluded(entry: &DirEntry, extra_excludes: &[PathBuf]) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    if entry.file_type().is_dir() && IGNORED_DIRS.contains(&name.as_ref()) {
        return true;
    }
    extra_excludes.iter().any(|p| entry.path() == p.as_path())
}
