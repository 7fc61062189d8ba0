//! Depth-bounded directory walk.
//!
//! Symlinked directories are resolved and entered at their target path.
//! Nothing deeper than the configured depth is visited. A directory is walked
//! again only when it is reached at a shallower depth than before.

use crate::file::is_journal_file;
use journal_common::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Something found while walking a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    /// A directory, by its resolved path
    Directory(PathBuf),
    /// A symlink pointing at a directory
    Symlink { link: PathBuf, target: PathBuf },
    /// A journal file (regular, or a symlink to a regular file)
    File(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct DirectoryScanner {
    max_depth: usize,
}

impl DirectoryScanner {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Collect every journal file below `roots`.
    pub fn scan_files(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut files = HashSet::default();
        let mut visited = HashMap::default();

        for root in roots {
            self.walk_with(root, &mut visited, &mut |item| {
                if let ScanItem::File(path) = item {
                    files.insert(path);
                }
            });
        }

        let mut files: Vec<PathBuf> = files.into_iter().collect();
        files.sort();
        files
    }

    /// Walk the tree under `root`, reporting every directory, directory
    /// symlink and journal file.
    pub fn walk(&self, root: &Path, visit: &mut dyn FnMut(ScanItem)) {
        let mut visited = HashMap::default();
        self.walk_with(root, &mut visited, visit);
    }

    fn walk_with(
        &self,
        root: &Path,
        visited: &mut HashMap<PathBuf, usize>,
        visit: &mut dyn FnMut(ScanItem),
    ) {
        let resolved = match fs::canonicalize(root) {
            Ok(path) => path,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "skipping journal root");
                return;
            }
        };

        if !resolved.is_dir() {
            debug!(root = %root.display(), "journal root is not a directory");
            return;
        }

        self.walk_dir(&resolved, 0, visited, visit);
    }

    fn walk_dir(
        &self,
        dir: &Path,
        depth: usize,
        visited: &mut HashMap<PathBuf, usize>,
        visit: &mut dyn FnMut(ScanItem),
    ) {
        if depth > self.max_depth {
            debug!(dir = %dir.display(), depth, "maximum directory depth reached");
            return;
        }

        // depth of the shallowest walk of this directory so far
        if visited.get(dir).is_some_and(|&seen| seen <= depth) {
            return;
        }
        visited.insert(dir.to_path_buf(), depth);

        visit(ScanItem::Directory(dir.to_path_buf()));

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "cannot read directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                self.walk_dir(&path, depth + 1, visited, visit);
            } else if file_type.is_symlink() {
                let Ok(target) = fs::canonicalize(&path) else {
                    trace!(link = %path.display(), "dangling symlink");
                    continue;
                };

                if target.is_dir() {
                    visit(ScanItem::Symlink {
                        link: path,
                        target: target.clone(),
                    });
                    self.walk_dir(&target, depth + 1, visited, visit);
                } else if target.is_file() && path.to_str().is_some_and(is_journal_file) {
                    visit(ScanItem::File(path));
                }
            } else if file_type.is_file() && path.to_str().is_some_and(is_journal_file) {
                visit(ScanItem::File(path));
            }
        }
    }
}
