//! Bookkeeping of watched directories.

use journal_common::HashMap;
use std::path::{Path, PathBuf};

/// Slot index of a watched directory. Slots are reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WatchHandle(usize);

#[derive(Debug)]
pub(crate) struct WatchEntry {
    pub(crate) handle: WatchHandle,
    pub(crate) path: PathBuf,
}

/// Slots of watched directories with a free list, plus the directory
/// symlinks whose targets are watched.
#[derive(Debug, Default)]
pub(crate) struct WatchSet {
    slots: Vec<Option<WatchEntry>>,
    free: Vec<usize>,
    by_path: HashMap<PathBuf, WatchHandle>,
    symlinks: HashMap<PathBuf, PathBuf>,
}

impl WatchSet {
    pub(crate) fn len(&self) -> usize {
        self.by_path.len()
    }

    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Track `path`. Returns `None` if it is already tracked.
    pub(crate) fn insert(&mut self, path: &Path) -> Option<WatchHandle> {
        if self.by_path.contains_key(path) {
            return None;
        }

        let entry = |handle| WatchEntry {
            handle,
            path: path.to_path_buf(),
        };

        let handle = match self.free.pop() {
            Some(idx) => {
                let handle = WatchHandle(idx);
                self.slots[idx] = Some(entry(handle));
                handle
            }
            None => {
                let handle = WatchHandle(self.slots.len());
                self.slots.push(Some(entry(handle)));
                handle
            }
        };

        self.by_path.insert(path.to_path_buf(), handle);
        Some(handle)
    }

    pub(crate) fn remove(&mut self, path: &Path) -> Option<WatchEntry> {
        let WatchHandle(idx) = self.by_path.remove(path)?;
        let entry = self.slots[idx].take();
        self.free.push(idx);
        entry
    }

    /// Untrack `dir` and every tracked directory below it.
    pub(crate) fn remove_tree(&mut self, dir: &Path) -> Vec<WatchEntry> {
        let paths: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect();

        let entries = paths.iter().filter_map(|path| self.remove(path)).collect();

        self.symlinks.retain(|link, _| !link.starts_with(dir));
        entries
    }

    pub(crate) fn add_symlink(&mut self, link: PathBuf, target: PathBuf) {
        self.symlinks.insert(link, target);
    }

    pub(crate) fn remove_symlink(&mut self, link: &Path) -> Option<PathBuf> {
        self.symlinks.remove(link)
    }

    /// Whether another tracked symlink still points at or above `target`.
    pub(crate) fn target_still_linked(&self, target: &Path) -> bool {
        self.symlinks.values().any(|t| target.starts_with(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_reused() {
        let mut set = WatchSet::default();
        let a = set.insert(Path::new("/a")).unwrap();
        let b = set.insert(Path::new("/b")).unwrap();
        assert_ne!(a, b);
        assert!(set.insert(Path::new("/a")).is_none());

        let removed = set.remove(Path::new("/a")).unwrap();
        assert_eq!(removed.handle, a);
        assert_eq!(removed.path, PathBuf::from("/a"));

        let c = set.insert(Path::new("/c")).unwrap();
        assert_eq!(c, a);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_tree_takes_descendants_only() {
        let mut set = WatchSet::default();
        for path in ["/j/a", "/j/a/b", "/j/a/b/c", "/j/ab"] {
            set.insert(Path::new(path));
        }
        set.add_symlink(PathBuf::from("/j/a/link"), PathBuf::from("/elsewhere"));

        let mut removed: Vec<PathBuf> = set
            .remove_tree(Path::new("/j/a"))
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        removed.sort();
        assert_eq!(
            removed,
            vec![
                PathBuf::from("/j/a"),
                PathBuf::from("/j/a/b"),
                PathBuf::from("/j/a/b/c")
            ]
        );
        assert!(set.contains(Path::new("/j/ab")));
        assert!(set.remove_symlink(Path::new("/j/a/link")).is_none());
    }

    #[test]
    fn symlink_targets() {
        let mut set = WatchSet::default();
        set.add_symlink(PathBuf::from("/j/l1"), PathBuf::from("/t"));
        set.add_symlink(PathBuf::from("/j/l2"), PathBuf::from("/t"));

        assert_eq!(set.remove_symlink(Path::new("/j/l1")), Some(PathBuf::from("/t")));
        assert!(set.target_still_linked(Path::new("/t/sub")));
        set.remove_symlink(Path::new("/j/l2"));
        assert!(!set.target_still_linked(Path::new("/t")));
    }
}
