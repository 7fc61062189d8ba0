//! Directory watcher behaviour against a live filesystem.

use journal_common::memory::MemoryReaderFactory;
use journal_registry::{
    DirectoryWatcher, FileRegistry, RegistryConfig, WatcherHandle, WatcherState,
};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"journal").unwrap();
}

fn key(path: &Path) -> &str {
    path.to_str().unwrap()
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

struct Fixture {
    dir: TempDir,
    root: PathBuf,
    registry: FileRegistry,
    handle: WatcherHandle,
    task: tokio::task::JoinHandle<()>,
}

impl Fixture {
    fn base(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    async fn stop(self) {
        self.handle.shutdown().unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }
}

fn test_config(roots: Vec<PathBuf>) -> RegistryConfig {
    RegistryConfig {
        poll_timeout: Duration::from_millis(20),
        pending_flush_interval: Duration::from_millis(50),
        restart_delay: Duration::from_millis(50),
        ..RegistryConfig::default()
    }
    .with_roots(roots)
}

async fn start() -> Fixture {
    init_tracing();

    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap().join("journal");
    touch(&root.join("machine/system.journal"));

    let config = test_config(vec![root.clone()]);
    let registry = FileRegistry::new(Arc::new(MemoryReaderFactory::new()), &config);
    let (handle, task) = DirectoryWatcher::spawn(registry.clone(), config);

    handle
        .wait_for(|status| status.state == WatcherState::Running)
        .await
        .unwrap();

    Fixture {
        dir,
        root,
        registry,
        handle,
        task,
    }
}

#[tokio::test]
async fn existing_and_new_files_are_registered() {
    let fx = start().await;
    let existing = fx.root.join("machine/system.journal");
    assert!(fx.registry.get(key(&existing)).is_some());

    let created = fx.root.join("machine/user-1000.journal");
    touch(&created);
    eventually("new file", || fx.registry.get(key(&created)).is_some()).await;

    let ignored = fx.root.join("machine/notes.txt");
    touch(&ignored);
    fs::remove_file(&existing).unwrap();
    eventually("removed file", || fx.registry.get(key(&existing)).is_none()).await;
    assert!(fx.registry.get(key(&ignored)).is_none());

    fx.stop().await;
}

#[tokio::test]
async fn directory_removal_drops_only_its_files() {
    let fx = start().await;
    let inside = fx.root.join("other/nested/system.journal");
    let outside = fx.root.join("machine/system.journal");

    // build the tree elsewhere so it appears under the root in one step
    let staging = fx.base().join("staging");
    touch(&staging.join("nested/system.journal"));
    fs::rename(&staging, fx.root.join("other")).unwrap();
    eventually("nested file", || fx.registry.get(key(&inside)).is_some()).await;

    fs::remove_dir_all(fx.root.join("other")).unwrap();
    eventually("nested file removal", || fx.registry.get(key(&inside)).is_none()).await;

    assert!(fx.registry.get(key(&outside)).is_some());
    assert_eq!(fx.registry.len(), 1);

    fx.stop().await;
}

#[tokio::test]
async fn symlinked_directories_are_followed() {
    let fx = start().await;
    let target = fx.base().join("elsewhere");
    let linked_file = target.join("system.journal");
    touch(&linked_file);

    let link = fx.root.join("linked");
    symlink(&target, &link).unwrap();
    eventually("file behind symlink", || fx.registry.get(key(&linked_file)).is_some()).await;

    let later = target.join("user-1000.journal");
    touch(&later);
    eventually("new file behind symlink", || fx.registry.get(key(&later)).is_some()).await;

    fs::remove_file(&link).unwrap();
    eventually("symlink removal", || fx.registry.get(key(&linked_file)).is_none()).await;
    assert!(target.exists());
    assert!(fx.registry.get(key(&fx.root.join("machine/system.journal"))).is_some());

    fx.stop().await;
}

/// Create a journal file under the root and wait for it. Events are handled
/// in order, so everything before it has been applied too.
async fn settle(fx: &Fixture, name: &str) {
    let marker = fx.root.join("machine").join(name);
    touch(&marker);
    eventually("marker file", || fx.registry.get(key(&marker)).is_some()).await;
}

#[tokio::test]
async fn symlink_removal_keeps_targets_linked_elsewhere() {
    let fx = start().await;
    let target = fx.base().join("elsewhere");
    let linked_file = target.join("system.journal");
    touch(&linked_file);

    let first = fx.root.join("first");
    let second = fx.root.join("second");
    symlink(&target, &first).unwrap();
    symlink(&target, &second).unwrap();
    eventually("file behind symlinks", || fx.registry.get(key(&linked_file)).is_some()).await;

    fs::remove_file(&first).unwrap();
    settle(&fx, "user-1000.journal").await;
    assert!(fx.registry.get(key(&linked_file)).is_some());

    fs::remove_file(&second).unwrap();
    eventually("last symlink removal", || fx.registry.get(key(&linked_file)).is_none()).await;

    fx.stop().await;
}

#[tokio::test]
async fn symlink_removal_keeps_targets_under_a_root() {
    let fx = start().await;
    let target = fx.root.join("store");
    let stored = target.join("system.journal");
    touch(&stored);
    eventually("stored file", || fx.registry.get(key(&stored)).is_some()).await;

    let link = fx.root.join("linked");
    symlink(&target, &link).unwrap();
    settle(&fx, "user-1000.journal").await;

    fs::remove_file(&link).unwrap();
    settle(&fx, "user-1001.journal").await;
    assert!(fx.registry.get(key(&stored)).is_some());

    fx.stop().await;
}

#[tokio::test]
async fn restart_starts_a_new_session() {
    let fx = start().await;
    let sessions = fx.handle.status().sessions;

    fx.handle.restart().unwrap();
    fx.handle
        .wait_for(|status| status.sessions > sessions && status.state == WatcherState::Running)
        .await
        .unwrap();

    let created = fx.root.join("machine/user-1000.journal");
    touch(&created);
    eventually("file after restart", || fx.registry.get(key(&created)).is_some()).await;

    fx.stop().await;
}

#[tokio::test]
async fn configure_roots_switches_directories() {
    let fx = start().await;
    let second = fx.base().join("second");
    let file = second.join("machine/system.journal");
    touch(&file);

    fx.handle.configure_roots(vec![second.clone()]).unwrap();
    eventually("file under new root", || fx.registry.get(key(&file)).is_some()).await;
    eventually("old root dropped", || {
        fx.registry
            .get(key(&fx.root.join("machine/system.journal")))
            .is_none()
    })
    .await;
    assert_eq!(fx.registry.roots(), vec![second]);

    fx.stop().await;
}

#[tokio::test]
async fn shutdown_stops_the_task() {
    let fx = start().await;
    let handle = fx.handle.clone();
    fx.stop().await;

    assert_eq!(handle.status().state, WatcherState::Stopped);
    assert!(handle.restart().is_err());
}
