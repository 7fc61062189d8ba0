//! Directory watcher keeping the registry in sync with the filesystem.
//!
//! The watcher runs as a single tokio task cycling through
//! [`WatcherState`]s. Each session owns its own notification channel and
//! watch set. Any anomaly (overflowed queue, removed root, channel error,
//! too many failed watches, new roots) ends the session and, after a pause, a
//! fresh one is started from scratch.
//!
//! The task itself only waits. Directory walks, stats and header reads run
//! on the blocking pool, with the session moved there and back.

mod monitor;
mod watches;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::file::{DiscoveredMeta, is_journal_file};
use crate::registry::FileRegistry;
use crate::scanner::{DirectoryScanner, ScanItem};
use journal_common::HashSet;
use journal_common::time::now_monotonic_usec;
use monitor::{Monitor, MonitorEvent};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::Event;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};
use watches::WatchSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Init,
    Running,
    Draining,
    Restart,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStatus {
    pub state: WatcherState,
    /// Sessions started since the watcher was spawned
    pub sessions: u64,
}

#[derive(Debug)]
enum Command {
    ConfigureRoots(Vec<PathBuf>),
    Restart,
    Shutdown,
}

/// Administrative control of a running [`DirectoryWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<WatcherStatus>,
}

impl WatcherHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RegistryError::WatcherStopped)
    }

    /// Replace the watched roots and restart the session.
    pub fn configure_roots(&self, roots: Vec<PathBuf>) -> Result<()> {
        self.send(Command::ConfigureRoots(roots))
    }

    pub fn restart(&self) -> Result<()> {
        self.send(Command::Restart)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn status(&self) -> WatcherStatus {
        *self.status.borrow()
    }

    /// Wait until the watcher reports a status accepted by `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&WatcherStatus) -> bool) -> Result<WatcherStatus> {
        let mut status = self.status.clone();
        let result = status.wait_for(predicate).await;
        result.map(|s| *s).map_err(|_| RegistryError::WatcherStopped)
    }
}

enum Step {
    Continue,
    Restart(String),
    Reconfigure(Vec<PathBuf>),
    Shutdown,
}

enum Wake {
    Event(Option<MonitorEvent>),
    Command(Option<Command>),
    Timeout,
}

struct Session {
    monitor: Monitor,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
    watches: WatchSet,
    pending: HashSet<PathBuf>,
    roots: Vec<PathBuf>,
    scanner: DirectoryScanner,
    last_flush: Instant,
    flush_interval: Duration,
    errors: usize,
    max_errors: usize,
}

impl Session {
    fn start(registry: &FileRegistry, config: &RegistryConfig) -> Result<Self> {
        let (monitor, events) = Monitor::new()?;

        let mut session = Self {
            monitor,
            events,
            watches: WatchSet::default(),
            pending: HashSet::default(),
            roots: Vec::new(),
            scanner: DirectoryScanner::new(config.max_depth),
            last_flush: Instant::now(),
            flush_interval: config.pending_flush_interval,
            errors: 0,
            max_errors: config.max_watch_errors,
        };

        for root in &config.roots {
            match fs::canonicalize(root) {
                Ok(resolved) => {
                    session.roots.push(resolved.clone());
                    session.add_tree(&resolved);
                }
                Err(e) => debug!(root = %root.display(), error = %e, "journal directory not available"),
            }
        }

        info!(
            roots = session.roots.len(),
            watches = session.watches.len(),
            "journal watcher session started"
        );

        session.flush_pending(registry);
        Ok(session)
    }

    async fn wait(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>, poll_timeout: Duration) -> Wake {
        tokio::select! {
            event = self.events.recv() => Wake::Event(event),
            command = commands.recv() => Wake::Command(command),
            _ = tokio::time::sleep(poll_timeout) => Wake::Timeout,
        }
    }

    /// Act on what woke the session up. May touch the filesystem.
    fn apply(&mut self, wake: Wake, registry: &FileRegistry) -> Step {
        let step = match wake {
            Wake::Event(Some(Ok(event))) => match self.handle_event(event, registry) {
                Some(reason) => Step::Restart(reason),
                None if self.errors > self.max_errors => {
                    Step::Restart(format!("{} directories failed to be watched", self.errors))
                }
                None => Step::Continue,
            },
            Wake::Event(Some(Err(e))) => Step::Restart(format!("watcher error: {e}")),
            Wake::Event(None) => Step::Restart(String::from("event channel closed")),
            Wake::Command(Some(Command::Restart)) => Step::Restart(String::from("restart requested")),
            Wake::Command(Some(Command::ConfigureRoots(roots))) => Step::Reconfigure(roots),
            Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => Step::Shutdown,
            Wake::Timeout => Step::Continue,
        };

        if matches!(step, Step::Continue) && self.last_flush.elapsed() >= self.flush_interval {
            self.flush_pending(registry);
        }

        step
    }

    /// Apply one notification. Returns a reason when the session must restart.
    fn handle_event(&mut self, event: Event, registry: &FileRegistry) -> Option<String> {
        trace!(?event, "journal watcher event");

        if event.need_rescan() {
            return Some(String::from("notification queue overflowed"));
        }

        let mut root_removed = false;

        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.on_created(path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    root_removed |= self.on_removed(path, registry);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
                (RenameMode::From, [from, ..]) => root_removed |= self.on_removed(from, registry),
                (RenameMode::To, [to, ..]) => self.on_created(to),
                (RenameMode::Both, [from, to, ..]) => {
                    root_removed |= self.on_removed(from, registry);
                    self.on_created(to);
                }
                (_, paths) => {
                    for path in paths {
                        if fs::symlink_metadata(path).is_ok() {
                            self.on_created(path);
                        } else {
                            root_removed |= self.on_removed(path, registry);
                        }
                    }
                }
            },
            EventKind::Modify(_) => {
                for path in &event.paths {
                    if is_journal_path(path) {
                        self.pending.insert(path.clone());
                    }
                }
            }
            _ => {}
        }

        root_removed.then(|| String::from("a watched journal root was removed"))
    }

    fn on_created(&mut self, path: &Path) {
        let Ok(metadata) = fs::symlink_metadata(path) else {
            if is_journal_path(path) {
                self.pending.insert(path.to_path_buf());
            }
            return;
        };

        if metadata.is_symlink() {
            match fs::canonicalize(path) {
                Ok(target) if target.is_dir() => {
                    debug!(link = %path.display(), target = %target.display(), "watching symlinked journal directory");
                    self.watches.add_symlink(path.to_path_buf(), target.clone());
                    self.add_tree(&target);
                }
                Ok(target) if target.is_file() && is_journal_path(path) => {
                    self.pending.insert(path.to_path_buf());
                }
                _ => {}
            }
        } else if metadata.is_dir() {
            self.add_tree(path);
        } else if is_journal_path(path) {
            self.pending.insert(path.to_path_buf());
        }
    }

    /// Returns `true` when `path` is one of the session's roots.
    fn on_removed(&mut self, path: &Path, registry: &FileRegistry) -> bool {
        if let Some(target) = self.watches.remove_symlink(path) {
            if self.is_reachable(&target) {
                debug!(link = %path.display(), "symlink removed, target still reachable");
            } else {
                self.remove_tree(&target, registry);
            }
            return false;
        }

        if self.watches.contains(path) {
            self.remove_tree(path, registry);
            return self.roots.iter().any(|root| root == path);
        }

        if is_journal_path(path) {
            self.pending.insert(path.to_path_buf());
        }
        false
    }

    fn is_reachable(&self, target: &Path) -> bool {
        self.roots.iter().any(|root| target.starts_with(root))
            || self.watches.target_still_linked(target)
    }

    fn add_tree(&mut self, dir: &Path) {
        let mut items = Vec::new();
        self.scanner.walk(dir, &mut |item| items.push(item));

        for item in items {
            match item {
                ScanItem::Directory(path) => self.add_watch(&path),
                ScanItem::Symlink { link, target } => self.watches.add_symlink(link, target),
                ScanItem::File(path) => {
                    self.pending.insert(path);
                }
            }
        }
    }

    fn add_watch(&mut self, path: &Path) {
        if self.watches.contains(path) {
            return;
        }

        match self.monitor.watch_directory(path) {
            Ok(()) => {
                if let Some(handle) = self.watches.insert(path) {
                    trace!(?handle, dir = %path.display(), "watching journal directory");
                }
            }
            Err(e) if path.is_dir() => {
                self.errors += 1;
                warn!(dir = %path.display(), error = %e, errors = self.errors, "failed to watch journal directory");
            }
            Err(e) => debug!(dir = %path.display(), error = %e, "directory vanished before it could be watched"),
        }
    }

    fn remove_tree(&mut self, dir: &Path, registry: &FileRegistry) {
        for entry in self.watches.remove_tree(dir) {
            match self.monitor.unwatch_directory(&entry.path) {
                Ok(()) => trace!(handle = ?entry.handle, dir = %entry.path.display(), "stopped watching journal directory"),
                Err(e) => trace!(dir = %entry.path.display(), error = %e, "watch already gone"),
            }
        }

        self.pending.retain(|path| !path.starts_with(dir));
        registry.delete_prefix(dir);
    }

    /// Stat every pending path and apply the outcome to the registry.
    fn flush_pending(&mut self, registry: &FileRegistry) {
        self.last_flush = Instant::now();

        if self.pending.is_empty() {
            return;
        }

        let stamp = now_monotonic_usec();
        let count = self.pending.len();

        for path in self.pending.drain() {
            let Some(key) = path.to_str() else {
                warn!(path = ?path, "ignoring journal file with non UTF-8 path");
                continue;
            };

            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => {
                    registry.upsert(key, DiscoveredMeta::from_metadata(&metadata, stamp));
                    registry.update_header(key);
                }
                Ok(_) => {
                    registry.delete(key);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    registry.delete(key);
                }
                Err(e) => debug!(path = key, error = %e, "cannot stat journal file"),
            }
        }

        debug!(files = count, "applied pending journal file changes");
    }
}

fn is_journal_path(path: &Path) -> bool {
    path.to_str().is_some_and(is_journal_file)
}

/// Keeps a [`FileRegistry`] current by following filesystem notifications
/// under the configured roots.
pub struct DirectoryWatcher {
    registry: FileRegistry,
    config: RegistryConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<WatcherStatus>,
    state: WatcherState,
    sessions: u64,
}

impl DirectoryWatcher {
    pub fn new(registry: FileRegistry, config: RegistryConfig) -> (Self, WatcherHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let initial = WatcherStatus {
            state: WatcherState::Init,
            sessions: 0,
        };
        let (status, status_rx) = watch::channel(initial);

        registry.set_roots(config.roots.clone());

        let watcher = Self {
            registry,
            config,
            commands,
            status,
            state: WatcherState::Init,
            sessions: 0,
        };
        let handle = WatcherHandle {
            commands: commands_tx,
            status: status_rx,
        };

        (watcher, handle)
    }

    /// Spawn the watcher on the current tokio runtime.
    pub fn spawn(
        registry: FileRegistry,
        config: RegistryConfig,
    ) -> (WatcherHandle, tokio::task::JoinHandle<()>) {
        let (watcher, handle) = Self::new(registry, config);
        (handle, tokio::spawn(watcher.run()))
    }

    fn set_state(&mut self, state: WatcherState) {
        if state != self.state {
            debug!(from = ?self.state, to = ?state, "journal watcher state change");
        }
        self.state = state;

        let status = WatcherStatus {
            state,
            sessions: self.sessions,
        };
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn reconfigure(&mut self, roots: Vec<PathBuf>) {
        info!(roots = ?roots, "journal watcher roots changed");

        for old in &self.config.roots {
            if roots.contains(old) {
                continue;
            }
            if let Ok(resolved) = fs::canonicalize(old) {
                self.registry.delete_prefix(&resolved);
            }
        }

        self.registry.set_roots(roots.clone());
        self.config.roots = roots;
    }

    pub async fn run(mut self) {
        let mut session: Option<Session> = None;
        let mut stopping = false;

        loop {
            let next = match self.state {
                WatcherState::Init => {
                    let registry = self.registry.clone();
                    let config = self.config.clone();
                    let started = tokio::task::spawn_blocking(move || Session::start(&registry, &config)).await;

                    match started {
                        Ok(Ok(started)) => {
                            self.sessions += 1;
                            session = Some(started);
                            WatcherState::Running
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "cannot start journal watcher session");
                            WatcherState::Restart
                        }
                        Err(e) => {
                            error!(error = %e, "journal watcher session task failed");
                            WatcherState::Restart
                        }
                    }
                }
                WatcherState::Running => {
                    let Some(mut active) = session.take() else {
                        self.set_state(WatcherState::Init);
                        continue;
                    };

                    let wake = active.wait(&mut self.commands, self.config.poll_timeout).await;
                    let registry = self.registry.clone();
                    let applied = tokio::task::spawn_blocking(move || {
                        let step = active.apply(wake, &registry);
                        (active, step)
                    })
                    .await;

                    match applied {
                        Ok((active, step)) => {
                            session = Some(active);
                            match step {
                                Step::Continue => WatcherState::Running,
                                Step::Restart(reason) => {
                                    warn!(%reason, "restarting journal watcher session");
                                    WatcherState::Draining
                                }
                                Step::Reconfigure(roots) => {
                                    self.reconfigure(roots);
                                    WatcherState::Draining
                                }
                                Step::Shutdown => {
                                    stopping = true;
                                    WatcherState::Draining
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "journal watcher event task failed");
                            WatcherState::Restart
                        }
                    }
                }
                WatcherState::Draining => {
                    if let Some(mut finished) = session.take() {
                        let registry = self.registry.clone();
                        let flushed = tokio::task::spawn_blocking(move || finished.flush_pending(&registry)).await;
                        if let Err(e) = flushed {
                            warn!(error = %e, "journal watcher flush task failed");
                        }
                    }

                    if stopping {
                        WatcherState::Stopped
                    } else {
                        WatcherState::Restart
                    }
                }
                WatcherState::Restart => {
                    let delay = tokio::time::sleep(self.config.restart_delay);
                    let command = tokio::select! {
                        _ = delay => None,
                        command = self.commands.recv() => Some(command),
                    };

                    match command {
                        None | Some(Some(Command::Restart)) => WatcherState::Init,
                        Some(Some(Command::ConfigureRoots(roots))) => {
                            self.reconfigure(roots);
                            WatcherState::Init
                        }
                        Some(Some(Command::Shutdown)) | Some(None) => WatcherState::Stopped,
                    }
                }
                WatcherState::Stopped => {
                    info!("journal watcher stopped");
                    break;
                }
            };

            self.set_state(next);
        }
    }
}
