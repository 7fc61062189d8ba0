use crate::error::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;

pub(crate) type MonitorEvent = notify::Result<Event>;

/// File system watcher that sends events, and watcher errors, through an
/// async channel. Dropping the monitor removes every watch.
pub(crate) struct Monitor {
    watcher: RecommendedWatcher,
}

impl Monitor {
    /// Create a new monitor and return it with its event receiver
    pub(crate) fn new() -> Result<(Self, mpsc::UnboundedReceiver<MonitorEvent>)> {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: MonitorEvent| {
                if event_sender.send(res).is_err() {
                    warn!("journal watcher event receiver dropped");
                }
            },
            notify::Config::default(),
        )?;

        Ok((Self { watcher }, event_receiver))
    }

    /// Watch a single directory (not its subdirectories)
    pub(crate) fn watch_directory(&mut self, path: &Path) -> Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    pub(crate) fn unwatch_directory(&mut self, path: &Path) -> Result<()> {
        self.watcher.unwatch(path)?;
        Ok(())
    }
}
