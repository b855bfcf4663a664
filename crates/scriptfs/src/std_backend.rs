use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{collections::HashSet, io};

use crossbeam_channel::{Receiver, Sender};
use notify::RecursiveMode;
use notify_debouncer_full::{
    new_debouncer,
    notify::event::{EventKind, ModifyKind, RenameMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};

use crate::{VfsBackend, VfsEvent};

/// Debounce window used for the notify watcher.
const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(50);

/// Critical errors from the file watcher that indicate watching is no longer reliable.
#[derive(Debug, Clone)]
pub enum WatcherCriticalError {
    /// The notify crate reported an error
    WatcherError {
        error: String,
        path: Option<PathBuf>,
    },
    /// Too many file changes caused the watcher to request a rescan
    RescanRequired,
    /// Failed to send an event through the channel
    ChannelSendFailed(String),
}

impl std::fmt::Display for WatcherCriticalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WatcherError { error, path } => {
                write!(f, "File watcher error: {} (path: {:?})", error, path)
            }
            Self::RescanRequired => {
                write!(f, "File watcher requested rescan due to too many changes")
            }
            Self::ChannelSendFailed(err) => {
                write!(f, "File watcher failed to send event: {}", err)
            }
        }
    }
}

impl std::error::Error for WatcherCriticalError {}

/// Callback type for handling critical watcher errors.
/// Return `true` to stop forwarding the current batch, `false` to continue.
pub type CriticalErrorHandler = Box<dyn Fn(WatcherCriticalError) -> bool + Send + Sync + 'static>;

/// `VfsBackend` that uses `std::fs` and the `notify` crate.
pub struct StdBackend {
    /// `None` once the backend has been closed. Dropping the debouncer drops
    /// the only event sender.
    debouncer: Option<Debouncer<notify::RecommendedWatcher, RecommendedCache>>,
    watcher_receiver: Receiver<VfsEvent>,
    watches: HashSet<PathBuf>,
    critical_error_receiver: Receiver<WatcherCriticalError>,
}

impl StdBackend {
    /// Creates a new StdBackend with default error handling.
    ///
    /// Watcher errors are logged and watching continues; a single bad path
    /// should not take the other watched files down with it. A failed send
    /// means nobody is listening anymore, so the batch is abandoned.
    pub fn new() -> io::Result<StdBackend> {
        Self::new_with_error_handler(Box::new(|err| match &err {
            WatcherCriticalError::ChannelSendFailed(_) => {
                log::debug!("{}. Event receiver is gone.", err);
                true
            }
            WatcherCriticalError::RescanRequired => {
                log::warn!(
                    "File watcher requested rescan due to rapid changes. \
                     Some file events may have been missed."
                );
                false
            }
            WatcherCriticalError::WatcherError { .. } => {
                log::error!("{}", err);
                false
            }
        }))
    }

    /// Creates a new StdBackend with a custom error handler.
    ///
    /// Critical errors are also sent to the `critical_error_receiver()`
    /// channel, which can be polled alongside `event_receiver()`.
    pub fn new_with_error_handler(error_handler: CriticalErrorHandler) -> io::Result<StdBackend> {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (error_tx, error_rx) = crossbeam_channel::unbounded();

        let debouncer = Self::create_debouncer(event_tx, error_tx, error_handler)?;

        Ok(Self {
            debouncer: Some(debouncer),
            watcher_receiver: event_rx,
            watches: HashSet::new(),
            critical_error_receiver: error_rx,
        })
    }

    fn create_debouncer(
        event_tx: Sender<VfsEvent>,
        error_tx: Sender<WatcherCriticalError>,
        error_handler: CriticalErrorHandler,
    ) -> io::Result<Debouncer<notify::RecommendedWatcher, RecommendedCache>> {
        let report = move |critical_err: WatcherCriticalError| {
            let _ = error_tx.send(critical_err.clone());
            error_handler(critical_err)
        };

        new_debouncer(
            DEBOUNCE_TIMEOUT,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let batch =
                        Self::coalesce(events.iter().flat_map(|e| Self::convert_event(&e.event)));
                    for vfs_event in batch {
                        if let Err(err) = event_tx.send(vfs_event) {
                            if report(WatcherCriticalError::ChannelSendFailed(err.to_string())) {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        let critical_err = if error.paths.is_empty() {
                            WatcherCriticalError::RescanRequired
                        } else {
                            WatcherCriticalError::WatcherError {
                                error: format!("{:?}", error.kind),
                                path: error.paths.first().cloned(),
                            }
                        };
                        if report(critical_err) {
                            return;
                        }
                    }
                }
            },
        )
        .map_err(|err| io::Error::other(format!("Failed to create file watcher: {:?}", err)))
    }

    /// Convert a notify event to our VfsEvent(s).
    fn convert_event(event: &notify::Event) -> Vec<VfsEvent> {
        let wrap: fn(PathBuf) -> VfsEvent = match &event.kind {
            EventKind::Create(_) => VfsEvent::Create,

            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Old path at [0], new path at [1].
                return match event.paths.as_slice() {
                    [from, to, ..] => vec![
                        VfsEvent::Remove(from.clone()),
                        VfsEvent::Create(to.clone()),
                    ],
                    _ => Vec::new(),
                };
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => VfsEvent::Remove,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => VfsEvent::Create,
            EventKind::Modify(ModifyKind::Name(_)) => VfsEvent::Write,

            EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => {
                return Vec::new()
            }

            EventKind::Modify(_) | EventKind::Other | EventKind::Any => VfsEvent::Write,

            EventKind::Remove(_) => VfsEvent::Remove,
        };

        event.paths.iter().cloned().map(wrap).collect()
    }

    /// Keeps only the first content event for each path inside one debounced
    /// batch. Creating a file and then filling it, or truncating and then
    /// writing, is one save as far as consumers care.
    fn coalesce(events: impl Iterator<Item = VfsEvent>) -> Vec<VfsEvent> {
        let mut batch: Vec<VfsEvent> = Vec::new();
        for event in events {
            if event.is_content_write()
                && batch
                    .iter()
                    .any(|seen| seen.is_content_write() && seen.path() == event.path())
            {
                continue;
            }
            batch.push(event);
        }
        batch
    }

    /// Returns a receiver for critical errors from the watcher thread.
    pub fn critical_error_receiver(&self) -> Receiver<WatcherCriticalError> {
        self.critical_error_receiver.clone()
    }
}

impl VfsBackend for StdBackend {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        fs_err::read(path)
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs_err::write(path, data)
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        fs_err::create_dir_all(path)
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        fs_err::remove_file(path)
    }

    fn remove_dir_all(&mut self, path: &Path) -> io::Result<()> {
        fs_err::remove_dir_all(path)
    }

    fn event_receiver(&self) -> Receiver<VfsEvent> {
        self.watcher_receiver.clone()
    }

    fn watch(&mut self, path: &Path) -> io::Result<()> {
        let Some(debouncer) = self.debouncer.as_mut() else {
            return Err(io::Error::other("watcher has been closed"));
        };

        if path
            .ancestors()
            .any(|ancestor| self.watches.contains(ancestor))
        {
            return Ok(());
        }

        // Only track the path once the watch has actually been registered.
        match debouncer.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                log::debug!("Watching path: {}", path.display());
                self.watches.insert(path.to_path_buf());
                Ok(())
            }
            Err(err) => {
                log::warn!("Failed to watch path {}: {:?}", path.display(), err);
                Err(io::Error::other(format!("{:?}", err)))
            }
        }
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        let Some(debouncer) = self.debouncer.as_mut() else {
            return Ok(());
        };

        match debouncer.unwatch(path) {
            Ok(()) => {
                log::debug!("Unwatched path: {}", path.display());
                self.watches.remove(path);
                Ok(())
            }
            Err(err)
                if matches!(
                    err.kind,
                    notify::ErrorKind::WatchNotFound | notify::ErrorKind::PathNotFound
                ) =>
            {
                self.watches.remove(path);
                Ok(())
            }
            Err(err) => {
                log::warn!("Failed to unwatch path {}: {:?}", path.display(), err);
                Err(io::Error::other(format!("{:?}", err)))
            }
        }
    }

    fn close(&mut self) {
        if self.debouncer.take().is_some() {
            log::debug!("Closed file watcher ({} watches)", self.watches.len());
        }
        self.watches.clear();
    }
}
