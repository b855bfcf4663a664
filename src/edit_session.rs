use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crossbeam_channel::Receiver;
use scriptfs::{IoResultExt, Vfs, WatcherCriticalError};
use tempfile::TempDir;
use thiserror::Error;

use crate::{
    change_processor::ChangeProcessor,
    editor::{EditorLauncher, ProcessLauncher},
    registry::Script,
    script_path::script_path,
    session_id::SessionId,
    sync_state::SyncState,
};

/// Whether an open request materialized a new script or found it already
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    New,
    Reopen,
}

impl OpenOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            OpenOutcome::New => "new",
            OpenOutcome::Reopen => "reopen",
        }
    }
}

/// Result of registering a script: where it lives and whether it was new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub path: PathBuf,
    pub outcome: OpenOutcome,
}

/// Point-in-time counts of the session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub scripts: usize,
    pub pending: usize,
    pub suppressed: usize,
}

/// Contains all of the state for one run of the bridge: the directory that
/// scripts are materialized into, the registry of scripts, the sets used to
/// attribute writes, and the watcher feeding them.
///
/// Nothing here is specific to HTTP. The web layer is one consumer of this
/// interface; it is shared between concurrent request handlers as an
/// `Arc<EditSession>`.
pub struct EditSession {
    /// Attributes watcher events to the user or to remote updates. Taken and
    /// dropped on teardown, which joins its thread.
    change_processor: Mutex<Option<ChangeProcessor>>,

    /// Registry, suppression set and pending set, behind the one mutex that
    /// both the watch loop and request handlers go through.
    state: Arc<Mutex<SyncState>>,

    /// Filesystem all script files are read and written through. Closing it
    /// stops the watcher.
    vfs: Arc<Vfs>,

    /// Directory holding every materialized script for this run.
    dir_path: PathBuf,

    /// Keeps a real temporary directory alive when the session created one.
    temp_dir: Mutex<Option<TempDir>>,

    launcher: Box<dyn EditorLauncher>,

    /// Editor used when an open request doesn't name one.
    default_editor: Option<String>,

    session_id: SessionId,

    closed: AtomicBool,
}

impl EditSession {
    /// Provisions a session on the real filesystem: a fresh temporary
    /// directory, a notify watcher, and editors launched as processes.
    pub fn new(default_editor: Option<String>) -> Result<Self, SessionError> {
        let (vfs, critical_errors) = Vfs::new_default_with_errors()?;
        let temp_dir = tempfile::Builder::new().prefix("extedit").tempdir()?;

        let session = Self::start(
            vfs,
            temp_dir.path().to_path_buf(),
            Box::new(ProcessLauncher),
            default_editor,
            Some(critical_errors),
        )?;
        *session.temp_dir.lock().unwrap_or_else(|e| e.into_inner()) = Some(temp_dir);

        Ok(session)
    }

    /// Builds a session from its collaborators. `dir_path` is created if it
    /// doesn't exist yet, and is owned by the session from here on.
    pub fn with_parts(
        vfs: Vfs,
        dir_path: PathBuf,
        launcher: Box<dyn EditorLauncher>,
        default_editor: Option<String>,
    ) -> Result<Self, SessionError> {
        Self::start(vfs, dir_path, launcher, default_editor, None)
    }

    fn start(
        vfs: Vfs,
        dir_path: PathBuf,
        launcher: Box<dyn EditorLauncher>,
        default_editor: Option<String>,
        critical_errors: Option<Receiver<WatcherCriticalError>>,
    ) -> Result<Self, SessionError> {
        log::trace!("Starting new EditSession in {}", dir_path.display());

        vfs.create_dir_all(&dir_path)?;

        // Watched as a whole: editors that save by renaming a new file over a
        // script replace its inode.
        vfs.watch(&dir_path).map_err(|source| SessionError::Watch {
            path: dir_path.clone(),
            source,
        })?;

        let state = Arc::new(Mutex::new(SyncState::new()));

        log::trace!("Starting ChangeProcessor");
        let change_processor =
            ChangeProcessor::start(Arc::clone(&state), vfs.event_receiver(), critical_errors)?;

        Ok(Self {
            change_processor: Mutex::new(Some(change_processor)),
            state,
            vfs: Arc::new(vfs),
            dir_path,
            temp_dir: Mutex::new(None),
            launcher,
            default_editor: default_editor.filter(|editor| !editor.is_empty()),
            session_id: SessionId::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    /// Materializes a script in the session directory. Registering an
    /// identifier that already exists is a reopen: the file is left alone and
    /// `content` is ignored.
    pub fn register(&self, identifier: &str, content: &[u8]) -> Result<Registration, SessionError> {
        self.ensure_open()?;

        if identifier.is_empty() {
            return Err(SessionError::InvalidIdentifier);
        }

        let mut state = self.lock_state();

        if let Some(script) = state.registry.get(identifier) {
            log::info!(
                "Reopening {} at FS path {}",
                identifier,
                script.path().display()
            );
            return Ok(Registration {
                path: script.path().to_path_buf(),
                outcome: OpenOutcome::Reopen,
            });
        }

        let path = script_path(&self.dir_path, identifier);

        // The directory is already watched, so the initial write is an echo
        // like any remote update. The watch loop can't look at its
        // notification until this lock is released, by which point the
        // script is registered.
        state.suppression.mark_suppressed(identifier);

        if let Err(source) = self.vfs.write(&path, content) {
            state.suppression.withdraw(identifier);

            if let Err(err) = self.vfs.remove_file(&path).with_not_found() {
                log::warn!(
                    "Couldn't clean up partially written {}: {}",
                    path.display(),
                    err
                );
            }

            return Err(SessionError::Write { path, source });
        }

        // Cannot collide: absence was checked above under the same lock.
        let _ = state
            .registry
            .insert(Script::new(identifier.to_owned(), path.clone()));

        log::info!("Opened {} at FS path {}", identifier, path.display());

        Ok(Registration {
            path,
            outcome: OpenOutcome::New,
        })
    }

    /// Registers the script if needed and launches an editor on it. A failed
    /// launch is reported, but the script stays registered.
    pub fn open_or_reopen(
        &self,
        identifier: &str,
        body: &[u8],
        editor: &str,
    ) -> Result<OpenOutcome, SessionError> {
        let Registration { path, outcome } = self.register(identifier, body)?;

        let editor = self.resolve_editor(editor);
        self.launcher
            .launch(editor, &path)
            .map_err(|source| SessionError::Launch {
                editor: editor.to_owned(),
                path,
                source,
            })?;

        Ok(outcome)
    }

    fn resolve_editor<'a>(&'a self, requested: &'a str) -> &'a str {
        if !requested.is_empty() {
            requested
        } else {
            self.default_editor.as_deref().unwrap_or("")
        }
    }

    /// Returns the current content of every script the user has edited since
    /// the last call, and forgets those edits.
    ///
    /// The state lock is held across the reads, so an edit can't slip in
    /// between reading a file and clearing its pending flag.
    pub fn collect_changes(&self) -> Result<BTreeMap<String, String>, SessionError> {
        self.ensure_open()?;

        let mut state = self.lock_state();
        let changes = state.drain_all(|path| self.vfs.read_to_string(path));

        if !changes.is_empty() {
            log::debug!("Collected {} changed script(s)", changes.len());
        }

        Ok(changes)
    }

    /// Overwrites a script with content from the remote host without the
    /// write being reported back as a user edit.
    pub fn apply_remote_update(&self, identifier: &str, body: &[u8]) -> Result<(), SessionError> {
        self.ensure_open()?;

        let mut state = self.lock_state();

        let path = match state.registry.get(identifier) {
            Some(script) => script.path().to_path_buf(),
            None => {
                log::info!("Got remote update for unopened script {}", identifier);
                return Err(SessionError::NotOpened {
                    identifier: identifier.to_owned(),
                });
            }
        };

        // Suppression must be armed before the write; its notification may
        // arrive as soon as the write lands.
        state.suppression.mark_suppressed(identifier);

        if let Err(source) = self.vfs.write(&path, body) {
            state.suppression.withdraw(identifier);
            return Err(SessionError::Write { path, source });
        }

        log::debug!("Applied remote update to {}", identifier);
        Ok(())
    }

    /// Stops the watcher and removes the session directory with every script
    /// in it. Safe to call more than once, from any thread.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        log::info!("Tearing down, removing {}", self.dir_path.display());

        self.vfs.close();

        // Joins the watch loop thread.
        drop(
            self.change_processor
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(),
        );

        if let Err(err) = self.vfs.remove_dir_all(&self.dir_path).with_not_found() {
            log::error!(
                "Couldn't remove temporary directory {}: {}",
                self.dir_path.display(),
                err
            );
        }

        drop(self.temp_dir.lock().unwrap_or_else(|e| e.into_inner()).take());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn script_path(&self, identifier: &str) -> Option<PathBuf> {
        self.lock_state()
            .registry
            .get(identifier)
            .map(|script| script.path().to_path_buf())
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.lock_state();
        SessionStats {
            scripts: state.registry.len(),
            pending: state.pending.len(),
            suppressed: state.suppression.len(),
        }
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("script identifier must not be empty")]
    InvalidIdentifier,

    #[error("{identifier} is not opened by this host")]
    NotOpened { identifier: String },

    #[error("error writing {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("error watching {}: {source}", .path.display())]
    Watch { path: PathBuf, source: io::Error },

    #[error("couldn't launch editor '{editor}' on {}: {source}", .path.display())]
    Launch {
        editor: String,
        path: PathBuf,
        source: io::Error,
    },

    #[error("couldn't set up the session: {source}")]
    Provision {
        #[from]
        source: io::Error,
    },

    #[error("the session has been torn down")]
    Closed,
}
