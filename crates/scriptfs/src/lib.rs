/*!
Filesystem access with a configurable backend and write watching.

scriptfs is a deliberately small library. Its primary consumer is the
`extedit` bridge, which materializes remotely-owned scripts as files and needs
to learn when those files are written.

## Current Features
* API similar to `std::fs` for the handful of operations the bridge needs
* Configurable backends
    * `StdBackend`, which uses `std::fs` and the `notify` crate
    * `InMemoryFs`, a deterministic in-memory filesystem useful for testing
* A single event channel per filesystem that disconnects once the watcher is
  closed
*/

mod in_memory_fs;
mod std_backend;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::{io, str};

pub use in_memory_fs::InMemoryFs;
pub use std_backend::{CriticalErrorHandler, StdBackend, WatcherCriticalError};

mod sealed {
    use super::*;

    /// Sealing trait for VfsBackend.
    pub trait Sealed {}

    impl Sealed for StdBackend {}
    impl Sealed for InMemoryFs {}
}

/// Trait that transforms `io::Result<T>` into `io::Result<Option<T>>`.
///
/// `Ok(None)` takes the place of IO errors whose `io::ErrorKind` is `NotFound`.
pub trait IoResultExt<T> {
    fn with_not_found(self) -> io::Result<Option<T>>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_not_found(self) -> io::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Backend that can be used to create a `Vfs`.
///
/// This trait is sealed and cannot not be implemented outside this crate.
pub trait VfsBackend: sealed::Sealed + Send + 'static {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()>;
    fn create_dir_all(&mut self, path: &Path) -> io::Result<()>;
    fn remove_file(&mut self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&mut self, path: &Path) -> io::Result<()>;

    fn event_receiver(&self) -> crossbeam_channel::Receiver<VfsEvent>;
    fn watch(&mut self, path: &Path) -> io::Result<()>;
    fn unwatch(&mut self, path: &Path) -> io::Result<()>;

    /// Stops watching entirely. The sending half of the event channel is
    /// dropped, so receivers observe a disconnect once buffered events drain.
    fn close(&mut self);
}

/// Represents an event that a filesystem can raise that might need to be
/// handled.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VfsEvent {
    Create(PathBuf),
    Write(PathBuf),
    Remove(PathBuf),
}

impl VfsEvent {
    pub fn path(&self) -> &Path {
        match self {
            VfsEvent::Create(path) | VfsEvent::Write(path) | VfsEvent::Remove(path) => path,
        }
    }

    /// Whether this event means the contents of the file at `path()` may have
    /// changed. Creation counts, since editors that save by renaming a new
    /// file into place surface as a create.
    pub fn is_content_write(&self) -> bool {
        matches!(self, VfsEvent::Create(_) | VfsEvent::Write(_))
    }
}

struct VfsInner {
    backend: Box<dyn VfsBackend>,
    closed: bool,
}

/// A filesystem with a configurable backend.
///
/// All operations on the Vfs take a lock on an internal backend. For performing
/// batches of operations, it might be more performant to call `lock()` and
/// use [`VfsLock`](struct.VfsLock.html) instead.
pub struct Vfs {
    inner: Mutex<VfsInner>,
}

impl Vfs {
    /// Creates a new `Vfs` with the default backend, also returning the
    /// critical error receiver for monitoring watcher health.
    pub fn new_default_with_errors(
    ) -> io::Result<(Self, crossbeam_channel::Receiver<WatcherCriticalError>)> {
        let backend = StdBackend::new()?;
        let error_rx = backend.critical_error_receiver();
        Ok((Self::new(backend), error_rx))
    }

    /// Creates a new `Vfs` with the given backend.
    pub fn new<B: VfsBackend>(backend: B) -> Self {
        let inner = VfsInner {
            backend: Box::new(backend),
            closed: false,
        };

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Manually lock the Vfs, useful for batches of operations.
    pub fn lock(&self) -> VfsLock<'_> {
        VfsLock {
            inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    pub fn read<P: AsRef<Path>>(&self, path: P) -> io::Result<Vec<u8>> {
        self.lock().read(path)
    }

    /// Reads a file and validates that it is UTF-8.
    pub fn read_to_string<P: AsRef<Path>>(&self, path: P) -> io::Result<String> {
        self.lock().read_to_string(path)
    }

    pub fn write<P: AsRef<Path>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> io::Result<()> {
        self.lock().write(path, contents)
    }

    pub fn create_dir_all<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().create_dir_all(path)
    }

    pub fn remove_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().remove_file(path)
    }

    pub fn remove_dir_all<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().remove_dir_all(path)
    }

    /// Starts delivering events for `path` on the event channel. Fails once
    /// the Vfs has been closed.
    pub fn watch<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().watch(path)
    }

    pub fn unwatch<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().unwatch(path)
    }

    /// Retrieve a handle to the event receiver for this `Vfs`.
    pub fn event_receiver(&self) -> crossbeam_channel::Receiver<VfsEvent> {
        self.lock().event_receiver()
    }

    /// Closes the watcher. Idempotent; file operations keep working.
    pub fn close(&self) {
        self.lock().close()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().inner.closed
    }
}

/// A locked handle to a [`Vfs`](struct.Vfs.html), created by `Vfs::lock`.
///
/// Implements roughly the same API as [`Vfs`](struct.Vfs.html).
pub struct VfsLock<'a> {
    inner: MutexGuard<'a, VfsInner>,
}

impl VfsLock<'_> {
    pub fn read<P: AsRef<Path>>(&mut self, path: P) -> io::Result<Vec<u8>> {
        self.inner.backend.read(path.as_ref())
    }

    pub fn read_to_string<P: AsRef<Path>>(&mut self, path: P) -> io::Result<String> {
        let path = path.as_ref();
        let contents = self.inner.backend.read(path)?;

        String::from_utf8(contents).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("File was not valid UTF-8: {}", path.display()),
            )
        })
    }

    pub fn write<P: AsRef<Path>, C: AsRef<[u8]>>(
        &mut self,
        path: P,
        contents: C,
    ) -> io::Result<()> {
        self.inner.backend.write(path.as_ref(), contents.as_ref())
    }

    pub fn create_dir_all<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        self.inner.backend.create_dir_all(path.as_ref())
    }

    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if !self.inner.closed {
            let _ = self.inner.backend.unwatch(path);
        }
        self.inner.backend.remove_file(path)
    }

    pub fn remove_dir_all<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if !self.inner.closed {
            let _ = self.inner.backend.unwatch(path);
        }
        self.inner.backend.remove_dir_all(path)
    }

    pub fn watch<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        if self.inner.closed {
            return Err(io::Error::other("watcher has been closed"));
        }
        self.inner.backend.watch(path.as_ref())
    }

    pub fn unwatch<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        if self.inner.closed {
            return Ok(());
        }
        self.inner.backend.unwatch(path.as_ref())
    }

    pub fn event_receiver(&self) -> crossbeam_channel::Receiver<VfsEvent> {
        self.inner.backend.event_receiver()
    }

    pub fn close(&mut self) {
        if !self.inner.closed {
            self.inner.closed = true;
            self.inner.backend.close();
        }
    }
}
