use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use crate::{VfsBackend, VfsEvent};

/// In-memory filesystem that can be used as a VFS backend.
///
/// Writes to watched paths raise events synchronously, before `write`
/// returns, which makes watcher-driven code deterministic under test.
///
/// Cloning an `InMemoryFs` produces another handle to the same filesystem,
/// so a test can keep one handle to make "external" edits while a `Vfs` owns
/// the other.
#[derive(Debug, Clone)]
pub struct InMemoryFs {
    inner: Arc<Mutex<InMemoryFsInner>>,
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFs {
    /// Create a new empty `InMemoryFs`. Only the root directory exists.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();

        let mut dirs = HashSet::new();
        dirs.insert(PathBuf::from("/"));

        Self {
            inner: Arc::new(Mutex::new(InMemoryFsInner {
                files: HashMap::new(),
                dirs,
                watches: HashSet::new(),
                sender: Some(sender),
                receiver,
            })),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut InMemoryFsInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Writes through this handle, raising events exactly like a write made
    /// through a `Vfs` would.
    pub fn write_file<P: AsRef<Path>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> io::Result<()> {
        self.with_inner(|inner| inner.write(path.as_ref(), contents.as_ref()))
    }

    /// Removes a file through this handle. Raises a `Remove` event when
    /// watched.
    pub fn delete_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.with_inner(|inner| inner.remove_file(path.as_ref()))
    }

    pub fn contents<P: AsRef<Path>>(&self, path: P) -> Option<Vec<u8>> {
        self.with_inner(|inner| inner.files.get(path.as_ref()).cloned())
    }

    pub fn is_dir<P: AsRef<Path>>(&self, path: P) -> bool {
        self.with_inner(|inner| inner.dirs.contains(path.as_ref()))
    }

    pub fn is_watched<P: AsRef<Path>>(&self, path: P) -> bool {
        self.with_inner(|inner| inner.is_watched(path.as_ref()))
    }
}

#[derive(Debug)]
struct InMemoryFsInner {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    watches: HashSet<PathBuf>,
    sender: Option<Sender<VfsEvent>>,
    receiver: Receiver<VfsEvent>,
}

impl InMemoryFsInner {
    fn is_watched(&self, path: &Path) -> bool {
        path.ancestors().any(|ancestor| self.watches.contains(ancestor))
    }

    fn raise(&self, event: VfsEvent) {
        if !self.is_watched(event.path()) {
            return;
        }

        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        if self.dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !self.dirs.contains(parent) {
                return Err(not_found(parent));
            }
        }

        let existed = self
            .files
            .insert(path.to_path_buf(), data.to_vec())
            .is_some();

        if existed {
            self.raise(VfsEvent::Write(path.to_path_buf()));
        } else {
            self.raise(VfsEvent::Create(path.to_path_buf()));
        }

        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        match self.files.remove(path) {
            Some(_) => {
                self.raise(VfsEvent::Remove(path.to_path_buf()));
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }
}

impl VfsBackend for InMemoryFs {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        self.with_inner(|inner| inner.files.get(path).cloned().ok_or_else(|| not_found(path)))
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.with_inner(|inner| inner.write(path, data))
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        self.with_inner(|inner| {
            if let Some(file) = path.ancestors().find(|a| inner.files.contains_key(*a)) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", file.display()),
                ));
            }

            for ancestor in path.ancestors() {
                if !ancestor.as_os_str().is_empty() {
                    inner.dirs.insert(ancestor.to_path_buf());
                }
            }
            Ok(())
        })
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        self.with_inner(|inner| inner.remove_file(path))
    }

    fn remove_dir_all(&mut self, path: &Path) -> io::Result<()> {
        self.with_inner(|inner| {
            if !inner.dirs.contains(path) {
                return Err(not_found(path));
            }

            let removed: Vec<PathBuf> = inner
                .files
                .keys()
                .filter(|file| file.starts_with(path))
                .cloned()
                .collect();

            for file in removed {
                inner.files.remove(&file);
                inner.raise(VfsEvent::Remove(file));
            }

            inner.dirs.retain(|dir| !dir.starts_with(path));
            inner.watches.retain(|watch| !watch.starts_with(path));
            Ok(())
        })
    }

    fn event_receiver(&self) -> Receiver<VfsEvent> {
        self.with_inner(|inner| inner.receiver.clone())
    }

    fn watch(&mut self, path: &Path) -> io::Result<()> {
        self.with_inner(|inner| {
            if !inner.files.contains_key(path) && !inner.dirs.contains(path) {
                return Err(not_found(path));
            }
            inner.watches.insert(path.to_path_buf());
            Ok(())
        })
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        self.with_inner(|inner| {
            inner.watches.remove(path);
            Ok(())
        })
    }

    fn close(&mut self) {
        self.with_inner(|inner| {
            inner.watches.clear();
            inner.sender = None;
        })
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("path {} not found", path.display()),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::Vfs;

    fn scripts_fs() -> (InMemoryFs, Vfs) {
        let fs = InMemoryFs::new();
        let vfs = Vfs::new(fs.clone());
        vfs.create_dir_all("/tmp/extedit").unwrap();
        (fs, vfs)
    }

    #[test]
    fn write_requires_parent_directory() {
        let (_fs, vfs) = scripts_fs();

        let err = vfs.write("/missing/a.lua", "a").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn unwatched_writes_raise_nothing() {
        let (_fs, vfs) = scripts_fs();
        let receiver = vfs.event_receiver();

        vfs.write("/tmp/extedit/a.lua", "one").unwrap();
        vfs.write("/tmp/extedit/a.lua", "two").unwrap();

        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn watched_writes_raise_events_synchronously() {
        let (fs, vfs) = scripts_fs();
        let receiver = vfs.event_receiver();
        let path = PathBuf::from("/tmp/extedit/a.lua");

        vfs.write(&path, "one").unwrap();
        vfs.watch(&path).unwrap();
        assert!(fs.is_watched(&path));

        fs.write_file(&path, "two").unwrap();
        assert_eq!(receiver.try_recv(), Ok(VfsEvent::Write(path.clone())));

        fs.delete_file(&path).unwrap();
        assert_eq!(receiver.try_recv(), Ok(VfsEvent::Remove(path)));
    }

    #[test]
    fn directory_watch_covers_new_files() {
        let (_fs, vfs) = scripts_fs();
        let receiver = vfs.event_receiver();

        vfs.watch("/tmp/extedit").unwrap();
        vfs.write("/tmp/extedit/b.lua", "b").unwrap();

        assert_eq!(
            receiver.try_recv(),
            Ok(VfsEvent::Create(PathBuf::from("/tmp/extedit/b.lua")))
        );
    }

    #[test]
    fn remove_dir_all_removes_descendants() {
        let (fs, vfs) = scripts_fs();
        vfs.write("/tmp/extedit/a.lua", "a").unwrap();
        vfs.write("/tmp/extedit/b.lua", "b").unwrap();

        vfs.remove_dir_all("/tmp/extedit").unwrap();

        assert!(!fs.is_dir("/tmp/extedit"));
        assert!(fs.is_dir("/tmp"));
        assert_eq!(fs.contents("/tmp/extedit/a.lua"), None);
        assert_eq!(
            vfs.remove_dir_all("/tmp/extedit").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn watching_missing_path_fails() {
        let (_fs, vfs) = scripts_fs();

        assert!(vfs.watch("/tmp/extedit/nothing.lua").is_err());
    }
}
