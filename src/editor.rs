//! Launching the user's editor on a materialized script.

use std::{
    io,
    path::Path,
    process::{Command, Stdio},
};

/// Starts an editor on a file without waiting for it to exit.
pub trait EditorLauncher: Send + Sync + 'static {
    /// Launches `editor` on `path`. An empty `editor` means "whatever the
    /// platform would open this file with".
    fn launch(&self, editor: &str, path: &Path) -> io::Result<()>;
}

/// Launches editors as child processes.
///
/// The editor command is the program to run and the script path is its only
/// argument. Children are reaped on a background thread so that they never
/// linger as zombies.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl EditorLauncher for ProcessLauncher {
    fn launch(&self, editor: &str, path: &Path) -> io::Result<()> {
        if editor.is_empty() {
            log::debug!("Opening {} with the system default", path.display());
            return opener::open(path).map_err(|err| match err {
                opener::OpenError::Io(io_error) => io_error,
                other => io::Error::other(other.to_string()),
            });
        }

        log::debug!("Launching '{}' on {}", editor, path.display());

        let mut child = Command::new(editor)
            .arg(path)
            .stdin(Stdio::null())
            .spawn()?;

        let editor = editor.to_owned();
        std::thread::Builder::new()
            .name("editor reaper".to_owned())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    log::warn!("Editor '{}' exited with {}", editor, status)
                }
                Ok(_) => log::trace!("Editor '{}' exited", editor),
                Err(err) => log::warn!("Couldn't wait on editor '{}': {}", editor, err),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_editor_is_a_launch_error() {
        let err = ProcessLauncher
            .launch(
                "extedit-test-editor-that-does-not-exist",
                Path::new("/tmp/a1.lua"),
            )
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn launch_does_not_wait_for_the_editor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a1.lua");
        std::fs::write(&path, "print(1)").unwrap();

        ProcessLauncher.launch("true", &path).unwrap();
    }
}
