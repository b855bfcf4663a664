use std::{collections::BTreeMap, io, path::Path};

use crate::{pending::PendingChanges, registry::ScriptRegistry, suppression::SuppressionSet};

/// How the watch loop attributed a write notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The path belongs to no registered script.
    Unregistered,

    /// The write was ours, issued on behalf of the remote host.
    Echo,

    /// The user edited the file; it is now pending collection.
    UserEdit,
}

/// All mutable state shared between the watch loop and request handlers.
///
/// Always accessed through a single mutex, so every method here runs as one
/// atomic step relative to the others.
#[derive(Debug, Default)]
pub struct SyncState {
    pub registry: ScriptRegistry,
    pub suppression: SuppressionSet,
    pub pending: PendingChanges,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a write notification for `identifier` and records a
    /// pending change when it came from the user.
    pub fn record_write(&mut self, identifier: &str) -> WriteOrigin {
        if !self.registry.contains(identifier) {
            return WriteOrigin::Unregistered;
        }

        if self.suppression.consume_suppression(identifier) {
            WriteOrigin::Echo
        } else {
            self.pending.mark_pending(identifier);
            WriteOrigin::UserEdit
        }
    }

    /// Drains every pending change, reading current content with `read`.
    ///
    /// Scripts that cannot be read are logged and left out of the result.
    /// They are cleared all the same; only a new write brings them back.
    pub fn drain_all<F>(&mut self, mut read: F) -> BTreeMap<String, String>
    where
        F: FnMut(&Path) -> io::Result<String>,
    {
        let mut changes = BTreeMap::new();

        for identifier in self.pending.take_all() {
            let Some(script) = self.registry.get(&identifier) else {
                log::warn!("Dropping pending change for unknown script {}", identifier);
                continue;
            };

            match read(script.path()) {
                Ok(content) => {
                    changes.insert(identifier, content);
                }
                Err(err) => {
                    log::warn!(
                        "Couldn't read {} for script {}, skipping it: {}",
                        script.path().display(),
                        identifier,
                        err
                    );
                }
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::registry::Script;

    fn state_with(identifiers: &[&str]) -> SyncState {
        let mut state = SyncState::new();
        for identifier in identifiers {
            state
                .registry
                .insert(Script::new(
                    identifier.to_string(),
                    PathBuf::from(format!("/t/{}.lua", identifier)),
                ))
                .unwrap();
        }
        state
    }

    #[test]
    fn unregistered_writes_are_ignored() {
        let mut state = state_with(&[]);

        assert_eq!(state.record_write("ghost"), WriteOrigin::Unregistered);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn unregistered_writes_do_not_consume_suppression() {
        let mut state = state_with(&[]);
        state.suppression.mark_suppressed("ghost");

        state.record_write("ghost");

        assert!(state.suppression.is_suppressed("ghost"));
    }

    #[test]
    fn echo_is_discarded_and_only_once() {
        let mut state = state_with(&["a1"]);
        state.suppression.mark_suppressed("a1");

        assert_eq!(state.record_write("a1"), WriteOrigin::Echo);
        assert!(state.pending.is_empty());
        assert!(state.suppression.is_empty());

        assert_eq!(state.record_write("a1"), WriteOrigin::UserEdit);
        assert!(state.pending.is_pending("a1"));
    }

    #[test]
    fn drain_reads_pending_and_clears_them() {
        let mut state = state_with(&["a1", "b2", "c3"]);
        state.record_write("a1");
        state.record_write("c3");

        let changes = state.drain_all(|path| Ok(format!("content of {}", path.display())));

        let expected: BTreeMap<String, String> = [
            ("a1".to_owned(), "content of /t/a1.lua".to_owned()),
            ("c3".to_owned(), "content of /t/c3.lua".to_owned()),
        ]
        .into_iter()
        .collect();
        assert_eq!(changes, expected);

        assert!(state.drain_all(|_| panic!("nothing should be read")).is_empty());
    }

    #[test]
    fn unreadable_scripts_are_dropped_without_retry() {
        let mut state = state_with(&["a1", "b2"]);
        state.record_write("a1");
        state.record_write("b2");

        let changes = state.drain_all(|path| {
            if path.ends_with("a1.lua") {
                Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
            } else {
                Ok("print(2)".to_owned())
            }
        });

        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["b2"]);
        assert!(state.pending.is_empty());
        assert!(state.drain_all(|_| Ok(String::new())).is_empty());
    }
}
