use std::collections::BTreeSet;

/// Identifiers with user edits that have not been collected yet.
///
/// Kept ordered so that a drain reads files in a stable order.
#[derive(Debug, Default)]
pub struct PendingChanges {
    identifiers: BTreeSet<String>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an unreported user edit. Repeated edits before the next drain
    /// collapse into one pending entry.
    pub fn mark_pending(&mut self, identifier: &str) {
        if !self.identifiers.contains(identifier) {
            self.identifiers.insert(identifier.to_owned());
        }
    }

    pub fn is_pending(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    /// Removes and returns every pending identifier.
    pub fn take_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.identifiers).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}
