use std::collections::HashSet;

/// Identifiers whose next write notification was caused by a remote-origin
/// update and must not be reported back as a user edit.
///
/// An entry lives from just before the remote write until the watch loop sees
/// the matching notification, so it can never outlast a single write.
#[derive(Debug, Default)]
pub struct SuppressionSet {
    identifiers: HashSet<String>,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms suppression for the next notification on `identifier`. Arming an
    /// already armed identifier is a no-op.
    pub fn mark_suppressed(&mut self, identifier: &str) {
        self.identifiers.insert(identifier.to_owned());
    }

    /// Checks for and removes an armed entry. Returns `true` when the
    /// notification is an echo and should be discarded.
    pub fn consume_suppression(&mut self, identifier: &str) -> bool {
        self.identifiers.remove(identifier)
    }

    /// Withdraws an armed entry whose write never happened.
    pub fn withdraw(&mut self, identifier: &str) {
        self.identifiers.remove(identifier);
    }

    pub fn is_suppressed(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}
