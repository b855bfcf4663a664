use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

/// One remotely-owned script that has been materialized on disk.
///
/// Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    identifier: String,
    path: PathBuf,
}

impl Script {
    pub fn new(identifier: String, path: PathBuf) -> Self {
        Self { identifier, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Every script registered during this run, keyed by identifier. Only grows.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: HashMap<String, Script>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<&Script> {
        self.scripts.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.scripts.contains_key(identifier)
    }

    /// Inserts a script unless its identifier is already taken, in which case
    /// the existing entry wins and is returned as the error.
    pub fn insert(&mut self, script: Script) -> Result<&Script, &Script> {
        use std::collections::hash_map::Entry;

        match self.scripts.entry(script.identifier.clone()) {
            Entry::Occupied(existing) => Err(&*existing.into_mut()),
            Entry::Vacant(slot) => Ok(&*slot.insert(script)),
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
