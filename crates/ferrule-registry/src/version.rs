use std::collections::HashMap;

use ferrule_common::protocol::Directory;

/// Drops registry updates that arrive out of order.
///
/// Remembers the last applied version per directory and accepts an update
/// only if its version is strictly greater.
#[derive(Debug, Default)]
pub struct VersionGuard {
    applied: HashMap<Directory, u64>,
}

impl VersionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records `version` if it is newer than the last one
    /// applied for `directory`.
    pub fn accept(&mut self, directory: &Directory, version: u64) -> bool {
        match self.applied.get_mut(directory) {
            Some(last) if version <= *last => false,
            Some(last) => {
                *last = version;
                true
            }
            None => {
                self.applied.insert(directory.clone(), version);
                true
            }
        }
    }

    pub fn last_applied(&self, directory: &Directory) -> Option<u64> {
        self.applied.get(directory).copied()
    }
}
