use crate::{RegistryError, VersionIndex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory version index, for offline fixtures and tests.
///
/// Keys are matched case-insensitively. Keys marked with [`failing`](Self::failing)
/// answer with an HTTP error, standing in for an unreachable registry.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    versions: BTreeMap<String, Vec<String>>,
    failing: BTreeSet<String>,
    queries: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_versions(mut self, id: &str, versions: &[&str]) -> Self {
        self.versions.insert(
            id.to_lowercase(),
            versions.iter().map(|v| (*v).to_owned()).collect(),
        );
        self
    }

    #[must_use]
    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_lowercase());
        self
    }

    /// Number of `versions` calls served so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl VersionIndex for MemoryIndex {
    fn versions(&self, lookup_key: &str) -> Result<Vec<String>, RegistryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let key = lookup_key.to_lowercase();
        if self.failing.contains(&key) {
            return Err(RegistryError::Http(format!("registry unavailable for {key}")));
        }
        Ok(self.versions.get(&key).cloned().unwrap_or_default())
    }
}
