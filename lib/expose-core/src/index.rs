//! Index of routing resources attributed to each exposed service

use crate::ownership::ServiceKey;
use std::collections::BTreeMap;
use tracing::debug;

/// ExistingIndex maps an owning service to the routing resources it owns.
///
/// A key is present only while at least one name is attributed to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExistingIndex {
    // service key -> resource names, in insertion order
    entries: BTreeMap<ServiceKey, Vec<String>>,
}

impl ExistingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names currently attributed to a service
    pub fn names(&self, key: &ServiceKey) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Attribute a name to a service, a no-op when already attributed
    pub fn insert(&mut self, key: &ServiceKey, name: &str) {
        let names = self.entries.entry(key.clone()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            debug!("Indexed {} for service {}", name, key);
        }
    }

    /// Forget one name, dropping the key once it owns nothing
    pub fn remove(&mut self, key: &ServiceKey, name: &str) {
        if let Some(names) = self.entries.get_mut(key) {
            names.retain(|n| n != name);
            if names.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Forget a service entirely
    pub fn remove_key(&mut self, key: &ServiceKey) -> Vec<String> {
        self.entries.remove(key).unwrap_or_default()
    }

    pub fn contains_key(&self, key: &ServiceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a fresh index during a sync pass
#[derive(Debug, Default)]
pub(crate) struct IndexBuilder {
    entries: BTreeMap<ServiceKey, Vec<String>>,
}

impl IndexBuilder {
    /// Attribute a listed resource to its owner.
    ///
    /// Listing never returns one name twice under one owner.
    pub(crate) fn push(&mut self, key: ServiceKey, name: String) {
        let names = self.entries.entry(key).or_default();
        debug_assert!(
            !names.contains(&name),
            "routing resource {} indexed twice",
            name
        );
        names.push(name);
    }

    pub(crate) fn build(self) -> ExistingIndex {
        ExistingIndex {
            entries: self.entries,
        }
    }
}

impl<const N: usize> From<[(ServiceKey, Vec<&str>); N]> for ExistingIndex {
    fn from(entries: [(ServiceKey, Vec<&str>); N]) -> Self {
        let mut index = ExistingIndex::new();
        for (key, names) in entries {
            for name in names {
                index.insert(&key, name);
            }
        }
        index
    }
}
