//! Read-only registry
//!
//! Maps source URIs to object memories that were loaded into read-only
//! memory, so a parent shared by several images is loaded once. Entries are
//! weak: the registry never keeps a memory alive, ownership stays with the
//! children and callers holding the `Arc`.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::object_memory::ObjectMemory;

#[derive(Default)]
pub struct ReadOnlyRegistry {
    entries: RwLock<IndexMap<String, Weak<ObjectMemory>>>,
}

impl ReadOnlyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live memory registered under `uri`
    pub fn lookup(&self, uri: &str) -> Option<Arc<ObjectMemory>> {
        self.entries.read().get(uri).and_then(Weak::upgrade)
    }

    /// Record `memory` under its URI, replacing a dead entry
    pub fn register(&self, memory: &Arc<ObjectMemory>) {
        self.entries
            .write()
            .insert(memory.uri().to_string(), Arc::downgrade(memory));
    }

    /// Drop entries whose memory is gone; returns how many were removed
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, memory| memory.strong_count() > 0);
        before - entries.len()
    }

    /// URIs of live registered memories, in registration order
    pub fn uris(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, memory)| memory.strong_count() > 0)
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::format::ByteOrder;
    use crate::object_memory::ObjectMemoryParts;

    fn memory(uri: &str) -> Arc<ObjectMemory> {
        Arc::new(ObjectMemory::new(ObjectMemoryParts {
            uri: uri.to_string(),
            start: Address::zero(),
            root_offset: 0,
            hash: 0,
            canonical_start: Address::zero(),
            contents: Vec::new(),
            bytes_per_word: 8,
            byte_order: ByteOrder::Little,
            read_only: true,
            typemap: None,
            parent: None,
        }))
    }

    #[test]
    fn test_lookup_does_not_own() {
        let registry = ReadOnlyRegistry::new();
        let boot = memory("memory:bootstrap");
        registry.register(&boot);
        assert!(registry.lookup("memory:bootstrap").is_some());
        assert_eq!(registry.uris(), vec!["memory:bootstrap".to_string()]);

        drop(boot);
        assert!(registry.lookup("memory:bootstrap").is_none());
        assert!(registry.uris().is_empty());
        assert_eq!(registry.prune(), 1);
        assert!(registry.is_empty());
    }
}
