//! Resource Mirror: in-memory, thread-safe copy of the last observed state of
//! one resource kind.
//!
//! The owning reconciliation loop is the only writer. Other components get a
//! [`MirrorReader`], which exposes lookups and listing only.

use crate::object::{ObjectKey, ResourceVersion};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
struct MirrorEntry<K> {
    object: Arc<K>,
    resource_version: ResourceVersion,
}

/// Keyed store of the last-known-good objects of one kind.
#[derive(Debug)]
pub struct Mirror<K> {
    entries: Arc<RwLock<HashMap<ObjectKey, MirrorEntry<K>>>>,
}

impl<K> Default for Mirror<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Mirror<K> {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Look up an object by key.
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|e| Arc::clone(&e.object))
    }

    /// Object and its recorded resource version.
    pub fn get_with_version(&self, key: &ObjectKey) -> Option<(Arc<K>, ResourceVersion)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|e| (Arc::clone(&e.object), e.resource_version.clone()))
    }

    /// Resource version recorded for a key.
    pub fn version(&self, key: &ObjectKey) -> Option<ResourceVersion> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|e| e.resource_version.clone())
    }

    /// Insert or replace an object, returning the previous one.
    pub fn put(&self, key: ObjectKey, object: Arc<K>, resource_version: ResourceVersion) -> Option<Arc<K>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .insert(key, MirrorEntry { object, resource_version })
            .map(|old| old.object)
    }

    /// Remove an object, returning it if it was present.
    pub fn delete(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).map(|old| old.object)
    }

    /// Current objects, in no particular order.
    pub fn list(&self) -> Vec<Arc<K>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(|e| Arc::clone(&e.object)).collect()
    }

    /// Keys of every mirrored object.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }

    /// Number of mirrored objects.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the mirror holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only handle sharing this mirror's storage.
    #[must_use]
    pub fn reader(&self) -> MirrorReader<K> {
        MirrorReader {
            entries: Arc::clone(&self.entries),
        }
    }
}

/// Read-only view of a [`Mirror`].
#[derive(Debug)]
pub struct MirrorReader<K> {
    entries: Arc<RwLock<HashMap<ObjectKey, MirrorEntry<K>>>>,
}

impl<K> Clone for MirrorReader<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K> MirrorReader<K> {
    /// Look up an object by key.
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|e| Arc::clone(&e.object))
    }

    /// Current objects, in no particular order.
    pub fn list(&self) -> Vec<Arc<K>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(|e| Arc::clone(&e.object)).collect()
    }

    /// Number of mirrored objects.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the mirror holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let mirror: Mirror<String> = Mirror::new();
        let key = ObjectKey::namespaced("default", "a");

        assert!(mirror.get(&key).is_none());
        assert!(mirror.put(key.clone(), Arc::new("v1".to_string()), "1".into()).is_none());
        assert_eq!(mirror.get(&key).as_deref().map(String::as_str), Some("v1"));
        assert_eq!(mirror.version(&key), Some(ResourceVersion::from("1")));

        let old = mirror.put(key.clone(), Arc::new("v2".to_string()), "2".into());
        assert_eq!(old.as_deref().map(String::as_str), Some("v1"));
        assert_eq!(mirror.len(), 1);

        assert!(mirror.delete(&key).is_some());
        assert!(mirror.delete(&key).is_none());
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_reader_sees_writes() {
        let mirror: Mirror<u32> = Mirror::new();
        let reader = mirror.reader();
        mirror.put(ObjectKey::cluster("pv-1"), Arc::new(1), "10".into());
        mirror.put(ObjectKey::cluster("pv-2"), Arc::new(2), "11".into());

        assert_eq!(reader.len(), 2);
        let mut values: Vec<u32> = reader.list().iter().map(|v| **v).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(reader.get(&ObjectKey::cluster("pv-2")).map(|v| *v), Some(2));
    }

    #[test]
    fn test_concurrent_access() {
        let mirror: Arc<Mirror<usize>> = Arc::new(Mirror::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mirror = Arc::clone(&mirror);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = ObjectKey::namespaced(format!("ns-{t}"), format!("obj-{i}"));
                        mirror.put(key, Arc::new(i), ResourceVersion::new(i.to_string()));
                        let _ = mirror.list();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mirror.len(), 400);
    }
}
