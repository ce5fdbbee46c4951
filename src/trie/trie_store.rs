use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Trie;

/// Keeps a looked-up value alive independently of later writes: the guard
/// owns both the trie snapshot the value came from and a typed handle on
/// the value itself.
pub struct ValueGuard<T> {
    _snapshot: Trie,
    value: Arc<T>,
}

impl<T> Deref for ValueGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Concurrency wrapper over [`Trie`] with snapshot reads and serialized
/// writes.
///
/// Readers copy the current handle under a short root lock and then work
/// entirely on their snapshot, so they never contend with an in-flight
/// write beyond that copy. Writers serialize on a dedicated mutex, compute
/// the next version off to the side, and swap it in under the root lock.
#[derive(Default)]
pub struct TrieStore {
    /// Latest published version; held only long enough to copy or swap
    root: Mutex<Trie>,
    /// Serializes writers
    write_lock: Mutex<()>,
}

impl TrieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key` in the latest version. On a hit the returned guard
    /// remains valid however many writes land afterwards.
    pub fn get<T: Any + Send + Sync>(&self, key: &[u8]) -> Option<ValueGuard<T>> {
        let snapshot = self.root.lock().clone();
        let slot = snapshot.get_value_slot(key)?;
        let value = slot.downcast::<T>().ok()?;
        Some(ValueGuard {
            _snapshot: snapshot,
            value,
        })
    }

    /// Stores `value` at `key`, replacing any previous value.
    pub fn put<T: Any + Send + Sync>(&self, key: &[u8], value: T) {
        let _writer = self.write_lock.lock();
        let snapshot = self.root.lock().clone();
        let next = snapshot.put(key, value);
        *self.root.lock() = next;
    }

    /// Removes the value at `key`, if any.
    pub fn remove(&self, key: &[u8]) {
        let _writer = self.write_lock.lock();
        let snapshot = self.root.lock().clone();
        let next = snapshot.remove(key);
        *self.root.lock() = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trie_store_basic() {
        let store = TrieStore::new();
        assert!(store.get::<u32>(b"missing").is_none());

        store.put(b"answer", 42u32);
        assert_eq!(*store.get::<u32>(b"answer").unwrap(), 42);

        store.remove(b"answer");
        assert!(store.get::<u32>(b"answer").is_none());
    }

    #[test]
    fn test_trie_store_type_mismatch() {
        let store = TrieStore::new();
        store.put(b"k", String::from("v"));
        assert!(store.get::<u32>(b"k").is_none());
        assert_eq!(store.get::<String>(b"k").unwrap().as_str(), "v");
    }

    #[test]
    fn test_trie_store_guard_survives_overwrite() {
        let store = TrieStore::new();
        store.put(b"k", String::from("first"));

        let guard = store.get::<String>(b"k").unwrap();
        store.put(b"k", String::from("second"));
        store.remove(b"k");

        // The guard pins the snapshot it was read from.
        assert_eq!(guard.as_str(), "first");
        assert!(store.get::<String>(b"k").is_none());
    }
}
