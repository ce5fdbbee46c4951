use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Type-erased value slot; the concrete type is recovered by downcast on
/// lookup, so a `get` with the wrong type simply misses.
pub(crate) type ValueSlot = Arc<dyn Any + Send + Sync>;

/// A single immutable trie node. Nodes are shared freely between trie
/// versions; mutation always goes through a clone of the path.
#[derive(Clone, Default)]
pub(crate) struct TrieNode {
    /// Children keyed by the next byte of the key, in byte order
    pub(crate) children: BTreeMap<u8, Arc<TrieNode>>,
    /// Value stored at this node, if the node terminates a key
    pub(crate) value: Option<ValueSlot>,
}

impl TrieNode {
    fn is_prunable(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

/// An immutable copy-on-write trie keyed by byte strings.
///
/// Every mutating operation returns a new `Trie` that shares all untouched
/// subtrees with its predecessor; existing handles keep observing the state
/// they were created from. Cloning a handle is cheap (one `Arc` bump).
#[derive(Clone, Default)]
pub struct Trie {
    pub(crate) root: Option<Arc<TrieNode>>,
}

impl Trie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Looks up `key` and returns the stored value if it exists and has
    /// type `T`. The empty key addresses the root's value slot.
    pub fn get<T: Any + Send + Sync>(&self, key: &[u8]) -> Option<&T> {
        self.lookup(key)?
            .value
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns a new trie with `value` stored at `key`. Nodes along the key
    /// path are recloned; a previously plain terminal keeps its children.
    pub fn put<T: Any + Send + Sync>(&self, key: &[u8], value: T) -> Trie {
        let slot: ValueSlot = Arc::new(value);
        let new_root = put_node(self.root.as_ref(), key, slot);
        Trie {
            root: Some(Arc::new(new_root)),
        }
    }

    /// Returns a new trie with the value at `key` cleared. Nodes left with
    /// neither value nor children are pruned, cascading toward the root;
    /// removing an absent key yields an observably unchanged trie.
    pub fn remove(&self, key: &[u8]) -> Trie {
        let Some(root) = self.root.as_ref() else {
            return self.clone();
        };
        match remove_node(root, key) {
            // Key not present (or no value at the terminal): share the root
            None => self.clone(),
            Some(new_root) => Trie { root: new_root },
        }
    }

    /// Type-erased lookup used by the versioned store, which needs an owned
    /// handle on the value rather than a borrow.
    pub(crate) fn get_value_slot(&self, key: &[u8]) -> Option<ValueSlot> {
        self.lookup(key)?.value.clone()
    }

    fn lookup(&self, key: &[u8]) -> Option<&Arc<TrieNode>> {
        let mut node = self.root.as_ref()?;
        for byte in key {
            node = node.children.get(byte)?;
        }
        Some(node)
    }
}

/// Rebuilds the path for `key`, returning the replacement for `node`.
fn put_node(node: Option<&Arc<TrieNode>>, key: &[u8], value: ValueSlot) -> TrieNode {
    let mut new_node = node.map(|n| (**n).clone()).unwrap_or_default();
    match key.split_first() {
        None => {
            new_node.value = Some(value);
        }
        Some((&byte, rest)) => {
            let child = new_node.children.get(&byte).cloned();
            let new_child = put_node(child.as_ref(), rest, value);
            new_node.children.insert(byte, Arc::new(new_child));
        }
    }
    new_node
}

/// Removes the value at `key` below `node`.
///
/// The outer `Option` reports whether anything was removed (`None` means
/// the key was absent and the caller should keep sharing the old tree); the
/// inner `Option` is the replacement node, `None` once it pruned away.
fn remove_node(node: &Arc<TrieNode>, key: &[u8]) -> Option<Option<Arc<TrieNode>>> {
    match key.split_first() {
        None => {
            node.value.as_ref()?;
            let mut new_node = (**node).clone();
            new_node.value = None;
            if new_node.is_prunable() {
                Some(None)
            } else {
                Some(Some(Arc::new(new_node)))
            }
        }
        Some((&byte, rest)) => {
            let child = node.children.get(&byte)?;
            let replacement = remove_node(child, rest)?;
            let mut new_node = (**node).clone();
            match replacement {
                Some(new_child) => {
                    new_node.children.insert(byte, new_child);
                }
                None => {
                    new_node.children.remove(&byte);
                }
            }
            if new_node.is_prunable() {
                Some(None)
            } else {
                Some(Some(Arc::new(new_node)))
            }
        }
    }
}
