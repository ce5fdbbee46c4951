use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{PageId, RecordId, Result, StorageError, INVALID_PAGE_ID};

use super::btree_page::{
    BTreePageKind, BTreePageRef, HeaderPage, HeaderPageRef, InternalPage, InternalPageRef,
    LeafPage, LeafPageRef, INTERNAL_SLOT_CAPACITY, KEY_SIZE, LEAF_SLOT_CAPACITY,
};
use super::index_iterator::IndexIterator;
use super::key_comparator::KeyComparator;

/// Latches held during a write descent: the header guard plus the chain of
/// ancestors that might still have to absorb a split. Dropping the deque
/// releases the latches (and pins) in one go.
#[derive(Default)]
struct Context {
    header: Option<WritePageGuard>,
    write_set: VecDeque<WritePageGuard>,
}

impl Context {
    fn held(&self) -> usize {
        self.write_set.len() + usize::from(self.header.is_some())
    }

    /// Releases everything held above the current node. Sound exactly when
    /// the current node cannot propagate a split upward.
    fn release_ancestors(&mut self) -> usize {
        let released = self.held();
        self.header = None;
        self.write_set.clear();
        released
    }
}

/// A B+ tree index over buffer-pooled pages.
///
/// Readers descend with read-latch coupling: each child is latched before
/// its parent is released, so a reader always sees a consistent path.
/// Writers use latch crabbing: the full path is write-latched top-down, and
/// every held ancestor is dropped as soon as a node is *safe* (an insert
/// into it cannot split), which keeps the latched window short.
pub struct BPlusTree<C: KeyComparator> {
    header_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: u16,
    internal_max_size: u16,
    /// Number of descents that released held ancestors early; exposed for
    /// tests and debugging of the crabbing protocol.
    early_releases: AtomicU64,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates a fresh, empty index, allocating its header page.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2, "leaf pages need room for a split");
        assert!(internal_max_size >= 3, "internal pages need room for a split");
        assert!((leaf_max_size as usize) < LEAF_SLOT_CAPACITY);
        assert!((internal_max_size as usize) < INTERNAL_SLOT_CAPACITY);

        let mut header_guard = bpm
            .new_page_guarded()?
            .ok_or(StorageError::BufferPoolFull)?
            .upgrade_write();
        let header_page_id = header_guard.page_id();
        HeaderPage::new(header_guard.data_mut()).init();
        drop(header_guard);

        Ok(Self {
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            early_releases: AtomicU64::new(0),
        })
    }

    /// Adopts an index whose header page already exists.
    pub fn open(
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Self {
        Self {
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            early_releases: AtomicU64::new(0),
        }
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.fetch_read(self.header_page_id)?;
        Ok(HeaderPageRef::new(guard.data()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Number of write descents that released ancestor latches before
    /// reaching the leaf.
    pub fn early_release_count(&self) -> u64 {
        self.early_releases.load(Ordering::Relaxed)
    }

    /// Point lookup. Returns the record id stored under `key`, if any.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RecordId>> {
        assert_eq!(key.len(), KEY_SIZE);

        let header_guard = self.fetch_read(self.header_page_id)?;
        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(header_guard);

        loop {
            if BTreePageRef::new(guard.data()).kind() == BTreePageKind::Leaf {
                let leaf = LeafPageRef::new(guard.data());
                return Ok(leaf
                    .lookup(key, &self.comparator)
                    .map(|pos| leaf.rid_at(pos)));
            }
            let child_id = {
                let internal = InternalPageRef::new(guard.data());
                internal.child_at(internal.child_index(key, &self.comparator))
            };
            // Child latched before the parent guard is released
            guard = self.fetch_read(child_id)?;
        }
    }

    /// Inserts a unique key. Returns `Ok(false)` if the key already exists.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> Result<bool> {
        assert_eq!(key.len(), KEY_SIZE);

        let mut ctx = Context::default();
        let mut header_guard = self.fetch_write(self.header_page_id)?;

        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            let mut root_guard = self.new_write()?;
            let root_pid = root_guard.page_id();
            let mut leaf = LeafPage::new(root_guard.data_mut());
            leaf.init(self.leaf_max_size);
            leaf.insert_at(0, key, rid);
            HeaderPage::new(header_guard.data_mut()).set_root_page_id(root_pid);
            tracing::debug!(root = %root_pid, "b+ tree root created");
            return Ok(true);
        }

        ctx.header = Some(header_guard);
        let mut guard = self.fetch_write(root_id)?;

        // Descend, keeping ancestors latched only while a split could still
        // reach them.
        loop {
            let (safe, is_leaf) = {
                let page = BTreePageRef::new(guard.data());
                (
                    page.size() + 1 <= page.max_size(),
                    page.kind() == BTreePageKind::Leaf,
                )
            };
            if safe && ctx.held() > 0 {
                ctx.release_ancestors();
                self.early_releases.fetch_add(1, Ordering::Relaxed);
            }
            if is_leaf {
                break;
            }
            let child_id = {
                let internal = InternalPageRef::new(guard.data());
                internal.child_at(internal.child_index(key, &self.comparator))
            };
            ctx.write_set.push_back(guard);
            guard = self.fetch_write(child_id)?;
        }

        let mut leaf_guard = guard;
        let (pos, exact) = {
            let leaf = LeafPageRef::new(leaf_guard.data());
            leaf.insertion_point(key, &self.comparator)
        };
        if exact {
            return Ok(false);
        }

        let overflow = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            leaf.insert_at(pos, key, rid);
            leaf.size() > leaf.max_size()
        };
        if !overflow {
            return Ok(true);
        }

        // Split the leaf: upper half moves to a new right sibling, which is
        // stitched into the leaf chain and announced upward by its first key.
        let mut right_guard = self.new_write()?;
        let right_pid = right_guard.page_id();
        let mut split_key = [0u8; KEY_SIZE];
        {
            let mut left = LeafPage::new(leaf_guard.data_mut());
            let mut right = LeafPage::new(right_guard.data_mut());
            right.init(self.leaf_max_size);
            left.split_into(&mut right);
            right.set_next_page_id(left.next_page_id());
            left.set_next_page_id(right_pid);
            split_key.copy_from_slice(right.key_at(0));
        }
        let mut split_pid = right_pid;
        let mut split_origin = leaf_guard.page_id();
        drop(right_guard);
        drop(leaf_guard);

        // Fold the separator into the held ancestors, deepest first. Every
        // ancestor except possibly the last is full and splits in turn.
        while let Some(mut node_guard) = ctx.write_set.pop_back() {
            let overflow = {
                let pos = {
                    let node = InternalPageRef::new(node_guard.data());
                    node.child_index(&split_key, &self.comparator) + 1
                };
                let mut node = InternalPage::new(node_guard.data_mut());
                node.insert_at(pos, &split_key, split_pid);
                node.size() > node.max_size()
            };
            if !overflow {
                return Ok(true);
            }

            let mut right_guard = self.new_write()?;
            let right_pid = right_guard.page_id();
            {
                let mut left = InternalPage::new(node_guard.data_mut());
                let mut right = InternalPage::new(right_guard.data_mut());
                right.init(self.internal_max_size);
                left.split_into(&mut right);
                split_key.copy_from_slice(right.pushed_up_key());
            }
            split_pid = right_pid;
            split_origin = node_guard.page_id();
        }

        // The split outran every held ancestor; the header latch is still
        // ours, so grow the tree by one level.
        if let Some(mut header_guard) = ctx.header.take() {
            let mut root_guard = self.new_write()?;
            let new_root_pid = root_guard.page_id();
            {
                let mut root = InternalPage::new(root_guard.data_mut());
                root.init(self.internal_max_size);
                root.init_as_root(split_origin, &split_key, split_pid);
            }
            HeaderPage::new(header_guard.data_mut()).set_root_page_id(new_root_pid);
            tracing::debug!(root = %new_root_pid, "b+ tree root split, tree grew a level");
        }
        Ok(true)
    }

    /// Deletes `key` from the index.
    ///
    /// Not implemented yet; the write path mirrors `insert` with the
    /// safe-for-delete predicate (`size >= min_size + 1`).
    /// TODO: implement redistribute-then-merge, preferring the left sibling.
    pub fn remove(&self, _key: &[u8]) -> Result<()> {
        Err(StorageError::Unsupported("b+ tree deletion"))
    }

    /// Iterator positioned at the first entry of the index.
    pub fn begin(&self) -> Result<IndexIterator> {
        let header_guard = self.fetch_read(self.header_page_id)?;
        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm)));
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(header_guard);

        loop {
            if BTreePageRef::new(guard.data()).kind() == BTreePageKind::Leaf {
                return Ok(IndexIterator::new(Arc::clone(&self.bpm), guard, 0));
            }
            let child_id = InternalPageRef::new(guard.data()).child_at(0);
            guard = self.fetch_read(child_id)?;
        }
    }

    /// Iterator positioned at `key`'s slot, or `end()` if the key is absent.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator> {
        assert_eq!(key.len(), KEY_SIZE);

        let header_guard = self.fetch_read(self.header_page_id)?;
        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm)));
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(header_guard);

        loop {
            if BTreePageRef::new(guard.data()).kind() == BTreePageKind::Leaf {
                let pos = LeafPageRef::new(guard.data()).lookup(key, &self.comparator);
                return Ok(match pos {
                    Some(pos) => IndexIterator::new(Arc::clone(&self.bpm), guard, pos),
                    None => IndexIterator::end(Arc::clone(&self.bpm)),
                });
            }
            let child_id = {
                let internal = InternalPageRef::new(guard.data());
                internal.child_at(internal.child_index(key, &self.comparator))
            };
            guard = self.fetch_read(child_id)?;
        }
    }

    /// Iterator one past the last entry.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .fetch_page_read(page_id)?
            .ok_or(StorageError::BufferPoolFull)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .fetch_page_write(page_id)?
            .ok_or(StorageError::BufferPoolFull)
    }

    fn new_write(&self) -> Result<WritePageGuard> {
        Ok(self
            .bpm
            .new_page_guarded()?
            .ok_or(StorageError::BufferPoolFull)?
            .upgrade_write())
    }
}
