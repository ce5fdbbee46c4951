use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{AccessType, PageId, RecordId, Result, StorageError, INVALID_PAGE_ID};

use super::btree_page::{KeyBytes, LeafPageRef, KEY_SIZE};

/// Forward scan over the leaf chain of a B+ tree.
///
/// The iterator keeps a read latch on its current leaf; when it steps off
/// the end of the page it latches the next leaf before releasing the
/// current one. Do not hold an iterator across a tree write from the same
/// thread - the write will block on the latch the iterator owns.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    /// Current leaf; `None` once the iterator has reached the end
    guard: Option<ReadPageGuard>,
    pos: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, guard: ReadPageGuard, pos: usize) -> Self {
        Self {
            bpm,
            guard: Some(guard),
            pos,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            pos: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// Page id of the guarded leaf, or `INVALID_PAGE_ID` at the end.
    pub fn page_id(&self) -> PageId {
        self.guard
            .as_ref()
            .map(|g| g.page_id())
            .unwrap_or(INVALID_PAGE_ID)
    }

    /// The entry under the cursor, or `None` at the end.
    pub fn entry(&self) -> Option<(KeyBytes, RecordId)> {
        let guard = self.guard.as_ref()?;
        let leaf = LeafPageRef::new(guard.data());
        if self.pos >= leaf.size() as usize {
            return None;
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(leaf.key_at(self.pos));
        Some((key, leaf.rid_at(self.pos)))
    }

    /// Steps the cursor forward, hopping to the next leaf when the current
    /// one is exhausted. Stepping an end iterator is a no-op.
    pub fn advance(&mut self) -> Result<()> {
        let Some(guard) = self.guard.as_ref() else {
            return Ok(());
        };

        let (size, next_id) = {
            let leaf = LeafPageRef::new(guard.data());
            (leaf.size() as usize, leaf.next_page_id())
        };

        self.pos += 1;
        if self.pos < size {
            return Ok(());
        }

        self.pos = 0;
        if next_id == INVALID_PAGE_ID {
            self.guard = None;
            return Ok(());
        }

        // The next leaf is latched before the assignment drops the current
        // guard, so the chain cannot shift underneath the cursor.
        let next_guard = self
            .bpm
            .fetch_page_read_with(next_id, AccessType::Scan)?
            .ok_or(StorageError::BufferPoolFull)?;
        self.guard = Some(next_guard);
        Ok(())
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id() == other.page_id() && self.pos == other.pos
    }
}

impl Eq for IndexIterator {}

impl Iterator for IndexIterator {
    type Item = Result<(KeyBytes, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entry()?;
        match self.advance() {
            Ok(()) => Some(Ok(entry)),
            Err(e) => Some(Err(e)),
        }
    }
}
