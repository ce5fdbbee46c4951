use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{
    AccessType, FrameId, PageId, Result, StorageError, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::page_guard::ReleaseCallback;
use super::{BasicPageGuard, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping protected by the single pool mutex
struct PoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames not currently assigned to any page
    free_list: VecDeque<FrameId>,
}

/// Shared pool state; guards hold an `Arc` of this so a pin can outlive the
/// manager handle that produced it
struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    inner: Mutex<PoolInner>,
    replacer: LruKReplacer,
}

impl BufferPoolState {
    /// Shared unpin path for `unpin_page` and for guard release.
    ///
    /// Returns false when the page is not resident or its pin count is
    /// already zero; otherwise decrements the count, folds in the dirty
    /// intent, and marks the frame evictable on the 1 -> 0 transition. The
    /// page-table entry stays: an unpinned resident page is still a hit.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                true
            }
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed set of in-memory frames.
/// Page lookups go through the page table; when the pool is full, the LRU-K
/// replacer picks a victim among unpinned frames.
///
/// One mutex protects the page table and free list, and every replacer call
/// is made while it is held; disk I/O for fetch/evict/flush also happens
/// under it, trading throughput for straightforward invariants.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    state: Arc<BufferPoolState>,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, LRU-K
    /// history depth, and disk manager.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruKReplacer::new(replacer_k, pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a brand-new page, pinned once. Returns `Ok(None)` when
    /// every frame is pinned; the caller owns the pin and must hand it back
    /// via [`unpin_page`](Self::unpin_page) (or use
    /// [`new_page_guarded`](Self::new_page_guarded) instead).
    pub fn new_page(&self) -> Result<Option<PageId>> {
        self.create_page().map(|created| created.map(|(pid, _)| pid))
    }

    /// Allocates a brand-new page wrapped in a guard that owns the pin.
    pub fn new_page_guarded(&self) -> Result<Option<BasicPageGuard>> {
        let Some((page_id, frame_id)) = self.create_page()? else {
            return Ok(None);
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        Ok(Some(BasicPageGuard::new(
            page_id,
            frame,
            self.release_callback(),
        )))
    }

    /// Fetches a page and wraps it in a pin-only guard.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<Option<BasicPageGuard>> {
        let Some(frame_id) = self.fetch_frame(page_id, AccessType::Unknown)? else {
            return Ok(None);
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        Ok(Some(BasicPageGuard::new(
            page_id,
            frame,
            self.release_callback(),
        )))
    }

    /// Fetches a page for shared access. Blocks until the page latch can be
    /// acquired. Returns `Ok(None)` when the pool has no victim to offer.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        self.fetch_page_read_with(page_id, AccessType::Unknown)
    }

    pub fn fetch_page_read_with(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<ReadPageGuard>> {
        let Some(frame_id) = self.fetch_frame(page_id, access_type)? else {
            return Ok(None);
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let guard = unsafe { ReadPageGuard::new(page_id, frame, self.release_callback()) };
        Ok(Some(guard))
    }

    /// Fetches a page for exclusive access.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        self.fetch_page_write_with(page_id, AccessType::Unknown)
    }

    pub fn fetch_page_write_with(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<WritePageGuard>> {
        let Some(frame_id) = self.fetch_frame(page_id, access_type)? else {
            return Ok(None);
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let guard = unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) };
        Ok(Some(guard))
    }

    /// Releases one pin on a page. Returns false if the page is not
    /// resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident page to disk, dirty or not, and clears its dirty
    /// flag. Returns `Ok(false)` if the page is not resident.
    ///
    /// The frame is pinned for the duration so it cannot be reassigned, and
    /// the page latch is taken without the pool mutex held. Must not be
    /// called by a thread holding a write guard on the same page.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let frame = {
            let inner = self.state.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            if frame.pin() == 1 {
                self.state.replacer.set_evictable(frame_id, false);
            }
            frame
        };

        let mut data = [0u8; PAGE_SIZE];
        {
            let latch = frame.data.read();
            // Cleared under the latch: any writer that sneaks in after we
            // release it re-marks the frame dirty itself.
            frame.set_dirty(false);
            data.copy_from_slice(&latch[..]);
        }

        let result = self.disk_scheduler.write_page_sync(page_id, &data);
        self.state.unpin(page_id, false);
        result.map(|()| true)
    }

    /// Flushes every resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let inner = self.state.inner.lock();
            inner.page_table.keys().copied().collect()
        };
        tracing::debug!(pages = page_ids.len(), "flushing all resident pages");

        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops a page from the pool and releases its id. Returns `Ok(true)`
    /// when the page is gone (including when it was never resident) and
    /// `Ok(false)` when a pin blocks the deletion.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.write_page_sync(page_id, &data)?;
        }

        inner.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);
        frame.reset();

        self.disk_scheduler.disk_manager().deallocate_page(page_id);
        Ok(true)
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    fn release_callback(&self) -> ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin(page_id, is_dirty);
        })
    }

    /// Allocates a fresh page into a frame: zeroed bytes, pin count 1,
    /// clean, installed in the page table and tracked as non-evictable.
    fn create_page(&self) -> Result<Option<(PageId, FrameId)>> {
        let mut inner = self.state.inner.lock();
        let Some(frame_id) = self.acquire_frame(&mut inner)? else {
            return Ok(None);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = self.disk_scheduler.disk_manager().allocate_page();
        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        self.state
            .replacer
            .record_access(frame_id, AccessType::Unknown);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(Some((page_id, frame_id)))
    }

    /// Pins the frame holding `page_id`, reading the page from disk if it is
    /// not resident. `Ok(None)` means every frame is pinned.
    fn fetch_frame(&self, page_id: PageId, access_type: AccessType) -> Result<Option<FrameId>> {
        if page_id == INVALID_PAGE_ID {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            if frame.pin() == 1 {
                // 0 -> 1 transition: the page sat resident-but-evictable
                self.state.replacer.set_evictable(frame_id, false);
            }
            self.state.replacer.record_access(frame_id, access_type);
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.acquire_frame(&mut inner)? else {
            return Ok(None);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let data = self.disk_scheduler.read_page_sync(page_id)?;
        frame.set_page_id(page_id);
        frame.copy_from(&data[..]);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id, access_type);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(Some(frame_id))
    }

    /// Produces a reset frame from the free list, or by evicting a victim
    /// (writing its bytes out first when dirty). `Ok(None)` when the free
    /// list is empty and nothing is evictable.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            self.state.frames[frame_id.as_usize()].reset();
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            return Ok(None);
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.write_page_sync(old_page_id, &data)?;
            tracing::trace!(page = %old_page_id, frame = %frame_id, "evicted dirty page written back");
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();
        Ok(Some(frame_id))
    }
}
