use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback invoked exactly once when a guard releases its pin
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// RAII handle for a pinned page. Holds the pin only; byte access takes the
/// page latch for the duration of a closure. Upgrade into a read or write
/// guard to hold the latch across a scope.
pub struct BasicPageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    release: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(page_id: PageId, frame: Arc<FrameHeader>, release: ReleaseCallback) -> Self {
        Self {
            page_id,
            frame,
            release: Some(release),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Records that the holder modified the page; propagated to the buffer
    /// pool when the guard drops.
    pub fn set_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Runs `f` over the page bytes under a shared latch.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let latch = self.frame.data.read();
        f(&latch[..])
    }

    /// Runs `f` over the page bytes under an exclusive latch and marks the
    /// page dirty.
    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.is_dirty = true;
        let mut latch = self.frame.data.write();
        f(&mut latch[..])
    }

    /// Converts this guard into a read guard, keeping the pin and acquiring
    /// the shared page latch.
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let release = self.release.take().expect("guard already released");
        let frame = Arc::clone(&self.frame);
        let (page_id, is_dirty) = (self.page_id, self.is_dirty);
        unsafe { ReadPageGuard::with_dirty(page_id, frame, release, is_dirty) }
    }

    /// Converts this guard into a write guard, keeping the pin and acquiring
    /// the exclusive page latch.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let release = self.release.take().expect("guard already released");
        let frame = Arc::clone(&self.frame);
        let (page_id, is_dirty) = (self.page_id, self.is_dirty);
        unsafe { WritePageGuard::with_dirty(page_id, frame, release, is_dirty) }
    }

    /// Drops this guard, releasing the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for shared access to a page: pin plus reader latch, both
/// released (latch first) when the guard drops.
pub struct ReadPageGuard {
    page_id: PageId,
    /// Keeps the frame alive for as long as the latch guard below exists
    _frame: Arc<FrameHeader>,
    release: Option<ReleaseCallback>,
    is_dirty: bool,
    latch: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The latch guard is transmuted to the `'static` lifetime; this is
    /// sound because the frame it borrows from is kept alive by the `Arc`
    /// stored alongside it and the latch is dropped first.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release: ReleaseCallback,
    ) -> Self {
        Self::with_dirty(page_id, frame, release, false)
    }

    pub(crate) unsafe fn with_dirty(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release: ReleaseCallback,
        is_dirty: bool,
    ) -> Self {
        let latch = frame.data.read();
        let latch: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(latch);

        Self {
            page_id,
            _frame: frame,
            release: Some(release),
            is_dirty,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.as_ref().expect("latch held for guard lifetime")[..]
    }

    /// Drops this guard, releasing the latch and the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch released before the pin
        self.latch.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for exclusive access to a page: pin plus writer latch.
/// Mutable access marks the page dirty; the drop order (latch, then pin)
/// matches the read guard.
pub struct WritePageGuard {
    page_id: PageId,
    _frame: Arc<FrameHeader>,
    release: Option<ReleaseCallback>,
    is_dirty: bool,
    latch: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release: ReleaseCallback,
    ) -> Self {
        Self::with_dirty(page_id, frame, release, false)
    }

    pub(crate) unsafe fn with_dirty(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release: ReleaseCallback,
        is_dirty: bool,
    ) -> Self {
        let latch = frame.data.write();
        let latch: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(latch);

        Self {
            page_id,
            _frame: frame,
            release: Some(release),
            is_dirty,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.as_ref().expect("latch held for guard lifetime")[..]
    }

    /// Returns the page bytes mutably and marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.latch.as_mut().expect("latch held for guard lifetime")[..]
    }

    /// Drops this guard, releasing the latch and the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, self.is_dirty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn probe_callback() -> (Arc<AtomicBool>, Arc<AtomicBool>, ReleaseCallback) {
        let released = Arc::new(AtomicBool::new(false));
        let dirty = Arc::new(AtomicBool::new(false));
        let released_probe = Arc::clone(&released);
        let dirty_probe = Arc::clone(&dirty);
        let callback: ReleaseCallback = Box::new(move |_, is_dirty| {
            released_probe.store(true, Ordering::SeqCst);
            dirty_probe.store(is_dirty, Ordering::SeqCst);
        });
        (released, dirty, callback)
    }

    #[test]
    fn test_read_page_guard_releases_on_drop() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let (released, dirty, callback) = probe_callback();
        let guard = unsafe { ReadPageGuard::new(PageId::new(1), Arc::clone(&frame), callback) };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
        assert!(!dirty.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard_marks_dirty() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let (released, dirty, callback) = probe_callback();
        let mut guard = unsafe { WritePageGuard::new(PageId::new(1), Arc::clone(&frame), callback) };

        guard.data_mut()[0] = 42;
        drop(guard);

        assert!(released.load(Ordering::SeqCst));
        assert!(dirty.load(Ordering::SeqCst));

        let mut read_back = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_back);
        assert_eq!(read_back[0], 42);
    }

    #[test]
    fn test_basic_guard_upgrade_write_carries_dirty_intent() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(3));

        let (released, dirty, callback) = probe_callback();
        let mut basic = BasicPageGuard::new(PageId::new(3), Arc::clone(&frame), callback);
        basic.with_data_mut(|data| data[7] = 9);

        let write = basic.upgrade_write();
        assert!(!released.load(Ordering::SeqCst));
        assert_eq!(write.data()[7], 9);

        drop(write);
        assert!(released.load(Ordering::SeqCst));
        assert!(dirty.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_guard_latch_excludes_readers() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(2));

        let (_, _, callback) = probe_callback();
        let guard = unsafe { WritePageGuard::new(PageId::new(2), Arc::clone(&frame), callback) };

        assert!(frame.data.try_read().is_none());
        drop(guard);
        assert!(frame.data.try_read().is_some());
    }
}
