use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, StorageError, PAGE_SIZE};

use super::DiskManager;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request handed to the background worker. Buffers are owned so
/// the requester can go away without invalidating the request.
enum DiskRequest {
    Read {
        page_id: PageId,
        completion: std::sync::mpsc::Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        completion: std::sync::mpsc::Sender<Result<()>>,
    },
}

/// DiskScheduler funnels page I/O through a single background worker thread
/// fed by a bounded request queue.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver, stop));

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Reads a page through the worker, blocking until the bytes arrive.
    pub fn read_page_sync(&self, page_id: PageId) -> Result<PageBuf> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(DiskRequest::Read {
            page_id,
            completion: tx,
        })?;
        rx.recv()
            .map_err(|e| StorageError::DiskScheduler(format!("completion lost: {e}")))?
    }

    /// Writes a page through the worker, blocking until the write completes.
    pub fn write_page_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(DiskRequest::Write {
            page_id,
            data: buf,
            completion: tx,
        })?;
        rx.recv()
            .map_err(|e| StorageError::DiskScheduler(format!("completion lost: {e}")))?
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| StorageError::DiskScheduler(format!("failed to enqueue request: {e}")))
    }

    /// Worker loop: processes requests until shutdown is signaled, then
    /// drains whatever is still queued.
    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process_request(&disk_manager, request),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    // Loop around and re-check the shutdown flag
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read {
                page_id,
                completion,
            } => {
                let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                let result = disk_manager
                    .read_page(page_id, &mut buf[..])
                    .map(move |()| buf);
                if let Err(ref e) = result {
                    tracing::error!(page = %page_id, error = %e, "disk read failed");
                }
                let _ = completion.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                completion,
            } => {
                let result = disk_manager.write_page(page_id, &data[..]);
                if let Err(ref e) = result {
                    tracing::error!(page = %page_id, error = %e, "disk write failed");
                }
                let _ = completion.send(result);
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
