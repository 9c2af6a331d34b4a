use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{BurrowError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A disk I/O request handed to the background worker.
///
/// The data pointer must stay valid for PAGE_SIZE bytes until the completion
/// callback fires; the synchronous wrappers below guarantee this by blocking.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        data: *mut u8,
        done: mpsc::Sender<bool>,
    },
    Write {
        page_id: PageId,
        data: *const u8,
        done: mpsc::Sender<bool>,
    },
}

// Safety: the worker thread is the only consumer and the issuing thread
// keeps the buffer alive until the completion signal is received.
unsafe impl Send for DiskRequest {}

/// DiskScheduler owns a background worker thread that drains a bounded
/// request queue and performs the actual I/O through the DiskManager.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_tx: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread and returns the scheduler.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (tx, rx) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || Self::run_worker(dm, rx, stop));

        Self {
            disk_manager,
            request_tx: tx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Queues a request for the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|e| BurrowError::DiskScheduler(format!("failed to queue request: {e}")))
    }

    /// Schedules a read and blocks until it completes.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, wait) = mpsc::channel();
        self.schedule(DiskRequest::Read {
            page_id,
            data: data.as_mut_ptr(),
            done,
        })?;
        Self::await_completion(page_id, wait)
    }

    /// Schedules a write and blocks until it completes.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, wait) = mpsc::channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data: data.as_ptr(),
            done,
        })?;
        Self::await_completion(page_id, wait)
    }

    fn await_completion(page_id: PageId, wait: mpsc::Receiver<bool>) -> Result<()> {
        match wait.recv() {
            Ok(true) => Ok(()),
            Ok(false) => Err(BurrowError::DiskScheduler(format!(
                "I/O on {page_id} failed"
            ))),
            Err(e) => Err(BurrowError::DiskScheduler(format!(
                "worker dropped completion channel: {e}"
            ))),
        }
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        requests: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // drain whatever is still queued before exiting
                while let Ok(request) = requests.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match requests.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read {
                page_id,
                data,
                done,
            } => {
                // Safety: issuer keeps the buffer alive until `done` fires
                let buf = unsafe { std::slice::from_raw_parts_mut(data, PAGE_SIZE) };
                let _ = done.send(disk_manager.read_page(page_id, buf).is_ok());
            }
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => {
                // Safety: as above
                let buf = unsafe { std::slice::from_raw_parts(data, PAGE_SIZE) };
                let _ = done.send(disk_manager.write_page(page_id, buf).is_ok());
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
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
