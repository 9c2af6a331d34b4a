use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{BurrowError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping that must change atomically: the page table, the free list,
/// and the replacer all live behind the single pool-wide mutex.
struct PoolInner {
    /// Maps resident page ids to their frames
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page
    free_list: VecDeque<FrameId>,
    /// Eviction policy over unpinned frames
    replacer: LruKReplacer,
}

/// State shared between the pool and the page guards it hands out.
pub(crate) struct PoolShared {
    frames: Vec<Arc<FrameHeader>>,
    inner: Mutex<PoolInner>,
    disk_scheduler: DiskScheduler,
}

impl PoolShared {
    /// Decrements a page's pin count, ORs in the dirty flag, and marks the
    /// frame evictable when the count reaches zero.
    ///
    /// Returns false if the page is not resident or was not pinned; both
    /// are bugs in the caller.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
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
                    inner.replacer.set_evictable(frame_id, true);
                }
                true
            }
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed set of frames and decides
/// when to evict, write back, and recycle them under an LRU-K policy.
///
/// Pages are handed out as RAII guards that hold the pin and the page latch
/// together; all structural bookkeeping is serialized by one pool mutex.
pub struct BufferPoolManager {
    pool_size: usize,
    shared: Arc<PoolShared>,
}

impl BufferPoolManager {
    /// Creates a buffer pool with `pool_size` frames and an LRU-`k` replacer
    /// over the given disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            shared: Arc::new(PoolShared {
                frames,
                inner: Mutex::new(PoolInner {
                    page_table: HashMap::new(),
                    free_list,
                    replacer: LruKReplacer::new(k, pool_size),
                }),
                disk_scheduler: DiskScheduler::new(disk_manager),
            }),
        }
    }

    /// Allocates a fresh page id and returns it as a pinned, zeroed,
    /// write-latched page. Fails with `BufferPoolFull` when every frame is
    /// pinned.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let page_id = self.shared.disk_scheduler.disk_manager().allocate_page()?;

        let frame = {
            let mut inner = self.shared.inner.lock();
            let frame_id = match self.acquire_frame(&mut inner) {
                Ok(frame_id) => frame_id,
                Err(e) => {
                    self.shared
                        .disk_scheduler
                        .disk_manager()
                        .deallocate_page(page_id);
                    return Err(e);
                }
            };
            let frame = &self.shared.frames[frame_id.as_usize()];
            frame.set_page_id(page_id);
            frame.pin();
            inner.page_table.insert(page_id, frame_id);
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            Arc::clone(frame)
        };

        debug!(page_id = page_id.as_u32(), "allocated new page");
        Ok(WritePageGuard::new(
            page_id,
            frame.data.write_arc(),
            Arc::clone(&self.shared),
        ))
    }

    /// Fetches a page for shared access, reading it from disk on a miss.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(ReadPageGuard::new(
            page_id,
            frame.data.read_arc(),
            Arc::clone(&self.shared),
        ))
    }

    /// Fetches a page for exclusive access, reading it from disk on a miss.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(WritePageGuard::new(
            page_id,
            frame.data.write_arc(),
            Arc::clone(&self.shared),
        ))
    }

    /// Explicit unpin for callers not going through a guard.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.shared.unpin_page(page_id, is_dirty)
    }

    /// Writes a page to disk and clears its dirty bit, regardless of pin
    /// count. Returns false if the page is not resident.
    ///
    /// The frame is pinned across the I/O so the pool mutex is not held
    /// while the snapshot waits out a concurrent writer. The dirty bit is
    /// cleared before the snapshot: a write landing after the copy simply
    /// re-dirties the frame.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }
        let frame = {
            let mut inner = self.shared.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = &self.shared.frames[frame_id.as_usize()];
            frame.pin();
            inner.replacer.set_evictable(frame_id, false);
            Arc::clone(frame)
        };

        frame.set_dirty(false);
        let mut data = [0u8; PAGE_SIZE];
        frame.snapshot(&mut data);
        let result = self.shared.disk_scheduler.schedule_write_sync(page_id, &data);
        self.shared.unpin_page(page_id, false);
        result.map(|()| true)
    }

    /// Writes every dirty resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let dirty_pages: Vec<PageId> = {
            let _inner = self.shared.inner.lock();
            self.shared
                .frames
                .iter()
                .filter(|frame| frame.page_id() != INVALID_PAGE_ID && frame.is_dirty())
                .map(|frame| frame.page_id())
                .collect()
        };
        for page_id in dirty_pages {
            // a page evicted in the meantime was already written back
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops a page from the pool and releases its id to the allocator.
    /// Fails with `PageStillPinned` while the page has holders; deleting a
    /// non-resident page is a no-op success.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.shared.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.shared.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Err(BurrowError::PageStillPinned(page_id));
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);
        self.shared
            .disk_scheduler
            .disk_manager()
            .deallocate_page(page_id);
        debug!(page_id = page_id.as_u32(), "deleted page");
        Ok(true)
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.shared.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.shared.frames[frame_id.as_usize()].pin_count())
    }

    /// Number of frames with a non-zero pin count (leak checks in tests).
    pub fn pinned_frame_count(&self) -> usize {
        self.shared
            .frames
            .iter()
            .filter(|f| f.pin_count() > 0)
            .count()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.shared.inner.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.shared.disk_scheduler.disk_manager()
    }

    /// Pins the frame holding `page_id`, bringing the page in from disk if
    /// it is not resident.
    fn fetch_frame(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }

        let mut inner = self.shared.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.shared.frames[frame_id.as_usize()];
            frame.pin();
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.shared.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.shared.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            // hand the frame back so the miss leaves no state behind
            inner.free_list.push_back(frame_id);
            return Err(e);
        }
        frame.load(&data);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);
        Ok(Arc::clone(frame))
    }

    /// Takes a frame from the free list, or evicts one (writing it back if
    /// dirty). The returned frame is reset and owned by the caller.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = inner.replacer.evict() else {
            return Err(BurrowError::BufferPoolFull);
        };
        let frame = &self.shared.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!(
                page_id = old_page_id.as_u32(),
                frame_id = frame_id.as_u32(),
                "eviction writeback"
            );
            let mut data = [0u8; PAGE_SIZE];
            frame.snapshot(&mut data);
            self.shared
                .disk_scheduler
                .schedule_write_sync(old_page_id, &data)?;
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}
