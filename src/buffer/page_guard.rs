use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock};

use crate::common::PageId;

use super::buffer_pool_manager::PoolShared;
use super::frame_header::PageData;

/// RAII guard for shared access to a pinned page.
///
/// The guard owns both the pin and the page latch; dropping it releases the
/// latch first and then unpins the page, on every exit path.
pub struct ReadPageGuard {
    page_id: PageId,
    /// Held for the guard's lifetime; taken in drop so the latch is
    /// released before the pin
    data: Option<ArcRwLockReadGuard<RawRwLock, PageData>>,
    pool: Arc<PoolShared>,
}

impl ReadPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        data: ArcRwLockReadGuard<RawRwLock, PageData>,
        pool: Arc<PoolShared>,
    ) -> Self {
        Self {
            page_id,
            data: Some(data),
            pool,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
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
        self.data.take();
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for exclusive access to a pinned page.
///
/// The first mutable access marks the page dirty; the dirty bit is handed to
/// the buffer pool when the guard drops.
pub struct WritePageGuard {
    page_id: PageId,
    data: Option<ArcRwLockWriteGuard<RawRwLock, PageData>>,
    pool: Arc<PoolShared>,
    is_dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(
        page_id: PageId,
        data: ArcRwLockWriteGuard<RawRwLock, PageData>,
        pool: Arc<PoolShared>,
    ) -> Self {
        Self {
            page_id,
            data: Some(data),
            pool,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data.as_mut().unwrap()[..]
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
        self.data.take();
        self.pool.unpin_page(self.page_id, self.is_dirty);
    }
}
