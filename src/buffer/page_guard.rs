use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolState;
use super::Frame;

type DataReadGuard = RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>;
type DataWriteGuard = RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>;

/// RAII guard for shared access to a pinned page. Dropping it unpins the
/// page and hands the frame back to the replacer at pin count zero.
pub struct ReadPageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
    pool: Arc<PoolState>,
    data: Option<DataReadGuard>,
}

impl ReadPageGuard {
    pub(crate) fn new(page_id: PageId, frame: Arc<Frame>, pool: Arc<PoolState>) -> Self {
        let data = frame.data.read();
        // SAFETY: the lock guard borrows from `frame`, which this struct
        // keeps alive through its Arc for at least as long as the guard;
        // Drop releases the lock before anything else.
        let data: DataReadGuard = unsafe { std::mem::transmute(data) };
        Self {
            page_id,
            frame,
            pool,
            data: Some(data),
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
        self.pool.release(&self.frame, false);
    }
}

/// RAII guard for exclusive access to a pinned page. Touching the buffer
/// through `data_mut` marks the page dirty when the guard is dropped.
pub struct WritePageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
    pool: Arc<PoolState>,
    data: Option<DataWriteGuard>,
    dirtied: bool,
}

impl WritePageGuard {
    pub(crate) fn new(page_id: PageId, frame: Arc<Frame>, pool: Arc<PoolState>) -> Self {
        let data = frame.data.write();
        // SAFETY: as for ReadPageGuard - the frame outlives the lock guard
        // via the Arc held alongside it, and Drop releases the lock first.
        let data: DataWriteGuard = unsafe { std::mem::transmute(data) };
        Self {
            page_id,
            frame,
            pool,
            data: Some(data),
            dirtied: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirtied = true;
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
        self.pool.release(&self.frame, self.dirtied);
    }
}
