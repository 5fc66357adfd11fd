use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{
    FrameId, PageId, Result, StrataError, DEFAULT_BUCKET_SIZE, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler, PageBuf};

use super::{Frame, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Shared pool state, reachable from page guards for release on drop.
pub(crate) struct PoolState {
    pub(crate) frames: Vec<Arc<Frame>>,
    /// Pool latch. Guards the free list directly and orders every compound
    /// transition across the page directory, the replacer, and frame
    /// metadata. Disk I/O happens after this lock is dropped.
    latch: Mutex<VecDeque<FrameId>>,
    /// Page directory: page_id -> frame_id for resident pages
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
}

impl PoolState {
    /// Unpins a frame on guard drop, folding in the guard's dirtiness and
    /// handing the frame back to the replacer at pin count zero.
    pub(crate) fn release(&self, frame: &Frame, dirty: bool) {
        let _latch = self.latch.lock();
        if dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            self.replacer.set_evictable(frame.id(), true);
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed array of frames. Page
/// residency is tracked by an extendible-hash directory, eviction follows
/// the LRU-K policy, and all I/O funnels through the disk scheduler.
///
/// Pages are accessed through RAII guards: taking a guard pins the page
/// and locks its buffer, dropping it unpins and (for write guards)
/// records dirtiness. Out of frames is an ordinary error
/// (`BufferPoolFull`) that callers are expected to handle.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            state: Arc::new(PoolState {
                frames,
                latch: Mutex::new(free_list),
                page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
                replacer: LruKReplacer::new(k, pool_size),
            }),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh page and installs it in a frame with a zeroed
    /// buffer. The page comes back pinned (`pin_count = 1`) and
    /// non-evictable; callers release the allocation pin with
    /// [`unpin_page`](Self::unpin_page) once the page is initialized.
    pub fn new_page(&self) -> Result<PageId> {
        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        let mut free = self.state.latch.lock();
        let frame_id = match self.acquire_frame_locked(&mut free) {
            Ok(frame_id) => frame_id,
            Err(e) => {
                drop(free);
                self.disk_scheduler.disk_manager().deallocate_page(page_id);
                return Err(e);
            }
        };

        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let mut buf = frame.data.write();
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);
        drop(free);

        buf.fill(0);
        Ok(page_id)
    }

    /// Releases one pin on a resident page, folding in dirtiness and
    /// handing the frame to the replacer at pin count zero. Returns false
    /// if the page is not resident or was already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.state.latch.lock();
        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        let Some(remaining) = frame.unpin() else {
            return false;
        };
        if is_dirty {
            frame.set_dirty(true);
        }
        if remaining == 0 {
            self.state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Pins a page for shared access, reading it from disk on a miss.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(ReadPageGuard::new(page_id, frame, Arc::clone(&self.state)))
    }

    /// Pins a page for exclusive access, reading it from disk on a miss.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(WritePageGuard::new(page_id, frame, Arc::clone(&self.state)))
    }

    /// Writes a resident page back to disk and clears its dirty flag.
    /// Returns false if the page is not resident. Pin state is unchanged.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let frame = {
            let _latch = self.state.latch.lock();
            let Some(frame_id) = self.state.page_table.find(&page_id) else {
                return Ok(false);
            };
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            if frame.pin() == 1 {
                self.state.replacer.set_evictable(frame_id, false);
            }
            frame
        };

        let written = {
            let buf = frame.data.read();
            let mut out: PageBuf = Box::new([0u8; PAGE_SIZE]);
            out.copy_from_slice(&buf[..]);
            self.disk_scheduler.write_sync(page_id, out)
        };
        if written.is_ok() {
            frame.set_dirty(false);
        }
        self.state.release(&frame, false);

        written.map(|_| true)
    }

    /// Flushes every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = {
            let _latch = self.state.latch.lock();
            self.state
                .frames
                .iter()
                .filter(|f| f.page_id() != INVALID_PAGE_ID && f.is_dirty())
                .map(|f| f.page_id())
                .collect()
        };
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops a page from the pool and returns its id to the allocator.
    /// Returns true if the page is gone afterwards; false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut free = self.state.latch.lock();
        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            self.disk_scheduler.disk_manager().deallocate_page(page_id);
            return Ok(true);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        self.state.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id);
        frame.reset();
        free.push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id);
        Ok(true)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().len()
    }

    /// Number of frames the replacer could currently evict.
    pub fn evictable_count(&self) -> usize {
        self.state.replacer.size()
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _latch = self.state.latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins `page_id` into a frame, loading it from disk on a miss. On the
    /// miss path the pool latch is dropped before any I/O; the frame's
    /// buffer lock is held across the load, so concurrent fetchers of the
    /// same page block on it rather than double-loading.
    fn pin_page(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let mut free = self.state.latch.lock();
        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            if frame.pin() == 1 {
                self.state.replacer.set_evictable(frame_id, false);
            }
            self.state.replacer.record_access(frame_id);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame_locked(&mut free)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let mut buf = frame.data.write();
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);
        drop(free);

        let loaded: Result<()> = self
            .disk_scheduler
            .read_sync(page_id)
            .map(|data| buf.copy_from_slice(&data[..]));
        drop(buf);

        if let Err(e) = loaded {
            if frame.unpin() == Some(0) {
                self.discard_unpinned(page_id, frame_id);
            }
            return Err(e);
        }
        Ok(frame)
    }

    /// Takes a frame from the free list, or evicts a victim, writing the
    /// victim back first if dirty. The writeback happens before the
    /// victim's directory entry disappears (under the pool latch), so a
    /// concurrent re-fetch of the victim can never read pre-writeback
    /// bytes from disk.
    fn acquire_frame_locked(&self, free: &mut VecDeque<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free.pop_front() {
            return Ok(frame_id);
        }
        let Some(frame_id) = self.state.replacer.evict() else {
            return Err(StrataError::BufferPoolFull);
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.is_dirty() {
            let mut out: PageBuf = Box::new([0u8; PAGE_SIZE]);
            out.copy_from_slice(&frame.data.read()[..]);
            if let Err(e) = self.disk_scheduler.write_sync(frame.page_id(), out) {
                // Put the victim back so the pool stays consistent
                self.state.replacer.record_access(frame_id);
                self.state.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
            frame.set_dirty(false);
        }
        self.state.page_table.remove(&frame.page_id());
        Ok(frame_id)
    }

    /// Backs out a frame installation after an I/O failure.
    fn discard_unpinned(&self, page_id: PageId, frame_id: FrameId) {
        let mut free = self.state.latch.lock();
        if self.state.page_table.find(&page_id) == Some(frame_id) {
            self.state.page_table.remove(&page_id);
            self.state.replacer.set_evictable(frame_id, true);
            self.state.replacer.remove(frame_id);
            self.state.frames[frame_id.as_usize()].reset();
            free.push_back(frame_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(1)); // page 0 is the header page
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        // A second unpin is reported, not honored
        assert!(!bpm.unpin_page(page_id, false));
    }

    #[test]
    fn test_buffer_pool_manager_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);
        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        {
            let guard = bpm.read_page(page_id).unwrap();
            assert_eq!(guard.data()[0], 42);
            assert_eq!(guard.data()[100], 255);
        }
    }

    #[test]
    fn test_buffer_pool_manager_flush_clears_dirty() {
        let (bpm, temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);
        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
        }
        assert!(bpm.flush_page(page_id).unwrap());

        drop(bpm);
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);
        let guard = bpm2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_flush_missing_page() {
        let (bpm, _temp) = create_bpm(10);
        assert!(!bpm.flush_page(PageId::new(99)).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_eviction_round_trip() {
        let (bpm, _temp) = create_bpm(3);

        let page_ids: Vec<_> = (0..3)
            .map(|_| {
                let pid = bpm.new_page().unwrap();
                bpm.unpin_page(pid, false);
                pid
            })
            .collect();
        for (i, &pid) in page_ids.iter().enumerate() {
            let mut guard = bpm.write_page(pid).unwrap();
            guard.data_mut()[0] = i as u8;
        }

        // Pool is full of unpinned pages; a fourth allocation evicts one
        assert_eq!(bpm.free_frame_count(), 0);
        let extra = bpm.new_page().unwrap();
        bpm.unpin_page(extra, false);

        // The evicted page's bytes come back from disk
        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm.read_page(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8);
        }
    }

    #[test]
    fn test_buffer_pool_manager_full_of_pinned_pages() {
        let (bpm, _temp) = create_bpm(2);

        // Freshly allocated pages hold their allocation pin
        let page_id1 = bpm.new_page().unwrap();
        let _page_id2 = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));
        assert!(matches!(
            bpm.read_page(PageId::new(50)),
            Err(StrataError::BufferPoolFull)
        ));

        bpm.unpin_page(page_id1, false);
        assert!(bpm.new_page().is_ok());
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        // The allocation pin blocks deletion
        assert!(!bpm.delete_page(page_id).unwrap());
        bpm.unpin_page(page_id, false);
        {
            let _guard = bpm.read_page(page_id).unwrap();
            assert!(!bpm.delete_page(page_id).unwrap());
        }
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);

        // Deleting a non-resident page reports success
        assert!(bpm.delete_page(PageId::new(77)).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_frame_accounting() {
        let (bpm, _temp) = create_bpm(4);

        let a = bpm.new_page().unwrap();
        let b = bpm.new_page().unwrap();
        bpm.unpin_page(b, false);
        let _guard = bpm.read_page(a).unwrap();

        // 1 pinned + 2 free + 1 evictable (page b) == pool_size
        assert_eq!(bpm.get_pin_count(a), Some(2));
        assert_eq!(bpm.free_frame_count(), 2);
        assert_eq!(bpm.evictable_count(), 1);
        assert_eq!(bpm.get_pin_count(b), Some(0));
    }
}
