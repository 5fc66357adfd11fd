use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, StrataError, PAGE_SIZE};

/// DiskManager is responsible for reading and writing fixed-size pages
/// to/from a single database file. Page ids are allocated monotonically,
/// with deallocated ids recycled through a free list. Page 0 is reserved
/// for the index header page and is written out zeroed when the file is
/// first created.
pub struct DiskManager {
    file: Mutex<File>,
    db_path: PathBuf,
    /// Number of pages the file has ever held (high-water mark)
    num_pages: AtomicU32,
    /// Page ids returned by `deallocate_page`, reused before growing the file
    free_pages: Mutex<Vec<PageId>>,
    num_reads: AtomicU32,
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it if necessary.
    /// An existing file must be a whole number of pages long.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(StrataError::InvalidDatabaseFile);
        }

        let dm = Self {
            file: Mutex::new(file),
            db_path,
            num_pages: AtomicU32::new((file_size / PAGE_SIZE as u64) as u32),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        // Fresh file: reserve page 0 for the header page
        if dm.num_pages.load(Ordering::SeqCst) == 0 {
            dm.num_pages.store(1, Ordering::SeqCst);
            dm.write_page(PageId::new(0), &[0u8; PAGE_SIZE])?;
        }

        Ok(dm)
    }

    /// Reads a page from disk into the provided buffer. Reads past the end
    /// of the file zero-fill the remainder, so a freshly allocated page
    /// that was never written reads back as zeroes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let byte_offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let byte_offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page id, preferring ids recycled by `deallocate_page`.
    /// The page is zeroed on disk so a fetch before the first write sees
    /// no stale content from a previous life of the id.
    pub fn allocate_page(&self) -> Result<PageId> {
        let recycled = self.free_pages.lock().pop();
        let page_id =
            recycled.unwrap_or_else(|| PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst)));
        self.write_page(page_id, &[0u8; PAGE_SIZE])?;
        Ok(page_id)
    }

    /// Returns a page id to the allocator for reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        let mut free_pages = self.free_pages.lock();
        if !free_pages.contains(&page_id) {
            free_pages.push(page_id);
        }
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_manager_new() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let dm = DiskManager::new(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(dm.num_pages(), 1); // header page
    }

    #[test]
    fn test_disk_manager_allocate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("alloc.db")).unwrap();

        assert_eq!(dm.allocate_page().unwrap(), PageId::new(1));
        assert_eq!(dm.allocate_page().unwrap(), PageId::new(2));
    }

    #[test]
    fn test_disk_manager_recycles_deallocated_ids() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("recycle.db")).unwrap();

        let a = dm.allocate_page().unwrap();
        let b = dm.allocate_page().unwrap();
        dm.deallocate_page(a);

        assert_eq!(dm.allocate_page().unwrap(), a);
        assert_ne!(dm.allocate_page().unwrap(), b);
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("rw.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
    }

    #[test]
    fn test_disk_manager_read_unwritten_page_is_zeroed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("zero.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();
        let mut data = [0xFFu8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        let page_id = {
            let dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
            page_id
        };

        let dm = DiskManager::new(&db_path).unwrap();
        assert_eq!(dm.num_pages(), 2);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[0], 123);
    }
}
