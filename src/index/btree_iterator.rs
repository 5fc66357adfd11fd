use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::LeafNodeRef;

/// Ordered iteration over the leaf chain. The iterator holds no tree latch
/// between steps; every read re-pins the current leaf, bounds-checks its
/// position, and follows `next_page_id` across leaf boundaries, so a scan
/// racing concurrent updates sees a best-effort snapshot without crashing.
///
/// The end position is `page_id == INVALID_PAGE_ID`.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
}

impl BTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            bpm,
            page_id,
            index,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// Yields the current entry and advances.
    pub fn next(&mut self) -> Result<Option<(u32, RecordId)>> {
        while self.page_id != INVALID_PAGE_ID {
            let (entry, next_page) = {
                let guard = self.bpm.read_page(self.page_id)?;
                let leaf = LeafNodeRef::new(guard.data());
                let entry = (self.index < leaf.size() as usize)
                    .then(|| (leaf.key_at(self.index), leaf.value_at(self.index)));
                (entry, leaf.next_page_id())
            };

            match entry {
                Some(entry) => {
                    self.index += 1;
                    return Ok(Some(entry));
                }
                None => {
                    self.page_id = next_page;
                    self.index = 0;
                }
            }
        }
        Ok(None)
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(u32, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match BTreeIterator::next(self) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
