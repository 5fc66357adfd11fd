use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result, StrataError, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_iterator::BTreeIterator;
use super::btree_page::{
    node_kind, node_max_size, node_min_size, node_size, InternalNode, InternalNodeRef, LeafNode,
    LeafNodeRef, NodeKind,
};

enum RootChange {
    Keep,
    Clear,
    Promote(PageId),
}

/// A B+ tree index over `u32` keys and `RecordId` values, stored in pages
/// managed by the buffer pool. Keys are unique. The root page id is cached
/// in memory behind a dedicated latch and mirrored into the header page
/// whenever it changes, so the tree is discoverable across restarts.
///
/// Writers serialize on a tree-wide latch; readers share it. Descent is
/// iterative, recording the ancestor path so splits and merges never rely
/// on re-deriving ancestry from disk, while each page's `parent_page_id`
/// is still kept accurate for its on-disk layout.
pub struct BTreeIndex {
    name: String,
    bpm: Arc<BufferPoolManager>,
    /// Root-pointer latch, held only to observe or install the root id
    root_page_id: RwLock<PageId>,
    /// Tree-wide latch: shared for reads, exclusive for structure changes
    latch: RwLock<()>,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl BTreeIndex {
    /// Registers a new, empty index in the header page.
    pub fn create(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2 && internal_max_size >= 3, "fan-out too small");
        {
            let mut guard = bpm.write_page(HEADER_PAGE_ID)?;
            HeaderPage::new(guard.data_mut()).insert_record(name, INVALID_PAGE_ID)?;
        }
        Ok(Self {
            name: name.to_string(),
            bpm,
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            latch: RwLock::new(()),
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Opens an index previously registered in the header page.
    pub fn open(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let root = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_root_id(name)
                .ok_or_else(|| StrataError::IndexNotFound(name.to_string()))?
        };
        Ok(Self {
            name: name.to_string(),
            bpm,
            root_page_id: RwLock::new(root),
            latch: RwLock::new(()),
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    /// Point lookup.
    pub fn get(&self, key: u32) -> Result<Option<RecordId>> {
        let _tree = self.latch.read();
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut page_id = root;
        loop {
            let guard = self.bpm.read_page(page_id)?;
            match node_kind(guard.data()) {
                NodeKind::Internal => {
                    let node = InternalNodeRef::new(guard.data());
                    page_id = node.child_at(node.lower_bound(key));
                }
                NodeKind::Leaf => {
                    let node = LeafNodeRef::new(guard.data());
                    return Ok(node.find_key(key).map(|index| node.value_at(index)));
                }
            }
        }
    }

    /// Point scan in the executor-facing shape: every rid stored under the
    /// key (at most one, since keys are unique).
    pub fn scan_key(&self, key: u32) -> Result<Vec<RecordId>> {
        Ok(self.get(key)?.into_iter().collect())
    }

    /// Inserts a key/rid pair. Returns false on a duplicate key, leaving
    /// the tree untouched.
    pub fn insert(&self, key: u32, value: RecordId) -> Result<bool> {
        let _tree = self.latch.write();

        let mut root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            root = self.bpm.new_page()?;
            {
                let mut guard = self.bpm.write_page(root)?;
                LeafNode::init(guard.data_mut(), root, INVALID_PAGE_ID, self.leaf_max_size);
            }
            self.bpm.unpin_page(root, false);
            *self.root_page_id.write() = root;
            self.publish_root(root)?;
        }

        let (leaf_id, mut path) = self.find_leaf(root, key)?;
        let inserted = {
            let mut guard = self.bpm.write_page(leaf_id)?;
            LeafNode::new(guard.data_mut()).insert(key, value)
        };
        if !inserted {
            return Ok(false);
        }

        // Split overflowed nodes back up the recorded path. A leaf
        // overflows at max_size, an internal node one entry past it.
        let mut current = leaf_id;
        loop {
            let overflowed = {
                let guard = self.bpm.read_page(current)?;
                let data = guard.data();
                match node_kind(data) {
                    NodeKind::Leaf => node_size(data) >= node_max_size(data),
                    NodeKind::Internal => node_size(data) > node_max_size(data),
                }
            };
            if !overflowed {
                break;
            }
            let parent = match path.pop() {
                Some(parent) => parent,
                None => self.start_new_root(current)?,
            };
            self.split_node(current, parent)?;
            current = parent;
        }
        Ok(true)
    }

    /// Removes a key. Absent keys are a silent no-op.
    pub fn remove(&self, key: u32) -> Result<()> {
        let _tree = self.latch.write();

        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(());
        }

        let (leaf_id, mut path) = self.find_leaf(root, key)?;
        let removed = {
            let mut guard = self.bpm.write_page(leaf_id)?;
            LeafNode::new(guard.data_mut()).remove(key)
        };
        if !removed {
            return Ok(());
        }

        let mut current = leaf_id;
        loop {
            if path.is_empty() {
                self.collapse_root(current)?;
                break;
            }
            let underflowed = {
                let guard = self.bpm.read_page(current)?;
                node_size(guard.data()) < node_min_size(guard.data())
            };
            if !underflowed {
                break;
            }
            let parent = path.pop().expect("checked non-empty");
            self.rebalance(current, parent)?;
            current = parent;
        }
        Ok(())
    }

    /// Iterator positioned at the first key in the tree.
    pub fn iter(&self) -> Result<BTreeIterator> {
        let _tree = self.latch.read();
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut page_id = root;
        loop {
            let guard = self.bpm.read_page(page_id)?;
            match node_kind(guard.data()) {
                NodeKind::Leaf => return Ok(BTreeIterator::new(Arc::clone(&self.bpm), page_id, 0)),
                NodeKind::Internal => page_id = InternalNodeRef::new(guard.data()).child_at(0),
            }
        }
    }

    /// Iterator positioned at an exact key match, or the end iterator if
    /// the key is absent.
    pub fn iter_from(&self, key: u32) -> Result<BTreeIterator> {
        let _tree = self.latch.read();
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut page_id = root;
        loop {
            let guard = self.bpm.read_page(page_id)?;
            match node_kind(guard.data()) {
                NodeKind::Internal => {
                    let node = InternalNodeRef::new(guard.data());
                    page_id = node.child_at(node.lower_bound(key));
                }
                NodeKind::Leaf => {
                    let node = LeafNodeRef::new(guard.data());
                    return Ok(match node.find_key(key) {
                        Some(index) => BTreeIterator::new(Arc::clone(&self.bpm), page_id, index),
                        None => BTreeIterator::end(Arc::clone(&self.bpm)),
                    });
                }
            }
        }
    }

    /// Descends to the leaf responsible for `key`, pinning and unpinning
    /// one node at a time, and returns the leaf with its ancestor path
    /// (root first).
    fn find_leaf(&self, root: PageId, key: u32) -> Result<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut page_id = root;
        loop {
            let guard = self.bpm.read_page(page_id)?;
            match node_kind(guard.data()) {
                NodeKind::Leaf => return Ok((page_id, path)),
                NodeKind::Internal => {
                    let node = InternalNodeRef::new(guard.data());
                    path.push(page_id);
                    page_id = node.child_at(node.lower_bound(key));
                }
            }
        }
    }

    /// Mirrors a root change into the header page.
    fn publish_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let updated = HeaderPage::new(guard.data_mut()).update_record(&self.name, root);
        assert!(updated, "index {:?} missing from header page", self.name);
        Ok(())
    }

    /// Installs a fresh internal root above `child` and publishes it.
    fn start_new_root(&self, child: PageId) -> Result<PageId> {
        let new_root = self.bpm.new_page()?;
        {
            let mut guard = self.bpm.write_page(new_root)?;
            let mut node = InternalNode::init(
                guard.data_mut(),
                new_root,
                INVALID_PAGE_ID,
                self.internal_max_size,
            );
            node.set_child_at(0, child);
        }
        self.bpm.unpin_page(new_root, false);
        self.set_parent_of(child, new_root)?;
        *self.root_page_id.write() = new_root;
        self.publish_root(new_root)?;
        Ok(new_root)
    }

    /// Splits an overflowed node, moving its upper half into a fresh right
    /// sibling and promoting the separator into `parent_id` (which must be
    /// the node's parent and have room for one more entry).
    fn split_node(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let sibling_id = self.bpm.new_page()?;
        let kind = {
            let guard = self.bpm.read_page(page_id)?;
            node_kind(guard.data())
        };

        let separator = match kind {
            NodeKind::Leaf => {
                let (moved, old_next) = {
                    let mut guard = self.bpm.write_page(page_id)?;
                    let split_at = node_min_size(guard.data()) as usize;
                    let mut leaf = LeafNode::new(guard.data_mut());
                    let moved = leaf.split_off(split_at);
                    let old_next = leaf.next_page_id();
                    leaf.set_next_page_id(sibling_id);
                    (moved, old_next)
                };
                {
                    let mut guard = self.bpm.write_page(sibling_id)?;
                    let mut sibling = LeafNode::init(
                        guard.data_mut(),
                        sibling_id,
                        parent_id,
                        self.leaf_max_size,
                    );
                    sibling.extend(&moved);
                    sibling.set_next_page_id(old_next);
                }
                moved[0].0
            }
            NodeKind::Internal => {
                let moved = {
                    let mut guard = self.bpm.write_page(page_id)?;
                    let mut node = InternalNode::new(guard.data_mut());
                    let split_at = (node.size() / 2) as usize;
                    node.split_off(split_at)
                };
                {
                    let mut guard = self.bpm.write_page(sibling_id)?;
                    let mut sibling = InternalNode::init(
                        guard.data_mut(),
                        sibling_id,
                        parent_id,
                        self.internal_max_size,
                    );
                    // The first moved entry takes over the reserved slot 0;
                    // its key is the separator and is never consulted here.
                    sibling.set_key_at(0, moved[0].0);
                    sibling.set_child_at(0, moved[0].1);
                    sibling.extend(&moved[1..]);
                }
                for &(_, child) in &moved {
                    self.set_parent_of(child, sibling_id)?;
                }
                moved[0].0
            }
        };
        self.bpm.unpin_page(sibling_id, false);

        let mut guard = self.bpm.write_page(parent_id)?;
        InternalNode::new(guard.data_mut()).insert(separator, sibling_id);
        Ok(())
    }

    /// Fixes an underflowed non-root node: borrow from the left sibling,
    /// else from the right, else merge into a neighbor.
    fn rebalance(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let (index, left_id, right_id) = {
            let guard = self.bpm.read_page(parent_id)?;
            let parent = InternalNodeRef::new(guard.data());
            let index = parent
                .index_of_child(page_id)
                .expect("node missing from its parent");
            let left = (index > 0).then(|| parent.child_at(index - 1));
            let right = (index + 1 < parent.size() as usize).then(|| parent.child_at(index + 1));
            (index, left, right)
        };

        if let Some(left_id) = left_id {
            let has_spare = {
                let guard = self.bpm.read_page(left_id)?;
                node_size(guard.data()) > node_min_size(guard.data())
            };
            if has_spare {
                return self.borrow_from_left(page_id, left_id, parent_id, index);
            }
        }
        if let Some(right_id) = right_id {
            let has_spare = {
                let guard = self.bpm.read_page(right_id)?;
                node_size(guard.data()) > node_min_size(guard.data())
            };
            if has_spare {
                return self.borrow_from_right(page_id, right_id, parent_id, index);
            }
        }

        if let Some(left_id) = left_id {
            self.merge(left_id, page_id, parent_id, index)
        } else if let Some(right_id) = right_id {
            self.merge(page_id, right_id, parent_id, index + 1)
        } else {
            // Sole child; resolved when the parent itself collapses
            Ok(())
        }
    }

    /// Moves the left sibling's last entry to the front of `page_id` and
    /// refreshes the separator in the parent.
    fn borrow_from_left(
        &self,
        page_id: PageId,
        left_id: PageId,
        parent_id: PageId,
        index: usize,
    ) -> Result<()> {
        let kind = {
            let guard = self.bpm.read_page(page_id)?;
            node_kind(guard.data())
        };
        match kind {
            NodeKind::Leaf => {
                let (key, value) = {
                    let mut guard = self.bpm.write_page(left_id)?;
                    let mut left = LeafNode::new(guard.data_mut());
                    let last = left.size() as usize - 1;
                    let entry = (left.key_at(last), left.value_at(last));
                    left.split_off(last);
                    entry
                };
                {
                    let mut guard = self.bpm.write_page(page_id)?;
                    LeafNode::new(guard.data_mut()).insert(key, value);
                }
                let mut guard = self.bpm.write_page(parent_id)?;
                InternalNode::new(guard.data_mut()).set_key_at(index, key);
            }
            NodeKind::Internal => {
                let (moved_key, moved_child) = {
                    let mut guard = self.bpm.write_page(left_id)?;
                    let mut left = InternalNode::new(guard.data_mut());
                    let last = left.size() as usize - 1;
                    let entry = (left.key_at(last), left.child_at(last));
                    left.remove_at(last);
                    entry
                };
                let old_separator = {
                    let mut guard = self.bpm.write_page(parent_id)?;
                    let mut parent = InternalNode::new(guard.data_mut());
                    let old = parent.key_at(index);
                    parent.set_key_at(index, moved_key);
                    old
                };
                {
                    let mut guard = self.bpm.write_page(page_id)?;
                    InternalNode::new(guard.data_mut()).push_front(moved_child, old_separator);
                }
                self.set_parent_of(moved_child, page_id)?;
            }
        }
        Ok(())
    }

    /// Moves the right sibling's first entry to the back of `page_id` and
    /// refreshes the separator in the parent.
    fn borrow_from_right(
        &self,
        page_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        index: usize,
    ) -> Result<()> {
        let kind = {
            let guard = self.bpm.read_page(page_id)?;
            node_kind(guard.data())
        };
        match kind {
            NodeKind::Leaf => {
                let (key, value, new_first) = {
                    let mut guard = self.bpm.write_page(right_id)?;
                    let mut right = LeafNode::new(guard.data_mut());
                    let (key, value) = (right.key_at(0), right.value_at(0));
                    right.remove(key);
                    (key, value, right.key_at(0))
                };
                {
                    let mut guard = self.bpm.write_page(page_id)?;
                    LeafNode::new(guard.data_mut()).insert(key, value);
                }
                let mut guard = self.bpm.write_page(parent_id)?;
                InternalNode::new(guard.data_mut()).set_key_at(index + 1, new_first);
            }
            NodeKind::Internal => {
                let (moved_child, next_separator) = {
                    let mut guard = self.bpm.write_page(right_id)?;
                    let mut right = InternalNode::new(guard.data_mut());
                    let child = right.child_at(0);
                    let next_separator = right.key_at(1);
                    right.remove_at(0);
                    (child, next_separator)
                };
                let old_separator = {
                    let mut guard = self.bpm.write_page(parent_id)?;
                    let mut parent = InternalNode::new(guard.data_mut());
                    let old = parent.key_at(index + 1);
                    parent.set_key_at(index + 1, next_separator);
                    old
                };
                {
                    let mut guard = self.bpm.write_page(page_id)?;
                    InternalNode::new(guard.data_mut()).push_back(old_separator, moved_child);
                }
                self.set_parent_of(moved_child, page_id)?;
            }
        }
        Ok(())
    }

    /// Concatenates `right_id` into `left_id`, removes the right node's
    /// slot from the parent, and returns the right page to the pool.
    /// `right_index` is the right node's slot in the parent.
    fn merge(
        &self,
        left_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        right_index: usize,
    ) -> Result<()> {
        let kind = {
            let guard = self.bpm.read_page(left_id)?;
            node_kind(guard.data())
        };
        match kind {
            NodeKind::Leaf => {
                let (entries, right_next) = {
                    let guard = self.bpm.read_page(right_id)?;
                    let right = LeafNodeRef::new(guard.data());
                    let entries: Vec<_> = (0..right.size() as usize)
                        .map(|i| (right.key_at(i), right.value_at(i)))
                        .collect();
                    (entries, right.next_page_id())
                };
                let mut guard = self.bpm.write_page(left_id)?;
                let mut left = LeafNode::new(guard.data_mut());
                left.extend(&entries);
                left.set_next_page_id(right_next);
            }
            NodeKind::Internal => {
                let separator = {
                    let guard = self.bpm.read_page(parent_id)?;
                    InternalNodeRef::new(guard.data()).key_at(right_index)
                };
                let mut entries = {
                    let guard = self.bpm.read_page(right_id)?;
                    let right = InternalNodeRef::new(guard.data());
                    (0..right.size() as usize)
                        .map(|i| (right.key_at(i), right.child_at(i)))
                        .collect::<Vec<_>>()
                };
                // The right node's slot-0 sentinel takes the demoted
                // separator as its key when it lands mid-node in the left
                entries[0].0 = separator;
                {
                    let mut guard = self.bpm.write_page(left_id)?;
                    InternalNode::new(guard.data_mut()).extend(&entries);
                }
                for &(_, child) in &entries {
                    self.set_parent_of(child, left_id)?;
                }
            }
        }

        {
            let mut guard = self.bpm.write_page(parent_id)?;
            InternalNode::new(guard.data_mut()).remove_at(right_index);
        }
        // A racing iterator may hold a momentary pin on the right leaf; the
        // page is then simply not reclaimed this time around.
        self.bpm.delete_page(right_id)?;
        Ok(())
    }

    /// Shrinks the tree at the root: an internal root down to one child
    /// promotes that child; a drained leaf root empties the tree.
    fn collapse_root(&self, root_id: PageId) -> Result<()> {
        let change = {
            let guard = self.bpm.read_page(root_id)?;
            let data = guard.data();
            match node_kind(data) {
                NodeKind::Leaf if node_size(data) == 0 => RootChange::Clear,
                NodeKind::Internal if node_size(data) == 1 => {
                    RootChange::Promote(InternalNodeRef::new(data).child_at(0))
                }
                _ => RootChange::Keep,
            }
        };

        match change {
            RootChange::Keep => Ok(()),
            RootChange::Clear => {
                *self.root_page_id.write() = INVALID_PAGE_ID;
                self.publish_root(INVALID_PAGE_ID)?;
                self.bpm.delete_page(root_id)?;
                Ok(())
            }
            RootChange::Promote(child) => {
                self.set_parent_of(child, INVALID_PAGE_ID)?;
                *self.root_page_id.write() = child;
                self.publish_root(child)?;
                self.bpm.delete_page(root_id)?;
                Ok(())
            }
        }
    }

    fn set_parent_of(&self, page_id: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(page_id)?;
        match node_kind(guard.data()) {
            NodeKind::Leaf => LeafNode::new(guard.data_mut()).set_parent_page_id(parent),
            NodeKind::Internal => InternalNode::new(guard.data_mut()).set_parent_page_id(parent),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn rid(key: u32) -> RecordId {
        RecordId::new(PageId::new(key), SlotId::new(0))
    }

    fn create_index(pool_size: usize) -> (BTreeIndex, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, dm));
        let index = BTreeIndex::create("test_idx", bpm, 4, 4).unwrap();
        (index, temp_file)
    }

    #[test]
    fn test_btree_empty() {
        let (index, _temp) = create_index(16);
        assert!(index.is_empty());
        assert_eq!(index.get(1).unwrap(), None);
    }

    #[test]
    fn test_btree_insert_get() {
        let (index, _temp) = create_index(16);

        assert!(index.insert(10, rid(10)).unwrap());
        assert!(index.insert(5, rid(5)).unwrap());
        assert!(index.insert(20, rid(20)).unwrap());

        assert_eq!(index.get(5).unwrap(), Some(rid(5)));
        assert_eq!(index.get(10).unwrap(), Some(rid(10)));
        assert_eq!(index.get(20).unwrap(), Some(rid(20)));
        assert_eq!(index.get(15).unwrap(), None);
    }

    #[test]
    fn test_btree_duplicate_insert_rejected() {
        let (index, _temp) = create_index(16);

        assert!(index.insert(10, rid(10)).unwrap());
        assert!(!index.insert(10, rid(99)).unwrap());
        assert_eq!(index.get(10).unwrap(), Some(rid(10)));
    }

    #[test]
    fn test_btree_remove_to_empty_resets_root() {
        let (index, _temp) = create_index(16);

        index.insert(1, rid(1)).unwrap();
        index.remove(1).unwrap();

        assert!(index.is_empty());
        assert_eq!(index.root_page_id(), INVALID_PAGE_ID);
        assert_eq!(index.get(1).unwrap(), None);
    }

    #[test]
    fn test_btree_remove_missing_key_is_noop() {
        let (index, _temp) = create_index(16);
        index.insert(1, rid(1)).unwrap();
        index.remove(2).unwrap();
        assert_eq!(index.get(1).unwrap(), Some(rid(1)));
    }
}
