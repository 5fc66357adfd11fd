pub mod btree;
pub mod btree_iterator;
pub mod btree_page;

pub use btree::BTreeIndex;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{
    InternalNode, InternalNodeRef, LeafNode, LeafNodeRef, NodeKind, DEFAULT_INTERNAL_MAX_SIZE,
    DEFAULT_LEAF_MAX_SIZE,
};
