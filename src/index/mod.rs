pub mod bplus_tree;
pub mod btree_iterator;
pub mod btree_page;
pub mod key_comparator;

pub use bplus_tree::BPlusTree;
pub use btree_iterator::TreeIterator;
pub use btree_page::{
    IndexKey, InternalPage, InternalPageRef, LeafPage, LeafPageRef, PageType,
    DEFAULT_INTERNAL_MAX_SIZE, DEFAULT_LEAF_MAX_SIZE, KEY_SIZE,
};
pub use key_comparator::{BytewiseComparator, KeyComparator, U64Comparator};
