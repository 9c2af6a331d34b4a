use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{BurrowError, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_iterator::TreeIterator;
use super::btree_page::{
    page_parent, page_type, set_page_parent, IndexKey, InternalPage, InternalPageRef, LeafPage,
    LeafPageRef, PageType,
};
use super::key_comparator::KeyComparator;

/// A separator rewrite deferred until the operation's latches are released:
/// the page whose lower bound changed, and its new first key.
type PendingSeparator = (PageId, IndexKey);

/// Latches held by one in-flight write operation.
///
/// `write_set` is the ancestor chain in root-to-leaf order; it is cleared
/// wholesale the moment a child proves safe. The root latch rides along
/// until the same moment, since a cleared chain means the operation can no
/// longer touch `root_page_id`.
struct Context<'a> {
    root: Option<MutexGuard<'a, PageId>>,
    write_set: Vec<WritePageGuard>,
}

impl Context<'_> {
    fn release_all(&mut self) {
        self.write_set.clear();
        self.root = None;
    }
}

/// Clustered B+Tree index over the buffer pool.
///
/// Keys are fixed-size byte strings ordered by the injected comparator;
/// values are record ids. Unique keys only. The tree persists its root page
/// id in the header page under `index_name`, so reopening with the same
/// name resumes the existing index.
///
/// Concurrency follows latch crabbing: reads descend under shared page
/// latches, releasing the parent once the child is latched; writes descend
/// under exclusive latches and release the ancestor chain as soon as a
/// child cannot propagate a split or merge upward.
pub struct BPlusTree {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: u16,
    internal_max_size: u16,
    /// The only tree-global mutable state; the mutex doubles as the root
    /// latch taken at the start of every operation.
    root_page_id: Mutex<PageId>,
}

impl BPlusTree {
    /// Opens (or registers) the index named `index_name` in the header page.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 3, "leaf pages need room to split");
        assert!(internal_max_size >= 3, "internal pages need room to split");
        let index_name = index_name.into();

        let existing = {
            let guard = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data()).root_page_id(&index_name)
        };
        let root = match existing {
            Some(root) => root,
            None => {
                let mut guard = bpm.fetch_page_write(HEADER_PAGE_ID)?;
                let mut header = HeaderPage::new(guard.data_mut());
                // a concurrent open may have registered the name already
                if let Some(root) = header.root_page_id(&index_name) {
                    root
                } else if header.insert_record(&index_name, INVALID_PAGE_ID) {
                    INVALID_PAGE_ID
                } else {
                    return Err(BurrowError::HeaderPageFull);
                }
            }
        };

        debug!(index = %index_name, root = root.as_u32(), "opened index");
        Ok(Self {
            index_name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: Mutex::new(root),
        })
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup. Descends under shared latches, holding at most a
    /// parent/child pair at a time.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(*root)?;
        drop(root);

        loop {
            match page_type(guard.data()) {
                PageType::Leaf => {
                    let leaf = LeafPageRef::new(guard.data());
                    let found = leaf
                        .find(key, self.comparator.as_ref())
                        .map(|pos| leaf.record_at(pos));
                    return Ok(found);
                }
                PageType::Internal => {
                    let child = InternalPageRef::new(guard.data())
                        .lookup_child(key, self.comparator.as_ref());
                    // crab: latch the child before the parent goes away
                    let child_guard = self.bpm.fetch_page_read(child)?;
                    guard = child_guard;
                }
                PageType::Invalid => {
                    return Err(self.corrupt("descended into an uninitialized page"))
                }
            }
        }
    }

    /// Inserts a unique key. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: &IndexKey, record: RecordId) -> Result<bool> {
        let mut root = self.root_page_id.lock();

        if *root == INVALID_PAGE_ID {
            // start a new tree: a single leaf root
            let mut guard = self.bpm.new_page()?;
            let root_id = guard.page_id();
            let mut leaf =
                LeafPage::init(guard.data_mut(), root_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, record, self.comparator.as_ref());
            *root = root_id;
            drop(guard);
            self.persist_root(root_id)?;
            debug!(index = %self.index_name, root = root_id.as_u32(), "started new tree");
            return Ok(true);
        }

        let mut ctx = Context {
            root: Some(root),
            write_set: Vec::new(),
        };
        self.descend_for_write(key, &mut ctx, WriteOp::Insert)?;

        let mut leaf_guard = ctx.write_set.pop().expect("descent ends at a leaf");
        let size_after = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            if !leaf.insert(key, record, self.comparator.as_ref()) {
                return Ok(false);
            }
            leaf.size()
        };

        if size_after >= self.leaf_max_size as usize {
            self.split_leaf(leaf_guard, &mut ctx)?;
        }
        Ok(true)
    }

    /// Removes a key. Returns false when the key is absent.
    pub fn remove(&self, key: &IndexKey) -> Result<bool> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut ctx = Context {
            root: Some(root),
            write_set: Vec::new(),
        };
        self.descend_for_write(key, &mut ctx, WriteOp::Remove)?;

        let mut leaf_guard = ctx.write_set.pop().expect("descent ends at a leaf");
        let (pos, size_after, leaf_id, parent_id) = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let Some(pos) = leaf.find(key, self.comparator.as_ref()) else {
                return Ok(false);
            };
            leaf.remove_at(pos);
            (pos, leaf.size(), leaf.page_id(), leaf.parent_page_id())
        };

        if parent_id == INVALID_PAGE_ID {
            // the root is this leaf; it may only shrink away entirely
            if size_after == 0 {
                drop(leaf_guard);
                self.bpm.delete_page(leaf_id)?;
                let root = ctx
                    .root
                    .as_deref_mut()
                    .expect("root latch must be held when the root empties");
                *root = INVALID_PAGE_ID;
                self.persist_root(INVALID_PAGE_ID)?;
                debug!(index = %self.index_name, "tree emptied");
            }
            return Ok(true);
        }

        let first_changed = pos == 0;
        let pending = if size_after >= (self.leaf_max_size / 2) as usize {
            // no underflow; at most the separator above needs a refresh
            let pending = (first_changed && size_after > 0).then(|| {
                let new_first = LeafPageRef::new(leaf_guard.data()).key_at(0);
                (leaf_id, new_first)
            });
            drop(leaf_guard);
            pending
        } else {
            self.repair_leaf_underflow(leaf_guard, first_changed, &mut ctx)?
        };

        ctx.release_all();
        if let Some((child, new_first)) = pending {
            self.update_ancestor_separator(child, &new_first)?;
        }
        Ok(true)
    }

    /// Iterator positioned at the first slot of the leftmost leaf.
    pub fn iter(&self) -> Result<TreeIterator> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(TreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let mut guard = self.bpm.fetch_page_read(*root)?;
        drop(root);

        loop {
            match page_type(guard.data()) {
                PageType::Leaf => {
                    return TreeIterator::new(Arc::clone(&self.bpm), guard, 0);
                }
                PageType::Internal => {
                    let child = InternalPageRef::new(guard.data()).child_at(0);
                    let child_guard = self.bpm.fetch_page_read(child)?;
                    guard = child_guard;
                }
                PageType::Invalid => {
                    return Err(self.corrupt("descended into an uninitialized page"))
                }
            }
        }
    }

    /// Iterator positioned at the first slot whose key is >= `key`.
    pub fn iter_from(&self, key: &IndexKey) -> Result<TreeIterator> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(TreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let mut guard = self.bpm.fetch_page_read(*root)?;
        drop(root);

        loop {
            match page_type(guard.data()) {
                PageType::Leaf => {
                    let pos = LeafPageRef::new(guard.data()).lower_bound(key, self.comparator.as_ref());
                    return TreeIterator::new(Arc::clone(&self.bpm), guard, pos);
                }
                PageType::Internal => {
                    let child = InternalPageRef::new(guard.data())
                        .lookup_child(key, self.comparator.as_ref());
                    let child_guard = self.bpm.fetch_page_read(child)?;
                    guard = child_guard;
                }
                PageType::Invalid => {
                    return Err(self.corrupt("descended into an uninitialized page"))
                }
            }
        }
    }

    /// Descends to the target leaf under exclusive latches, pushing the
    /// chain into `ctx` and releasing everything above each safe child.
    fn descend_for_write(&self, key: &IndexKey, ctx: &mut Context<'_>, op: WriteOp) -> Result<()> {
        let mut page_id = **ctx.root.as_ref().expect("root latch held during descent");
        loop {
            let guard = self.bpm.fetch_page_write(page_id)?;
            match page_type(guard.data()) {
                PageType::Leaf => {
                    let size = LeafPageRef::new(guard.data()).size();
                    if op.is_safe(size, self.leaf_max_size) {
                        ctx.release_all();
                    }
                    ctx.write_set.push(guard);
                    return Ok(());
                }
                PageType::Internal => {
                    let node = InternalPageRef::new(guard.data());
                    let next = node.lookup_child(key, self.comparator.as_ref());
                    if op.is_safe(node.size(), self.internal_max_size) {
                        ctx.release_all();
                    }
                    ctx.write_set.push(guard);
                    page_id = next;
                }
                PageType::Invalid => {
                    return Err(self.corrupt("descended into an uninitialized page"))
                }
            }
        }
    }

    /// Splits an overfull leaf, splicing the new sibling into the chain and
    /// promoting its first key.
    fn split_leaf(&self, mut leaf_guard: WritePageGuard, ctx: &mut Context<'_>) -> Result<()> {
        let mut new_guard = self.bpm.new_page()?;
        let new_leaf_id = new_guard.page_id();

        let (separator, old_next) = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let mid = leaf.max_size() / 2;
            let mut new_leaf = LeafPage::init(
                new_guard.data_mut(),
                new_leaf_id,
                leaf.parent_page_id(),
                self.leaf_max_size,
            );
            leaf.move_tail_to(&mut new_leaf, mid);

            let old_next = leaf.next_page_id();
            new_leaf.set_next_page_id(old_next);
            new_leaf.set_prev_page_id(leaf.page_id());
            leaf.set_next_page_id(new_leaf_id);
            (new_leaf.key_at(0), old_next)
        };

        if old_next != INVALID_PAGE_ID {
            let mut next_guard = self.bpm.fetch_page_write(old_next)?;
            LeafPage::new(next_guard.data_mut()).set_prev_page_id(new_leaf_id);
        }

        debug!(
            index = %self.index_name,
            left = leaf_guard.page_id().as_u32(),
            right = new_leaf_id.as_u32(),
            "leaf split"
        );
        self.insert_into_parent(leaf_guard, separator, new_guard, ctx)
    }

    /// Splits an overfull internal node at max/2 + 1, so the middle key
    /// rises to the parent rather than being duplicated.
    fn split_internal(&self, mut node_guard: WritePageGuard, ctx: &mut Context<'_>) -> Result<()> {
        let mut new_guard = self.bpm.new_page()?;
        let new_node_id = new_guard.page_id();

        let separator = {
            let mut node = InternalPage::new(node_guard.data_mut());
            let mid = node.max_size() / 2 + 1;
            let separator = node.key_at(mid);
            let mut new_node = InternalPage::init(
                new_guard.data_mut(),
                new_node_id,
                node.parent_page_id(),
                self.internal_max_size,
            );
            node.split_into(&mut new_node, mid);
            separator
        };

        for child in children_of(new_guard.data()) {
            self.reparent(child, new_node_id)?;
        }

        debug!(
            index = %self.index_name,
            left = node_guard.page_id().as_u32(),
            right = new_node_id.as_u32(),
            "internal split"
        );
        self.insert_into_parent(node_guard, separator, new_guard, ctx)
    }

    /// Hangs `right` (lower-bounded by `separator`) next to `left` in their
    /// parent, growing a new root when `left` was the root. Both children
    /// stay latched until the parent edge exists.
    fn insert_into_parent(
        &self,
        mut left: WritePageGuard,
        separator: IndexKey,
        mut right: WritePageGuard,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        if let Some(mut parent_guard) = ctx.write_set.pop() {
            drop(left);
            let parent_size = {
                let mut parent = InternalPage::new(parent_guard.data_mut());
                parent.insert(&separator, right.page_id(), self.comparator.as_ref());
                parent.size()
            };
            drop(right);
            // a parent refilled to max_size by an earlier merge can exceed
            // max_size here, so split on >= rather than ==
            if parent_size >= self.internal_max_size as usize {
                return self.split_internal(parent_guard, ctx);
            }
            return Ok(());
        }

        // splitting the root: grow a new root above both halves
        let mut root_guard = self.bpm.new_page()?;
        let new_root_id = root_guard.page_id();
        {
            let mut new_root = InternalPage::init(
                root_guard.data_mut(),
                new_root_id,
                INVALID_PAGE_ID,
                self.internal_max_size,
            );
            new_root.populate_new_root(left.page_id(), &separator, right.page_id());
        }
        set_page_parent(left.data_mut(), new_root_id);
        set_page_parent(right.data_mut(), new_root_id);

        let root = ctx
            .root
            .as_deref_mut()
            .expect("root latch must be held for a root split");
        *root = new_root_id;
        drop(root_guard);
        drop(left);
        drop(right);
        self.persist_root(new_root_id)?;
        debug!(index = %self.index_name, root = new_root_id.as_u32(), "root split");
        Ok(())
    }

    /// Brings an underflowing leaf back to minimum fill: steal from the
    /// right sibling, else the left, else merge. Returns a deferred
    /// separator rewrite when the leaf's lower bound changed while it was
    /// its parent's leftmost child.
    fn repair_leaf_underflow(
        &self,
        mut leaf_guard: WritePageGuard,
        first_changed: bool,
        ctx: &mut Context<'_>,
    ) -> Result<Option<PendingSeparator>> {
        let leaf_id = leaf_guard.page_id();
        let mut parent_guard = ctx
            .write_set
            .pop()
            .expect("underflowing leaf keeps its parent latched");

        let (idx, parent_size) = {
            let parent = InternalPageRef::new(parent_guard.data());
            let idx = parent
                .find_child_index(leaf_id)
                .ok_or_else(|| self.corrupt("leaf missing from its parent"))?;
            (idx, parent.size())
        };
        let min_size = (self.leaf_max_size / 2) as usize;

        if idx < parent_size {
            let right_id = InternalPageRef::new(parent_guard.data()).child_at(idx + 1);
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            if LeafPageRef::new(right_guard.data()).size() > min_size {
                let (stolen_key, stolen_record) =
                    LeafPage::new(right_guard.data_mut()).pop_front();
                LeafPage::new(leaf_guard.data_mut()).push_back(&stolen_key, stolen_record);
                {
                    let new_right_first = LeafPageRef::new(right_guard.data()).key_at(0);
                    InternalPage::new(parent_guard.data_mut())
                        .set_key_at(idx + 1, &new_right_first);
                }
                debug!(
                    index = %self.index_name,
                    leaf = leaf_id.as_u32(),
                    sibling = right_id.as_u32(),
                    "stole from right sibling"
                );
                return Ok(self.refresh_leaf_separator(
                    &mut parent_guard,
                    &leaf_guard,
                    idx,
                    first_changed,
                ));
            }
        }
        if idx > 0 {
            let left_id = InternalPageRef::new(parent_guard.data()).child_at(idx - 1);
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            if LeafPageRef::new(left_guard.data()).size() > min_size {
                let (stolen_key, stolen_record) = LeafPage::new(left_guard.data_mut()).pop_back();
                LeafPage::new(leaf_guard.data_mut()).push_front(&stolen_key, stolen_record);
                // the leaf's lower bound is now the stolen key
                InternalPage::new(parent_guard.data_mut()).set_key_at(idx, &stolen_key);
                debug!(
                    index = %self.index_name,
                    leaf = leaf_id.as_u32(),
                    sibling = left_id.as_u32(),
                    "stole from left sibling"
                );
                return Ok(None);
            }
        }

        // merge: fold into the left node, right sibling unless last child
        let pending;
        let survivor_guard;
        if idx < parent_size {
            let dead_id = InternalPageRef::new(parent_guard.data()).child_at(idx + 1);
            let dead_guard = self.bpm.fetch_page_write(dead_id)?;
            let dead_next = {
                let mut leaf = LeafPage::new(leaf_guard.data_mut());
                let dead = LeafPageRef::new(dead_guard.data());
                let dead_next = dead.next_page_id();
                leaf.append_from(&dead);
                leaf.set_next_page_id(dead_next);
                dead_next
            };
            if dead_next != INVALID_PAGE_ID {
                let mut next_guard = self.bpm.fetch_page_write(dead_next)?;
                LeafPage::new(next_guard.data_mut()).set_prev_page_id(leaf_id);
            }
            InternalPage::new(parent_guard.data_mut()).remove_at(idx + 1);
            drop(dead_guard);
            self.bpm.delete_page(dead_id)?;
            debug!(
                index = %self.index_name,
                survivor = leaf_id.as_u32(),
                dead = dead_id.as_u32(),
                "merged right sibling into leaf"
            );
            pending =
                self.refresh_leaf_separator(&mut parent_guard, &leaf_guard, idx, first_changed);
            survivor_guard = leaf_guard;
        } else {
            let left_id = InternalPageRef::new(parent_guard.data()).child_at(idx - 1);
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let leaf_next = {
                let mut left = LeafPage::new(left_guard.data_mut());
                let dead = LeafPageRef::new(leaf_guard.data());
                let leaf_next = dead.next_page_id();
                left.append_from(&dead);
                left.set_next_page_id(leaf_next);
                leaf_next
            };
            if leaf_next != INVALID_PAGE_ID {
                let mut next_guard = self.bpm.fetch_page_write(leaf_next)?;
                LeafPage::new(next_guard.data_mut()).set_prev_page_id(left_id);
            }
            InternalPage::new(parent_guard.data_mut()).remove_at(idx);
            drop(leaf_guard);
            self.bpm.delete_page(leaf_id)?;
            debug!(
                index = %self.index_name,
                survivor = left_id.as_u32(),
                dead = leaf_id.as_u32(),
                "merged leaf into left sibling"
            );
            pending = None;
            survivor_guard = left_guard;
        }

        let collapsed = self.finish_parent_repair(parent_guard, survivor_guard, ctx)?;
        // a collapsed root has no ancestors left to rewrite
        Ok(if collapsed { None } else { pending })
    }

    /// Brings an underflowing internal node back to minimum fill.
    fn repair_internal_underflow(
        &self,
        mut node_guard: WritePageGuard,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        let node_id = node_guard.page_id();
        let mut parent_guard = ctx
            .write_set
            .pop()
            .expect("underflowing node keeps its parent latched");

        let (idx, parent_size) = {
            let parent = InternalPageRef::new(parent_guard.data());
            let idx = parent
                .find_child_index(node_id)
                .ok_or_else(|| self.corrupt("node missing from its parent"))?;
            (idx, parent.size())
        };
        let min_size = (self.internal_max_size / 2) as usize;

        if idx < parent_size {
            let right_id = InternalPageRef::new(parent_guard.data()).child_at(idx + 1);
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            if InternalPageRef::new(right_guard.data()).size() > min_size {
                // rotate left: the parent separator falls into this node,
                // the sibling's first key rises into the parent
                let separator = InternalPageRef::new(parent_guard.data()).key_at(idx + 1);
                let (sibling_first, moved_child) =
                    InternalPage::new(right_guard.data_mut()).pop_front();
                InternalPage::new(node_guard.data_mut()).push_back(&separator, moved_child);
                InternalPage::new(parent_guard.data_mut()).set_key_at(idx + 1, &sibling_first);
                self.reparent(moved_child, node_id)?;
                debug!(
                    index = %self.index_name,
                    node = node_id.as_u32(),
                    sibling = right_id.as_u32(),
                    "internal steal from right"
                );
                return Ok(());
            }
        }
        if idx > 0 {
            let left_id = InternalPageRef::new(parent_guard.data()).child_at(idx - 1);
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            if InternalPageRef::new(left_guard.data()).size() > min_size {
                // rotate right: mirror image of the rotation above
                let separator = InternalPageRef::new(parent_guard.data()).key_at(idx);
                let (sibling_last, moved_child) =
                    InternalPage::new(left_guard.data_mut()).pop_back();
                InternalPage::new(node_guard.data_mut()).push_front(&separator, moved_child);
                InternalPage::new(parent_guard.data_mut()).set_key_at(idx, &sibling_last);
                self.reparent(moved_child, node_id)?;
                debug!(
                    index = %self.index_name,
                    node = node_id.as_u32(),
                    sibling = left_id.as_u32(),
                    "internal steal from left"
                );
                return Ok(());
            }
        }

        // merge, folding the separating key down from the parent
        let survivor_guard;
        if idx < parent_size {
            let dead_id = InternalPageRef::new(parent_guard.data()).child_at(idx + 1);
            let dead_guard = self.bpm.fetch_page_write(dead_id)?;
            let separator = InternalPageRef::new(parent_guard.data()).key_at(idx + 1);
            InternalPage::new(node_guard.data_mut())
                .merge_from(&separator, &InternalPageRef::new(dead_guard.data()));
            for child in children_of(dead_guard.data()) {
                self.reparent(child, node_id)?;
            }
            InternalPage::new(parent_guard.data_mut()).remove_at(idx + 1);
            drop(dead_guard);
            self.bpm.delete_page(dead_id)?;
            debug!(
                index = %self.index_name,
                survivor = node_id.as_u32(),
                dead = dead_id.as_u32(),
                "merged right sibling into node"
            );
            survivor_guard = node_guard;
        } else {
            let left_id = InternalPageRef::new(parent_guard.data()).child_at(idx - 1);
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let separator = InternalPageRef::new(parent_guard.data()).key_at(idx);
            InternalPage::new(left_guard.data_mut())
                .merge_from(&separator, &InternalPageRef::new(node_guard.data()));
            for child in children_of(node_guard.data()) {
                self.reparent(child, left_id)?;
            }
            InternalPage::new(parent_guard.data_mut()).remove_at(idx);
            drop(node_guard);
            self.bpm.delete_page(node_id)?;
            debug!(
                index = %self.index_name,
                survivor = left_id.as_u32(),
                dead = node_id.as_u32(),
                "merged node into left sibling"
            );
            survivor_guard = left_guard;
        }

        self.finish_parent_repair(parent_guard, survivor_guard, ctx)?;
        Ok(())
    }

    /// After a merge removed a separator: collapse the root if it ran out
    /// of keys, or recurse when the parent itself underflowed. Returns true
    /// on a root collapse.
    fn finish_parent_repair(
        &self,
        parent_guard: WritePageGuard,
        mut survivor_guard: WritePageGuard,
        ctx: &mut Context<'_>,
    ) -> Result<bool> {
        let (parent_size, parent_is_root, parent_id) = {
            let parent = InternalPageRef::new(parent_guard.data());
            (
                parent.size(),
                parent.parent_page_id() == INVALID_PAGE_ID,
                parent.page_id(),
            )
        };

        if parent_is_root && parent_size == 0 {
            // the sole remaining child becomes the root
            let survivor_id = survivor_guard.page_id();
            set_page_parent(survivor_guard.data_mut(), INVALID_PAGE_ID);
            drop(survivor_guard);
            drop(parent_guard);
            self.bpm.delete_page(parent_id)?;
            let root = ctx
                .root
                .as_deref_mut()
                .expect("root latch must be held for a root collapse");
            *root = survivor_id;
            self.persist_root(survivor_id)?;
            debug!(index = %self.index_name, root = survivor_id.as_u32(), "root collapsed");
            return Ok(true);
        }

        drop(survivor_guard);
        if !parent_is_root && parent_size < (self.internal_max_size / 2) as usize {
            self.repair_internal_underflow(parent_guard, ctx)?;
        }
        Ok(false)
    }

    /// After the leaf's first key changed: rewrite its separator in the
    /// parent directly, or defer to the ancestor walk when the leaf is the
    /// parent's leftmost child.
    fn refresh_leaf_separator(
        &self,
        parent_guard: &mut WritePageGuard,
        leaf_guard: &WritePageGuard,
        idx: usize,
        first_changed: bool,
    ) -> Option<PendingSeparator> {
        if !first_changed {
            return None;
        }
        let new_first = LeafPageRef::new(leaf_guard.data()).key_at(0);
        if idx > 0 {
            InternalPage::new(parent_guard.data_mut()).set_key_at(idx, &new_first);
            None
        } else {
            Some((leaf_guard.page_id(), new_first))
        }
    }

    /// Walks up from `start` to the lowest ancestor where the affected
    /// subtree is not the leftmost child and rewrites that separator.
    /// Runs after the operation's latches are released; a stale separator
    /// still bounds the subtree, so each hop latches one node at a time.
    fn update_ancestor_separator(&self, start: PageId, new_key: &IndexKey) -> Result<()> {
        let mut child = start;
        let mut parent = {
            let guard = self.bpm.fetch_page_read(child)?;
            page_parent(guard.data())
        };
        while parent != INVALID_PAGE_ID {
            let mut guard = self.bpm.fetch_page_write(parent)?;
            let mut node = InternalPage::new(guard.data_mut());
            let Some(idx) = node.find_child_index(child) else {
                // a concurrent restructure moved the child; the stale
                // separator is still a valid bound, so stop here
                return Ok(());
            };
            if idx > 0 {
                node.set_key_at(idx, new_key);
                return Ok(());
            }
            child = parent;
            parent = node.parent_page_id();
        }
        Ok(())
    }

    fn reparent(&self, page_id: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(page_id)?;
        set_page_parent(guard.data_mut(), parent);
        Ok(())
    }

    /// Rewrites this index's root record in the header page. Called with
    /// the root latch held, so header updates serialize with root changes.
    fn persist_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root) {
            return Err(self.corrupt("header record disappeared"));
        }
        Ok(())
    }

    fn corrupt(&self, what: &str) -> BurrowError {
        BurrowError::IndexCorrupted(self.index_name.clone(), what.to_string())
    }
}

#[derive(Clone, Copy)]
enum WriteOp {
    Insert,
    Remove,
}

impl WriteOp {
    /// A node is safe when the operation below it cannot propagate a
    /// structural change this high: inserts need one free slot beyond the
    /// next entry, removals need one entry above the ceiling half.
    fn is_safe(self, size: usize, max_size: u16) -> bool {
        match self {
            WriteOp::Insert => size < max_size as usize - 1,
            WriteOp::Remove => size > (max_size as usize + 1) / 2,
        }
    }
}

fn children_of(data: &[u8]) -> Vec<PageId> {
    let node = InternalPageRef::new(data);
    (0..=node.size()).map(|i| node.child_at(i)).collect()
}
