use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::{IndexKey, LeafPageRef};

/// Forward iterator over the leaf chain in key order.
///
/// The iterator pins (and read-latches) its current leaf only; crossing to
/// the next leaf releases the old one before pinning its successor, so a
/// full scan never holds more than one tree page at a time.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    pos: usize,
}

impl TreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, pos: usize) -> Result<Self> {
        let mut iter = Self {
            bpm,
            leaf: Some(leaf),
            pos,
        };
        iter.skip_exhausted()?;
        Ok(iter)
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            pos: 0,
        }
    }

    /// True once the iterator has moved past the last slot of the rightmost
    /// leaf.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// The entry under the cursor, unless at the end.
    pub fn entry(&self) -> Option<(IndexKey, RecordId)> {
        self.leaf.as_ref().map(|guard| {
            let leaf = LeafPageRef::new(guard.data());
            (leaf.key_at(self.pos), leaf.record_at(self.pos))
        })
    }

    /// Moves the cursor one slot forward, crossing leaves as needed.
    pub fn advance(&mut self) -> Result<()> {
        if self.leaf.is_some() {
            self.pos += 1;
            self.skip_exhausted()?;
        }
        Ok(())
    }

    /// Walks the leaf chain until the cursor rests on a live slot.
    fn skip_exhausted(&mut self) -> Result<()> {
        while let Some(guard) = &self.leaf {
            let leaf = LeafPageRef::new(guard.data());
            if self.pos < leaf.size() {
                break;
            }
            let next = leaf.next_page_id();
            // release the current pin before taking the next one
            self.leaf = None;
            if next == INVALID_PAGE_ID {
                break;
            }
            self.leaf = Some(self.bpm.fetch_page_read(next)?);
            self.pos = 0;
        }
        Ok(())
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entry()?;
        match self.advance() {
            Ok(()) => Some(Ok(entry)),
            Err(e) => Some(Err(e)),
        }
    }
}
