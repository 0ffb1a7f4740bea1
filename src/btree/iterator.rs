use crate::buffer_pool::{BufferPoolManager, PageGuard};
use crate::record::RowId;
use crate::INVALID_PAGE_ID;

/// A cursor over the leaf sibling chain.
///
/// Holds at most one pinned leaf at a time: advancing past a leaf's last
/// pair releases it and pins its right sibling; dropping the cursor releases
/// whatever it holds.
pub struct TreeIterator<'a> {
    bpm: &'a BufferPoolManager,
    guard: Option<PageGuard<'a>>,
    index: usize,
}

impl<'a> TreeIterator<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, guard: Option<PageGuard<'a>>, index: usize) -> Self {
        Self { bpm, guard, index }
    }

    /// The exhausted sentinel.
    pub(crate) fn end(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            guard: None,
            index: 0,
        }
    }
}

impl Iterator for TreeIterator<'_> {
    type Item = (Vec<u8>, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.guard.as_ref()?;
            let next_page_id = {
                let page = guard.read();
                if self.index < page.btree_size() {
                    let item = (page.leaf_key_at(self.index).to_vec(), page.leaf_value_at(self.index));
                    self.index += 1;
                    return Some(item);
                }
                page.leaf_next_page_id()
            };
            self.index = 0;
            self.guard = if next_page_id == INVALID_PAGE_ID {
                None
            } else {
                Some(self.bpm.fetch_page(next_page_id).ok()?)
            };
        }
    }
}
