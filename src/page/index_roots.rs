//! The page mapping each index id to its current root page id.
//!
//! Layout: `{count: u32, entries: [(index_id: i32, root_page_id: i32)]}`.

use crate::page::Page;
use crate::{IndexId, PageId, PAGE_SIZE};

const OFF_COUNT: usize = 0;
const ENTRIES_OFFSET: usize = 4;
const ENTRY_SIZE: usize = 8;

/// How many indexes one roots page can track.
pub const MAX_ROOT_ENTRIES: usize = (PAGE_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE;

impl Page {
    fn roots_count(&self) -> usize {
        self.read_u32(OFF_COUNT) as usize
    }

    fn roots_entry(&self, at: usize) -> (IndexId, PageId) {
        let base = ENTRIES_OFFSET + at * ENTRY_SIZE;
        (self.read_i32(base), self.read_i32(base + 4))
    }

    fn roots_find(&self, index_id: IndexId) -> Option<usize> {
        (0..self.roots_count()).find(|&at| self.roots_entry(at).0 == index_id)
    }

    pub fn roots_get(&self, index_id: IndexId) -> Option<PageId> {
        self.roots_find(index_id).map(|at| self.roots_entry(at).1)
    }

    /// Inserts or updates the root entry for `index_id`. Returns false when
    /// the page is full and the id is new.
    pub fn roots_set(&mut self, index_id: IndexId, root_page_id: PageId) -> bool {
        let at = match self.roots_find(index_id) {
            Some(at) => at,
            None => {
                let count = self.roots_count();
                if count >= MAX_ROOT_ENTRIES {
                    return false;
                }
                self.write_u32(OFF_COUNT, count as u32 + 1);
                count
            }
        };
        let base = ENTRIES_OFFSET + at * ENTRY_SIZE;
        self.write_i32(base, index_id);
        self.write_i32(base + 4, root_page_id);
        true
    }

    /// Drops the entry for `index_id`, compacting the array.
    pub fn roots_remove(&mut self, index_id: IndexId) -> bool {
        let Some(at) = self.roots_find(index_id) else {
            return false;
        };
        let count = self.roots_count();
        let from = ENTRIES_OFFSET + (at + 1) * ENTRY_SIZE;
        let to = ENTRIES_OFFSET + count * ENTRY_SIZE;
        self.data.copy_within(from..to, ENTRIES_OFFSET + at * ENTRY_SIZE);
        self.write_u32(OFF_COUNT, count as u32 - 1);
        true
    }
}
