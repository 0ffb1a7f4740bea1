//! Slotted-page layout for heap tables.
//!
//! Header: `{prev_page_id: i32, next_page_id: i32, free_space_ptr: u32,
//! slot_count: u32}` followed by the slot directory, each slot an
//! `{offset: u32, size: u32}` pair. Tuples are packed from the page tail
//! toward the directory; the high bit of a slot's size is the tombstone
//! mark, and a zeroed slot is free for reuse.

use crate::page::Page;
use crate::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

const OFF_PREV: usize = 0;
const OFF_NEXT: usize = 4;
const OFF_FREE_PTR: usize = 8;
const OFF_SLOT_COUNT: usize = 12;
const HEADER_SIZE: usize = 16;
const SLOT_SIZE: usize = 8;

const TOMBSTONE_BIT: u32 = 0x8000_0000;
const SIZE_MASK: u32 = !TOMBSTONE_BIT;

/// Largest tuple that fits a fresh page alongside its slot entry.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

impl Page {
    pub fn init_table_page(&mut self, prev_page_id: PageId) {
        self.data.fill(0);
        self.write_i32(OFF_PREV, prev_page_id);
        self.write_i32(OFF_NEXT, INVALID_PAGE_ID);
        self.write_u32(OFF_FREE_PTR, PAGE_SIZE as u32);
        self.write_u32(OFF_SLOT_COUNT, 0);
    }

    pub fn table_prev_page_id(&self) -> PageId {
        self.read_i32(OFF_PREV)
    }

    pub fn set_table_prev_page_id(&mut self, page_id: PageId) {
        self.write_i32(OFF_PREV, page_id);
    }

    pub fn table_next_page_id(&self) -> PageId {
        self.read_i32(OFF_NEXT)
    }

    pub fn set_table_next_page_id(&mut self, page_id: PageId) {
        self.write_i32(OFF_NEXT, page_id);
    }

    pub fn table_slot_count(&self) -> u32 {
        self.read_u32(OFF_SLOT_COUNT)
    }

    /// Whether a tuple of `len` bytes would fit, counting the directory
    /// entry it may need.
    pub fn table_can_fit(&self, len: usize) -> bool {
        let reusable = (0..self.table_slot_count()).any(|s| self.slot_is_free(s));
        let directory_growth = if reusable { 0 } else { SLOT_SIZE };
        len + directory_growth <= self.table_free_space()
    }

    /// Appends (or slots into a reusable hole) the serialized tuple.
    /// Returns the slot number, or `None` when the page cannot fit it.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Option<u32> {
        let slot_count = self.table_slot_count();
        let reusable = (0..slot_count).find(|&s| self.slot_is_free(s));
        let directory_growth = if reusable.is_some() { 0 } else { SLOT_SIZE };
        if tuple.len() + directory_growth > self.table_free_space() {
            return None;
        }

        let free_ptr = self.read_u32(OFF_FREE_PTR) - tuple.len() as u32;
        self.data[free_ptr as usize..free_ptr as usize + tuple.len()].copy_from_slice(tuple);
        self.write_u32(OFF_FREE_PTR, free_ptr);

        let slot = match reusable {
            Some(slot) => slot,
            None => {
                self.write_u32(OFF_SLOT_COUNT, slot_count + 1);
                slot_count
            }
        };
        self.write_slot(slot, free_ptr, tuple.len() as u32);
        Some(slot)
    }

    /// The tuple's bytes, or `None` for an out-of-range, free, or
    /// tombstoned slot.
    pub fn get_tuple(&self, slot: u32) -> Option<&[u8]> {
        let (offset, size) = self.slot(slot)?;
        if size & TOMBSTONE_BIT != 0 {
            return None;
        }
        Some(&self.data[offset as usize..(offset + size) as usize])
    }

    /// Sets the tombstone bit. Returns false when the slot holds no live
    /// tuple.
    pub fn mark_delete(&mut self, slot: u32) -> bool {
        match self.slot(slot) {
            Some((offset, size)) if size & TOMBSTONE_BIT == 0 => {
                self.write_slot(slot, offset, size | TOMBSTONE_BIT);
                true
            }
            _ => false,
        }
    }

    /// Clears the tombstone bit set by [`Page::mark_delete`].
    pub fn rollback_delete(&mut self, slot: u32) {
        if let Some((offset, size)) = self.slot(slot) {
            self.write_slot(slot, offset, size & SIZE_MASK);
        }
    }

    /// Reclaims the slot's bytes, compacting the tuple region and fixing up
    /// the displaced slots' offsets. The slot becomes reusable.
    pub fn apply_delete(&mut self, slot: u32) {
        let Some((offset, size)) = self.slot(slot) else {
            return;
        };
        let size = size & SIZE_MASK;
        let free_ptr = self.read_u32(OFF_FREE_PTR);

        // Close the hole: everything between the free pointer and the dead
        // tuple slides toward the tail by its size.
        self.data
            .copy_within(free_ptr as usize..offset as usize, (free_ptr + size) as usize);
        self.write_u32(OFF_FREE_PTR, free_ptr + size);

        for s in 0..self.table_slot_count() {
            if s == slot {
                continue;
            }
            if let Some((other_offset, other_size)) = self.slot(s) {
                if other_offset < offset {
                    self.write_slot(s, other_offset + size, other_size);
                }
            }
        }
        self.write_slot(slot, 0, 0);
    }

    /// Overwrites the tuple in place. Fails when the new image is larger
    /// than the stored one; callers compensate with delete-then-insert.
    pub fn update_tuple(&mut self, slot: u32, tuple: &[u8]) -> bool {
        let Some((offset, size)) = self.slot(slot) else {
            return false;
        };
        if size & TOMBSTONE_BIT != 0 || tuple.len() > (size & SIZE_MASK) as usize {
            return false;
        }
        self.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple);
        self.write_slot(slot, offset, tuple.len() as u32);
        true
    }

    /// First slot holding a live tuple, scanning from the directory head.
    pub fn first_live_slot(&self) -> Option<u32> {
        self.next_live_slot_from(0)
    }

    /// First live slot at or after `slot + 1`.
    pub fn next_live_slot(&self, slot: u32) -> Option<u32> {
        self.next_live_slot_from(slot + 1)
    }

    fn next_live_slot_from(&self, start: u32) -> Option<u32> {
        (start..self.table_slot_count()).find(|&s| {
            self.slot(s)
                .is_some_and(|(_, size)| size & TOMBSTONE_BIT == 0 && !self.slot_is_free(s))
        })
    }

    pub fn table_free_space(&self) -> usize {
        let directory_end = HEADER_SIZE + self.table_slot_count() as usize * SLOT_SIZE;
        self.read_u32(OFF_FREE_PTR) as usize - directory_end
    }

    fn slot(&self, slot: u32) -> Option<(u32, u32)> {
        if slot >= self.table_slot_count() || self.slot_is_free(slot) {
            return None;
        }
        let at = HEADER_SIZE + slot as usize * SLOT_SIZE;
        Some((self.read_u32(at), self.read_u32(at + 4)))
    }

    fn slot_is_free(&self, slot: u32) -> bool {
        let at = HEADER_SIZE + slot as usize * SLOT_SIZE;
        self.read_u32(at) == 0 && self.read_u32(at + 4) == 0
    }

    fn write_slot(&mut self, slot: u32, offset: u32, size: u32) {
        let at = HEADER_SIZE + slot as usize * SLOT_SIZE;
        self.write_u32(at, offset);
        self.write_u32(at + 4, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_page() -> Page {
        let mut page = Page::new(3);
        page.init_table_page(INVALID_PAGE_ID);
        page
    }

    #[test]
    fn insert_and_read_back() {
        let mut page = table_page();
        let a = page.insert_tuple(b"alpha").unwrap();
        let b = page.insert_tuple(b"beta").unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(page.get_tuple(a).unwrap(), b"alpha");
        assert_eq!(page.get_tuple(b).unwrap(), b"beta");
        assert_eq!(page.get_tuple(2), None);
    }

    #[test]
    fn mark_delete_hides_and_rollback_restores() {
        let mut page = table_page();
        let slot = page.insert_tuple(b"tuple").unwrap();
        assert!(page.mark_delete(slot));
        assert_eq!(page.get_tuple(slot), None);
        assert!(!page.mark_delete(slot));
        page.rollback_delete(slot);
        assert_eq!(page.get_tuple(slot).unwrap(), b"tuple");
    }

    #[test]
    fn apply_delete_compacts_and_reuses_the_slot() {
        let mut page = table_page();
        let a = page.insert_tuple(b"aaaa").unwrap();
        let b = page.insert_tuple(b"bbbbbbbb").unwrap();
        let c = page.insert_tuple(b"cccc").unwrap();
        let free_before = page.table_free_space();

        page.mark_delete(b);
        page.apply_delete(b);

        assert_eq!(page.get_tuple(a).unwrap(), b"aaaa");
        assert_eq!(page.get_tuple(c).unwrap(), b"cccc");
        assert_eq!(page.table_free_space(), free_before + 8);

        // The freed slot is handed out again before the directory grows.
        let d = page.insert_tuple(b"dd").unwrap();
        assert_eq!(d, b);
        assert_eq!(page.table_slot_count(), 3);
        assert_eq!(page.get_tuple(d).unwrap(), b"dd");
    }

    #[test]
    fn update_in_place_fails_when_larger() {
        let mut page = table_page();
        let slot = page.insert_tuple(b"12345678").unwrap();
        assert!(page.update_tuple(slot, b"1234"));
        assert_eq!(page.get_tuple(slot).unwrap(), b"1234");
        assert!(!page.update_tuple(slot, b"123456789abc"));
    }

    #[test]
    fn live_slot_iteration_skips_tombstones() {
        let mut page = table_page();
        for tuple in [b"t0", b"t1", b"t2", b"t3"] {
            page.insert_tuple(tuple).unwrap();
        }
        page.mark_delete(1);
        page.mark_delete(3);

        let mut live = vec![page.first_live_slot().unwrap()];
        while let Some(next) = page.next_live_slot(*live.last().unwrap()) {
            live.push(next);
        }
        assert_eq!(live, vec![0, 2]);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut page = table_page();
        let big = vec![0u8; 1000];
        let mut inserted = 0;
        while page.insert_tuple(&big).is_some() {
            inserted += 1;
        }
        assert_eq!(inserted, 4);
        assert!(page.insert_tuple(&big).is_none());
        // Smaller tuples still fit in the remainder.
        assert!(page.insert_tuple(b"small").is_some());
    }
}
