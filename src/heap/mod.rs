//! Heap-organized tables: a linked list of slotted pages.

pub mod iterator;

use std::sync::Arc;

use crate::buffer_pool::BufferPoolManager;
use crate::errors::EngineError;
use crate::page::table_page::MAX_TUPLE_SIZE;
use crate::record::{Row, RowId, Schema};
use crate::{PageId, Result, INVALID_PAGE_ID};

pub use iterator::TableIterator;

/// A table's storage: pages threaded by their next pointers, rooted at the
/// first page recorded in the table's metadata.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    schema: Schema,
}

impl TableHeap {
    /// Creates an empty heap with one fresh page.
    pub fn create(bpm: Arc<BufferPoolManager>, schema: Schema) -> Result<Self> {
        let first_page_id = {
            let guard = bpm.new_page()?;
            guard.write().init_table_page(INVALID_PAGE_ID);
            guard.page_id()
        };
        Ok(Self {
            bpm,
            first_page_id,
            schema,
        })
    }

    /// Opens an existing heap rooted at `first_page_id`.
    pub fn open(bpm: Arc<BufferPoolManager>, first_page_id: PageId, schema: Schema) -> Self {
        Self {
            bpm,
            first_page_id,
            schema,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// First-fit insert: walk the chain, take the first page with room, and
    /// append a fresh page when the tail is full. The stored row id is
    /// written back into `row`.
    pub fn insert_tuple(&self, row: &mut Row) -> Result<RowId> {
        let mut bytes = Vec::with_capacity(row.serialized_size(&self.schema));
        row.serialize(&self.schema, &mut bytes);
        if bytes.len() > MAX_TUPLE_SIZE {
            return Err(EngineError::TupleTooLarge(bytes.len()));
        }

        let mut page_id = self.first_page_id;
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let fits = guard.read().table_can_fit(bytes.len());
            if fits {
                if let Some(slot) = guard.write().insert_tuple(&bytes) {
                    row.row_id = RowId::new(page_id, slot);
                    return Ok(row.row_id);
                }
            }
            let next_page_id = guard.read().table_next_page_id();
            if next_page_id != INVALID_PAGE_ID {
                drop(guard);
                page_id = next_page_id;
                continue;
            }
            // Tail is full: splice a new page in behind it and retry there.
            let new_guard = self.bpm.new_page()?;
            let new_page_id = new_guard.page_id();
            new_guard.write().init_table_page(page_id);
            guard.write().set_table_next_page_id(new_page_id);
            drop(new_guard);
            drop(guard);
            page_id = new_page_id;
        }
    }

    /// Reads the tuple at `row_id`, or `None` when the slot holds nothing
    /// live.
    pub fn get_tuple(&self, row_id: RowId) -> Result<Option<Row>> {
        if !row_id.is_valid() {
            return Ok(None);
        }
        let guard = self.bpm.fetch_page(row_id.page_id)?;
        let page = guard.read();
        let Some(bytes) = page.get_tuple(row_id.slot) else {
            return Ok(None);
        };
        let mut row = Row::deserialize(&self.schema, &mut &bytes[..])?;
        row.row_id = row_id;
        Ok(Some(row))
    }

    /// Tombstones the tuple. Returns false when there is nothing to mark.
    pub fn mark_delete(&self, row_id: RowId) -> Result<bool> {
        if !row_id.is_valid() {
            return Ok(false);
        }
        let guard = self.bpm.fetch_page(row_id.page_id)?;
        let live = guard.read().get_tuple(row_id.slot).is_some();
        if !live {
            return Ok(false);
        }
        let deleted = guard.write().mark_delete(row_id.slot);
        Ok(deleted)
    }

    /// Reclaims the tombstoned slot's space.
    pub fn apply_delete(&self, row_id: RowId) -> Result<()> {
        if !row_id.is_valid() {
            return Ok(());
        }
        let guard = self.bpm.fetch_page(row_id.page_id)?;
        guard.write().apply_delete(row_id.slot);
        Ok(())
    }

    /// Clears a tombstone set by [`TableHeap::mark_delete`].
    pub fn rollback_delete(&self, row_id: RowId) -> Result<()> {
        if !row_id.is_valid() {
            return Ok(());
        }
        let guard = self.bpm.fetch_page(row_id.page_id)?;
        guard.write().rollback_delete(row_id.slot);
        Ok(())
    }

    /// In-place update. Returns false when the new image does not fit the
    /// stored one; callers translate that into delete-then-insert.
    pub fn update_tuple(&self, row: &mut Row, row_id: RowId) -> Result<bool> {
        if !row_id.is_valid() {
            return Ok(false);
        }
        let mut bytes = Vec::with_capacity(row.serialized_size(&self.schema));
        row.serialize(&self.schema, &mut bytes);
        let guard = self.bpm.fetch_page(row_id.page_id)?;
        let live = guard.read().get_tuple(row_id.slot).is_some();
        if !live {
            return Ok(false);
        }
        if !guard.write().update_tuple(row_id.slot, &bytes) {
            return Ok(false);
        }
        row.row_id = row_id;
        Ok(true)
    }

    /// Frees the whole page chain.
    pub fn delete_table(&self) -> Result<()> {
        let mut page_id = self.first_page_id;
        while page_id != INVALID_PAGE_ID {
            let next_page_id = {
                let guard = self.bpm.fetch_page(page_id)?;
                let next = guard.read().table_next_page_id();
                next
            };
            self.bpm.delete_page(page_id)?;
            page_id = next_page_id;
        }
        Ok(())
    }

    /// Forward iterator over the live tuples in (page chain, slot) order.
    pub fn iter(&self) -> Result<TableIterator<'_>> {
        let first = self.first_row_id()?;
        Ok(TableIterator::new(self, first))
    }

    fn first_row_id(&self) -> Result<Option<RowId>> {
        self.first_live_from(self.first_page_id)
    }

    /// Next live tuple after `row_id`, crossing page boundaries.
    pub(crate) fn next_row_id(&self, row_id: RowId) -> Result<Option<RowId>> {
        let next_page_id = {
            let guard = self.bpm.fetch_page(row_id.page_id)?;
            let page = guard.read();
            if let Some(slot) = page.next_live_slot(row_id.slot) {
                return Ok(Some(RowId::new(row_id.page_id, slot)));
            }
            page.table_next_page_id()
        };
        if next_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        self.first_live_from(next_page_id)
    }

    fn first_live_from(&self, start_page_id: PageId) -> Result<Option<RowId>> {
        let mut page_id = start_page_id;
        while page_id != INVALID_PAGE_ID {
            let guard = self.bpm.fetch_page(page_id)?;
            let page = guard.read();
            if let Some(slot) = page.first_live_slot() {
                return Ok(Some(RowId::new(page_id, slot)));
            }
            page_id = page.table_next_page_id();
        }
        Ok(None)
    }
}
