use crate::heap::TableHeap;
use crate::record::{Row, RowId};

/// Forward iterator over a table heap's live tuples.
///
/// Carries only the next row id between steps; each advance re-fetches the
/// page, so no pin outlives a call.
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    cursor: Option<RowId>,
}

impl<'a> TableIterator<'a> {
    pub(crate) fn new(heap: &'a TableHeap, cursor: Option<RowId>) -> Self {
        Self { heap, cursor }
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        let row_id = self.cursor?;
        let row = self.heap.get_tuple(row_id).ok().flatten()?;
        self.cursor = self.heap.next_row_id(row_id).ok().flatten();
        Some(row)
    }
}
