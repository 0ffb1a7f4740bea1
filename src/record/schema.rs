use bytes::{Buf, BufMut};

use crate::errors::EngineError;
use crate::record::Column;
use crate::Result;

const SCHEMA_MAGIC: u32 = 0x5343_484D; // "SCHM"

/// An ordered sequence of column descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Projects the columns at `indexes` into a key schema, re-numbering
    /// their table positions to the projection order.
    pub fn project(&self, indexes: &[u32]) -> Self {
        let columns = indexes
            .iter()
            .enumerate()
            .map(|(at, &i)| {
                let mut column = self.columns[i as usize].clone();
                column.table_index = at as u32;
                column
            })
            .collect();
        Self { columns }
    }

    /// Count-prefixed column records behind a magic number.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(SCHEMA_MAGIC);
        buf.put_u32_le(self.columns.len() as u32);
        for column in &self.columns {
            column.serialize(buf);
        }
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        let magic = buf.get_u32_le();
        if magic != SCHEMA_MAGIC {
            return Err(EngineError::Corrupted(format!(
                "bad schema magic {magic:#x}"
            )));
        }
        let count = buf.get_u32_le() as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Column::deserialize(buf)?);
        }
        Ok(Self { columns })
    }

    pub fn serialized_size(&self) -> usize {
        8 + self.columns.iter().map(Column::serialized_size).sum::<usize>()
    }
}
