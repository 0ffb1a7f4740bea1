use bytes::{Buf, BufMut};

use crate::errors::EngineError;
use crate::record::{Schema, TypeId};
use crate::{PageId, Result, INVALID_PAGE_ID};

/// Locates a tuple: the page it lives on and its slot in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub page_id: PageId,
    pub slot: u32,
}

/// The "no tuple" sentinel used by iterators and fresh rows.
pub const INVALID_ROW_ID: RowId = RowId {
    page_id: INVALID_PAGE_ID,
    slot: 0,
};

impl RowId {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn is_valid(&self) -> bool {
        self.page_id != INVALID_PAGE_ID
    }
}

impl Default for RowId {
    fn default() -> Self {
        INVALID_ROW_ID
    }
}

/// A single value of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Int(i32),
    Float(f32),
    Char(String),
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }
}

/// A tuple: its fields in schema order plus the id locating it on disk
/// (invalid until the row is stored).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub row_id: RowId,
    pub fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            row_id: INVALID_ROW_ID,
            fields,
        }
    }

    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// Serialized image: a null bitmap (bit `i` set means column `i` is
    /// null) followed by the non-null fields in schema order. Ints and
    /// floats are 4-byte little-endian; chars are length-prefixed bytes.
    pub fn serialize(&self, schema: &Schema, buf: &mut impl BufMut) {
        debug_assert_eq!(self.fields.len(), schema.column_count());
        let mut bitmap = vec![0u8; schema.column_count().div_ceil(8)];
        for (i, field) in self.fields.iter().enumerate() {
            if field.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.put_slice(&bitmap);
        for field in &self.fields {
            match field {
                Field::Null => {}
                Field::Int(v) => buf.put_i32_le(*v),
                Field::Float(v) => buf.put_f32_le(*v),
                Field::Char(v) => {
                    buf.put_u32_le(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
            }
        }
    }

    pub fn deserialize(schema: &Schema, buf: &mut impl Buf) -> Result<Self> {
        let mut bitmap = vec![0u8; schema.column_count().div_ceil(8)];
        buf.copy_to_slice(&mut bitmap);
        let mut fields = Vec::with_capacity(schema.column_count());
        for (i, column) in schema.columns().iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                fields.push(Field::Null);
                continue;
            }
            let field = match column.type_id {
                TypeId::Int => Field::Int(buf.get_i32_le()),
                TypeId::Float => Field::Float(buf.get_f32_le()),
                TypeId::Char => {
                    let len = buf.get_u32_le() as usize;
                    let mut bytes = vec![0u8; len];
                    buf.copy_to_slice(&mut bytes);
                    Field::Char(String::from_utf8(bytes).map_err(|_| {
                        EngineError::Corrupted("char field is not utf-8".into())
                    })?)
                }
            };
            fields.push(field);
        }
        Ok(Self {
            row_id: INVALID_ROW_ID,
            fields,
        })
    }

    pub fn serialized_size(&self, schema: &Schema) -> usize {
        let mut size = schema.column_count().div_ceil(8);
        for field in &self.fields {
            size += match field {
                Field::Null => 0,
                Field::Int(_) | Field::Float(_) => 4,
                Field::Char(v) => 4 + v.len(),
            };
        }
        size
    }

    /// Projects the fields named by `key_indexes` into a key row.
    pub fn key_row(&self, key_indexes: &[u32]) -> Row {
        Row::new(
            key_indexes
                .iter()
                .map(|&i| self.fields[i as usize].clone())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new_int("id", 0, false, true),
            Column::new_char("name", 16, 1, true, false),
            Column::new_float("balance", 2, true, false),
        ])
    }

    #[test]
    fn round_trip() {
        let schema = schema();
        let row = Row::new(vec![
            Field::Int(42),
            Field::Char("ada".into()),
            Field::Float(2.5),
        ]);
        let mut buf = Vec::new();
        row.serialize(&schema, &mut buf);
        assert_eq!(buf.len(), row.serialized_size(&schema));
        assert_eq!(Row::deserialize(&schema, &mut buf.as_slice()).unwrap(), row);
    }

    #[test]
    fn null_fields_round_trip_through_the_bitmap() {
        let schema = schema();
        let row = Row::new(vec![Field::Int(7), Field::Null, Field::Null]);
        let mut buf = Vec::new();
        row.serialize(&schema, &mut buf);
        // Bitmap byte plus the one live int.
        assert_eq!(buf.len(), 5);
        assert_eq!(Row::deserialize(&schema, &mut buf.as_slice()).unwrap(), row);
    }

    #[test]
    fn key_projection_picks_named_fields() {
        let row = Row::new(vec![
            Field::Int(1),
            Field::Char("k".into()),
            Field::Float(0.5),
        ]);
        let key = row.key_row(&[1]);
        assert_eq!(key.fields, vec![Field::Char("k".into())]);
    }
}
