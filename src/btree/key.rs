//! Fixed-width, byte-comparable key encoding.
//!
//! Keys are serialized so that plain byte comparison agrees with the logical
//! order of the key columns. Page-level code then never needs the schema:
//! `memcmp` order is key order.

use crate::record::{Field, Row, Schema, TypeId};

/// Encodes key rows for one index: the key schema plus the derived fixed
/// key width.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    schema: Schema,
    key_size: usize,
}

impl KeyCodec {
    pub fn new(key_schema: Schema) -> Self {
        let key_size = key_schema
            .columns()
            .iter()
            .map(|c| c.length as usize)
            .sum();
        Self {
            schema: key_schema,
            key_size,
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Serializes the key row into its fixed-width ordered image. Null
    /// fields encode as the type's minimum (all zeroes).
    pub fn encode(&self, key: &Row) -> Vec<u8> {
        debug_assert_eq!(key.fields.len(), self.schema.column_count());
        let mut out = Vec::with_capacity(self.key_size);
        for (field, column) in key.fields.iter().zip(self.schema.columns()) {
            match (field, column.type_id) {
                (Field::Null, _) => out.extend(std::iter::repeat(0).take(column.length as usize)),
                (Field::Int(v), TypeId::Int) => {
                    out.extend(((*v as u32) ^ 0x8000_0000).to_be_bytes())
                }
                (Field::Float(v), TypeId::Float) => out.extend(order_float(*v).to_be_bytes()),
                (Field::Char(s), TypeId::Char) => {
                    let len = column.length as usize;
                    let bytes = s.as_bytes();
                    let take = bytes.len().min(len);
                    out.extend(&bytes[..take]);
                    out.extend(std::iter::repeat(0).take(len - take));
                }
                (field, type_id) => {
                    panic!("key field {field:?} does not match column type {type_id:?}")
                }
            }
        }
        out
    }

    /// Recovers the logical key row from its encoded image. Char columns
    /// come back without their NUL padding.
    pub fn decode(&self, mut bytes: &[u8]) -> Row {
        let mut fields = Vec::with_capacity(self.schema.column_count());
        for column in self.schema.columns() {
            let width = column.length as usize;
            let (head, rest) = bytes.split_at(width);
            bytes = rest;
            let field = match column.type_id {
                TypeId::Int => {
                    let raw = u32::from_be_bytes(head.try_into().unwrap());
                    Field::Int((raw ^ 0x8000_0000) as i32)
                }
                TypeId::Float => {
                    let raw = u32::from_be_bytes(head.try_into().unwrap());
                    Field::Float(f32::from_bits(unorder_float(raw)))
                }
                TypeId::Char => {
                    let end = head.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    Field::Char(String::from_utf8_lossy(&head[..end]).into_owned())
                }
            };
            fields.push(field);
        }
        Row::new(fields)
    }
}

/// Maps float bits so unsigned comparison matches numeric order: positive
/// floats get the sign bit set, negatives are bitwise inverted.
fn order_float(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn unorder_float(raw: u32) -> u32 {
    if raw & 0x8000_0000 != 0 {
        raw & 0x7fff_ffff
    } else {
        !raw
    }
}
