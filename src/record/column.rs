use bytes::{Buf, BufMut};

use crate::errors::EngineError;
use crate::Result;

const COLUMN_MAGIC: u32 = 0x434F_4C4D; // "COLM"

/// The value types a column may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeId {
    Int,
    Float,
    Char,
}

impl TypeId {
    fn tag(self) -> u8 {
        match self {
            TypeId::Int => 1,
            TypeId::Float => 2,
            TypeId::Char => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(TypeId::Int),
            2 => Ok(TypeId::Float),
            3 => Ok(TypeId::Char),
            other => Err(EngineError::Corrupted(format!(
                "unknown column type tag {other}"
            ))),
        }
    }
}

/// A column descriptor: name, type, fixed length, position in the table
/// schema, and the nullable/unique constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_id: TypeId,
    pub length: u32,
    pub table_index: u32,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub fn new_int(name: &str, table_index: u32, nullable: bool, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            type_id: TypeId::Int,
            length: 4,
            table_index,
            nullable,
            unique,
        }
    }

    pub fn new_float(name: &str, table_index: u32, nullable: bool, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            type_id: TypeId::Float,
            length: 4,
            table_index,
            nullable,
            unique,
        }
    }

    pub fn new_char(name: &str, length: u32, table_index: u32, nullable: bool, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            type_id: TypeId::Char,
            length,
            table_index,
            nullable,
            unique,
        }
    }

    /// `{magic, name NUL-terminated, type tag, length, table_index,
    /// nullable, unique}`, integers little-endian.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(COLUMN_MAGIC);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);
        buf.put_u8(self.type_id.tag());
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.table_index);
        buf.put_u8(self.nullable as u8);
        buf.put_u8(self.unique as u8);
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        let magic = buf.get_u32_le();
        if magic != COLUMN_MAGIC {
            return Err(EngineError::Corrupted(format!(
                "bad column magic {magic:#x}"
            )));
        }
        let mut name = Vec::new();
        loop {
            let byte = buf.get_u8();
            if byte == 0 {
                break;
            }
            name.push(byte);
        }
        let name = String::from_utf8(name)
            .map_err(|_| EngineError::Corrupted("column name is not utf-8".into()))?;
        let type_id = TypeId::from_tag(buf.get_u8())?;
        let length = buf.get_u32_le();
        let table_index = buf.get_u32_le();
        let nullable = buf.get_u8() != 0;
        let unique = buf.get_u8() != 0;
        Ok(Self {
            name,
            type_id,
            length,
            table_index,
            nullable,
            unique,
        })
    }

    pub fn serialized_size(&self) -> usize {
        4 + self.name.len() + 1 + 1 + 4 + 4 + 1 + 1
    }
}
