//! Columns, schemas, rows and the identifiers that locate tuples.

pub mod column;
pub mod row;
pub mod schema;

pub use column::{Column, TypeId};
pub use row::{Field, Row, RowId, INVALID_ROW_ID};
pub use schema::Schema;
