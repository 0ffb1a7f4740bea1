//! The catalog: names to on-disk metadata for tables and indexes.
//!
//! The catalog meta page maps table and index ids to the pages holding
//! their serialized metadata. Every structural mutation is written through
//! immediately so a crash before shutdown still finds a coherent catalog.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use log::debug;

use crate::btree::{BPlusTree, KeyCodec};
use crate::buffer_pool::BufferPoolManager;
use crate::errors::EngineError;
use crate::heap::TableHeap;
use crate::record::Schema;
use crate::{IndexId, PageId, Result, TableId, CATALOG_META_PAGE_ID};

const CATALOG_MAGIC: u32 = 0x4341_5431; // "CAT1"
const TABLE_META_MAGIC: u32 = 0x5442_4C4D; // "TBLM"
const INDEX_META_MAGIC: u32 = 0x4944_5845; // "IDXE"

fn put_string(buf: &mut impl BufMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut impl Buf) -> Result<String> {
    let len = buf.get_u32_le() as usize;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| EngineError::Corrupted("name is not utf-8".into()))
}

/// The persistent root of the catalog: which page holds each table's and
/// each index's metadata.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CatalogMeta {
    pub table_meta_pages: BTreeMap<TableId, PageId>,
    pub index_meta_pages: BTreeMap<IndexId, PageId>,
}

impl CatalogMeta {
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(CATALOG_MAGIC);
        buf.put_u32_le(self.table_meta_pages.len() as u32);
        buf.put_u32_le(self.index_meta_pages.len() as u32);
        for (&table_id, &page_id) in &self.table_meta_pages {
            buf.put_i32_le(table_id);
            buf.put_i32_le(page_id);
        }
        for (&index_id, &page_id) in &self.index_meta_pages {
            buf.put_i32_le(index_id);
            buf.put_i32_le(page_id);
        }
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        let magic = buf.get_u32_le();
        if magic != CATALOG_MAGIC {
            return Err(EngineError::Corrupted(format!(
                "bad catalog magic {magic:#x}"
            )));
        }
        let table_count = buf.get_u32_le() as usize;
        let index_count = buf.get_u32_le() as usize;
        let mut meta = CatalogMeta::default();
        for _ in 0..table_count {
            let table_id = buf.get_i32_le();
            let page_id = buf.get_i32_le();
            meta.table_meta_pages.insert(table_id, page_id);
        }
        for _ in 0..index_count {
            let index_id = buf.get_i32_le();
            let page_id = buf.get_i32_le();
            meta.index_meta_pages.insert(index_id, page_id);
        }
        Ok(meta)
    }
}

/// Per-table persistent metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub table_id: TableId,
    pub name: String,
    pub first_page_id: PageId,
    pub schema: Schema,
}

impl TableMetadata {
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(TABLE_META_MAGIC);
        buf.put_i32_le(self.table_id);
        put_string(buf, &self.name);
        buf.put_i32_le(self.first_page_id);
        self.schema.serialize(buf);
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        let magic = buf.get_u32_le();
        if magic != TABLE_META_MAGIC {
            return Err(EngineError::Corrupted(format!(
                "bad table metadata magic {magic:#x}"
            )));
        }
        let table_id = buf.get_i32_le();
        let name = get_string(buf)?;
        let first_page_id = buf.get_i32_le();
        let schema = Schema::deserialize(buf)?;
        Ok(Self {
            table_id,
            name,
            first_page_id,
            schema,
        })
    }
}

/// Per-index persistent metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub index_id: IndexId,
    pub name: String,
    pub table_id: TableId,
    pub key_column_indexes: Vec<u32>,
}

impl IndexMetadata {
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(INDEX_META_MAGIC);
        buf.put_i32_le(self.index_id);
        put_string(buf, &self.name);
        buf.put_i32_le(self.table_id);
        buf.put_u32_le(self.key_column_indexes.len() as u32);
        for &column in &self.key_column_indexes {
            buf.put_u32_le(column);
        }
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        let magic = buf.get_u32_le();
        if magic != INDEX_META_MAGIC {
            return Err(EngineError::Corrupted(format!(
                "bad index metadata magic {magic:#x}"
            )));
        }
        let index_id = buf.get_i32_le();
        let name = get_string(buf)?;
        let table_id = buf.get_i32_le();
        let count = buf.get_u32_le() as usize;
        let mut key_column_indexes = Vec::with_capacity(count);
        for _ in 0..count {
            key_column_indexes.push(buf.get_u32_le());
        }
        Ok(Self {
            index_id,
            name,
            table_id,
            key_column_indexes,
        })
    }
}

/// Runtime handle for one table: its metadata plus the opened heap.
pub struct TableInfo {
    meta: TableMetadata,
    heap: TableHeap,
}

impl TableInfo {
    pub fn table_id(&self) -> TableId {
        self.meta.table_id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn schema(&self) -> &Schema {
        &self.meta.schema
    }

    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }

    pub fn first_page_id(&self) -> PageId {
        self.meta.first_page_id
    }
}

/// Runtime handle for one index: its metadata plus the opened tree.
pub struct IndexInfo {
    meta: IndexMetadata,
    tree: BPlusTree,
}

impl IndexInfo {
    pub fn index_id(&self) -> IndexId {
        self.meta.index_id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn table_id(&self) -> TableId {
        self.meta.table_id
    }

    pub fn key_column_indexes(&self) -> &[u32] {
        &self.meta.key_column_indexes
    }

    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }
}

/// Resolves names to handles and keeps the on-disk catalog in sync.
pub struct CatalogManager {
    bpm: Arc<BufferPoolManager>,
    meta: CatalogMeta,
    tables: HashMap<TableId, Arc<TableInfo>>,
    table_names: HashMap<String, TableId>,
    indexes: HashMap<IndexId, Arc<IndexInfo>>,
    /// table name -> index name -> index id
    index_names: HashMap<String, HashMap<String, IndexId>>,
    next_table_id: TableId,
    next_index_id: IndexId,
}

impl CatalogManager {
    /// With `init`, starts a fresh catalog and persists its meta page;
    /// otherwise reloads every table and index recorded on disk.
    pub fn new(bpm: Arc<BufferPoolManager>, init: bool) -> Result<Self> {
        let mut catalog = Self {
            bpm,
            meta: CatalogMeta::default(),
            tables: HashMap::new(),
            table_names: HashMap::new(),
            indexes: HashMap::new(),
            index_names: HashMap::new(),
            next_table_id: 0,
            next_index_id: 0,
        };
        if init {
            catalog.flush_catalog_meta_page()?;
            return Ok(catalog);
        }

        catalog.meta = {
            let guard = catalog.bpm.fetch_page(CATALOG_META_PAGE_ID)?;
            let page = guard.read();
            CatalogMeta::deserialize(&mut &page.data[..])?
        };
        for (&table_id, &page_id) in &catalog.meta.table_meta_pages.clone() {
            catalog.load_table(table_id, page_id)?;
        }
        for (&index_id, &page_id) in &catalog.meta.index_meta_pages.clone() {
            catalog.load_index(index_id, page_id)?;
        }
        catalog.next_table_id = catalog
            .meta
            .table_meta_pages
            .keys()
            .max()
            .map_or(0, |&id| id + 1);
        catalog.next_index_id = catalog
            .meta
            .index_meta_pages
            .keys()
            .max()
            .map_or(0, |&id| id + 1);
        Ok(catalog)
    }

    pub fn create_table(&mut self, table_name: &str, schema: Schema) -> Result<Arc<TableInfo>> {
        if self.table_names.contains_key(table_name) {
            return Err(EngineError::TableAlreadyExists(table_name.to_string()));
        }
        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let heap = TableHeap::create(self.bpm.clone(), schema.clone())?;
        let meta = TableMetadata {
            table_id,
            name: table_name.to_string(),
            first_page_id: heap.first_page_id(),
            schema,
        };

        let meta_page_id = {
            let guard = self.bpm.new_page()?;
            let mut page = guard.write();
            let page_id = guard.page_id();
            meta.serialize(&mut &mut page.data[..]);
            page_id
        };
        self.meta.table_meta_pages.insert(table_id, meta_page_id);

        let info = Arc::new(TableInfo { meta, heap });
        self.tables.insert(table_id, info.clone());
        self.table_names.insert(table_name.to_string(), table_id);
        self.flush_catalog_meta_page()?;
        debug!("created table {table_name:?} (id {table_id})");
        Ok(info)
    }

    pub fn get_table(&self, table_name: &str) -> Result<Arc<TableInfo>> {
        let table_id = self
            .table_names
            .get(table_name)
            .ok_or_else(|| EngineError::TableNotFound(table_name.to_string()))?;
        Ok(self.tables[table_id].clone())
    }

    pub fn get_table_by_id(&self, table_id: TableId) -> Result<Arc<TableInfo>> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound(format!("#{table_id}")))
    }

    pub fn get_tables(&self) -> Vec<Arc<TableInfo>> {
        let mut tables: Vec<_> = self.tables.values().cloned().collect();
        tables.sort_by_key(|t| t.table_id());
        tables
    }

    /// Drops the table, its heap pages, its metadata page, and every index
    /// built over it.
    pub fn drop_table(&mut self, table_name: &str) -> Result<()> {
        let table = self.get_table(table_name)?;
        let index_names: Vec<String> = self
            .index_names
            .get(table_name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        for index_name in index_names {
            self.drop_index(table_name, &index_name)?;
        }
        self.index_names.remove(table_name);

        table.heap().delete_table()?;
        if let Some(meta_page_id) = self.meta.table_meta_pages.remove(&table.table_id()) {
            self.bpm.delete_page(meta_page_id)?;
        }
        self.tables.remove(&table.table_id());
        self.table_names.remove(table_name);
        self.flush_catalog_meta_page()?;
        debug!("dropped table {table_name:?}");
        Ok(())
    }

    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_columns: &[&str],
    ) -> Result<Arc<IndexInfo>> {
        let table = self.get_table(table_name)?;
        if self
            .index_names
            .get(table_name)
            .is_some_and(|m| m.contains_key(index_name))
        {
            return Err(EngineError::IndexAlreadyExists(index_name.to_string()));
        }
        let mut key_column_indexes = Vec::with_capacity(key_columns.len());
        for &column_name in key_columns {
            let index = table
                .schema()
                .column_index(column_name)
                .ok_or_else(|| EngineError::ColumnNotFound(column_name.to_string()))?;
            key_column_indexes.push(index as u32);
        }

        let index_id = self.next_index_id;
        self.next_index_id += 1;
        let meta = IndexMetadata {
            index_id,
            name: index_name.to_string(),
            table_id: table.table_id(),
            key_column_indexes: key_column_indexes.clone(),
        };

        let meta_page_id = {
            let guard = self.bpm.new_page()?;
            let mut page = guard.write();
            let page_id = guard.page_id();
            meta.serialize(&mut &mut page.data[..]);
            page_id
        };
        self.meta.index_meta_pages.insert(index_id, meta_page_id);

        let key_schema = table.schema().project(&key_column_indexes);
        let tree = BPlusTree::new(index_id, self.bpm.clone(), KeyCodec::new(key_schema), None, None)?;
        let info = Arc::new(IndexInfo { meta, tree });
        self.indexes.insert(index_id, info.clone());
        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), index_id);
        self.flush_catalog_meta_page()?;
        debug!("created index {index_name:?} on {table_name:?} (id {index_id})");
        Ok(info)
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> Result<Arc<IndexInfo>> {
        let index_id = self
            .index_names
            .get(table_name)
            .and_then(|m| m.get(index_name))
            .ok_or_else(|| EngineError::IndexNotFound(index_name.to_string()))?;
        Ok(self.indexes[index_id].clone())
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Result<Vec<Arc<IndexInfo>>> {
        if !self.table_names.contains_key(table_name) {
            return Err(EngineError::TableNotFound(table_name.to_string()));
        }
        let mut indexes: Vec<_> = self
            .index_names
            .get(table_name)
            .map(|m| m.values().map(|id| self.indexes[id].clone()).collect())
            .unwrap_or_default();
        indexes.sort_by_key(|i| i.index_id());
        Ok(indexes)
    }

    /// Drops the index: its tree pages, its roots entry, and its metadata
    /// page.
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> Result<()> {
        let index = self.get_index(table_name, index_name)?;
        index.tree().destroy()?;
        if let Some(meta_page_id) = self.meta.index_meta_pages.remove(&index.index_id()) {
            self.bpm.delete_page(meta_page_id)?;
        }
        self.indexes.remove(&index.index_id());
        if let Some(names) = self.index_names.get_mut(table_name) {
            names.remove(index_name);
        }
        self.flush_catalog_meta_page()?;
        debug!("dropped index {index_name:?} on {table_name:?}");
        Ok(())
    }

    /// Reserializes the catalog meta into its page and writes it through.
    pub fn flush_catalog_meta_page(&self) -> Result<()> {
        {
            let guard = self.bpm.fetch_page(CATALOG_META_PAGE_ID)?;
            let mut page = guard.write();
            page.data.fill(0);
            self.meta.serialize(&mut &mut page.data[..]);
        }
        self.bpm.flush_page(CATALOG_META_PAGE_ID)?;
        Ok(())
    }

    fn load_table(&mut self, table_id: TableId, meta_page_id: PageId) -> Result<()> {
        let meta = {
            let guard = self.bpm.fetch_page(meta_page_id)?;
            let page = guard.read();
            TableMetadata::deserialize(&mut &page.data[..])?
        };
        if meta.table_id != table_id {
            return Err(EngineError::Corrupted(format!(
                "table metadata page {meta_page_id} holds table {} but the catalog expects {table_id}",
                meta.table_id
            )));
        }
        let heap = TableHeap::open(self.bpm.clone(), meta.first_page_id, meta.schema.clone());
        self.table_names.insert(meta.name.clone(), table_id);
        self.tables.insert(table_id, Arc::new(TableInfo { meta, heap }));
        Ok(())
    }

    fn load_index(&mut self, index_id: IndexId, meta_page_id: PageId) -> Result<()> {
        let meta = {
            let guard = self.bpm.fetch_page(meta_page_id)?;
            let page = guard.read();
            IndexMetadata::deserialize(&mut &page.data[..])?
        };
        if meta.index_id != index_id {
            return Err(EngineError::Corrupted(format!(
                "index metadata page {meta_page_id} holds index {} but the catalog expects {index_id}",
                meta.index_id
            )));
        }
        let table = self.get_table_by_id(meta.table_id)?;
        let key_schema = table.schema().project(&meta.key_column_indexes);
        let tree = BPlusTree::new(index_id, self.bpm.clone(), KeyCodec::new(key_schema), None, None)?;
        self.index_names
            .entry(table.name().to_string())
            .or_default()
            .insert(meta.name.clone(), index_id);
        self.indexes.insert(index_id, Arc::new(IndexInfo { meta, tree }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Column;

    #[test]
    fn catalog_meta_round_trip() {
        let mut meta = CatalogMeta::default();
        meta.table_meta_pages.insert(0, 5);
        meta.table_meta_pages.insert(3, 9);
        meta.index_meta_pages.insert(1, 12);
        let mut buf = Vec::new();
        meta.serialize(&mut buf);
        assert_eq!(CatalogMeta::deserialize(&mut buf.as_slice()).unwrap(), meta);
    }

    #[test]
    fn table_metadata_round_trip() {
        let meta = TableMetadata {
            table_id: 4,
            name: "accounts".into(),
            first_page_id: 17,
            schema: Schema::new(vec![
                Column::new_int("id", 0, false, true),
                Column::new_char("owner", 20, 1, true, false),
            ]),
        };
        let mut buf = Vec::new();
        meta.serialize(&mut buf);
        assert_eq!(TableMetadata::deserialize(&mut buf.as_slice()).unwrap(), meta);
    }

    #[test]
    fn index_metadata_round_trip() {
        let meta = IndexMetadata {
            index_id: 2,
            name: "accounts_by_owner".into(),
            table_id: 4,
            key_column_indexes: vec![1, 0],
        };
        let mut buf = Vec::new();
        meta.serialize(&mut buf);
        assert_eq!(IndexMetadata::deserialize(&mut buf.as_slice()).unwrap(), meta);
    }

    #[test]
    fn corrupted_magic_is_fatal() {
        let mut buf = Vec::new();
        CatalogMeta::default().serialize(&mut buf);
        buf[0] ^= 0x01;
        assert!(matches!(
            CatalogMeta::deserialize(&mut buf.as_slice()),
            Err(EngineError::Corrupted(_))
        ));
    }
}
