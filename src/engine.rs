//! Wires the storage stack together: one database file behind a disk
//! manager, a buffer pool over it, and the catalog on top.

use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer_pool::BufferPoolManager;
use crate::catalog::CatalogManager;
use crate::disk_manager::DiskManager;
use crate::errors::EngineError;
use crate::{Result, CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID};

pub const DEFAULT_POOL_SIZE: usize = 1024;

pub struct StorageEngine {
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
    catalog: CatalogManager,
}

impl StorageEngine {
    /// Creates a fresh database file, reserving the catalog meta page and
    /// the index roots page as logical pages 0 and 1.
    pub fn create<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        let disk = Arc::new(DiskManager::open(&path)?);
        for expected in [CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID] {
            let got = disk.allocate_page()?;
            if got != expected {
                return Err(EngineError::Corrupted(format!(
                    "fresh database file handed out page {got} where {expected} was expected; \
                     the file is not empty"
                )));
            }
        }
        let bpm = Arc::new(BufferPoolManager::new(pool_size, disk.clone()));
        let catalog = CatalogManager::new(bpm.clone(), true)?;
        debug!("created database at {:?}", path.as_ref());
        Ok(Self { disk, bpm, catalog })
    }

    /// Opens an existing database file and reloads its catalog.
    pub fn open<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        let disk = Arc::new(DiskManager::open(&path)?);
        for reserved in [CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID] {
            if disk.is_page_free(reserved)? {
                return Err(EngineError::Corrupted(format!(
                    "reserved page {reserved} is unallocated; not a database file"
                )));
            }
        }
        let bpm = Arc::new(BufferPoolManager::new(pool_size, disk.clone()));
        let catalog = CatalogManager::new(bpm.clone(), false)?;
        debug!("opened database at {:?}", path.as_ref());
        Ok(Self { disk, bpm, catalog })
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut CatalogManager {
        &mut self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Forces every buffered page and the file meta down to disk.
    pub fn flush(&self) -> Result<()> {
        self.catalog.flush_catalog_meta_page()?;
        self.bpm.flush_all_pages()
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("failed to flush storage engine on shutdown: {e}");
        }
    }
}
