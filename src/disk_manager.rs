use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::bitmap::{BitmapPage, BITMAP_CAPACITY};
use crate::errors::EngineError;
use crate::{PageId, Result, PAGE_SIZE};

/// Physical page 0 holds the file metadata.
const META_PAGE_ID: i64 = 0;

/// File-level metadata persisted on physical page 0.
///
/// Layout: `{num_allocated_pages: u32, num_extents: u32, extent_used: [u32]}`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiskFileMeta {
    pub num_allocated_pages: u32,
    pub extent_used: Vec<u32>,
}

impl DiskFileMeta {
    pub fn num_extents(&self) -> u32 {
        self.extent_used.len() as u32
    }

    fn deserialize(buf: &[u8; PAGE_SIZE]) -> Self {
        let num_allocated_pages = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let num_extents = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let mut extent_used = Vec::with_capacity(num_extents as usize);
        for i in 0..num_extents as usize {
            let at = 8 + i * 4;
            extent_used.push(u32::from_le_bytes(buf[at..at + 4].try_into().unwrap()));
        }
        Self {
            num_allocated_pages,
            extent_used,
        }
    }

    fn serialize(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf[0..4].copy_from_slice(&self.num_allocated_pages.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_extents().to_le_bytes());
        for (i, used) in self.extent_used.iter().enumerate() {
            let at = 8 + i * 4;
            buf[at..at + 4].copy_from_slice(&used.to_le_bytes());
        }
    }
}

struct DiskInner {
    file: File,
    meta: DiskFileMeta,
    closed: bool,
}

/// Owns the database file. Translates logical page ids to physical offsets
/// through the extent layout and tracks allocation in per-extent bitmaps.
///
/// Layout of the file: physical page 0 is the meta page; after it, extents of
/// `1 + BITMAP_CAPACITY` pages each (one bitmap page followed by its data
/// pages). All file operations are serialized by one internal mutex.
pub struct DiskManager {
    inner: Mutex<DiskInner>,
}

impl DiskManager {
    /// Opens (or creates) the database file and loads the meta page.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut inner = DiskInner {
            file,
            meta: DiskFileMeta::default(),
            closed: false,
        };
        let mut buf = [0u8; PAGE_SIZE];
        Self::read_physical(&mut inner.file, META_PAGE_ID, &mut buf)?;
        inner.meta = DiskFileMeta::deserialize(&buf);
        debug!(
            "opened database file {:?}: {} pages in {} extents",
            path,
            inner.meta.num_allocated_pages,
            inner.meta.num_extents()
        );
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Reads the logical page into `buf`. Reads past the end of the file
    /// yield zero-filled bytes so a fresh file behaves as all-zero pages.
    pub fn read_page(&self, logical_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if logical_id < 0 {
            return Err(EngineError::InvalidPageId(logical_id));
        }
        let mut inner = self.inner.lock();
        Self::read_physical(&mut inner.file, Self::map_page_id(logical_id), buf)
    }

    pub fn write_page(&self, logical_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if logical_id < 0 {
            return Err(EngineError::InvalidPageId(logical_id));
        }
        let mut inner = self.inner.lock();
        Self::write_physical(&mut inner.file, Self::map_page_id(logical_id), buf)
    }

    /// Reserves a logical page: the first free slot of the first non-full
    /// extent, or slot 0 of a freshly appended extent. The bitmap write is
    /// immediate; the meta page is persisted on [`DiskManager::close`].
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        for extent in 0..inner.meta.extent_used.len() {
            if inner.meta.extent_used[extent] >= BITMAP_CAPACITY {
                continue;
            }
            let bitmap_pid = Self::bitmap_page_id(extent as u32);
            let mut buf = [0u8; PAGE_SIZE];
            Self::read_physical(&mut inner.file, bitmap_pid, &mut buf)?;
            let mut bitmap = BitmapPage::deserialize(&buf);
            if let Some(offset) = bitmap.allocate_page() {
                bitmap.serialize(&mut buf);
                Self::write_physical(&mut inner.file, bitmap_pid, &buf)?;
                inner.meta.extent_used[extent] += 1;
                inner.meta.num_allocated_pages += 1;
                return Ok(extent as PageId * BITMAP_CAPACITY as PageId + offset as PageId);
            }
        }

        // All existing extents are full: materialize a new one in place.
        let extent = inner.meta.num_extents();
        let mut bitmap = BitmapPage::default();
        let offset = bitmap
            .allocate_page()
            .expect("fresh bitmap must have a free slot");
        let mut buf = [0u8; PAGE_SIZE];
        bitmap.serialize(&mut buf);
        Self::write_physical(&mut inner.file, Self::bitmap_page_id(extent), &buf)?;
        inner.meta.extent_used.push(1);
        inner.meta.num_allocated_pages += 1;
        Ok(extent as PageId * BITMAP_CAPACITY as PageId + offset as PageId)
    }

    /// Clears the page's bit in its extent bitmap. Deallocating a page that
    /// is already free (or belongs to no extent) is a no-op.
    pub fn deallocate_page(&self, logical_id: PageId) -> Result<()> {
        if logical_id < 0 {
            return Err(EngineError::InvalidPageId(logical_id));
        }
        let mut inner = self.inner.lock();
        let extent = logical_id as u32 / BITMAP_CAPACITY;
        let offset = logical_id as u32 % BITMAP_CAPACITY;
        if extent >= inner.meta.num_extents() {
            return Ok(());
        }
        let bitmap_pid = Self::bitmap_page_id(extent);
        let mut buf = [0u8; PAGE_SIZE];
        Self::read_physical(&mut inner.file, bitmap_pid, &mut buf)?;
        let mut bitmap = BitmapPage::deserialize(&buf);
        if bitmap.deallocate_page(offset) {
            bitmap.serialize(&mut buf);
            Self::write_physical(&mut inner.file, bitmap_pid, &buf)?;
            inner.meta.extent_used[extent as usize] -= 1;
            inner.meta.num_allocated_pages -= 1;
        }
        Ok(())
    }

    /// True when the page's bit is clear or its extent does not exist yet.
    pub fn is_page_free(&self, logical_id: PageId) -> Result<bool> {
        if logical_id < 0 {
            return Err(EngineError::InvalidPageId(logical_id));
        }
        let mut inner = self.inner.lock();
        let extent = logical_id as u32 / BITMAP_CAPACITY;
        let offset = logical_id as u32 % BITMAP_CAPACITY;
        if extent >= inner.meta.num_extents() {
            return Ok(true);
        }
        let mut buf = [0u8; PAGE_SIZE];
        Self::read_physical(&mut inner.file, Self::bitmap_page_id(extent), &mut buf)?;
        Ok(BitmapPage::deserialize(&buf).is_page_free(offset))
    }

    /// Persists the meta page and syncs the file. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        let mut buf = [0u8; PAGE_SIZE];
        inner.meta.serialize(&mut buf);
        Self::write_physical(&mut inner.file, META_PAGE_ID, &buf)?;
        inner.file.sync_all()?;
        inner.closed = true;
        Ok(())
    }

    pub fn meta(&self) -> DiskFileMeta {
        self.inner.lock().meta.clone()
    }

    fn bitmap_page_id(extent: u32) -> i64 {
        1 + extent as i64 * (1 + BITMAP_CAPACITY as i64)
    }

    fn map_page_id(logical_id: PageId) -> i64 {
        let extent = logical_id as i64 / BITMAP_CAPACITY as i64;
        let offset = logical_id as i64 % BITMAP_CAPACITY as i64;
        1 + extent * (1 + BITMAP_CAPACITY as i64) + 1 + offset
    }

    fn read_physical(file: &mut File, physical_id: i64, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let offset = physical_id as u64 * PAGE_SIZE as u64;
        let len = file.metadata()?.len();
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        // A file that ends mid-page reads as zeroes past its length.
        buf[read..].fill(0);
        Ok(())
    }

    fn write_physical(file: &mut File, physical_id: i64, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = physical_id as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close database file cleanly: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();

        let p0 = disk.allocate_page().unwrap();
        let p1 = disk.allocate_page().unwrap();
        assert_eq!((p0, p1), (0, 1));

        let mut buf = [0u8; PAGE_SIZE];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        disk.write_page(p1, &buf).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        disk.read_page(p1, &mut out).unwrap();
        assert_eq!(buf, out);
    }

    #[test]
    fn read_past_eof_zero_fills() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let mut buf = [0xffu8; PAGE_SIZE];
        disk.read_page(1000, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn negative_id_is_rejected() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        assert!(matches!(
            disk.read_page(-1, &mut buf),
            Err(EngineError::InvalidPageId(-1))
        ));
    }

    #[test]
    fn allocate_reuses_freed_slots() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        for expected in 0..8 {
            assert_eq!(disk.allocate_page().unwrap(), expected);
        }
        disk.deallocate_page(3).unwrap();
        assert!(disk.is_page_free(3).unwrap());
        assert_eq!(disk.allocate_page().unwrap(), 3);
        assert!(!disk.is_page_free(3).unwrap());
    }

    #[test]
    fn deallocate_unknown_extent_is_noop() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        disk.deallocate_page(BITMAP_CAPACITY as PageId * 3).unwrap();
        assert!(disk.is_page_free(BITMAP_CAPACITY as PageId * 3).unwrap());
        assert_eq!(disk.meta().num_allocated_pages, 0);
    }

    #[test]
    fn meta_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let disk = DiskManager::open(&path).unwrap();
            for _ in 0..5 {
                disk.allocate_page().unwrap();
            }
            disk.deallocate_page(2).unwrap();
            disk.close().unwrap();
        }
        let disk = DiskManager::open(&path).unwrap();
        let meta = disk.meta();
        assert_eq!(meta.num_allocated_pages, 4);
        assert_eq!(meta.num_extents(), 1);
        assert_eq!(meta.extent_used[0], 4);
        assert!(disk.is_page_free(2).unwrap());
        assert_eq!(disk.allocate_page().unwrap(), 2);
    }
}
