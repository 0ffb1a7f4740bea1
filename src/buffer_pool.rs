use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk_manager::DiskManager;
use crate::errors::EngineError;
use crate::page::Page;
use crate::replacer::LruReplacer;
use crate::{FrameId, PageId, Result, PAGE_SIZE};

#[derive(Default)]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
    is_dirty: bool,
}

struct Frame {
    /// The per-page read/write latch taken by page-layout code.
    page: RwLock<Page>,
    meta: Mutex<FrameMeta>,
}

/// The mapping state: which logical page lives in which frame, and which
/// frames have never held a page. One lock serializes all rebinding.
#[derive(Default)]
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
}

/// Caches disk pages in a fixed array of frames with LRU replacement.
///
/// A frame is always in exactly one of three places: the free list, the
/// replacer, or pinned by at least one [`PageGuard`].
pub struct BufferPoolManager {
    disk: Arc<DiskManager>,
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
}

/// An RAII pin on a buffered page. Dropping the guard unpins the page;
/// `write` marks the frame dirty, and a dirty mark is never cleared by a
/// later read-only use.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame_id: FrameId,
}

impl<'a> PageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.bpm.frames[self.frame_id].page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.bpm.frames[self.frame_id].meta.lock().is_dirty = true;
        self.bpm.frames[self.frame_id].page.write()
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.bpm.unpin(self.frame_id);
    }
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            frames.push(Frame {
                page: RwLock::new(Page::default()),
                meta: Mutex::new(FrameMeta::default()),
            });
        }
        // Pop order matches frame order: the free list hands out frame 0 first.
        let free_list: Vec<FrameId> = (0..pool_size).rev().collect();
        Self {
            disk,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Pins the page, loading it from disk through a victim frame when it is
    /// not already buffered.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        if page_id < 0 {
            return Err(EngineError::InvalidPageId(page_id));
        }
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let mut meta = self.frames[frame_id].meta.lock();
            meta.pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(PageGuard {
                bpm: self,
                page_id,
                frame_id,
            });
        }

        let frame_id = self.find_free_frame(&mut state)?;
        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk.read_page(page_id, &mut data) {
            state.free_list.push(frame_id);
            return Err(e);
        }
        self.bind_frame(&mut state, frame_id, page_id, &data);
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame_id,
        })
    }

    /// Allocates a fresh logical page and pins it in a zeroed frame.
    pub fn new_page(&self) -> Result<PageGuard<'_>> {
        let mut state = self.state.lock();
        let frame_id = self.find_free_frame(&mut state)?;
        let page_id = match self.disk.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                state.free_list.push(frame_id);
                return Err(e);
            }
        };
        self.bind_frame(&mut state, frame_id, page_id, &[0u8; PAGE_SIZE]);
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame_id,
        })
    }

    /// Writes the page back to disk and clears its dirty mark. Returns false
    /// when the page is not buffered.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame_id = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Ok(false),
            }
        };
        self.flush_frame(page_id, frame_id)?;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let entries: Vec<(PageId, FrameId)> = {
            let state = self.state.lock();
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect()
        };
        for (page_id, frame_id) in entries {
            self.flush_frame(page_id, frame_id)?;
        }
        Ok(())
    }

    /// Writes one frame back if it still holds `page_id`. The state lock is
    /// not held here, so a concurrent rebind just skips the write. The page
    /// latch is taken before the frame metadata: waiting on a busy latch
    /// while holding metadata could close a cycle with a latch holder that
    /// is itself fetching.
    fn flush_frame(&self, page_id: PageId, frame_id: FrameId) -> Result<()> {
        let page = self.frames[frame_id].page.read();
        let mut meta = self.frames[frame_id].meta.lock();
        if meta.page_id == Some(page_id) {
            self.disk.write_page(page_id, &page.data)?;
            meta.is_dirty = false;
        }
        Ok(())
    }

    /// Drops the page from the pool and frees it on disk. Fails only when
    /// the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let mut meta = self.frames[frame_id].meta.lock();
            if meta.pin_count > 0 {
                return Err(EngineError::PagePinned(page_id));
            }
            *meta = FrameMeta::default();
            self.frames[frame_id].page.write().reset();
            state.page_table.remove(&page_id);
            self.replacer.pin(frame_id);
            state.free_list.push(frame_id);
        }
        self.disk.deallocate_page(page_id)
    }

    /// The logical pages currently buffered. Debug and test helper.
    pub fn cached_pages(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// True when no frame holds a pin. Debug and test helper.
    pub fn check_all_unpinned(&self) -> bool {
        self.frames.iter().all(|f| f.meta.lock().pin_count == 0)
    }

    /// Free-list first, then the LRU victim; a dirty victim is written back
    /// before its frame is rebound.
    fn find_free_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }
        let frame_id = self
            .replacer
            .victim()
            .ok_or(EngineError::BufferPoolExhausted)?;
        let mut meta = self.frames[frame_id].meta.lock();
        if let Some(old_page_id) = meta.page_id.take() {
            if meta.is_dirty {
                if let Err(e) = self
                    .disk
                    .write_page(old_page_id, &self.frames[frame_id].page.read().data)
                {
                    // Writeback failed: leave the page mapped and evictable.
                    meta.page_id = Some(old_page_id);
                    self.replacer.unpin(frame_id);
                    return Err(e);
                }
                meta.is_dirty = false;
            }
            state.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }

    fn bind_frame(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId, data: &[u8; PAGE_SIZE]) {
        {
            let mut page = self.frames[frame_id].page.write();
            page.id = page_id;
            page.data.copy_from_slice(data);
        }
        let mut meta = self.frames[frame_id].meta.lock();
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut meta = self.frames[frame_id].meta.lock();
        if meta.pin_count == 0 {
            return;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            warn!("failed to flush buffer pool on shutdown: {e}");
        }
    }
}
