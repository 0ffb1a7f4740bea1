//! The disk-resident B+ tree index.
//!
//! One tree per index id. The tree owns no pages directly: every node is a
//! buffer-pool page reached through its page id, and the index roots page
//! maps the index id to the current root. Parent links are value-typed back
//! references, never ownership. Descent releases each node before latching
//! its child; writers are serialized through the root lock.

pub mod iterator;
pub mod key;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer_pool::{BufferPoolManager, PageGuard};
use crate::errors::EngineError;
use crate::page::btree_page::{
    INTERNAL_HEADER_SIZE, INTERNAL_VALUE_SIZE, LEAF_HEADER_SIZE, LEAF_VALUE_SIZE,
};
use crate::record::{Row, RowId};
use crate::{IndexId, PageId, Result, INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};

pub use iterator::TreeIterator;
pub use key::KeyCodec;

pub struct BPlusTree {
    index_id: IndexId,
    bpm: Arc<BufferPoolManager>,
    codec: KeyCodec,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: Mutex<PageId>,
}

impl BPlusTree {
    /// Opens the tree for `index_id`, reading its root from the index roots
    /// page. Unspecified node capacities are derived from the page size.
    pub fn new(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        codec: KeyCodec,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<Self> {
        let root_page_id = {
            let guard = bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
            let page = guard.read();
            page.roots_get(index_id).unwrap_or(INVALID_PAGE_ID)
        };
        let key_size = codec.key_size();
        let leaf_max_size = leaf_max_size
            .unwrap_or((PAGE_SIZE - LEAF_HEADER_SIZE) / (key_size + LEAF_VALUE_SIZE));
        let internal_max_size = internal_max_size
            .unwrap_or((PAGE_SIZE - INTERNAL_HEADER_SIZE) / (key_size + INTERNAL_VALUE_SIZE));
        Ok(Self {
            index_id,
            bpm,
            codec,
            leaf_max_size,
            internal_max_size,
            root_page_id: Mutex::new(root_page_id),
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup: the row id stored under `key`, if any.
    pub fn get_value(&self, key_row: &Row) -> Result<Option<RowId>> {
        let root = *self.root_page_id.lock();
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let key = self.codec.encode(key_row);
        let guard = self.find_leaf(root, Some(&key))?;
        let found = guard.read().leaf_lookup(&key);
        Ok(found)
    }

    /// Inserts the pair; keys are unique, so an existing key makes the
    /// insert return false.
    pub fn insert(&self, key_row: &Row, value: RowId) -> Result<bool> {
        let mut root = self.root_page_id.lock();
        let key = self.codec.encode(key_row);

        if *root == INVALID_PAGE_ID {
            let guard = self.bpm.new_page()?;
            let page_id = guard.page_id();
            {
                let mut page = guard.write();
                page.init_btree_leaf(page_id, INVALID_PAGE_ID, self.codec.key_size(), self.leaf_max_size);
                page.leaf_insert(&key, value);
            }
            *root = page_id;
            self.update_root_map(page_id)?;
            return Ok(true);
        }

        let leaf_guard = self.find_leaf(*root, Some(&key))?;
        let leaf_page_id = leaf_guard.page_id();
        let needs_split = {
            let mut page = leaf_guard.write();
            match page.leaf_insert(&key, value) {
                None => return Ok(false),
                Some(new_size) => new_size >= page.btree_max_size(),
            }
        };
        if needs_split {
            let (promoted, right_page_id, parent_page_id) = self.split_leaf(&leaf_guard)?;
            drop(leaf_guard);
            self.insert_into_parent(leaf_page_id, promoted, right_page_id, parent_page_id, &mut root)?;
        }
        Ok(true)
    }

    /// Removes the key if present; absence is a silent no-op.
    pub fn remove(&self, key_row: &Row) -> Result<()> {
        let mut root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }
        let key = self.codec.encode(key_row);
        let leaf_guard = self.find_leaf(*root, Some(&key))?;
        let leaf_page_id = leaf_guard.page_id();

        let (removed_first, new_size, was_root, min_size) = {
            let mut page = leaf_guard.write();
            let index = page.leaf_key_index(&key);
            if index >= page.btree_size() || page.leaf_key_at(index) != key {
                return Ok(());
            }
            page.btree_remove_pairs_raw(index, 1);
            (index == 0, page.btree_size(), page.btree_is_root(), page.btree_min_size())
        };
        drop(leaf_guard);

        if was_root {
            if new_size == 0 {
                self.adjust_root(&mut root)?;
            }
            return Ok(());
        }

        let mut leaf_alive = true;
        if new_size < min_size {
            leaf_alive = !self.coalesce_or_redistribute(leaf_page_id, &mut root)?;
        }
        if leaf_alive && removed_first {
            self.propagate_first_key(leaf_page_id)?;
        }
        Ok(())
    }

    /// Cursor at the leftmost leaf's first pair.
    pub fn begin(&self) -> Result<TreeIterator<'_>> {
        let root = *self.root_page_id.lock();
        if root == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(&self.bpm));
        }
        let guard = self.find_leaf(root, None)?;
        Ok(TreeIterator::new(&self.bpm, Some(guard), 0))
    }

    /// Cursor at the first pair with key `>= key_row`.
    pub fn begin_at(&self, key_row: &Row) -> Result<TreeIterator<'_>> {
        let root = *self.root_page_id.lock();
        if root == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(&self.bpm));
        }
        let key = self.codec.encode(key_row);
        let guard = self.find_leaf(root, Some(&key))?;
        let index = guard.read().leaf_key_index(&key);
        Ok(TreeIterator::new(&self.bpm, Some(guard), index))
    }

    /// Frees every page of the whole tree and drops the roots entry.
    pub fn destroy(&self) -> Result<()> {
        let mut root = self.root_page_id.lock();
        if *root != INVALID_PAGE_ID {
            self.destroy_subtree(*root)?;
        }
        let guard = self.bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        guard.write().roots_remove(self.index_id);
        *root = INVALID_PAGE_ID;
        Ok(())
    }

    /// Frees every page reachable from `page_id`. Only a destroy rooted at
    /// the tree's own root clears the root bookkeeping.
    pub fn destroy_from(&self, page_id: PageId) -> Result<()> {
        if page_id == INVALID_PAGE_ID || page_id == *self.root_page_id.lock() {
            return self.destroy();
        }
        self.destroy_subtree(page_id)
    }

    fn destroy_subtree(&self, page_id: PageId) -> Result<()> {
        let children: Vec<PageId> = {
            let guard = self.bpm.fetch_page(page_id)?;
            let page = guard.read();
            if page.btree_is_leaf() {
                Vec::new()
            } else {
                (0..page.btree_size()).map(|i| page.internal_value_at(i)).collect()
            }
        };
        for child in children {
            self.destroy_subtree(child)?;
        }
        self.bpm.delete_page(page_id)
    }

    /// Descends to the leaf responsible for `key` (or the leftmost leaf when
    /// no key is given), releasing each node before latching its child.
    fn find_leaf(&self, root: PageId, key: Option<&[u8]>) -> Result<PageGuard<'_>> {
        let mut page_id = root;
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let child = {
                let page = guard.read();
                if page.btree_is_leaf() {
                    None
                } else {
                    Some(match key {
                        Some(key) => page.internal_lookup(key),
                        None => page.internal_value_at(0),
                    })
                }
            };
            match child {
                None => return Ok(guard),
                Some(child) => {
                    drop(guard);
                    page_id = child;
                }
            }
        }
    }

    /// Splits a full leaf: the upper half moves to a fresh right sibling
    /// spliced into the chain. Returns the separator to promote, the new
    /// page, and the split page's parent.
    fn split_leaf(&self, left: &PageGuard<'_>) -> Result<(Vec<u8>, PageId, PageId)> {
        let right_guard = self.bpm.new_page()?;
        let right_page_id = right_guard.page_id();
        let mut right = right_guard.write();
        let mut left_page = left.write();
        let parent_page_id = left_page.btree_parent_page_id();
        right.init_btree_leaf(right_page_id, parent_page_id, self.codec.key_size(), self.leaf_max_size);
        left_page.leaf_move_half_to(&mut right);
        let promoted = right.leaf_key_at(0).to_vec();
        Ok((promoted, right_page_id, parent_page_id))
    }

    /// Splits a full internal node; the moved children are re-parented to
    /// the new page. The promoted separator is the new page's position-0 key.
    fn split_internal(&self, left: &PageGuard<'_>) -> Result<(Vec<u8>, PageId, PageId)> {
        let right_guard = self.bpm.new_page()?;
        let right_page_id = right_guard.page_id();
        let (promoted, parent_page_id, moved_children) = {
            let mut right = right_guard.write();
            let mut left_page = left.write();
            let parent_page_id = left_page.btree_parent_page_id();
            right.init_btree_internal(right_page_id, parent_page_id, self.codec.key_size(), self.internal_max_size);
            let size = left_page.btree_size();
            let moved = size / 2;
            let keep = size - moved;
            let bytes = left_page.btree_pairs_raw(keep, moved);
            right.btree_insert_pairs_raw(0, &bytes, moved);
            left_page.set_btree_size(keep);
            let promoted = right.internal_key_at(0).to_vec();
            let moved_children: Vec<PageId> =
                (0..right.btree_size()).map(|i| right.internal_value_at(i)).collect();
            (promoted, parent_page_id, moved_children)
        };
        for child in moved_children {
            let guard = self.bpm.fetch_page(child)?;
            guard.write().set_btree_parent_page_id(right_page_id);
        }
        Ok((promoted, right_page_id, parent_page_id))
    }

    /// Links a freshly split-off node into the parent level, growing a new
    /// root when the split reached the old one.
    fn insert_into_parent(
        &self,
        left_page_id: PageId,
        key: Vec<u8>,
        right_page_id: PageId,
        parent_page_id: PageId,
        root: &mut PageId,
    ) -> Result<()> {
        if parent_page_id == INVALID_PAGE_ID {
            let root_guard = self.bpm.new_page()?;
            let new_root_id = root_guard.page_id();
            {
                let mut page = root_guard.write();
                page.init_btree_internal(new_root_id, INVALID_PAGE_ID, self.codec.key_size(), self.internal_max_size);
                page.internal_populate_new_root(left_page_id, &key, right_page_id);
            }
            drop(root_guard);
            for page_id in [left_page_id, right_page_id] {
                let guard = self.bpm.fetch_page(page_id)?;
                guard.write().set_btree_parent_page_id(new_root_id);
            }
            *root = new_root_id;
            return self.update_root_map(new_root_id);
        }

        let parent_guard = self.bpm.fetch_page(parent_page_id)?;
        let needs_split = {
            let mut parent = parent_guard.write();
            parent.internal_insert_after(left_page_id, &key, right_page_id) >= self.internal_max_size
        };
        {
            let guard = self.bpm.fetch_page(right_page_id)?;
            guard.write().set_btree_parent_page_id(parent_page_id);
        }
        if needs_split {
            let (promoted, new_page_id, grandparent_id) = self.split_internal(&parent_guard)?;
            drop(parent_guard);
            self.insert_into_parent(parent_page_id, promoted, new_page_id, grandparent_id, root)?;
        }
        Ok(())
    }

    /// Repairs an underflowing non-root node by borrowing one pair from a
    /// sibling or merging with it. Returns true when the node itself was
    /// merged away.
    fn coalesce_or_redistribute(&self, node_page_id: PageId, root: &mut PageId) -> Result<bool> {
        if node_page_id == *root {
            return self.adjust_root(root);
        }

        let parent_page_id = {
            let guard = self.bpm.fetch_page(node_page_id)?;
            let parent = guard.read().btree_parent_page_id();
            parent
        };
        let parent_guard = self.bpm.fetch_page(parent_page_id)?;
        let node_guard = self.bpm.fetch_page(node_page_id)?;

        // Leftmost children borrow from the right sibling, everyone else
        // from the left.
        let (index, sibling_page_id, sibling_is_left) = {
            let parent = parent_guard.read();
            let index = parent.internal_value_index(node_page_id).ok_or_else(|| {
                EngineError::Corrupted(format!(
                    "page {node_page_id} missing from its parent {parent_page_id}"
                ))
            })?;
            if index == 0 {
                (0, parent.internal_value_at(1), false)
            } else {
                (index, parent.internal_value_at(index - 1), true)
            }
        };
        let sibling_guard = self.bpm.fetch_page(sibling_page_id)?;

        let (node_size, sibling_size, max_size) = {
            let node = node_guard.read();
            (node.btree_size(), sibling_guard.read().btree_size(), node.btree_max_size())
        };

        if node_size + sibling_size >= max_size {
            self.redistribute(&parent_guard, &node_guard, &sibling_guard, index, sibling_is_left)?;
            return Ok(false);
        }

        // Merge: the right page of the pair always empties into the left.
        let (left_guard, right_guard, separator_index) = if sibling_is_left {
            (sibling_guard, node_guard, index)
        } else {
            (node_guard, sibling_guard, 1)
        };
        let left_page_id = left_guard.page_id();
        let right_page_id = right_guard.page_id();

        let (moved_children, parent_size, parent_is_root, parent_min_size) = {
            let mut parent = parent_guard.write();
            let mut left = left_guard.write();
            let mut right = right_guard.write();
            let mut moved_children = Vec::new();
            if left.btree_is_leaf() {
                right.leaf_move_all_to(&mut left);
            } else {
                // Pull the parent separator down as the boundary between the
                // two halves, then append the right page's pairs.
                let mut pair = parent.internal_key_at(separator_index).to_vec();
                pair.extend_from_slice(&right.internal_value_at(0).to_le_bytes());
                let left_size = left.btree_size();
                left.btree_insert_pairs_raw(left_size, &pair, 1);
                let rest = right.btree_size() - 1;
                if rest > 0 {
                    let bytes = right.btree_pairs_raw(1, rest);
                    let left_size = left.btree_size();
                    left.btree_insert_pairs_raw(left_size, &bytes, rest);
                }
                moved_children = (0..right.btree_size())
                    .map(|i| right.internal_value_at(i))
                    .collect();
                right.set_btree_size(0);
            }
            parent.internal_remove(separator_index);
            (moved_children, parent.btree_size(), parent.btree_is_root(), parent.btree_min_size())
        };
        for child in moved_children {
            let guard = self.bpm.fetch_page(child)?;
            guard.write().set_btree_parent_page_id(left_page_id);
        }
        drop(right_guard);
        drop(left_guard);
        drop(parent_guard);
        self.bpm.delete_page(right_page_id)?;

        if parent_is_root {
            if parent_size == 1 {
                self.adjust_root(root)?;
            }
        } else if parent_size < parent_min_size {
            self.coalesce_or_redistribute(parent_page_id, root)?;
        }
        Ok(node_page_id == right_page_id)
    }

    /// Moves exactly one pair across the sibling boundary and fixes the
    /// separators: after any movement a separator is the first key of the
    /// subtree to its right.
    fn redistribute(
        &self,
        parent_guard: &PageGuard<'_>,
        node_guard: &PageGuard<'_>,
        sibling_guard: &PageGuard<'_>,
        index: usize,
        sibling_is_left: bool,
    ) -> Result<()> {
        let node_page_id = node_guard.page_id();
        let mut moved_child = None;
        {
            let mut parent = parent_guard.write();
            let mut node = node_guard.write();
            let mut sibling = sibling_guard.write();
            if node.btree_is_leaf() {
                if sibling_is_left {
                    sibling.leaf_move_last_to_front_of(&mut node);
                    let separator = node.leaf_key_at(0).to_vec();
                    parent.internal_set_key_at(index, &separator);
                } else {
                    sibling.leaf_move_first_to_end_of(&mut node);
                    let separator = sibling.leaf_key_at(0).to_vec();
                    parent.internal_set_key_at(1, &separator);
                }
            } else if sibling_is_left {
                // The left sibling's last child becomes this node's first;
                // the old parent separator slides down in front of the old
                // first child, and the moved key replaces it in the parent.
                let last = sibling.btree_size() - 1;
                let moved_key = sibling.internal_key_at(last).to_vec();
                let child = sibling.internal_value_at(last);
                sibling.set_btree_size(last);

                let old_separator = parent.internal_key_at(index).to_vec();
                let mut pair = vec![0u8; self.codec.key_size()];
                pair.extend_from_slice(&child.to_le_bytes());
                node.btree_insert_pairs_raw(0, &pair, 1);
                node.internal_set_key_at(1, &old_separator);
                parent.internal_set_key_at(index, &moved_key);
                moved_child = Some(child);
            } else {
                // The right sibling's first child is appended here under the
                // old separator; the sibling's next key becomes the new
                // separator.
                let child = sibling.internal_value_at(0);
                let new_separator = sibling.internal_key_at(1).to_vec();
                let mut pair = parent.internal_key_at(1).to_vec();
                pair.extend_from_slice(&child.to_le_bytes());
                let node_size = node.btree_size();
                node.btree_insert_pairs_raw(node_size, &pair, 1);
                sibling.btree_remove_pairs_raw(0, 1);
                parent.internal_set_key_at(1, &new_separator);
                moved_child = Some(child);
            }
        }
        if let Some(child) = moved_child {
            let guard = self.bpm.fetch_page(child)?;
            guard.write().set_btree_parent_page_id(node_page_id);
        }
        Ok(())
    }

    /// Shrinks the tree at the top: an empty leaf root empties the tree, an
    /// internal root with a single child hands the root to that child.
    /// Returns true when the old root page was freed.
    fn adjust_root(&self, root: &mut PageId) -> Result<bool> {
        enum Action {
            Keep,
            EmptyTree,
            Collapse(PageId),
        }
        let action = {
            let guard = self.bpm.fetch_page(*root)?;
            let page = guard.read();
            if page.btree_is_leaf() && page.btree_size() == 0 {
                Action::EmptyTree
            } else if !page.btree_is_leaf() && page.btree_size() == 1 {
                Action::Collapse(page.internal_value_at(0))
            } else {
                Action::Keep
            }
        };
        match action {
            Action::Keep => Ok(false),
            Action::EmptyTree => {
                let old_root = *root;
                self.bpm.delete_page(old_root)?;
                *root = INVALID_PAGE_ID;
                self.update_root_map(INVALID_PAGE_ID)?;
                Ok(true)
            }
            Action::Collapse(child) => {
                {
                    let guard = self.bpm.fetch_page(child)?;
                    guard.write().set_btree_parent_page_id(INVALID_PAGE_ID);
                }
                let old_root = *root;
                self.bpm.delete_page(old_root)?;
                *root = child;
                self.update_root_map(child)?;
                Ok(true)
            }
        }
    }

    /// After a leftmost key changed, walks up until the node is a
    /// non-leftmost child and rewrites that ancestor's separator.
    fn propagate_first_key(&self, leaf_page_id: PageId) -> Result<()> {
        let first_key = {
            let guard = self.bpm.fetch_page(leaf_page_id)?;
            let page = guard.read();
            if page.btree_size() == 0 {
                return Ok(());
            }
            page.leaf_key_at(0).to_vec()
        };
        let mut child_page_id = leaf_page_id;
        loop {
            let parent_page_id = {
                let guard = self.bpm.fetch_page(child_page_id)?;
                let parent = guard.read().btree_parent_page_id();
                parent
            };
            if parent_page_id == INVALID_PAGE_ID {
                return Ok(());
            }
            let guard = self.bpm.fetch_page(parent_page_id)?;
            let index = guard.read().internal_value_index(child_page_id).ok_or_else(|| {
                EngineError::Corrupted(format!(
                    "page {child_page_id} missing from its parent {parent_page_id}"
                ))
            })?;
            if index > 0 {
                guard.write().internal_set_key_at(index, &first_key);
                return Ok(());
            }
            drop(guard);
            child_page_id = parent_page_id;
        }
    }

    /// Writes the current root through to the index roots page.
    fn update_root_map(&self, root: PageId) -> Result<()> {
        let guard = self.bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        if !guard.write().roots_set(self.index_id, root) {
            return Err(EngineError::Corrupted("index roots page is full".into()));
        }
        Ok(())
    }
}
