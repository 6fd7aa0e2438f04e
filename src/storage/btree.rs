use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{DbError, DbResult, OpenStatus};
use crate::storage::header::{HeaderStatus, IndexHeader};
use crate::storage::layout::{node_offset, Rrn, LEAF_LEVEL};
use crate::storage::node::{read_node, write_node, BTreeNode, Item, Route};
use crate::storage::record_store::{short_header_is_inconsistent, OpenMode};

// ┌──────────────────────────────────────────────────────────────────────────────┐
// │ The index file is a flat array of 72-byte node slots behind a header slot.   │
// │ Nodes are addressed by RRN and never cached: every step of a descent reads   │
// │ its node from disk.                                                          │
// └──────────────────────────────────────────────────────────────────────────────┘
//
// On insert:
//   1. Descend from the root to the leaf where the key belongs. A key already
//      present anywhere on the path ends the insert with no change.
//   2. Walking off the leaf hands the new item back up as a promotion.
//   3. A node receiving a promotion:
//        • has room: inserts the item, with the promoted right node as the
//          child to its right, writes itself, and absorbs the promotion;
//        • is full: splits, writes the upper half to the next free slot, and
//          promotes the upper half's first item together with that slot.
//   4. A promotion that leaves the root becomes a new root one level up whose
//      two children are the old root and the new sibling.

/// Result of inserting into a subtree.
#[derive(Debug)]
enum Carry {
    /// Key already present; nothing was written.
    Duplicate,
    /// Insert finished below; no node above needs to change.
    Absorbed,
    /// The parent must take `item`, with `right` as its right-hand child.
    Promote { item: Item, right: Option<Rrn> },
}

/// Outcome of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub value: Option<Rrn>,
    /// Nodes read from disk, including the last one that ended the descent.
    pub accesses: usize,
}

struct OpenFile {
    file: File,
    path: PathBuf,
    mode: OpenMode,
}

/// Disk-resident B-tree of order 6 mapping non-negative integer keys to
/// record RRNs. No deletion.
pub struct BTreeIndex {
    handle: Option<OpenFile>,
    header: IndexHeader,
}

impl Default for BTreeIndex {
    fn default() -> Self {
        BTreeIndex::new()
    }
}

impl BTreeIndex {
    pub fn new() -> Self {
        BTreeIndex { handle: None, header: IndexHeader::new() }
    }

    /// Open `path` in `mode`, with the same status rules as a record file.
    /// `Empty` means the tree has no root yet.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, mode: OpenMode) -> DbResult<OpenStatus> {
        let path = path.as_ref();
        if self.handle.is_some() {
            return Err(DbError::AlreadyOpen);
        }
        if path.as_os_str().is_empty() {
            return Err(DbError::InvalidArgument("empty path".into()));
        }

        let mut file = mode.options().open(path)?;
        let header = match mode {
            OpenMode::Create => {
                let mut header = IndexHeader::new();
                header.flush(&mut file)?;
                header
            }
            OpenMode::Read | OpenMode::Modify => {
                let mut header = IndexHeader::load(&mut file)
                    .map_err(|e| short_header_is_inconsistent(e, path))?;
                if header.status() != HeaderStatus::Clean {
                    return Err(DbError::Inconsistent(path.to_path_buf()));
                }
                if mode == OpenMode::Modify {
                    header.set_status(HeaderStatus::Dirty);
                    header.flush(&mut file)?;
                }
                header
            }
        };

        debug!(
            "btree: opened {} ({:?}), root={:?}, height={}, keys={}",
            path.display(),
            mode,
            header.root(),
            header.height(),
            header.key_count()
        );
        let status = if header.root().is_none() { OpenStatus::Empty } else { OpenStatus::Ready };
        self.header = header;
        self.handle = Some(OpenFile { file, path: path.to_path_buf(), mode });
        Ok(status)
    }

    /// Flush the header as clean (when writable) and release the file.
    pub fn close(&mut self) -> DbResult<()> {
        let Some(mut open) = self.handle.take() else {
            return Ok(());
        };
        if open.mode.is_writable() {
            self.header.set_status(HeaderStatus::Clean);
            self.header.flush(&mut open.file)?;
        }
        debug!("btree: closed {}", open.path.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    fn file(&mut self) -> DbResult<&mut File> {
        self.handle.as_mut().map(|h| &mut h.file).ok_or(DbError::NotOpen)
    }

    fn writable_file(&mut self) -> DbResult<&mut File> {
        match self.handle.as_mut() {
            None => Err(DbError::NotOpen),
            Some(h) if !h.mode.is_writable() => Err(DbError::ReadOnly),
            Some(h) => Ok(&mut h.file),
        }
    }

    fn read_node_at(&mut self, rrn: Rrn) -> DbResult<BTreeNode> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(node_offset(rrn)))?;
        read_node(file)
    }

    fn write_node_at(&mut self, rrn: Rrn, node: &BTreeNode) -> DbResult<()> {
        let file = self.writable_file()?;
        file.seek(SeekFrom::Start(node_offset(rrn)))?;
        write_node(file, node)?;
        file.flush()?;
        Ok(())
    }

    /// Reserve the next free node slot.
    fn allocate(&mut self) -> Rrn {
        let rrn = self.header.next_free();
        self.header.set_next_free(rrn + 1);
        rrn
    }

    /// Node stored at `rrn`, if that slot has been allocated.
    pub fn node_at(&mut self, rrn: Rrn) -> DbResult<Option<BTreeNode>> {
        if rrn >= self.header.next_free() {
            self.file()?;
            return Ok(None);
        }
        self.read_node_at(rrn).map(Some)
    }

    /// Insert `key -> value`. Returns `false` (and changes nothing) when the
    /// key is already indexed.
    pub fn insert(&mut self, key: i32, value: Rrn) -> DbResult<bool> {
        if key < 0 {
            return Err(DbError::InvalidArgument(format!("negative key {}", key)));
        }
        self.writable_file()?;

        let Some(root) = self.header.root() else {
            let mut leaf = BTreeNode::new(LEAF_LEVEL as u32);
            leaf.insert_sorted(key, value);
            let rrn = self.allocate();
            self.write_node_at(rrn, &leaf)?;
            debug!("btree: created root leaf {} with key={}", rrn, key);
            self.header.set_root(Some(rrn));
            self.header.set_height(1);
            self.header.set_key_count(self.header.key_count() + 1);
            return Ok(true);
        };

        debug!("btree: insert key={} starting at root {}", key, root);
        match self.insert_below(Some(root), key, value)? {
            Carry::Duplicate => {
                debug!("  → key={} already indexed", key);
                return Ok(false);
            }
            Carry::Absorbed => {}
            Carry::Promote { item, right } => {
                let height = self.header.height();
                let mut new_root = BTreeNode::new(height + 1);
                new_root.insert_sorted(item.key, item.value);
                new_root.insert_child(0, Some(root));
                new_root.insert_child(1, right);
                let rrn = self.allocate();
                self.write_node_at(rrn, &new_root)?;
                debug!(
                    "  → root split: new root {} (key={}) over [{}, {:?}], height {}",
                    rrn,
                    item.key,
                    root,
                    right,
                    height + 1
                );
                self.header.set_root(Some(rrn));
                self.header.set_height(height + 1);
            }
        }
        self.header.set_key_count(self.header.key_count() + 1);
        Ok(true)
    }

    fn insert_below(&mut self, at: Option<Rrn>, key: i32, value: Rrn) -> DbResult<Carry> {
        let Some(rrn) = at else {
            return Ok(Carry::Promote { item: Item { key, value }, right: None });
        };

        let mut node = self.read_node_at(rrn)?;
        let child = match node.route(key)? {
            Route::Found(_) => return Ok(Carry::Duplicate),
            Route::Descend(child) => child,
        };
        if let Some(c) = child {
            debug!("  → node {} (level {}): descending to {}", rrn, node.level(), c);
        }

        let (item, right) = match self.insert_below(child, key, value)? {
            Carry::Promote { item, right } => (item, right),
            done => return Ok(done),
        };

        if let Some(pos) = node.insert_sorted(item.key, item.value) {
            node.insert_child(pos + 1, right);
            self.write_node_at(rrn, &node)?;
            debug!("  → node {} absorbed key={} at position {}", rrn, item.key, pos);
            return Ok(Carry::Absorbed);
        }

        let mut sibling = node.split(item.key, item.value, right);
        let promoted = sibling.remove_item(0);
        let sibling_rrn = self.allocate();
        self.write_node_at(sibling_rrn, &sibling)?;
        self.write_node_at(rrn, &node)?;
        debug!(
            "  → node {} split: sibling {}, promoting key={}",
            rrn, sibling_rrn, promoted.key
        );
        Ok(Carry::Promote { item: promoted, right: Some(sibling_rrn) })
    }

    /// Look `key` up, counting node reads.
    pub fn search(&mut self, key: i32) -> DbResult<SearchResult> {
        if key < 0 {
            return Err(DbError::InvalidArgument(format!("negative key {}", key)));
        }
        self.file()?;

        let mut accesses = 0;
        let mut at = self.header.root();
        while let Some(rrn) = at {
            let node = self.read_node_at(rrn)?;
            accesses += 1;
            match node.route(key)? {
                Route::Found(pos) => {
                    let value = node.items()[pos].value;
                    debug!("btree: found key={} in node {} after {} access(es)", key, rrn, accesses);
                    return Ok(SearchResult { value: Some(value), accesses });
                }
                Route::Descend(child) => at = child,
            }
        }
        debug!("btree: key={} not found after {} access(es)", key, accesses);
        Ok(SearchResult { value: None, accesses })
    }

    /// Every item in key order.
    pub fn in_order(&mut self) -> DbResult<Vec<Item>> {
        let mut out = Vec::with_capacity(self.header.key_count() as usize);
        let root = self.header.root();
        self.collect(root, &mut out)?;
        Ok(out)
    }

    fn collect(&mut self, at: Option<Rrn>, out: &mut Vec<Item>) -> DbResult<()> {
        let Some(rrn) = at else {
            return Ok(());
        };
        let node = self.read_node_at(rrn)?;
        for (i, item) in node.items().iter().enumerate() {
            self.collect(node.child(i), out)?;
            out.push(*item);
        }
        self.collect(node.child(node.len()), out)
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("btree: close on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh(dir: &tempfile::TempDir) -> BTreeIndex {
        let mut idx = BTreeIndex::new();
        idx.open(dir.path().join("index.bin"), OpenMode::Create).unwrap();
        idx
    }

    #[test]
    fn first_insert_creates_leaf_root() {
        let dir = tempdir().unwrap();
        let mut idx = fresh(&dir);
        assert!(idx.insert(50, 0).unwrap());
        assert_eq!(idx.header().root(), Some(0));
        assert_eq!(idx.header().height(), 1);
        assert_eq!(idx.header().next_free(), 1);

        let hit = idx.search(50).unwrap();
        assert_eq!(hit, SearchResult { value: Some(0), accesses: 1 });
    }

    #[test]
    fn sixth_key_splits_the_root() {
        let dir = tempdir().unwrap();
        let mut idx = fresh(&dir);
        for (i, k) in [10, 20, 30, 40, 50, 60].into_iter().enumerate() {
            idx.insert(k, i as Rrn).unwrap();
        }
        assert_eq!(idx.header().height(), 2);
        assert_eq!(idx.header().next_free(), 3);

        let root = idx.node_at(idx.header().root().unwrap()).unwrap().unwrap();
        assert_eq!(root.keys().collect::<Vec<_>>(), vec![40]);
        assert_eq!(root.children(), &[Some(0), Some(1)]);

        let left = idx.node_at(0).unwrap().unwrap();
        let right = idx.node_at(1).unwrap().unwrap();
        assert_eq!(left.keys().collect::<Vec<_>>(), vec![10, 20, 30]);
        assert_eq!(right.keys().collect::<Vec<_>>(), vec![50, 60]);
        assert_eq!(idx.node_at(3).unwrap(), None);
    }

    #[test]
    fn duplicates_change_nothing() {
        let dir = tempdir().unwrap();
        let mut idx = fresh(&dir);
        assert!(idx.insert(7, 1).unwrap());
        assert!(!idx.insert(7, 2).unwrap());
        assert_eq!(idx.header().key_count(), 1);
        assert_eq!(idx.search(7).unwrap().value, Some(1));
    }

    #[test]
    fn negative_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let mut idx = fresh(&dir);
        assert!(matches!(idx.insert(-1, 0), Err(DbError::InvalidArgument(_))));
        assert!(matches!(idx.search(-5), Err(DbError::InvalidArgument(_))));
        assert_eq!(idx.header().key_count(), 0);
    }

    #[test]
    fn empty_tree_search_reads_nothing() {
        let dir = tempdir().unwrap();
        let mut idx = fresh(&dir);
        assert_eq!(idx.search(3).unwrap(), SearchResult { value: None, accesses: 0 });
    }

    #[test]
    fn closed_index_rejects_work() {
        let mut idx = BTreeIndex::new();
        assert!(matches!(idx.insert(1, 1), Err(DbError::NotOpen)));
        assert!(matches!(idx.search(1), Err(DbError::NotOpen)));
    }
}
