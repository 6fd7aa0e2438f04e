use std::path::Path;

use log::{debug, info};

use crate::error::{DbError, DbResult};
use crate::storage::btree::BTreeIndex;
use crate::storage::layout::Rrn;
use crate::storage::record::{Field, Record};
use crate::storage::record_store::{OpenMode, RecordStore};

/// A record found through the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub rrn: Rrn,
    pub record: Record,
    /// Index nodes read to find `rrn`.
    pub accesses: usize,
}

/// Index every live record of `store` that carries an id. Ids already in the
/// index are skipped. Returns the number of keys added.
pub fn build_index(store: &mut RecordStore, index: &mut BTreeIndex) -> DbResult<usize> {
    let mut added = 0;
    for entry in store.records()? {
        let (rrn, record) = entry?;
        let Some(id) = record.id() else {
            continue;
        };
        if index.insert(id, rrn)? {
            added += 1;
        } else {
            debug!("build_index: id {} at RRN {} already indexed", id, rrn);
        }
    }
    info!(
        "build_index: {} key(s) added, tree height {}",
        added,
        index.header().height()
    );
    Ok(added)
}

/// A record file together with the B-tree indexing it by id.
pub struct Database {
    records: RecordStore,
    index: BTreeIndex,
}

impl Database {
    /// Create (or truncate) both files.
    pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(data: P, index: Q) -> DbResult<Self> {
        Database::open(data, index, OpenMode::Create)
    }

    /// Open both files in the same mode. Either failing leaves nothing open.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(data: P, index: Q, mode: OpenMode) -> DbResult<Self> {
        let mut records = RecordStore::new();
        records.open(data, mode)?;
        let mut tree = BTreeIndex::new();
        tree.open(index, mode)?;
        Ok(Database { records, index: tree })
    }

    /// Open an existing record file read-only and build a fresh index over it.
    pub fn with_new_index<P: AsRef<Path>, Q: AsRef<Path>>(data: P, index: Q) -> DbResult<Self> {
        let mut records = RecordStore::new();
        records.open(data, OpenMode::Read)?;
        let mut tree = BTreeIndex::new();
        tree.open(index, OpenMode::Create)?;
        let mut db = Database { records, index: tree };
        db.build_index()?;
        Ok(db)
    }

    /// Close both files. Both are attempted; the first error is returned.
    pub fn close(&mut self) -> DbResult<()> {
        let records = self.records.close();
        let index = self.index.close();
        records.and(index)
    }

    pub fn records(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn index(&mut self) -> &mut BTreeIndex {
        &mut self.index
    }

    pub fn build_index(&mut self) -> DbResult<usize> {
        build_index(&mut self.records, &mut self.index)
    }

    /// Append `record` and index its id. A record whose id is already indexed
    /// is rejected before anything is written.
    pub fn insert(&mut self, record: &Record) -> DbResult<Rrn> {
        if let Some(id) = record.id() {
            if self.index.search(id)?.value.is_some() {
                return Err(DbError::InvalidArgument(format!("id {} is already indexed", id)));
            }
        }
        let rrn = self.records.insert(record)?;
        if let Some(id) = record.id() {
            self.index.insert(id, rrn)?;
        }
        Ok(rrn)
    }

    /// Patch the record at `rrn`. The id is the index key and cannot be
    /// changed here.
    pub fn update_at(&mut self, rrn: Rrn, payload: &Record) -> DbResult<bool> {
        if payload.mask().contains(Field::Id) {
            return Err(DbError::InvalidArgument("the indexed id cannot be updated".into()));
        }
        self.records.update_at(rrn, payload)
    }

    /// Find the record with id `key` through the index.
    pub fn lookup(&mut self, key: i32) -> DbResult<Option<Lookup>> {
        let hit = self.index.search(key)?;
        let Some(rrn) = hit.value else {
            return Ok(None);
        };
        // The index keeps pointing at removed records.
        let Some(record) = self.records.fetch_at(rrn)? else {
            debug!("lookup: key {} points at removed RRN {}", key, rrn);
            return Ok(None);
        };
        // Stale entry: the id was rewritten through `records()`.
        if record.id() != Some(key) {
            debug!("lookup: key {} points at RRN {} which now holds id {:?}", key, rrn, record.id());
            return Ok(None);
        }
        Ok(Some(Lookup { rrn, record, accesses: hit.accesses }))
    }
}
