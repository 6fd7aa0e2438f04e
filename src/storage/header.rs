use std::io::{Read, Seek, SeekFrom, Write};

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::binary::{garbage, read_i32, read_u8, FieldWriter};
use crate::storage::layout::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// Written as `'0'`: the file may hold a partial mutation.
    Dirty,
    /// Written as `'1'`.
    Clean,
}

impl HeaderStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            HeaderStatus::Dirty => b'0',
            HeaderStatus::Clean => b'1',
        }
    }

    /// Anything but `'1'` counts as dirty.
    pub fn from_byte(b: u8) -> Self {
        if b == b'1' { HeaderStatus::Clean } else { HeaderStatus::Dirty }
    }
}

/// Set of header fields changed in memory since the last flush. Bit `i` is the
/// `i`-th header field in file order (status first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct DirtySet(u8);

impl DirtySet {
    const ALL: DirtySet = DirtySet(0b1_1111);

    fn mark(&mut self, field: usize) {
        self.0 |= 1 << field;
    }

    fn contains(self, field: usize) -> bool {
        self.0 & (1 << field) != 0
    }

    fn is_empty(self) -> bool {
        self.0 == 0
    }
}

const STATUS: usize = 0;

const RECORD_FIELD_OFFSETS: [u64; 4] = [
    REC_HEADER_NEXT_RRN_OFFSET,
    REC_HEADER_LIVE_OFFSET,
    REC_HEADER_DELETED_OFFSET,
    REC_HEADER_UPDATED_OFFSET,
];

const INDEX_FIELD_OFFSETS: [u64; 4] = [
    BT_HEADER_ROOT_OFFSET,
    BT_HEADER_HEIGHT_OFFSET,
    BT_HEADER_NEXT_RRN_OFFSET,
    BT_HEADER_KEYS_OFFSET,
];

/// Write the dirty fields of a header with the fewest seeks, plus the
/// `(offset, len)` padding run when given. Returns the number of fields written.
fn flush_fields<F: Write + Seek>(
    file: &mut F,
    dirty: DirtySet,
    status: HeaderStatus,
    fields: [(u64, i32); 4],
    padding: Option<(u64, usize)>,
) -> DbResult<usize> {
    let mut w = FieldWriter::new(file, 0, None);
    if dirty.contains(STATUS) {
        w.write_at(HEADER_STATUS_OFFSET, &[status.to_byte()])?;
    }
    for (i, (offset, value)) in fields.into_iter().enumerate() {
        if dirty.contains(i + 1) {
            w.write_at(offset, &value.to_le_bytes())?;
        }
    }
    if let Some((offset, len)) = padding {
        w.write_at(offset, &garbage(len))?;
    }
    let written = w.fields_written();
    debug!("header flush: {} field(s), {} seek(s)", written, w.seeks());
    file.flush()?;
    Ok(written)
}

fn zip_offsets(offsets: [u64; 4], values: [i32; 4]) -> [(u64, i32); 4] {
    std::array::from_fn(|i| (offsets[i], values[i]))
}

/// Status plus the four integers, read from slot 0. Field order is the same
/// for both header kinds.
fn read_fields<R: Read + Seek>(file: &mut R) -> DbResult<(HeaderStatus, [i32; 4])> {
    file.seek(SeekFrom::Start(HEADER_STATUS_OFFSET))?;
    let status = HeaderStatus::from_byte(read_u8(file)?);
    let mut ints = [0i32; 4];
    for v in ints.iter_mut() {
        *v = read_i32(file)?;
    }
    Ok((status, ints))
}

fn non_negative(v: i32, what: &str) -> DbResult<u32> {
    u32::try_from(v).map_err(|_| DbError::Corrupt(format!("negative {} in header: {}", what, v)))
}

/// Header of the record file (slot 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    status: HeaderStatus,
    next_rrn: Rrn,
    live: u32,
    deleted: u32,
    updated: u32,
    dirty: DirtySet,
    fresh: bool,
}

impl Default for RecordHeader {
    fn default() -> Self {
        RecordHeader::new()
    }
}

impl RecordHeader {
    /// Header of a newly created file: dirty status, zero counters. The first
    /// flush writes every field and the padding.
    pub fn new() -> Self {
        RecordHeader {
            status: HeaderStatus::Dirty,
            next_rrn: 0,
            live: 0,
            deleted: 0,
            updated: 0,
            dirty: DirtySet::ALL,
            fresh: true,
        }
    }

    pub fn load<R: Read + Seek>(file: &mut R) -> DbResult<Self> {
        let (status, [next, live, deleted, updated]) = read_fields(file)?;
        Ok(RecordHeader {
            status,
            next_rrn: non_negative(next, "next RRN")?,
            live: non_negative(live, "live count")?,
            deleted: non_negative(deleted, "deleted count")?,
            updated: non_negative(updated, "update count")?,
            dirty: DirtySet::default(),
            fresh: false,
        })
    }

    pub fn flush<F: Write + Seek>(&mut self, file: &mut F) -> DbResult<usize> {
        let padding = self.fresh.then_some((
            REC_HEADER_PADDING_OFFSET,
            RECORD_SLOT_SIZE - REC_HEADER_PADDING_OFFSET as usize,
        ));
        let values = [
            to_disk(self.next_rrn, "next RRN")?,
            to_disk(self.live, "live count")?,
            to_disk(self.deleted, "deleted count")?,
            to_disk(self.updated, "update count")?,
        ];
        let fields = zip_offsets(RECORD_FIELD_OFFSETS, values);
        let written = flush_fields(file, self.dirty, self.status, fields, padding)?;
        self.dirty = DirtySet::default();
        self.fresh = false;
        Ok(written)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.fresh
    }

    pub fn status(&self) -> HeaderStatus {
        self.status
    }

    pub fn next_rrn(&self) -> Rrn {
        self.next_rrn
    }

    pub fn live(&self) -> u32 {
        self.live
    }

    pub fn deleted(&self) -> u32 {
        self.deleted
    }

    pub fn updated(&self) -> u32 {
        self.updated
    }

    pub fn set_status(&mut self, status: HeaderStatus) {
        if self.status != status {
            self.status = status;
            self.dirty.mark(STATUS);
        }
    }

    pub fn set_next_rrn(&mut self, v: Rrn) {
        if self.next_rrn != v {
            self.next_rrn = v;
            self.dirty.mark(1);
        }
    }

    pub fn set_live(&mut self, v: u32) {
        if self.live != v {
            self.live = v;
            self.dirty.mark(2);
        }
    }

    pub fn set_deleted(&mut self, v: u32) {
        if self.deleted != v {
            self.deleted = v;
            self.dirty.mark(3);
        }
    }

    pub fn set_updated(&mut self, v: u32) {
        if self.updated != v {
            self.updated = v;
            self.dirty.mark(4);
        }
    }
}

/// Header of the B-tree file (slot 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    status: HeaderStatus,
    root: Option<Rrn>,
    height: u32,
    next_free: Rrn,
    key_count: u32,
    dirty: DirtySet,
    fresh: bool,
}

impl Default for IndexHeader {
    fn default() -> Self {
        IndexHeader::new()
    }
}

impl IndexHeader {
    /// Header of an empty tree.
    pub fn new() -> Self {
        IndexHeader {
            status: HeaderStatus::Dirty,
            root: None,
            height: 0,
            next_free: 0,
            key_count: 0,
            dirty: DirtySet::ALL,
            fresh: true,
        }
    }

    pub fn load<R: Read + Seek>(file: &mut R) -> DbResult<Self> {
        let (status, [root, height, next_free, keys]) = read_fields(file)?;
        Ok(IndexHeader {
            status,
            root: rrn_from_disk(root),
            height: non_negative(height, "tree height")?,
            next_free: non_negative(next_free, "next free RRN")?,
            key_count: non_negative(keys, "key count")?,
            dirty: DirtySet::default(),
            fresh: false,
        })
    }

    pub fn flush<F: Write + Seek>(&mut self, file: &mut F) -> DbResult<usize> {
        let padding = self.fresh.then_some((
            BT_HEADER_PADDING_OFFSET,
            NODE_SLOT_SIZE - BT_HEADER_PADDING_OFFSET as usize,
        ));
        let values = [
            rrn_to_disk(self.root)?,
            to_disk(self.height, "tree height")?,
            to_disk(self.next_free, "next free RRN")?,
            to_disk(self.key_count, "key count")?,
        ];
        let fields = zip_offsets(INDEX_FIELD_OFFSETS, values);
        let written = flush_fields(file, self.dirty, self.status, fields, padding)?;
        self.dirty = DirtySet::default();
        self.fresh = false;
        Ok(written)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.fresh
    }

    pub fn status(&self) -> HeaderStatus {
        self.status
    }

    pub fn root(&self) -> Option<Rrn> {
        self.root
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn next_free(&self) -> Rrn {
        self.next_free
    }

    pub fn key_count(&self) -> u32 {
        self.key_count
    }

    pub fn set_status(&mut self, status: HeaderStatus) {
        if self.status != status {
            self.status = status;
            self.dirty.mark(STATUS);
        }
    }

    pub fn set_root(&mut self, root: Option<Rrn>) {
        if self.root != root {
            self.root = root;
            self.dirty.mark(1);
        }
    }

    pub fn set_height(&mut self, v: u32) {
        if self.height != v {
            self.height = v;
            self.dirty.mark(2);
        }
    }

    pub fn set_next_free(&mut self, v: Rrn) {
        if self.next_free != v {
            self.next_free = v;
            self.dirty.mark(3);
        }
    }

    pub fn set_key_count(&mut self, v: u32) {
        if self.key_count != v {
            self.key_count = v;
            self.dirty.mark(4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fresh_header_fills_its_slot() {
        let mut c = Cursor::new(Vec::new());
        let mut h = RecordHeader::new();
        assert_eq!(h.flush(&mut c).unwrap(), 6);
        let bytes = c.into_inner();
        assert_eq!(bytes.len(), RECORD_SLOT_SIZE);
        assert_eq!(bytes[0], b'0');
        assert_eq!(&bytes[1..5], &0i32.to_le_bytes());
        assert!(bytes[17..].iter().all(|b| *b == b'$'));
        assert!(!h.is_dirty());
    }

    #[test]
    fn fresh_index_header_fills_node_slot() {
        let mut c = Cursor::new(Vec::new());
        let mut h = IndexHeader::new();
        h.flush(&mut c).unwrap();
        let bytes = c.into_inner();
        assert_eq!(bytes.len(), NODE_SLOT_SIZE);
        assert_eq!(&bytes[1..5], &(-1i32).to_le_bytes());

        let loaded = IndexHeader::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.root(), None);
        assert_eq!(loaded.height(), 0);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn flush_writes_only_dirty_fields() {
        let mut c = Cursor::new(Vec::new());
        let mut h = RecordHeader::new();
        h.flush(&mut c).unwrap();

        h.set_live(3);
        h.set_deleted(3);
        h.set_updated(0);
        assert_eq!(h.flush(&mut c).unwrap(), 2);
        assert_eq!(h.flush(&mut c).unwrap(), 0);

        let loaded = RecordHeader::load(&mut c).unwrap();
        assert_eq!(loaded.live(), 3);
        assert_eq!(loaded.deleted(), 3);
        assert_eq!(loaded.next_rrn(), 0);
        assert_eq!(loaded.status(), HeaderStatus::Dirty);
    }

    #[test]
    fn status_round_trips() {
        let mut c = Cursor::new(Vec::new());
        let mut h = IndexHeader::new();
        h.set_status(HeaderStatus::Clean);
        h.set_root(Some(4));
        h.set_height(2);
        h.flush(&mut c).unwrap();
        assert_eq!(c.get_ref()[0], b'1');

        let loaded = IndexHeader::load(&mut c).unwrap();
        assert_eq!(loaded.status(), HeaderStatus::Clean);
        assert_eq!(loaded.root(), Some(4));
        assert_eq!(loaded.height(), 2);
    }

    #[test]
    fn negative_counter_is_corrupt() {
        let mut bytes = vec![b'1'];
        bytes.extend((-5i32).to_le_bytes());
        bytes.extend([0u8; 12]);
        assert!(matches!(RecordHeader::load(&mut Cursor::new(bytes)), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn counter_past_i32_is_not_written() {
        let mut c = Cursor::new(Vec::new());
        let mut h = IndexHeader::new();
        h.flush(&mut c).unwrap();
        let before = c.get_ref().clone();

        h.set_next_free(i32::MAX as Rrn + 1);
        assert!(matches!(h.flush(&mut c), Err(DbError::InvalidValue(_))));
        assert_eq!(c.get_ref(), &before);
    }
}
