use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{DbError, DbResult, OpenStatus};
use crate::storage::binary::{read_i32, write_i32};
use crate::storage::codec::{read_record, update_record, write_record};
use crate::storage::header::{HeaderStatus, RecordHeader};
use crate::storage::layout::{record_offset, Rrn, RECORD_SLOT_SIZE, TOMBSTONE};
use crate::storage::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, no mutation.
    Read,
    /// New file; an existing one is truncated.
    Create,
    /// Existing file, read and write.
    Modify,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    pub(crate) fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            OpenMode::Read => opts.read(true),
            OpenMode::Create => opts.read(true).write(true).create(true).truncate(true),
            OpenMode::Modify => opts.read(true).write(true),
        };
        opts
    }
}

/// A short header means the file was never closed properly.
pub(crate) fn short_header_is_inconsistent(err: DbError, path: &Path) -> DbError {
    match err {
        DbError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            DbError::Inconsistent(path.to_path_buf())
        }
        other => other,
    }
}

struct OpenFile {
    file: File,
    path: PathBuf,
    mode: OpenMode,
}

/// Manager of a record file: fixed 128-byte slots addressed by RRN behind a
/// header slot.
///
/// A store starts closed; [`RecordStore::open`] attaches it to a file.
/// Dropping an open store closes it.
pub struct RecordStore {
    handle: Option<OpenFile>,
    header: RecordHeader,
}

impl Default for RecordStore {
    fn default() -> Self {
        RecordStore::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        RecordStore { handle: None, header: RecordHeader::new() }
    }

    /// Open `path` in `mode`. Reading or modifying requires a clean header;
    /// modifying marks it dirty on disk before anything else is written.
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
                let mut header = RecordHeader::new();
                header.flush(&mut file)?;
                header
            }
            OpenMode::Read | OpenMode::Modify => {
                let mut header = RecordHeader::load(&mut file)
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
            "record store: opened {} ({:?}), next_rrn={}, live={}, deleted={}",
            path.display(),
            mode,
            header.next_rrn(),
            header.live(),
            header.deleted()
        );
        self.header = header;
        self.handle = Some(OpenFile { file, path: path.to_path_buf(), mode });
        Ok(if self.is_empty() { OpenStatus::Empty } else { OpenStatus::Ready })
    }

    /// Mark the file clean (when writable) and release the handle. Closing a
    /// closed store does nothing. The header stays readable afterwards.
    pub fn close(&mut self) -> DbResult<()> {
        let Some(mut open) = self.handle.take() else {
            return Ok(());
        };
        if open.mode.is_writable() {
            self.header.set_status(HeaderStatus::Clean);
            self.header.flush(&mut open.file)?;
        }
        debug!("record store: closed {}", open.path.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// True when the store holds no live record.
    pub fn is_empty(&self) -> bool {
        self.header.live() == 0
    }

    pub fn header(&self) -> &RecordHeader {
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

    /// Append `records` after the last slot. Every record is validated before
    /// the first byte is written. Returns the RRNs that were assigned.
    pub fn insert_at_end(&mut self, records: &[Record]) -> DbResult<Range<Rrn>> {
        self.writable_file()?;
        for record in records {
            record.validate()?;
        }

        let start = self.header.next_rrn();
        let end = start + records.len() as Rrn;
        if records.is_empty() {
            return Ok(start..end);
        }

        let file = self.writable_file()?;
        file.seek(SeekFrom::Start(record_offset(start)))?;
        for record in records {
            write_record(file, record)?;
        }
        file.flush()?;

        self.header.set_next_rrn(end);
        self.header.set_live(self.header.live() + records.len() as u32);
        debug!("record store: appended {} record(s) at RRN {}..{}", records.len(), start, end);
        Ok(start..end)
    }

    pub fn insert(&mut self, record: &Record) -> DbResult<Rrn> {
        let range = self.insert_at_end(std::slice::from_ref(record))?;
        Ok(range.start)
    }

    /// Record at `rrn`; `None` past the end or for a removed slot.
    pub fn fetch_at(&mut self, rrn: Rrn) -> DbResult<Option<Record>> {
        let next = self.header.next_rrn();
        let file = self.file()?;
        if rrn >= next {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(record_offset(rrn)))?;
        read_record(file)
    }

    /// Lazy scan over the live records, in RRN order.
    pub fn records(&mut self) -> DbResult<RecordCursor<'_>> {
        let end = self.header.live() + self.header.deleted();
        let open = self.handle.as_mut().ok_or(DbError::NotOpen)?;
        open.file.seek(SeekFrom::Start(record_offset(0)))?;
        Ok(RecordCursor {
            file: &mut open.file,
            header: &mut self.header,
            writable: open.mode.is_writable(),
            next: 0,
            end,
            current: None,
        })
    }

    /// Call `visit` for every live record; returns how many were visited.
    pub fn for_each<V>(&mut self, mut visit: V) -> DbResult<usize>
    where
        V: FnMut(Rrn, &Record),
    {
        let mut count = 0;
        for item in self.records()? {
            let (rrn, record) = item?;
            visit(rrn, &record);
            count += 1;
        }
        Ok(count)
    }

    /// Call `visit` for every live record matching at least one filter;
    /// returns the number of matches.
    pub fn for_each_match<V>(&mut self, filters: &[Record], mut visit: V) -> DbResult<usize>
    where
        V: FnMut(Rrn, &Record),
    {
        check_filters(filters)?;
        let mut count = 0;
        for item in self.records()? {
            let (rrn, record) = item?;
            if matches_any(&record, filters)? {
                visit(rrn, &record);
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn fetch_matches(&mut self, filters: &[Record]) -> DbResult<Vec<(Rrn, Record)>> {
        let mut out = Vec::new();
        self.for_each_match(filters, |rrn, record| out.push((rrn, record.clone())))?;
        Ok(out)
    }

    /// Tombstone every live record matching at least one filter.
    pub fn remove_matches(&mut self, filters: &[Record]) -> DbResult<usize> {
        self.writable_file()?;
        check_filters(filters)?;

        let mut removed = 0;
        let mut cursor = self.records()?;
        while let Some(item) = cursor.next() {
            let (_, record) = item?;
            if matches_any(&record, filters)? {
                cursor.remove_current()?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("record store: removed {} record(s)", removed);
        }
        Ok(removed)
    }

    /// Tombstone one slot. `false` if it is out of range or already removed.
    pub fn remove_at(&mut self, rrn: Rrn) -> DbResult<bool> {
        let next = self.header.next_rrn();
        let file = self.writable_file()?;
        if rrn >= next {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(record_offset(rrn)))?;
        if read_i32(file)? == TOMBSTONE {
            return Ok(false);
        }
        file.seek(SeekFrom::Current(-4))?;
        write_i32(file, TOMBSTONE)?;
        file.flush()?;
        mark_removed(&mut self.header);
        Ok(true)
    }

    /// Apply the fields of `payload` to the record at `rrn`, in place.
    /// `false` if there is no live record there.
    pub fn update_at(&mut self, rrn: Rrn, payload: &Record) -> DbResult<bool> {
        if payload.mask().is_empty() {
            return Err(DbError::InvalidArgument("update payload sets no field".into()));
        }
        payload.validate()?;
        let next = self.header.next_rrn();
        let file = self.writable_file()?;
        if rrn >= next {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(record_offset(rrn)))?;
        let Some(report) = update_record(file, payload)? else {
            return Ok(false);
        };
        file.flush()?;
        debug!(
            "record store: updated RRN {} ({} field(s), {} seek(s))",
            rrn, report.fields_written, report.seeks
        );
        self.header.set_updated(self.header.updated() + 1);
        Ok(true)
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("record store: close on drop failed: {}", e);
        }
    }
}

fn check_filters(filters: &[Record]) -> DbResult<()> {
    if filters.iter().any(|f| f.mask().is_empty()) {
        return Err(DbError::DisjointMasks);
    }
    Ok(())
}

fn matches_any(record: &Record, filters: &[Record]) -> DbResult<bool> {
    for filter in filters {
        if record.matches(filter)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn mark_removed(header: &mut RecordHeader) {
    header.set_live(header.live().saturating_sub(1));
    header.set_deleted(header.deleted() + 1);
}

/// Sequential reader over the record slots of an open store. Removed slots
/// are skipped. The slot just yielded can be removed through
/// [`RecordCursor::remove_current`] without disturbing the scan.
pub struct RecordCursor<'s> {
    file: &'s mut File,
    header: &'s mut RecordHeader,
    writable: bool,
    next: Rrn,
    end: Rrn,
    current: Option<Rrn>,
}

impl RecordCursor<'_> {
    /// Tombstone the record returned by the last call to `next`.
    pub fn remove_current(&mut self) -> DbResult<()> {
        if !self.writable {
            return Err(DbError::ReadOnly);
        }
        let rrn = self
            .current
            .take()
            .ok_or_else(|| DbError::InvalidArgument("cursor has no current record".into()))?;

        // Jump back over the slot just read, rewrite only its first field,
        // then return to where the scan left off.
        self.file.seek(SeekFrom::Current(-(RECORD_SLOT_SIZE as i64)))?;
        write_i32(self.file, TOMBSTONE)?;
        self.file.seek(SeekFrom::Current(RECORD_SLOT_SIZE as i64 - 4))?;
        mark_removed(self.header);
        debug!("record store: tombstoned RRN {}", rrn);
        Ok(())
    }
}

impl Iterator for RecordCursor<'_> {
    type Item = DbResult<(Rrn, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.current = None;
        while self.next < self.end {
            let rrn = self.next;
            self.next += 1;
            match read_record(self.file) {
                Ok(Some(record)) => {
                    self.current = Some(rrn);
                    return Some(Ok((rrn, record)));
                }
                Ok(None) => continue,
                Err(e) => {
                    self.next = self.end;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
