//! Fixed-width primitives over a byte stream. All integers are 4-byte
//! little-endian; every helper works at the stream's current cursor.

use std::io::{self, Read, Seek, SeekFrom, Write};

pub const GARBAGE_BYTE: u8 = b'$';

pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

/// Read exactly `len` bytes.
pub fn read_bytes<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// `n` bytes of padding.
pub fn garbage(n: usize) -> Vec<u8> {
    vec![GARBAGE_BYTE; n]
}

/// Encode `value` into a fixed-width field: the value bytes, then (if shorter)
/// a terminating `'\0'` followed by padding.
pub fn fixed_field(value: Option<&str>, width: usize) -> Vec<u8> {
    let bytes = value.map(str::as_bytes).unwrap_or(&[]);
    let mut out = Vec::with_capacity(width);
    out.extend_from_slice(&bytes[..bytes.len().min(width)]);
    if out.len() < width {
        out.push(0);
        out.resize(width, GARBAGE_BYTE);
    }
    out
}

/// Decode a fixed-width field written by [`fixed_field`]. Empty means absent.
pub fn parse_fixed_field(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&raw[..end]).to_string())
}

pub fn read_fixed_field<R: Read>(r: &mut R, width: usize) -> io::Result<Option<String>> {
    let raw = read_bytes(r, width)?;
    Ok(parse_fixed_field(&raw))
}

/// Writes scattered fields of one slot while issuing as few seeks as possible.
///
/// The writer remembers where the stream cursor is (relative to `base`). A
/// field that starts exactly where the cursor already is gets written without
/// a seek; anything else seeks first.
pub struct FieldWriter<'f, F> {
    file: &'f mut F,
    base: u64,
    cursor: Option<u64>,
    seeks: usize,
    fields: usize,
}

impl<'f, F: Write + Seek> FieldWriter<'f, F> {
    /// `cursor` is the known position relative to `base`, if any.
    pub fn new(file: &'f mut F, base: u64, cursor: Option<u64>) -> Self {
        FieldWriter { file, base, cursor, seeks: 0, fields: 0 }
    }

    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.move_to(offset)?;
        self.file.write_all(bytes)?;
        self.cursor = Some(offset + bytes.len() as u64);
        self.fields += 1;
        Ok(())
    }

    /// Leave the cursor at `offset` (seeking only if it is not already there).
    pub fn finish_at(&mut self, offset: u64) -> io::Result<()> {
        self.move_to(offset)
    }

    fn move_to(&mut self, offset: u64) -> io::Result<()> {
        if self.cursor != Some(offset) {
            self.file.seek(SeekFrom::Start(self.base + offset))?;
            self.cursor = Some(offset);
            self.seeks += 1;
        }
        Ok(())
    }

    pub fn seeks(&self) -> usize {
        self.seeks
    }

    pub fn fields_written(&self) -> usize {
        self.fields
    }
}
