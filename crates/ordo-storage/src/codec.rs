//! Binary record format for stored objects.
//!
//! Every object in the store is framed as:
//! ```text
//! +------------------+ 0
//! | magic: u16       |
//! | kind: u8         |
//! | version: u8      |
//! | payload_len: u32 | 8 (HEADER_SIZE)
//! +------------------+
//! | payload          |
//! +------------------+
//! | crc32: u32       |  CRC32 of header + payload
//! +------------------+
//! ```
//!
//! Values inside payloads are a one-byte type tag followed by an `i64`,
//! the `f64` bit pattern, or a `u32` length and UTF-8 bytes. All integers
//! are little endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ordo_common::{OrdoError, Result, TypeId, Value};

/// Record magic ("OR").
pub const RECORD_MAGIC: u16 = 0x4F52;

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Size of the record header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the trailing checksum in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Kinds of stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Heap page holding tuples.
    Page = 1,
    /// Clustered table metadata (page order and ranges).
    TableMeta = 2,
    /// B+ tree root/height/allocation metadata.
    TreeMeta = 3,
    /// Single B+ tree node.
    TreeNode = 4,
}

impl TryFrom<u8> for RecordKind {
    type Error = OrdoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordKind::Page),
            2 => Ok(RecordKind::TableMeta),
            3 => Ok(RecordKind::TreeMeta),
            4 => Ok(RecordKind::TreeNode),
            _ => Err(OrdoError::corrupted(
                "record",
                format!("invalid record kind: {}", value),
            )),
        }
    }
}

/// Frames a payload with header and checksum.
pub fn seal(kind: RecordKind, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    buf.put_u16_le(RECORD_MAGIC);
    buf.put_u8(kind as u8);
    buf.put_u8(RECORD_VERSION);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf.freeze()
}

/// Verifies the framing of a stored record and returns its payload.
pub fn unseal<'a>(object: &str, expected: RecordKind, data: &'a [u8]) -> Result<&'a [u8]> {
    if data.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(OrdoError::corrupted(object, "record too short"));
    }

    let mut header = &data[..HEADER_SIZE];
    let magic = header.get_u16_le();
    if magic != RECORD_MAGIC {
        return Err(OrdoError::corrupted(
            object,
            format!("bad magic: {:#06x}", magic),
        ));
    }
    let kind = RecordKind::try_from(header.get_u8())?;
    if kind != expected {
        return Err(OrdoError::corrupted(
            object,
            format!("expected {:?} record, found {:?}", expected, kind),
        ));
    }
    let version = header.get_u8();
    if version != RECORD_VERSION {
        return Err(OrdoError::corrupted(
            object,
            format!("unsupported record version: {}", version),
        ));
    }
    let payload_len = header.get_u32_le() as usize;
    let body_end = HEADER_SIZE + payload_len;
    if data.len() != body_end + CHECKSUM_SIZE {
        return Err(OrdoError::corrupted(object, "truncated record"));
    }

    let stored = (&data[body_end..]).get_u32_le();
    let computed = crc32fast::hash(&data[..body_end]);
    if stored != computed {
        return Err(OrdoError::corrupted(
            object,
            format!(
                "checksum mismatch: stored={}, computed={}",
                stored, computed
            ),
        ));
    }

    Ok(&data[HEADER_SIZE..body_end])
}

/// Appends a typed value.
pub fn put_value(buf: &mut BytesMut, value: &Value) {
    buf.put_u8(value.type_id() as u8);
    match value {
        Value::Int(v) => buf.put_i64_le(*v),
        Value::Double(v) => buf.put_u64_le(v.to_bits()),
        Value::Text(v) => put_str(buf, v),
    }
}

/// Appends a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Bounds-checked reader over a record payload.
pub struct Decoder<'a> {
    object: &'a str,
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder; `object` names the record in error messages.
    pub fn new(object: &'a str, buf: &'a [u8]) -> Self {
        Self { object, buf }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(OrdoError::corrupted(
                self.object,
                format!("payload truncated: need {} bytes, have {}", n, self.buf.remaining()),
            ));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(f64::from_bits(self.buf.get_u64_le()))
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        self.ensure(len)?;
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|e| OrdoError::corrupted(self.object, format!("invalid utf-8: {}", e)))?
            .to_string();
        self.buf.advance(len);
        Ok(s)
    }

    pub fn value(&mut self) -> Result<Value> {
        let tag = self.u8()?;
        let type_id = TypeId::try_from(tag)
            .map_err(|_| OrdoError::corrupted(self.object, format!("invalid value tag: {}", tag)))?;
        match type_id {
            TypeId::Int => Ok(Value::Int(self.i64()?)),
            TypeId::Double => Ok(Value::Double(self.f64()?)),
            TypeId::Text => Ok(Value::Text(self.string()?)),
        }
    }

    /// Fails unless the payload has been fully consumed.
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(OrdoError::corrupted(
                self.object,
                format!("{} trailing bytes", self.buf.remaining()),
            ));
        }
        Ok(())
    }
}
