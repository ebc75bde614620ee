//! Context-tagged TLV wire codec
//!
//! Command payloads are encoded as a flat sequence of context-tagged
//! elements. Request and response schemas assign sequential tags starting
//! at zero in field declaration order; wire compatibility depends on that
//! order, so encoders must never reorder fields.
//!
//! Element layout: one type byte, one context-tag byte, then the value.
//! Integers are little-endian fixed width; strings carry an explicit
//! 16-bit length prefix.

use crate::error::{WeftError, WeftResult};

const TYPE_U8: u8 = 0x00;
const TYPE_U16: u8 = 0x01;
const TYPE_U32: u8 = 0x02;
const TYPE_U64: u8 = 0x03;
const TYPE_BOOL_FALSE: u8 = 0x08;
const TYPE_BOOL_TRUE: u8 = 0x09;
const TYPE_OCTETS: u8 = 0x10;
const TYPE_UTF8: u8 = 0x11;

/// A value that can serialize itself into a TLV element stream
pub trait TlvEncode {
    /// Append this value's fields to the writer, tags sequential from zero
    fn encode(&self, writer: &mut TlvWriter) -> WeftResult<()>;
}

/// A value that can reconstruct itself from a TLV element stream
pub trait TlvDecode: Sized {
    /// Consume this value's fields from the reader, tags sequential from zero
    fn decode(reader: &mut TlvReader<'_>) -> WeftResult<Self>;
}

/// Appends context-tagged elements to a byte buffer
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish writing and take the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write an unsigned 8-bit element
    pub fn put_u8(&mut self, tag: u8, value: u8) {
        self.buf.extend_from_slice(&[TYPE_U8, tag, value]);
    }

    /// Write an unsigned 16-bit element
    pub fn put_u16(&mut self, tag: u8, value: u16) {
        self.buf.extend_from_slice(&[TYPE_U16, tag]);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an unsigned 32-bit element
    pub fn put_u32(&mut self, tag: u8, value: u32) {
        self.buf.extend_from_slice(&[TYPE_U32, tag]);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an unsigned 64-bit element
    pub fn put_u64(&mut self, tag: u8, value: u64) {
        self.buf.extend_from_slice(&[TYPE_U64, tag]);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a boolean element
    pub fn put_bool(&mut self, tag: u8, value: bool) {
        let ty = if value { TYPE_BOOL_TRUE } else { TYPE_BOOL_FALSE };
        self.buf.extend_from_slice(&[ty, tag]);
    }

    /// Write an octet-string element with an explicit length prefix
    pub fn put_octets(&mut self, tag: u8, value: &[u8]) -> WeftResult<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| WeftError::codec("octet string exceeds 65535 bytes"))?;
        self.buf.extend_from_slice(&[TYPE_OCTETS, tag]);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Write a UTF-8 string element with an explicit length prefix
    pub fn put_str(&mut self, tag: u8, value: &str) -> WeftResult<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| WeftError::codec("string exceeds 65535 bytes"))?;
        self.buf.extend_from_slice(&[TYPE_UTF8, tag]);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

/// Consumes context-tagged elements from a byte slice, in order
#[derive(Debug)]
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    /// Create a reader over an encoded element stream
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Whether every element has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> WeftResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| WeftError::codec("truncated TLV element"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn expect_header(&mut self, tag: u8, expected_ty: &str, ty_codes: &[u8]) -> WeftResult<u8> {
        let header = self.take(2)?;
        let (ty, found_tag) = (header[0], header[1]);
        if !ty_codes.contains(&ty) {
            return Err(WeftError::codec(format!(
                "expected {expected_ty} at tag {tag}, found type {ty:#04x}"
            )));
        }
        if found_tag != tag {
            return Err(WeftError::codec(format!(
                "expected context tag {tag}, found {found_tag}"
            )));
        }
        Ok(ty)
    }

    /// Read an unsigned 8-bit element at `tag`
    pub fn read_u8(&mut self, tag: u8) -> WeftResult<u8> {
        self.expect_header(tag, "u8", &[TYPE_U8])?;
        Ok(self.take(1)?[0])
    }

    /// Read an unsigned 16-bit element at `tag`
    pub fn read_u16(&mut self, tag: u8) -> WeftResult<u16> {
        self.expect_header(tag, "u16", &[TYPE_U16])?;
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read an unsigned 32-bit element at `tag`
    pub fn read_u32(&mut self, tag: u8) -> WeftResult<u32> {
        self.expect_header(tag, "u32", &[TYPE_U32])?;
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an unsigned 64-bit element at `tag`
    pub fn read_u64(&mut self, tag: u8) -> WeftResult<u64> {
        self.expect_header(tag, "u64", &[TYPE_U64])?;
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a boolean element at `tag`
    pub fn read_bool(&mut self, tag: u8) -> WeftResult<bool> {
        let ty = self.expect_header(tag, "bool", &[TYPE_BOOL_FALSE, TYPE_BOOL_TRUE])?;
        Ok(ty == TYPE_BOOL_TRUE)
    }

    /// Read an octet-string element at `tag`
    pub fn read_octets(&mut self, tag: u8) -> WeftResult<Vec<u8>> {
        self.expect_header(tag, "octet string", &[TYPE_OCTETS])?;
        let len_bytes = self.take(2)?;
        let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a UTF-8 string element at `tag`
    pub fn read_str(&mut self, tag: u8) -> WeftResult<String> {
        self.expect_header(tag, "string", &[TYPE_UTF8])?;
        let len_bytes = self.take(2)?;
        let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| WeftError::codec("string element is not valid UTF-8"))
    }
}
