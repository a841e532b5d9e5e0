//! Length-tracked byte sequence with a read cursor.
//!
//! `ByteString` plays two roles: it is the runtime string type of the
//! scripting language, and it is the binary reader the loader walks while
//! parsing compiled bytecode. All multi-byte reads are big-endian; reads past
//! the end yield zero-filled or truncated data rather than an error, which is
//! what keeps the loader lenient about short segments.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Clone, Default)]
pub struct ByteString {
    buf: Vec<u8>,
    read: usize,
}

impl ByteString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buf)
    }

    pub fn append(&mut self, other: &ByteString) {
        self.buf.extend_from_slice(&other.buf);
    }

    pub fn push_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Moves the read cursor to an absolute offset. Offsets past the end are
    /// clamped, keeping the `read <= len` invariant.
    pub fn set_read(&mut self, pos: usize) {
        self.read = pos.min(self.buf.len());
    }

    pub fn read_pos(&self) -> usize {
        self.read
    }

    pub fn bytes_left(&self) -> usize {
        self.buf.len() - self.read
    }

    /// Reads exactly `n` bytes into a fixed buffer, zero-filling whatever the
    /// remaining data cannot cover. The cursor advances by the bytes actually
    /// consumed.
    fn read_padded(&mut self, n: usize) -> Vec<u8> {
        let avail = self.bytes_left().min(n);
        let mut out = vec![0u8; n];
        out[..avail].copy_from_slice(&self.buf[self.read..self.read + avail]);
        self.read += avail;
        out
    }

    pub fn read_u8(&mut self) -> u8 {
        self.read_padded(1)[0]
    }

    pub fn read_i16(&mut self) -> i16 {
        let b = self.read_padded(2);
        i16::from_be_bytes([b[0], b[1]])
    }

    pub fn read_i32(&mut self) -> i32 {
        let b = self.read_padded(4);
        i32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Reads up to `n` bytes as a fresh buffer, clamped to what remains.
    pub fn read_bytes(&mut self, n: usize) -> ByteString {
        let take = self.bytes_left().min(n);
        let out = ByteString::from(&self.buf[self.read..self.read + take]);
        self.read += take;
        out
    }

    /// Reads bytes up to (and consuming) the next NUL, or to the end of the
    /// buffer when no terminator is present.
    pub fn read_cstr(&mut self) -> ByteString {
        let mut out = ByteString::new();
        while self.bytes_left() > 0 {
            let b = self.read_u8();
            if b == 0 {
                break;
            }
            out.write_u8(b);
        }
        out
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.buf.starts_with(prefix.as_bytes())
    }

    pub fn starts_with_ignore_case(&self, prefix: &ByteString) -> bool {
        self.buf.len() >= prefix.len() && self.buf[..prefix.len()].eq_ignore_ascii_case(&prefix.buf)
    }

    pub fn ends_with_ignore_case(&self, suffix: &ByteString) -> bool {
        self.buf.len() >= suffix.len()
            && self.buf[self.buf.len() - suffix.len()..].eq_ignore_ascii_case(&suffix.buf)
    }

    /// Drops the first `n` bytes, used to strip the `public.` prefix from
    /// function names at load time.
    pub fn remove_start(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        self.read = self.read.saturating_sub(n);
    }

    pub fn to_lowercase(&self) -> ByteString {
        ByteString::from(self.buf.to_ascii_lowercase())
    }

    pub fn eq_ignore_case(&self, other: &ByteString) -> bool {
        self.buf.eq_ignore_ascii_case(&other.buf)
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        Self {
            buf: s.as_bytes().to_vec(),
            read: 0,
        }
    }
}

impl From<String> for ByteString {
    fn from(s: String) -> Self {
        Self {
            buf: s.into_bytes(),
            read: 0,
        }
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf, read: 0 }
    }
}

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        Self {
            buf: bytes.to_vec(),
            read: 0,
        }
    }
}

// Content equality; the cursor is transient reader state and does not count.
impl PartialEq for ByteString {
    fn eq(&self, other: &Self) -> bool {
        self.buf == other.buf
    }
}

impl Eq for ByteString {}

impl Hash for ByteString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.buf.hash(state);
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_lossy())
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{}\"", self.as_str_lossy())
    }
}
