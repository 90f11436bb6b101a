//! Rewindable byte-cursor codec for packet payloads.
//!
//! Primitives are fixed-width little-endian; strings and blobs carry a
//! `u32` length prefix. The same writer is typically reused across
//! packets via [`WireWriter::rewind`].

use std::io;

/// Growable payload buffer with an encode cursor.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards everything written so far, keeping the allocation.
    pub fn rewind(&mut self) {
        self.buf.clear();
    }

    /// Bytes encoded so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, yielding the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Appends a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Appends a bool as one byte (0 or 1).
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    /// Appends a little-endian u32.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a little-endian i32.
    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a little-endian u64.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a little-endian IEEE-754 f32.
    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }

    /// Appends a length-prefixed opaque blob.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_bytes(&mut self, v: &[u8]) {
        debug_assert!(v.len() <= u32::MAX as usize);
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }
}

/// Decode cursor over a borrowed payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Shorthand for the truncated-payload error.
fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "payload truncated")
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Resets the cursor to the start of the payload.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Bytes left to decode.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Takes `n` raw bytes off the cursor.
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(eof());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a bool; any nonzero byte is `true`.
    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> io::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian i32.
    pub fn read_i32(&mut self) -> io::Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> io::Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads a little-endian IEEE-754 f32.
    pub fn read_f32(&mut self) -> io::Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> io::Result<String> {
        let raw = self.read_bytes()?;
        String::from_utf8(raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Reads a length-prefixed opaque blob.
    pub fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_primitives() {
        let mut w = WireWriter::new();
        w.write_u8(0xab);
        w.write_bool(true);
        w.write_u32(0xdead_beef);
        w.write_i32(-42);
        w.write_u64(u64::MAX - 1);
        w.write_f32(0.625);
        w.write_str("renderpass #3");
        w.write_bytes(&[0, 1, 2, 255]);

        let mut r = WireReader::new(w.as_bytes());
        assert_eq!(r.read_u8().unwrap(), 0xab);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.read_f32().unwrap(), 0.625);
        assert_eq!(r.read_str().unwrap(), "renderpass #3");
        assert_eq!(r.read_bytes().unwrap(), vec![0, 1, 2, 255]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn rewind_resets_both_cursors() {
        let mut w = WireWriter::new();
        w.write_u32(7);
        w.rewind();
        w.write_u32(9);
        assert_eq!(w.as_bytes().len(), 4);

        let mut r = WireReader::new(w.as_bytes());
        assert_eq!(r.read_u32().unwrap(), 9);
        r.rewind();
        assert_eq!(r.read_u32().unwrap(), 9);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut r = WireReader::new(&[1, 2]);
        assert_eq!(
            r.read_u32().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn string_length_cannot_overrun() {
        // Claims 100 bytes but only 2 follow.
        let mut w = WireWriter::new();
        w.write_u32(100);
        w.write_u8(b'h');
        w.write_u8(b'i');
        let mut r = WireReader::new(w.as_bytes());
        assert!(r.read_str().is_err());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut w = WireWriter::new();
        w.write_bytes(&[0xff, 0xfe]);
        let mut r = WireReader::new(w.as_bytes());
        assert_eq!(
            r.read_str().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
