//! Primitive big-endian codec for the obus wire format.
//!
//! Every record on the wire is built from a handful of primitives:
//!
//! ```text
//! u8 / i8            1 byte
//! u16 / i16          2 bytes, big-endian
//! u32 / i32 / f32    4 bytes, big-endian
//! u64 / i64 / f64    8 bytes, big-endian
//! string             [len:u32][utf-8 bytes][0x00]   (len = byte length + 1)
//!                    [0x00000000]                   (null / absent string)
//! ```
//!
//! # Size markers (for beginners)
//!
//! Objects, events and calls embed their struct as a length-prefixed
//! sub-message so that a receiver that cannot understand the struct can still
//! skip it.  Computing that length up front would mean encoding the struct
//! twice.  Instead the writer *reserves* four bytes with
//! [`Buffer::prepare_size_marker`], encodes the struct, then back-patches the
//! reserved bytes with [`Buffer::write_size_marker`]:
//!
//! ```text
//! prepare_size_marker()        write struct...           write_size_marker()
//! [00 00 00 00]            -> [00 00 00 00][s t r u c t] -> [00 00 00 06][s t r u c t]
//! ```

use thiserror::Error;

/// Errors that can occur while encoding or decoding obus records.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// A read ran past the end of the available bytes.
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {available}")]
    InsufficientData {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The packet type byte in the header is not a recognized value.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// The declared packet size is smaller than the header itself.
    #[error("bad packet size: {0}")]
    BadPacketSize(u32),

    /// The payload could not be interpreted (unknown uid, bad enum value, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A value could not be serialized with its field descriptor.
    #[error("encode error: {0}")]
    Encode(String),
}

/// A growable byte buffer with a read/write cursor.
///
/// Writes overwrite in place when the cursor is inside the existing data and
/// append otherwise, which is what makes size-marker back-patching work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    pos: usize,
}

impl Buffer {
    /// Creates an empty buffer with the cursor at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing bytes for reading, cursor at 0.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Total number of bytes held by the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes between the cursor and the end of the data.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Moves the cursor.  Positions past the end are allowed; the next read
    /// will then fail with [`ProtocolError::InsufficientData`].
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Advances the cursor by `count` bytes, zero-filling when writing past the end.
    pub fn skip(&mut self, count: usize) {
        let end = self.pos + count;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.pos = end;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    // ── Size markers ──────────────────────────────────────────────────────────

    /// Reserves 4 bytes at the cursor and returns their offset.
    pub fn prepare_size_marker(&mut self) -> usize {
        let marker = self.pos;
        self.write_u32(0);
        marker
    }

    /// Back-patches `marker` with the number of bytes written after it.
    pub fn write_size_marker(&mut self, marker: usize) {
        let cur = self.pos;
        let size = cur.saturating_sub(marker + 4) as u32;
        self.pos = marker;
        self.write_u32(size);
        self.pos = cur;
    }

    // ── Writers ───────────────────────────────────────────────────────────────

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    pub fn write_u8(&mut self, val: u8) {
        self.write_bytes(&[val]);
    }

    pub fn write_i8(&mut self, val: i8) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_u16(&mut self, val: u16) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_i16(&mut self, val: i16) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_u32(&mut self, val: u32) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_u64(&mut self, val: u64) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_i64(&mut self, val: i64) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_f32(&mut self, val: f32) {
        self.write_bytes(&val.to_be_bytes());
    }

    pub fn write_f64(&mut self, val: f64) {
        self.write_bytes(&val.to_be_bytes());
    }

    /// Writes a length-prefixed, NUL-terminated string.  `None` encodes as a
    /// zero length, which is distinct from `Some("")` (length 1).
    pub fn write_string(&mut self, val: Option<&str>) -> Result<(), ProtocolError> {
        match val {
            None => self.write_u32(0),
            Some(s) => {
                let bytes = s.as_bytes();
                let len = u32::try_from(bytes.len() + 1).map_err(|_| {
                    ProtocolError::Encode(format!("string of {} bytes is too long", bytes.len()))
                })?;
                self.write_u32(len);
                self.write_bytes(bytes);
                self.write_u8(0);
            }
        }
        Ok(())
    }

    // ── Readers ───────────────────────────────────────────────────────────────

    /// Reads exactly `count` bytes and advances the cursor.
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8], ProtocolError> {
        if self.remaining() < count {
            return Err(ProtocolError::InsufficientData {
                offset: self.pos,
                needed: count,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += count;
        Ok(&self.data[start..start + count])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(u8::from_be_bytes(self.read_array()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Reads a string written by [`Buffer::write_string`].
    pub fn read_string(&mut self) -> Result<Option<String>, ProtocolError> {
        let len = self.read_u32()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.read_bytes(len)?;
        // last byte is the NUL terminator
        let text = std::str::from_utf8(&raw[..len - 1])
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?;
        Ok(Some(text.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_big_endian() {
        // Arrange
        let mut buf = Buffer::new();

        // Act
        buf.write_u16(0x0102);
        buf.write_u32(0x0304_0506);
        buf.write_i64(-2);

        // Assert
        assert_eq!(
            buf.as_bytes(),
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]
        );
    }

    #[test]
    fn test_read_back_every_primitive() {
        let mut buf = Buffer::new();
        buf.write_u8(200);
        buf.write_i8(-100);
        buf.write_u16(60_000);
        buf.write_i16(-30_000);
        buf.write_u32(4_000_000_000);
        buf.write_i32(-2_000_000_000);
        buf.write_u64(u64::MAX);
        buf.write_i64(i64::MIN);
        buf.write_f32(1.5);
        buf.write_f64(-0.25);
        buf.rewind();

        assert_eq!(buf.read_u8().unwrap(), 200);
        assert_eq!(buf.read_i8().unwrap(), -100);
        assert_eq!(buf.read_u16().unwrap(), 60_000);
        assert_eq!(buf.read_i16().unwrap(), -30_000);
        assert_eq!(buf.read_u32().unwrap(), 4_000_000_000);
        assert_eq!(buf.read_i32().unwrap(), -2_000_000_000);
        assert_eq!(buf.read_u64().unwrap(), u64::MAX);
        assert_eq!(buf.read_i64().unwrap(), i64::MIN);
        assert_eq!(buf.read_f32().unwrap(), 1.5);
        assert_eq!(buf.read_f64().unwrap(), -0.25);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_string_layout_has_length_plus_one_and_nul() {
        // Arrange
        let mut buf = Buffer::new();

        // Act
        buf.write_string(Some("ps")).unwrap();

        // Assert
        assert_eq!(buf.as_bytes(), &[0, 0, 0, 3, b'p', b's', 0]);
    }

    #[test]
    fn test_null_string_is_distinct_from_empty_string() {
        let mut buf = Buffer::new();
        buf.write_string(None).unwrap();
        buf.write_string(Some("")).unwrap();
        assert_eq!(buf.as_bytes(), &[0, 0, 0, 0, 0, 0, 0, 1, 0]);

        buf.rewind();
        assert_eq!(buf.read_string().unwrap(), None);
        assert_eq!(buf.read_string().unwrap(), Some(String::new()));
    }

    #[test]
    fn test_size_marker_back_patches_written_length() {
        // Arrange
        let mut buf = Buffer::new();
        buf.write_u16(0xAAAA);

        // Act
        let marker = buf.prepare_size_marker();
        buf.write_u32(1);
        buf.write_u16(2);
        buf.write_size_marker(marker);
        buf.write_u8(0xFF);

        // Assert – 6 bytes were written after the marker, cursor stayed at the end
        assert_eq!(&buf.as_bytes()[2..6], &[0, 0, 0, 6]);
        assert_eq!(buf.len(), 2 + 4 + 6 + 1);
        assert_eq!(buf.pos(), buf.len());
    }

    #[test]
    fn test_reading_past_end_returns_insufficient_data() {
        let mut buf = Buffer::from_bytes(vec![0x01, 0x02]);
        let result = buf.read_u32();
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                offset: 0,
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_truncated_string_returns_insufficient_data() {
        // length says 10 bytes but only 2 follow
        let mut buf = Buffer::from_bytes(vec![0, 0, 0, 10, b'a', 0]);
        assert!(matches!(
            buf.read_string(),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_string_is_malformed() {
        let mut buf = Buffer::from_bytes(vec![0, 0, 0, 2, 0xFF, 0]);
        assert!(matches!(
            buf.read_string(),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_set_pos_past_end_fails_next_read() {
        let mut buf = Buffer::from_bytes(vec![1, 2, 3]);
        buf.set_pos(10);
        assert_eq!(buf.remaining(), 0);
        assert!(buf.read_u8().is_err());
    }
}
