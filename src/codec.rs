//! Per-kind serialization for the in-process wire format
//!
//! Every record kind declares whether its serialized size is known statically.
//! Fixed-size kinds are written without a length prefix; dynamic kinds get a
//! four byte little-endian length in front of their payload (see `queue`).

use crate::errors::{Result, TelemetryError};

/// Size class of a record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProcSize {
    Const(usize),
    Dynamic,
}

/// Serialization of one record kind into a queue buffer
pub trait InProcSerialize: Sized {
    const IN_PROC_SIZE: InProcSize;

    /// Number of payload bytes `write_value` appends.
    fn value_size(&self) -> usize {
        match Self::IN_PROC_SIZE {
            InProcSize::Const(size) => size,
            InProcSize::Dynamic => self.dynamic_size(),
        }
    }

    /// Payload size for dynamic kinds. Fixed kinds never call this.
    fn dynamic_size(&self) -> usize {
        0
    }

    fn write_value(&self, buffer: &mut Vec<u8>);

    /// Decode from exactly the payload bytes of one record.
    fn read_value(payload: &[u8]) -> Result<Self>;
}

pub fn write_u8(buffer: &mut Vec<u8>, value: u8) {
    buffer.push(value);
}

pub fn write_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64(buffer: &mut Vec<u8>, value: u64) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn write_i64(buffer: &mut Vec<u8>, value: i64) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn write_f64(buffer: &mut Vec<u8>, value: f64) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

/// Length-prefixed string, used when a string is followed by other fields.
pub fn write_prefixed_str(buffer: &mut Vec<u8>, value: &str) {
    write_u32(buffer, value.len() as u32);
    buffer.extend_from_slice(value.as_bytes());
}

pub fn prefixed_str_size(value: &str) -> usize {
    4 + value.len()
}

/// Bounds-checked forward cursor over a payload
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(TelemetryError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_prefixed_str(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        self.read_str(len)
    }

    pub fn read_str(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }

    /// Consume everything left as a string.
    pub fn read_tail_str(&mut self) -> Result<String> {
        self.read_str(self.remaining())
    }
}

/// Truncate to at most `max_len` bytes without splitting a char.
pub fn truncate_on_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_reports_truncation() {
        let mut buffer = Vec::new();
        write_u32(&mut buffer, 7);
        let mut reader = Reader::new(&buffer[..3]);
        match reader.read_u32() {
            Err(TelemetryError::Truncated { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_primitives_are_little_endian() {
        let mut buffer = Vec::new();
        write_u32(&mut buffer, 0x0102_0304);
        assert_eq!(buffer, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_prefixed_string_followed_by_tail() {
        let mut buffer = Vec::new();
        write_prefixed_str(&mut buffer, "net");
        buffer.extend_from_slice("connected".as_bytes());

        let mut reader = Reader::new(&buffer);
        assert_eq!(reader.read_prefixed_str().unwrap(), "net");
        assert_eq!(reader.read_tail_str().unwrap(), "connected");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut text = "héllo".to_string();
        truncate_on_char_boundary(&mut text, 2);
        assert_eq!(text, "h");

        let mut short = "ok".to_string();
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "ok");
    }
}
