//! Little-endian cursor over a decoded, checksum-stripped payload.
//!
//! Mirrors the shape of the `Buffer` helper in the original protocol
//! driver this crate reimplements: pull fixed-width scalars and raw byte
//! runs off the front, erroring only when the buffer underflows.

use crate::error::ProtocolError;

/// A cursor over a byte slice that consumes bytes from the front.
pub struct PayloadReader<'a> {
    data: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes remaining in the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.data.len() < len {
            return Err(ProtocolError::Decode(format!(
                "expected {len} bytes, {} remaining",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    /// Pull a raw run of `len` bytes.
    pub fn pop_raw(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.take(len)?.to_vec())
    }

    pub fn pop_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn pop_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn pop_u16_le(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn pop_u32_le(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn pop_u64_le(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Pull a little-endian unsigned integer of `width` bytes (1/2/4/8),
    /// widened into a `u64`. Used for the `NetworkParameter` catalog,
    /// whose value width is only known at runtime from the parameter id.
    pub fn pop_uint_le(&mut self, width: usize) -> Result<u64, ProtocolError> {
        let b = self.take(width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}
