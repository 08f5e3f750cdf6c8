//! MSB-first bit packing.
//!
//! Every variable-length structure in a shard (chunk streams, the serialized
//! Huffman tree) is written through [`BitWriter`] and read back through
//! [`BitReader`]. Codes are written most significant bit first and the final
//! byte is padded with zero bits.

use crate::error::Error;

/// Accumulates bit codes of arbitrary length into a byte buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    acc: u64,
    /// Pending bits in `acc`, always < 8 between calls.
    pending: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Append the low `len` bits of `value` (0 ≤ `len` ≤ 64).
    pub fn write_bits(&mut self, value: u64, len: u32) {
        debug_assert!(len <= 64);
        if len > 32 {
            self.write_bits(value >> 32, len - 32);
            self.write_bits(value & 0xFFFF_FFFF, 32);
            return;
        }
        if len == 0 {
            return;
        }
        let masked = value & ((1u64 << len) - 1);
        self.acc = (self.acc << len) | masked;
        self.pending += len;
        while self.pending >= 8 {
            self.pending -= 8;
            self.buffer.push((self.acc >> self.pending) as u8);
        }
        self.acc &= (1u64 << self.pending) - 1;
    }

    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u64, 1);
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.buffer.len() * 8 + self.pending as usize
    }

    /// Pad the last partial byte with zeros and return the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        if self.pending > 0 {
            self.buffer.push((self.acc << (8 - self.pending)) as u8);
        }
        self.buffer
    }
}

/// Raised when a read would go past the end of the underlying bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBits;

impl From<OutOfBits> for Error {
    fn from(_: OutOfBits) -> Self {
        Error::format("bit stream ended unexpectedly")
    }
}

/// Reads MSB-first bit codes from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `len` bits (0 ≤ `len` ≤ 64) as an unsigned value.
    pub fn read_bits(&mut self, len: u32) -> Result<u64, OutOfBits> {
        debug_assert!(len <= 64);
        let len = len as usize;
        if len > self.remaining_bits() {
            return Err(OutOfBits);
        }
        let mut out = 0u64;
        let mut remaining = len;
        while remaining > 0 {
            let byte = self.data[self.pos / 8];
            let avail = 8 - self.pos % 8;
            let take = avail.min(remaining);
            let bits = (byte as u64 >> (avail - take)) & ((1u64 << take) - 1);
            out = (out << take) | bits;
            self.pos += take;
            remaining -= take;
        }
        Ok(out)
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, OutOfBits> {
        if self.pos >= self.data.len() * 8 {
            return Err(OutOfBits);
        }
        let byte = self.data[self.pos / 8];
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    pub fn read_u8(&mut self) -> Result<u8, OutOfBits> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, OutOfBits> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, OutOfBits> {
        Ok(self.read_bits(32)? as u32)
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Current position in bits from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }
}
