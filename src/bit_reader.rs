// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;

/// Largest single read. A 64-bit load anchored at the current byte loses up
/// to 7 bits to the intra-byte offset.
pub const MAX_READ_BITS: usize = 56;

/// Reads bits from a byte buffer, least-significant bit first. The reader
/// keeps no decoded state beyond a bit cursor, so cloning it forks the
/// stream position.
#[derive(Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_offset: usize,
}

impl Debug for BitReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BitReader{{ {} of {} bits consumed }}",
            self.bit_offset,
            self.data.len() * 8
        )
    }
}

impl<'a> BitReader<'a> {
    pub fn new(data: &[u8]) -> BitReader {
        BitReader {
            data,
            bit_offset: 0,
        }
    }

    /// Reads `num` bits. The whole codec reads at most 32 bits at a time;
    /// anything past the end of the buffer is a truncated stream.
    pub fn read(&mut self, num: usize) -> Result<u64, Error> {
        debug_assert!(num <= MAX_READ_BITS);
        if num == 0 {
            return Ok(0);
        }
        if self.bit_offset + num > self.data.len() * 8 {
            self.bit_offset = self.data.len() * 8;
            return Err(Error::OutOfBounds);
        }
        let byte = self.bit_offset / 8;
        let shift = self.bit_offset % 8;
        let word = if byte + 8 <= self.data.len() {
            LittleEndian::read_u64(&self.data[byte..])
        } else {
            // Fewer than 8 bytes left; gather the tail by hand.
            let mut word = 0u64;
            for (i, &b) in self.data[byte..].iter().enumerate() {
                word |= (b as u64) << (8 * i);
            }
            word
        };
        self.bit_offset += num;
        Ok((word >> shift) & ((1u64 << num) - 1))
    }

    /// Total bits consumed so far, including skipped ones.
    pub fn total_bits_read(&self) -> usize {
        self.bit_offset
    }

    /// Bits left in the buffer.
    pub fn total_bits_available(&self) -> usize {
        self.data.len() * 8 - self.bit_offset
    }

    /// Advances the cursor without looking at the bits (used for opaque
    /// sub-streams such as the alpha payload).
    pub fn skip_bits(&mut self, num: usize) -> Result<(), Error> {
        if self.bit_offset + num > self.data.len() * 8 {
            self.bit_offset = self.data.len() * 8;
            return Err(Error::OutOfBounds);
        }
        self.bit_offset += num;
        Ok(())
    }

    /// Moves to the next byte boundary; the skipped bits must be zero
    /// padding.
    pub fn jump_to_byte_boundary(&mut self) -> Result<(), Error> {
        let within_byte = self.bit_offset % 8;
        if within_byte != 0 && self.read(8 - within_byte)? != 0 {
            return Err(Error::NonZeroPadding);
        }
        Ok(())
    }
}
