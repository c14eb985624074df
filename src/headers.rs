// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{
    bit_reader::BitReader,
    bit_writer::BitWriter,
    error::{Error, Result},
    MAX_IMAGE_XSIZE,
};

/// First four bytes of every stream, "xyb1" read as little-endian.
pub const SIGNATURE: u32 = 0x3162_7978;

pub const VERSION: u8 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 16;

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitstreamKind {
    #[default]
    Default = 0,
    /// Transcoded JPEG payload; signaled but not decodable by this crate.
    BrunsliTranscode = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const ALPHA: Flags = Flags(1);
    pub const DENOISE: Flags = Flags(2);
    pub const DITHER: Flags = Flags(4);
    pub const GABORISH_TRANSFORM: Flags = Flags(8);
    pub const SMOOTH_DC_PRED: Flags = Flags(16);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Header {
    pub xsize: u32,
    pub ysize: u32,
    pub bitstream_kind: BitstreamKind,
    pub quant_template: u8,
    pub flags: Flags,
}

impl Header {
    pub fn write(&self, writer: &mut BitWriter) {
        writer.write(32, SIGNATURE as u64);
        writer.write(8, VERSION as u64);
        writer.write(8, self.bitstream_kind as u64);
        writer.write(8, self.quant_template as u64);
        writer.write(8, self.flags.0 as u64);
        writer.write(32, self.xsize as u64);
        writer.write(32, self.ysize as u64);
    }

    pub fn read(br: &mut BitReader) -> Result<Header> {
        let signature = br.read(32)? as u32;
        if signature != SIGNATURE {
            return Err(Error::InvalidSignature(signature));
        }
        let version = br.read(8)? as u8;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let kind = br.read(8)? as u8;
        let bitstream_kind =
            BitstreamKind::from_u8(kind).ok_or(Error::UnknownBitstreamKind(kind))?;
        let quant_template = br.read(8)? as u8;
        let flags = Flags(br.read(8)? as u8);
        let xsize = br.read(32)? as u32;
        let ysize = br.read(32)? as u32;
        if xsize == 0 || ysize == 0 {
            return Err(Error::InvalidImageSize(xsize as usize, ysize as usize));
        }
        if xsize as usize > MAX_IMAGE_XSIZE {
            return Err(Error::ImageSizeTooLarge(xsize as usize, ysize as usize));
        }
        Ok(Header {
            xsize,
            ysize,
            bitstream_kind,
            quant_template,
            flags,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() -> Result<()> {
        let mut flags = Flags::default();
        flags.insert(Flags::DITHER);
        flags.insert(Flags::GABORISH_TRANSFORM);
        let header = Header {
            xsize: 1920,
            ysize: 1080,
            bitstream_kind: BitstreamKind::Default,
            quant_template: 1,
            flags,
        };
        let mut w = BitWriter::new();
        header.write(&mut w);
        let bytes = w.finalize();
        let mut br = BitReader::new(&bytes);
        let decoded = Header::read(&mut br)?;
        assert_eq!(decoded.xsize, 1920);
        assert_eq!(decoded.ysize, 1080);
        assert!(decoded.flags.contains(Flags::DITHER));
        assert!(!decoded.flags.contains(Flags::ALPHA));
        Ok(())
    }

    #[test]
    fn bad_signature() {
        let mut w = BitWriter::new();
        w.write(32, 0xdeadbeef);
        w.write(32, 0);
        let bytes = w.finalize();
        assert!(matches!(
            Header::read(&mut BitReader::new(&bytes)),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn too_wide() {
        let header = Header {
            xsize: (1 << 25) as u32,
            ysize: 1,
            ..Header::default()
        };
        let mut w = BitWriter::new();
        header.write(&mut w);
        let bytes = w.finalize();
        assert!(matches!(
            Header::read(&mut BitReader::new(&bytes)),
            Err(Error::ImageSizeTooLarge(..))
        ));
    }
}
