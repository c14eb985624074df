// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

pub mod adaptive_quant;
pub mod bit_reader;
pub mod bit_writer;
pub mod block_context;
pub mod chroma_from_luma;
pub mod coeff_order;
pub mod coefficients;
pub mod comparator;
pub mod dc_predictor;
pub mod dct;
pub mod decode;
pub mod encode;
pub mod entropy;
pub mod error;
pub mod gaborish;
pub mod headers;
pub mod image;
pub mod noise;
pub mod opsin;
pub mod optimize;
pub mod parallel;
pub mod quantizer;
pub mod rate_control;
mod util;

/// Side of a DCT block, in pixels.
pub const BLOCK_DIM: usize = 8;

/// Number of coefficients in a DCT block.
pub const BLOCK_SIZE: usize = BLOCK_DIM * BLOCK_DIM;

/// Side of a tile, in blocks. Tiles are the resolution of the
/// chroma-from-luma maps and of the rate-control distance map.
pub const TILE_DIM_IN_BLOCKS: usize = 8;

/// Side of a group, in blocks. Groups are the unit of parallel work
/// during reconstruction.
pub const GROUP_DIM_IN_BLOCKS: usize = 8;

/// Widest image the bitstream can represent.
pub const MAX_IMAGE_XSIZE: usize = (1 << 25) - 1;

pub use decode::{decode, DecompressParams};
pub use encode::{encode, CompressParams, Override};
pub use error::{Error, Result};
pub use image::{Image, Image3};
