// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Per-tile chroma-from-luma factors. For each 8-block × 8-block tile the
//! encoder finds the integer factor whose multiple of the Y coefficients
//! brings the most chroma coefficients into a fixed zero band; the decoder
//! adds the same multiple back.

use crate::{
    error::Result,
    image::{Image, Image3},
    quantizer::dequant_matrix,
    util::div_ceil,
    BLOCK_DIM, BLOCK_SIZE, TILE_DIM_IN_BLOCKS,
};

/// X is predicted as `(k - 128) / 256 * Y`.
pub const YTOX_SCALE: f32 = 256.0;
const YTOX_ZERO_THRESH: f32 = YTOX_SCALE * 0.65;
pub const YTOX_NEUTRAL: i32 = 128;

/// B is predicted as `k / 128 * Y`.
pub const YTOB_SCALE: f32 = 128.0;
const YTOB_ZERO_THRESH: f32 = YTOB_SCALE * 0.7;

/// B correlates strongly with Y for natural images; the default factor is
/// close to 0.94.
pub const YTOB_DEFAULT: i32 = 120;

/// Per-tile count difference below which a tile reverts to the global
/// factor.
const YTOB_TIE_MARGIN: u32 = 10;

#[derive(Debug)]
pub struct ColorTransform {
    pub ytox_dc: i32,
    pub ytob_dc: i32,
    pub ytox_map: Image<i32>,
    pub ytob_map: Image<i32>,
}

impl ColorTransform {
    pub fn new(xsize: usize, ysize: usize) -> Result<ColorTransform> {
        let tile_xsize = div_ceil(div_ceil(xsize, BLOCK_DIM), TILE_DIM_IN_BLOCKS).max(1);
        let tile_ysize = div_ceil(div_ceil(ysize, BLOCK_DIM), TILE_DIM_IN_BLOCKS).max(1);
        Ok(ColorTransform {
            ytox_dc: YTOX_NEUTRAL,
            ytob_dc: YTOB_DEFAULT,
            ytox_map: Image::new_constant((tile_xsize, tile_ysize), YTOX_NEUTRAL)?,
            ytob_map: Image::new_constant((tile_xsize, tile_ysize), YTOB_DEFAULT)?,
        })
    }

    pub fn tile_size(&self) -> (usize, usize) {
        self.ytox_map.size()
    }

    /// Multiplier applied to Y when predicting X in block (bx, by).
    pub fn ytox(&self, bx: usize, by: usize) -> f32 {
        let tx = (bx / TILE_DIM_IN_BLOCKS).min(self.ytox_map.xsize() - 1);
        let ty = (by / TILE_DIM_IN_BLOCKS).min(self.ytox_map.ysize() - 1);
        (self.ytox_map.row(ty)[tx] - YTOX_NEUTRAL) as f32 / YTOX_SCALE
    }

    pub fn ytob(&self, bx: usize, by: usize) -> f32 {
        let tx = (bx / TILE_DIM_IN_BLOCKS).min(self.ytob_map.xsize() - 1);
        let ty = (by / TILE_DIM_IN_BLOCKS).min(self.ytob_map.ysize() - 1);
        self.ytob_map.row(ty)[tx] as f32 / YTOB_SCALE
    }

    pub fn ytox_for_dc(&self) -> f32 {
        (self.ytox_dc - YTOX_NEUTRAL) as f32 / YTOX_SCALE
    }

    pub fn ytob_for_dc(&self) -> f32 {
        self.ytob_dc as f32 / YTOB_SCALE
    }
}

/// Argmax with ties broken toward `preferred`, so images with weak chroma
/// statistics settle on the neutral factor instead of an arbitrary extreme.
fn index_of_maximum(counts: &[u32; 256], preferred: usize) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        let better = c > counts[best]
            || (c == counts[best] && i.abs_diff(preferred) < best.abs_diff(preferred));
        if better {
            best = i;
        }
    }
    best
}

struct Search<'a> {
    dct: &'a Image3<f32>,
    chroma_plane: usize,
    inv_dequant: [f32; BLOCK_SIZE],
    scale: f32,
    zero_thresh: f32,
    neutral: i32,
    preferred: usize,
}

impl<'a> Search<'a> {
    fn count_zeros(&self, x0: usize, x1: usize, y0: usize, y1: usize) -> [u32; 256] {
        let mut num_zeros = [0u32; 256];
        for y in y0..y1 {
            let row_y = self.dct.row(1, y);
            let row_c = self.dct.row(self.chroma_plane, y);
            for x in x0..x1 {
                if x % BLOCK_SIZE == 0 {
                    continue;
                }
                let qm = self.inv_dequant[x % BLOCK_SIZE];
                let scaled_c = self.scale * row_c[x] * qm;
                let scaled_y = row_y[x] * qm;
                for (k, count) in num_zeros.iter_mut().enumerate() {
                    if (scaled_c - (k as i32 - self.neutral) as f32 * scaled_y).abs()
                        < self.zero_thresh
                    {
                        *count += 1;
                    }
                }
            }
        }
        num_zeros
    }

    fn run(&self, map: &mut Image<i32>, tie_exact: bool) -> i32 {
        let (xsize, ysize) = self.dct.size();
        let global = self.count_zeros(0, xsize, 0, ysize);
        let dc_factor = index_of_maximum(&global, self.preferred);
        let tile_coeffs = TILE_DIM_IN_BLOCKS * BLOCK_SIZE;
        for tile_y in 0..map.ysize() {
            for tile_x in 0..map.xsize() {
                let x0 = tile_x * tile_coeffs;
                let y0 = tile_y * TILE_DIM_IN_BLOCKS;
                let x1 = (x0 + tile_coeffs).min(xsize);
                let y1 = (y0 + TILE_DIM_IN_BLOCKS).min(ysize);
                let counts = self.count_zeros(x0, x1, y0, y1);
                let mut best = index_of_maximum(&counts, dc_factor);
                // Revert to the image-wide factor unless the tile's own
                // factor is clearly better.
                let revert = if tie_exact {
                    counts[best] == counts[dc_factor]
                } else {
                    counts[best] - counts[dc_factor] <= YTOB_TIE_MARGIN
                };
                if revert {
                    best = dc_factor;
                }
                map.row_mut(tile_y)[tile_x] = best as i32;
            }
        }
        dc_factor as i32
    }
}

/// Fills `ctan.ytox_map` / `ytox_dc` from the DCT of the opsin image.
pub fn find_best_ytox(dct: &Image3<f32>, template: u8, ctan: &mut ColorTransform) {
    let mut inv_dequant = [0.0f32; BLOCK_SIZE];
    for (k, inv) in inv_dequant.iter_mut().enumerate() {
        *inv = 1.0 / dequant_matrix(template, 0)[k];
    }
    let search = Search {
        dct,
        chroma_plane: 0,
        inv_dequant,
        scale: YTOX_SCALE,
        zero_thresh: YTOX_ZERO_THRESH,
        neutral: YTOX_NEUTRAL,
        preferred: YTOX_NEUTRAL as usize,
    };
    ctan.ytox_dc = search.run(&mut ctan.ytox_map, true);
}

pub fn find_best_ytob(dct: &Image3<f32>, template: u8, ctan: &mut ColorTransform) {
    let mut inv_dequant = [0.0f32; BLOCK_SIZE];
    for (k, inv) in inv_dequant.iter_mut().enumerate() {
        *inv = 1.0 / dequant_matrix(template, 2)[k];
    }
    let search = Search {
        dct,
        chroma_plane: 2,
        inv_dequant,
        scale: YTOB_SCALE,
        zero_thresh: YTOB_ZERO_THRESH,
        neutral: 0,
        preferred: YTOB_DEFAULT as usize,
    };
    ctan.ytob_dc = search.run(&mut ctan.ytob_map, false);
}
