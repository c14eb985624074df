// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{error::Result, image::Image, BLOCK_DIM};

/// Strength of texture masking: how quickly busy blocks lose precision.
const MASKING_STRENGTH: f32 = 7.0;

/// Exponent of the masking response curve.
const MASKING_POWER: f32 = 0.3;

/// Multiplier floor; even the busiest block keeps this share of precision.
const MIN_MULTIPLIER: f32 = 0.22;

/// Estimates local texture masking from the opsin Y plane and returns a
/// per-block multiplier field at (xsize/8, ysize/8) resolution. Flat blocks
/// keep a multiplier near 1 (full precision); busy blocks fall toward
/// `MIN_MULTIPLIER` since quantization error hides in texture.
pub fn adaptive_quantization_map(y_plane: &Image<f32>) -> Result<Image<f32>> {
    let (xsize, ysize) = y_plane.size();
    let block_xsize = xsize.div_ceil(BLOCK_DIM);
    let block_ysize = ysize.div_ceil(BLOCK_DIM);
    let mut raw = Image::new((block_xsize, block_ysize))?;
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            let x0 = bx * BLOCK_DIM;
            let y0 = by * BLOCK_DIM;
            let x1 = (x0 + BLOCK_DIM).min(xsize);
            let y1 = (y0 + BLOCK_DIM).min(ysize);
            // Sum of squared neighbor differences within the block.
            let mut texture = 0.0f32;
            let mut count = 0usize;
            for y in y0..y1 {
                let row = y_plane.row(y);
                for x in x0..x1.saturating_sub(1) {
                    let diff = row[x + 1] - row[x];
                    texture += diff * diff;
                    count += 1;
                }
            }
            for y in y0..y1.saturating_sub(1) {
                let row = y_plane.row(y);
                let row_below = y_plane.row(y + 1);
                for x in x0..x1 {
                    let diff = row_below[x] - row[x];
                    texture += diff * diff;
                    count += 1;
                }
            }
            let activity = if count > 0 {
                (texture / count as f32).sqrt()
            } else {
                0.0
            };
            let multiplier = (1.0 + MASKING_STRENGTH * activity).powf(-MASKING_POWER);
            raw.row_mut(by)[bx] = multiplier.max(MIN_MULTIPLIER);
        }
    }
    smooth_map(&raw)
}

// 3x3 tent smoothing; keeps neighboring blocks from flipping between very
// different precisions.
fn smooth_map(map: &Image<f32>) -> Result<Image<f32>> {
    let (xsize, ysize) = map.size();
    let mut out = Image::new((xsize, ysize))?;
    for y in 0..ysize {
        for x in 0..xsize {
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;
            for dy in -1i64..=1 {
                let yy = y as i64 + dy;
                if yy < 0 || yy >= ysize as i64 {
                    continue;
                }
                for dx in -1i64..=1 {
                    let xx = x as i64 + dx;
                    if xx < 0 || xx >= xsize as i64 {
                        continue;
                    }
                    let weight = if dx == 0 && dy == 0 {
                        4.0
                    } else if dx == 0 || dy == 0 {
                        2.0
                    } else {
                        1.0
                    };
                    sum += weight * map.row(yy as usize)[xx as usize];
                    weight_sum += weight;
                }
            }
            out.row_mut(y)[x] = sum / weight_sum;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::error::Result;
    use crate::util::test::assert_almost_eq;

    #[test]
    fn flat_plane_keeps_full_precision() -> Result<()> {
        let plane = Image::new_constant((32, 32), 0.25)?;
        let map = adaptive_quantization_map(&plane)?;
        assert_eq!(map.size(), (4, 4));
        for y in 0..4 {
            for &v in map.row(y) {
                assert_almost_eq!(v, 1.0, 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn busy_blocks_get_smaller_multipliers() -> Result<()> {
        let mut plane = Image::new_constant((32, 8), 0.0)?;
        // Blocks 2 and 3 carry a strong checker pattern.
        for y in 0..8 {
            for x in 16..32 {
                plane.row_mut(y)[x] = if (x + y) % 2 == 0 { 0.4 } else { -0.4 };
            }
        }
        let map = adaptive_quantization_map(&plane)?;
        assert!(map.row(0)[3] < map.row(0)[0]);
        assert!(map.row(0)[3] >= MIN_MULTIPLIER);
        Ok(())
    }

    #[test]
    fn map_resolution_rounds_up() -> Result<()> {
        let plane = Image::new_constant((17, 9), 0.0)?;
        let map = adaptive_quantization_map(&plane)?;
        assert_eq!(map.size(), (3, 2));
        Ok(())
    }
}
