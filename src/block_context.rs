// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    error::Result,
    image::{Image, Image3},
};

/// Block contexts discriminate block types for scan order, nonzero counts
/// and AC coefficients: 0..2 flat (= channel), 3..5 directional
/// (channel-agnostic).
pub const NUM_ORDER_CONTEXTS: usize = 6;

pub const CTX_DIRECTIONAL_HORIZONTAL: u8 = 3;
pub const CTX_DIRECTIONAL_VERTICAL: u8 = 4;
pub const CTX_DIRECTIONAL_DIAGONAL: u8 = 5;

/// DC gradient magnitude below which a block counts as flat, in quantized
/// DC units.
const FLAT_THRESHOLD: i32 = 12;

/// Dominance ratio for classifying a gradient as horizontal or vertical.
const DOMINANCE: i32 = 2;

fn dc_at(dc: &Image<i16>, x: i64, y: i64) -> i32 {
    let x = x.clamp(0, dc.xsize() as i64 - 1) as usize;
    let y = y.clamp(0, dc.ysize() as i64 - 1) as usize;
    dc.row(y)[x] as i32
}

/// Classifies every block of every channel from the luminance DC plane. The
/// DC image is fully decoded before any AC coefficient, so encoder and
/// decoder compute identical contexts without side information.
pub fn compute_block_contexts(dc: &Image3<i16>) -> Result<Image3<u8>> {
    let (xsize, ysize) = dc.size();
    let mut ctx = Image3::new((xsize, ysize))?;
    let luma = dc.plane(1);
    for by in 0..ysize {
        for bx in 0..xsize {
            let x = bx as i64;
            let y = by as i64;
            let hgrad = (dc_at(luma, x - 1, y) - dc_at(luma, x + 1, y)).abs();
            let vgrad = (dc_at(luma, x, y - 1) - dc_at(luma, x, y + 1)).abs();
            let directional = if hgrad.max(vgrad) <= FLAT_THRESHOLD {
                None
            } else if hgrad > DOMINANCE * vgrad {
                Some(CTX_DIRECTIONAL_HORIZONTAL)
            } else if vgrad > DOMINANCE * hgrad {
                Some(CTX_DIRECTIONAL_VERTICAL)
            } else {
                Some(CTX_DIRECTIONAL_DIAGONAL)
            };
            for c in 0..3 {
                ctx.row_mut(c, by)[bx] = directional.unwrap_or(c as u8);
            }
        }
    }
    Ok(ctx)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn flat_dc_uses_channel_contexts() -> Result<()> {
        let mut dc = Image3::<i16>::new((4, 4))?;
        for c in 0..3 {
            for y in 0..4 {
                dc.row_mut(c, y).fill(100);
            }
        }
        let ctx = compute_block_contexts(&dc)?;
        for c in 0..3 {
            for y in 0..4 {
                for &v in ctx.row(c, y) {
                    assert_eq!(v, c as u8);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn horizontal_edge_is_directional() -> Result<()> {
        let mut dc = Image3::<i16>::new((8, 3))?;
        for c in 0..3 {
            for y in 0..3 {
                for x in 0..8 {
                    dc.row_mut(c, y)[x] = if x < 4 { 0 } else { 1000 };
                }
            }
        }
        let ctx = compute_block_contexts(&dc)?;
        // The step runs vertically, so the gradient is horizontal.
        assert_eq!(ctx.row(0, 1)[4], CTX_DIRECTIONAL_HORIZONTAL);
        // All channels agree on directional contexts.
        assert_eq!(ctx.row(2, 1)[4], CTX_DIRECTIONAL_HORIZONTAL);
        Ok(())
    }
}
