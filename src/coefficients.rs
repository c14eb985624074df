// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Forward and inverse coefficient pipeline: DCT, chroma-from-luma in the
//! coefficient domain, quantization, and reconstruction.

use std::sync::Mutex;

use crate::{
    chroma_from_luma::ColorTransform,
    dct::{idct2d, transposed_scaled_dct},
    error::Result,
    image::{Image, Image3},
    parallel::ParallelRunner,
    quantizer::{dequant_matrix, Quantizer},
    BLOCK_DIM, BLOCK_SIZE, GROUP_DIM_IN_BLOCKS,
};

/// Quantized DCT output. The DC of each block lives in its own subsampled
/// image; the DC slot inside `ac` is kept at zero.
pub struct QuantizedCoeffs {
    pub dc: Image3<i16>,
    pub ac: Image3<i16>,
}

impl QuantizedCoeffs {
    pub fn block_size(&self) -> (usize, usize) {
        self.dc.size()
    }
}

fn quantize(value: f32, step: f32) -> i16 {
    // Staying strictly inside i16 keeps the value-category size at 15 bits.
    (value / step).round().clamp(-32767.0, 32767.0) as i16
}

/// DCT of the (centered, block-aligned) opsin image followed by adaptive
/// quantization. Chroma planes are predicted from the dequantized luminance
/// before quantization, so the decoder can undo the prediction exactly.
pub fn compute_coefficients(
    opsin: &Image3<f32>,
    quantizer: &Quantizer,
    ctan: &ColorTransform,
) -> Result<QuantizedCoeffs> {
    let dct = transposed_scaled_dct(opsin)?;
    let block_xsize = dct.xsize() / BLOCK_SIZE;
    let block_ysize = dct.ysize();
    let mut dc = Image3::<i16>::new((block_xsize, block_ysize))?;
    let mut ac = Image3::<i16>::new((block_xsize * BLOCK_SIZE, block_ysize))?;
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            let offset = bx * BLOCK_SIZE;
            let ytox = ctan.ytox(bx, by);
            let ytob = ctan.ytob(bx, by);

            // Luminance first; its dequantized values drive the chroma
            // prediction.
            let mut dequant_y = [0.0f32; BLOCK_SIZE];
            {
                let coef = &dct.row(1, by)[offset..offset + BLOCK_SIZE];
                let row_ac = ac.row_mut(1, by);
                for k in 1..BLOCK_SIZE {
                    let step = quantizer.ac_step(1, k, bx, by);
                    let q = quantize(coef[k], step);
                    row_ac[offset + k] = q;
                    dequant_y[k] = q as f32 * step;
                }
                let dc_step = quantizer.dc_step(1);
                let q = quantize(coef[0], dc_step);
                dc.row_mut(1, by)[bx] = q;
                dequant_y[0] = q as f32 * dc_step;
            }

            for (c, factor, dc_factor) in [
                (0usize, ytox, ctan.ytox_for_dc()),
                (2usize, ytob, ctan.ytob_for_dc()),
            ] {
                let coef = &dct.row(c, by)[offset..offset + BLOCK_SIZE];
                let row_ac = ac.row_mut(c, by);
                for k in 1..BLOCK_SIZE {
                    let step = quantizer.ac_step(c, k, bx, by);
                    row_ac[offset + k] = quantize(coef[k] - factor * dequant_y[k], step);
                }
                let dc_step = quantizer.dc_step(c);
                dc.row_mut(c, by)[bx] = quantize(coef[0] - dc_factor * dequant_y[0], dc_step);
            }
        }
    }
    Ok(QuantizedCoeffs { dc, ac })
}

fn dequantize_block(
    qcoeffs: &QuantizedCoeffs,
    quantizer: &Quantizer,
    ctan: &ColorTransform,
    bx: usize,
    by: usize,
    out: &mut [[f32; BLOCK_SIZE]; 3],
) {
    let offset = bx * BLOCK_SIZE;
    let quant = quantizer.block_quant(bx, by);
    // Luminance.
    {
        let matrix = dequant_matrix(quantizer.template(), 1);
        let row_ac = &qcoeffs.ac.row(1, by)[offset..offset + BLOCK_SIZE];
        for k in 1..BLOCK_SIZE {
            out[1][k] = row_ac[k] as f32 * (matrix[k] / quant);
        }
        out[1][0] = qcoeffs.dc.row(1, by)[bx] as f32 * quantizer.dc_step(1);
    }
    for (c, factor, dc_factor) in [
        (0usize, ctan.ytox(bx, by), ctan.ytox_for_dc()),
        (2usize, ctan.ytob(bx, by), ctan.ytob_for_dc()),
    ] {
        let matrix = dequant_matrix(quantizer.template(), c);
        let row_ac = &qcoeffs.ac.row(c, by)[offset..offset + BLOCK_SIZE];
        for k in 1..BLOCK_SIZE {
            out[c][k] = row_ac[k] as f32 * (matrix[k] / quant) + factor * out[1][k];
        }
        out[c][0] =
            qcoeffs.dc.row(c, by)[bx] as f32 * quantizer.dc_step(c) + dc_factor * out[1][0];
    }
}

/// Dequantizes and inverse-transforms the coefficients back to a centered
/// opsin image. Groups of blocks are independent tasks on the runner.
pub fn recon_opsin_image(
    qcoeffs: &QuantizedCoeffs,
    quantizer: &Quantizer,
    ctan: &ColorTransform,
    pool: &dyn ParallelRunner,
) -> Result<Image3<f32>> {
    let (block_xsize, block_ysize) = qcoeffs.block_size();
    let num_strips = block_ysize.div_ceil(GROUP_DIM_IN_BLOCKS);
    let strips: Mutex<Vec<Option<Image3<f32>>>> = Mutex::new((0..num_strips).map(|_| None).collect());
    let failed = Mutex::new(None);
    pool.run(num_strips, &|strip| {
        let by0 = strip * GROUP_DIM_IN_BLOCKS;
        let by1 = (by0 + GROUP_DIM_IN_BLOCKS).min(block_ysize);
        let result = recon_strip(qcoeffs, quantizer, ctan, block_xsize, by0, by1);
        match result {
            Ok(image) => strips.lock().unwrap()[strip] = Some(image),
            Err(e) => *failed.lock().unwrap() = Some(e),
        }
    });
    if let Some(e) = failed.into_inner().unwrap() {
        return Err(e);
    }
    let mut out = Image3::new((block_xsize * BLOCK_DIM, block_ysize * BLOCK_DIM))?;
    for (strip, image) in strips.into_inner().unwrap().into_iter().enumerate() {
        let image = image.unwrap();
        let y0 = strip * GROUP_DIM_IN_BLOCKS * BLOCK_DIM;
        for c in 0..3 {
            for y in 0..image.ysize() {
                out.row_mut(c, y0 + y).copy_from_slice(image.row(c, y));
            }
        }
    }
    Ok(out)
}

fn recon_strip(
    qcoeffs: &QuantizedCoeffs,
    quantizer: &Quantizer,
    ctan: &ColorTransform,
    block_xsize: usize,
    by0: usize,
    by1: usize,
) -> Result<Image3<f32>> {
    let mut out = Image3::new((block_xsize * BLOCK_DIM, (by1 - by0) * BLOCK_DIM))?;
    let mut block = [[0.0f32; BLOCK_SIZE]; 3];
    for by in by0..by1 {
        for bx in 0..block_xsize {
            dequantize_block(qcoeffs, quantizer, ctan, bx, by, &mut block);
            for c in 0..3 {
                idct2d(&mut block[c]);
                for iy in 0..BLOCK_DIM {
                    let row = out.row_mut(c, (by - by0) * BLOCK_DIM + iy);
                    row[bx * BLOCK_DIM..(bx + 1) * BLOCK_DIM]
                        .copy_from_slice(&block[c][iy * BLOCK_DIM..(iy + 1) * BLOCK_DIM]);
                }
            }
        }
    }
    Ok(out)
}

/// Pads an image to whole blocks by replicating the last row and column.
pub fn pad_to_blocks(image: &Image3<f32>) -> Result<Image3<f32>> {
    let (xsize, ysize) = image.size();
    let padded_x = xsize.div_ceil(BLOCK_DIM) * BLOCK_DIM;
    let padded_y = ysize.div_ceil(BLOCK_DIM) * BLOCK_DIM;
    if (padded_x, padded_y) == (xsize, ysize) {
        return image.try_clone();
    }
    let mut out = Image3::new((padded_x, padded_y))?;
    for c in 0..3 {
        for y in 0..padded_y {
            let src_y = y.min(ysize - 1);
            let src = image.row(c, src_y);
            let dst = out.row_mut(c, y);
            dst[..xsize].copy_from_slice(src);
            for x in xsize..padded_x {
                dst[x] = src[xsize - 1];
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::parallel::{Sequential, ThreadPool};
    use crate::quantizer::QUANT_TEMPLATE_DEFAULT;
    use crate::util::test::assert_almost_eq;

    fn test_image(xsize: usize, ysize: usize) -> Result<Image3<f32>> {
        let mut opsin = Image3::new((xsize, ysize))?;
        for c in 0..3 {
            for y in 0..ysize {
                for x in 0..xsize {
                    let v = ((x * 3 + y * 5 + c * 7) % 31) as f32 / 31.0 - 0.5;
                    opsin.row_mut(c, y)[x] = v * if c == 1 { 0.5 } else { 0.03 };
                }
            }
        }
        Ok(opsin)
    }

    #[test]
    fn high_quant_roundtrip_is_close() -> Result<()> {
        let opsin = test_image(32, 24)?;
        let mut quantizer = Quantizer::new(QUANT_TEMPLATE_DEFAULT, 4, 3)?;
        let field = Image::new_constant((4, 3), 8.0)?;
        quantizer.set_quant_field(8.0, &field);
        let ctan = ColorTransform::new(32, 24)?;
        let qcoeffs = compute_coefficients(&opsin, &quantizer, &ctan)?;
        let recon = recon_opsin_image(&qcoeffs, &quantizer, &ctan, &Sequential)?;
        for c in 0..3 {
            for y in 0..24 {
                for x in 0..32 {
                    // At quant 8 the Y step is ~2e-3; allow a few steps.
                    assert_almost_eq!(recon.row(c, y)[x], opsin.row(c, y)[x], 0.02);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn parallel_recon_matches_sequential() -> Result<()> {
        let opsin = test_image(48, 80)?;
        let mut quantizer = Quantizer::new(QUANT_TEMPLATE_DEFAULT, 6, 10)?;
        let field = Image::new_constant((6, 10), 2.0)?;
        quantizer.set_quant_field(2.0, &field);
        let ctan = ColorTransform::new(48, 80)?;
        let qcoeffs = compute_coefficients(&opsin, &quantizer, &ctan)?;
        let sequential = recon_opsin_image(&qcoeffs, &quantizer, &ctan, &Sequential)?;
        let threaded = recon_opsin_image(&qcoeffs, &quantizer, &ctan, &ThreadPool::new(3))?;
        for c in 0..3 {
            for y in 0..80 {
                assert_eq!(sequential.row(c, y), threaded.row(c, y));
            }
        }
        Ok(())
    }

    #[test]
    fn chroma_prediction_inverts_exactly() -> Result<()> {
        // With a nonzero chroma-from-luma factor, quantize-then-reconstruct
        // must still land within one step of the original chroma.
        let opsin = test_image(16, 16)?;
        let mut quantizer = Quantizer::new(QUANT_TEMPLATE_DEFAULT, 2, 2)?;
        let field = Image::new_constant((2, 2), 16.0)?;
        quantizer.set_quant_field(16.0, &field);
        let mut ctan = ColorTransform::new(16, 16)?;
        ctan.ytox_dc = 192;
        for y in 0..ctan.ytox_map.ysize() {
            ctan.ytox_map.row_mut(y).fill(192);
        }
        let qcoeffs = compute_coefficients(&opsin, &quantizer, &ctan)?;
        let recon = recon_opsin_image(&qcoeffs, &quantizer, &ctan, &Sequential)?;
        for y in 0..16 {
            for x in 0..16 {
                assert_almost_eq!(recon.row(0, y)[x], opsin.row(0, y)[x], 0.01);
            }
        }
        Ok(())
    }

    #[test]
    fn padding_replicates_edges() -> Result<()> {
        let image = test_image(10, 5)?;
        let padded = pad_to_blocks(&image)?;
        assert_eq!(padded.size(), (16, 8));
        assert_eq!(padded.row(1, 4)[15], image.row(1, 4)[9]);
        assert_eq!(padded.row(2, 7)[3], image.row(2, 4)[3]);
        Ok(())
    }
}
