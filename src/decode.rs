// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Top-level decoder; fail-stop, the first error from any sub-decoder
//! propagates and no partial image is returned.

use crate::{
    bit_reader::BitReader,
    bit_writer::read_varint,
    block_context::compute_block_contexts,
    chroma_from_luma::ColorTransform,
    coeff_order::decode_coeff_orders,
    coefficients::{recon_opsin_image, QuantizedCoeffs},
    dc_predictor::expand_dc,
    encode::Override,
    entropy::{
        decode_coefficients, decode_residual_planes, decode_residual_section, SectionTables,
        NUM_CONTEXTS,
    },
    error::{Error, Result},
    gaborish::gaborish,
    headers::{BitstreamKind, Flags, Header},
    image::{Image, Image3},
    noise::{add_noise, decode_noise},
    opsin::centered_opsin_to_srgb,
    parallel::ParallelRunner,
    quantizer::Quantizer,
    util::tracing_wrappers::*,
    BLOCK_DIM, BLOCK_SIZE,
};

#[derive(Debug, Clone)]
pub struct DecompressParams {
    /// Upper bound on xsize * ysize; decoding larger images fails.
    pub max_num_pixels: u64,
    pub denoise: Override,
}

impl Default for DecompressParams {
    fn default() -> DecompressParams {
        DecompressParams {
            max_num_pixels: 1 << 32,
            denoise: Override::Default,
        }
    }
}

/// Decodes a byte stream produced by `encode` back into 8-bit sRGB.
pub fn decode(
    params: &DecompressParams,
    bytes: &[u8],
    pool: &dyn ParallelRunner,
) -> Result<Image3<u8>> {
    // Streams are written with a 64-bit-aligned tail; anything else has
    // been cut short.
    if bytes.is_empty() || bytes.len() % 8 != 0 {
        return Err(Error::OutOfBounds);
    }
    let mut br = BitReader::new(bytes);
    let header = Header::read(&mut br)?;
    if header.bitstream_kind == BitstreamKind::BrunsliTranscode {
        return Err(Error::BrunsliUnsupported);
    }
    let (xsize, ysize) = (header.xsize as usize, header.ysize as usize);
    let num_pixels = xsize as u64 * ysize as u64;
    if num_pixels > params.max_num_pixels {
        return Err(Error::TooManyPixels(num_pixels, params.max_num_pixels));
    }

    if header.flags.contains(Flags::ALPHA) {
        // The alpha sub-stream is opaque to the core; skip it.
        let alpha_bytes = read_varint(&mut br)? as usize;
        br.jump_to_byte_boundary()?;
        br.skip_bits(alpha_bytes * 8)?;
    }

    let noise_params = decode_noise(&mut br)?;

    let mut ctan = ColorTransform::new(xsize, ysize)?;
    ctan.ytox_dc = br.read(8)? as i32;
    ctan.ytob_dc = br.read(8)? as i32;
    let (tile_xsize, tile_ysize) = ctan.tile_size();
    let mut xmap = Image::<i16>::new((tile_xsize, tile_ysize))?;
    let mut bmap = Image::<i16>::new((tile_xsize, tile_ysize))?;
    decode_residual_section(&mut [&mut xmap, &mut bmap], &mut br)?;
    for ty in 0..tile_ysize {
        for tx in 0..tile_xsize {
            ctan.ytox_map.row_mut(ty)[tx] = xmap.row(ty)[tx] as i32 + ctan.ytox_dc;
            ctan.ytob_map.row_mut(ty)[tx] = bmap.row(ty)[tx] as i32 + ctan.ytob_dc;
        }
    }

    let block_xsize = xsize.div_ceil(BLOCK_DIM);
    let block_ysize = ysize.div_ceil(BLOCK_DIM);
    let mut quantizer = Quantizer::new(header.quant_template, block_xsize, block_ysize)?;
    quantizer.read_scalars(&mut br)?;
    let mut deltas = Image::<i16>::new((block_xsize, block_ysize))?;
    decode_residual_section(&mut [&mut deltas], &mut br)?;
    quantizer.set_raw_quant_field(quant_field_from_deltas(&deltas)?)?;

    let tables = SectionTables::decode(NUM_CONTEXTS, &mut br)?;
    let orders = decode_coeff_orders(&mut br)?;

    // DC residuals, then prediction in reverse.
    let smooth_dc = header.flags.contains(Flags::SMOOTH_DC_PRED);
    let mut dc_residuals = Image3::<i16>::new((block_xsize, block_ysize))?;
    {
        let mut reader = tables.reader(&mut br)?;
        let [p0, p1, p2] = dc_residuals.planes_mut();
        decode_residual_planes(&mut [p0, p1, p2], 0, &mut reader, &mut br)?;
        reader.finish()?;
    }
    let dc = expand_dc(&dc_residuals, smooth_dc)?;

    // AC coefficients.
    let block_ctx = compute_block_contexts(&dc)?;
    let mut ac = Image3::<i16>::new((block_xsize * BLOCK_SIZE, block_ysize))?;
    {
        let mut reader = tables.reader(&mut br)?;
        decode_coefficients(&mut ac, &block_ctx, &orders, &mut reader, &mut br)?;
        reader.finish()?;
    }
    debug!("decoded {} bits", br.total_bits_read());

    let qcoeffs = QuantizedCoeffs { dc, ac };
    let mut opsin = recon_opsin_image(&qcoeffs, &quantizer, &ctan, pool)?;
    if header.flags.contains(Flags::GABORISH_TRANSFORM) {
        opsin = gaborish(&opsin)?;
    }
    // The Denoise flag selects an edge-preserving post-filter, which is a
    // pluggable pass outside the core; with no filter installed the flag
    // (and its `params.denoise` override) is a no-op.
    add_noise(&noise_params, &mut opsin)?;
    let mut srgb = centered_opsin_to_srgb(&opsin)?;
    srgb.shrink_to(xsize, ysize);
    Ok(srgb)
}

/// Inverse of the encoder's previous-block delta coding; raw values are
/// reconstructed modulo 2^16 and validated.
fn quant_field_from_deltas(deltas: &Image<i16>) -> Result<Image<i32>> {
    let (xsize, ysize) = deltas.size();
    let mut raw = Image::<i32>::new((xsize, ysize))?;
    for y in 0..ysize {
        for x in 0..xsize {
            let pred = if x > 0 {
                raw.row(y)[x - 1]
            } else if y > 0 {
                raw.row(y - 1)[x]
            } else {
                64
            };
            let value = (pred as u16).wrapping_add(deltas.row(y)[x] as u16);
            if value == 0 {
                return Err(Error::InvalidQuantValue(0));
            }
            raw.row_mut(y)[x] = value as i32;
        }
    }
    Ok(raw)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn empty_input_is_truncated() {
        assert!(matches!(
            decode(&DecompressParams::default(), &[], &crate::parallel::Sequential),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn pixel_limit_is_enforced() -> Result<()> {
        let mut image = Image3::<u8>::new((16, 16))?;
        for y in 0..16 {
            image.row_mut(1, y).fill(128);
        }
        let bytes = crate::encode(
            &crate::CompressParams {
                fast_mode: true,
                ..Default::default()
            },
            &image,
            &crate::parallel::Sequential,
        )?;
        let params = DecompressParams {
            max_num_pixels: 100,
            ..DecompressParams::default()
        };
        assert!(matches!(
            decode(&params, &bytes, &crate::parallel::Sequential),
            Err(Error::TooManyPixels(256, 100))
        ));
        Ok(())
    }
}
