// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Top-level encoder: color transform, quantization search, and bitstream
//! assembly.

use crate::{
    adaptive_quant::adaptive_quantization_map,
    bit_writer::BitWriter,
    block_context::compute_block_contexts,
    chroma_from_luma::{find_best_ytob, find_best_ytox, ColorTransform},
    coeff_order::{compute_coeff_order, encode_coeff_orders, natural_orders, CoeffOrders},
    coefficients::{compute_coefficients, pad_to_blocks, QuantizedCoeffs},
    comparator::OpsinDistanceComparator,
    dc_predictor::shrink_dc,
    dct::transposed_scaled_dct,
    entropy::{
        accumulate_order_stats, build_and_encode_histograms, build_and_encode_histograms_fast,
        encode_residual_section, tokenize_coefficients, tokenize_residual_planes, write_tokens,
        NUM_CONTEXTS,
    },
    error::{Error, Result},
    gaborish::gaborish_inverse,
    headers::{BitstreamKind, Flags, Header},
    image::{Image, Image3},
    noise::{encode_noise, estimate_noise, NoiseParams},
    opsin::{center_opsin_values, opsin_dynamics_image},
    parallel::ParallelRunner,
    quantizer::{Quantizer, QUANT_TEMPLATE_DEFAULT, QUANT_TEMPLATE_HQ},
    rate_control::{
        compress_to_target_size, fast_mode_quants, find_best_quantization,
        find_best_quantization_hq, scale_to_target_size, SearchState,
    },
    util::tracing_wrappers::*,
    BLOCK_DIM, MAX_IMAGE_XSIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
    #[default]
    Default,
    On,
    Off,
}

impl Override {
    fn resolve(self, default: bool) -> bool {
        match self {
            Override::Default => default,
            Override::On => true,
            Override::Off => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressParams {
    /// Perceptual quality target; higher produces smaller streams.
    pub butteraugli_distance: f32,
    /// Byte budget; 0 disables it.
    pub target_size: usize,
    /// Bits per pixel; 0 disables it.
    pub target_bitrate: f32,
    /// Uniform quant value overriding the search; 0 disables it.
    pub uniform_quant: f32,
    /// Skips the correlation and quality searches.
    pub fast_mode: bool,
    /// In byte-budget mode, scales a single searched field instead of
    /// bisecting the distance target.
    pub target_size_search_fast_mode: bool,
    pub max_butteraugli_iters: usize,
    /// Extra weight on artifacts the encoder introduces (vs. detail lost).
    pub hf_asymmetry: f32,
    pub denoise: Override,
    pub apply_noise: Override,
    /// Accepted for interface parity; the core carries no metadata.
    pub clear_metadata: bool,
}

impl Default for CompressParams {
    fn default() -> CompressParams {
        CompressParams {
            butteraugli_distance: 1.0,
            target_size: 0,
            target_bitrate: 0.0,
            uniform_quant: 0.0,
            fast_mode: false,
            target_size_search_fast_mode: false,
            max_butteraugli_iters: 7,
            hf_asymmetry: 1.0,
            denoise: Override::Default,
            apply_noise: Override::Default,
            clear_metadata: false,
        }
    }
}

/// Distance below which the HQ template and search are used.
const MAX_BUTTERAUGLI_FOR_HQ: f32 = 1.0;

/// Dithering helps above this distance but causes checkerboarding below it.
const MIN_BUTTERAUGLI_FOR_DITHER: f32 = 0.39;

/// Noise modeling ramps up over this distance range; below it the stream
/// carries the original noise anyway.
const NOISE_RAMP_UP_DISTANCE_MIN: f64 = 1.4;
const NOISE_RAMP_UP_DISTANCE_RANGE: f64 = 0.6;
const NOISE_LEVEL_AT_START_OF_RAMP: f64 = 0.25;

fn target_size_from_params(params: &CompressParams, xsize: usize, ysize: usize) -> usize {
    if params.target_size > 0 {
        params.target_size
    } else if params.target_bitrate > 0.0 {
        (0.5 + params.target_bitrate as f64 * (xsize * ysize) as f64 / 8.0) as usize
    } else {
        0
    }
}

/// Encodes an 8-bit sRGB image into a complete byte stream.
pub fn encode(
    params: &CompressParams,
    image: &Image3<u8>,
    pool: &dyn ParallelRunner,
) -> Result<Vec<u8>> {
    let (xsize, ysize) = image.size();
    if xsize > MAX_IMAGE_XSIZE {
        return Err(Error::ImageSizeTooLarge(xsize, ysize));
    }
    let target_size = target_size_from_params(params, xsize, ysize);
    if params.butteraugli_distance < 0.0 && target_size == 0 && params.uniform_quant <= 0.0 {
        return Err(Error::NegativeDistance);
    }

    let mut header = Header {
        xsize: xsize as u32,
        ysize: ysize as u32,
        bitstream_kind: BitstreamKind::Default,
        ..Header::default()
    };
    if params.butteraugli_distance < MAX_BUTTERAUGLI_FOR_HQ {
        header.quant_template = QUANT_TEMPLATE_HQ;
    } else {
        header.quant_template = QUANT_TEMPLATE_DEFAULT;
        header.flags.insert(Flags::SMOOTH_DC_PRED);
        header.flags.insert(Flags::GABORISH_TRANSFORM);
    }
    if params.butteraugli_distance > MIN_BUTTERAUGLI_FOR_DITHER {
        header.flags.insert(Flags::DITHER);
    }
    if params.denoise.resolve(false) {
        header.flags.insert(Flags::DENOISE);
    }

    let mut header_writer = BitWriter::new();
    header.write(&mut header_writer);
    let header_bytes = header_writer.finalize();

    // Opsin image, padded to whole blocks and centered around zero.
    let mut opsin = pad_to_blocks(&opsin_dynamics_image(image)?)?;
    center_opsin_values(&mut opsin);

    let mut noise_params = NoiseParams::default();
    let enable_noise = params.apply_noise.resolve(
        params.butteraugli_distance as f64 > NOISE_RAMP_UP_DISTANCE_MIN,
    );
    if enable_noise {
        let rampup = (params.butteraugli_distance as f64 - NOISE_RAMP_UP_DISTANCE_MIN)
            / NOISE_RAMP_UP_DISTANCE_RANGE;
        let quality_coef = if rampup < 1.0 {
            NOISE_LEVEL_AT_START_OF_RAMP + (1.0 - NOISE_LEVEL_AT_START_OF_RAMP) * rampup.max(0.0)
        } else {
            1.0
        };
        noise_params = estimate_noise(&opsin, quality_coef as f32);
    }

    let aq_map = adaptive_quantization_map(opsin.plane(1))?;

    if header.flags.contains(Flags::GABORISH_TRANSFORM) {
        opsin = gaborish_inverse(&opsin)?;
    }

    let mut ctan = ColorTransform::new(xsize, ysize)?;
    if !params.fast_mode
        && (params.butteraugli_distance >= 0.0 || target_size > 0 || params.uniform_quant > 0.0)
    {
        let dct = transposed_scaled_dct(&opsin)?;
        find_best_ytox(&dct, header.quant_template, &mut ctan);
        find_best_ytob(&dct, header.quant_template, &mut ctan);
    }

    let block_xsize = xsize.div_ceil(BLOCK_DIM);
    let block_ysize = ysize.div_ceil(BLOCK_DIM);
    let mut quantizer = Quantizer::new(header.quant_template, block_xsize, block_ysize)?;
    let smooth_dc = header.flags.contains(Flags::SMOOTH_DC_PRED);
    let state = SearchState {
        opsin: &opsin,
        ctan: &ctan,
        aq_map: &aq_map,
        image_size: (xsize, ysize),
        apply_gaborish: header.flags.contains(Flags::GABORISH_TRANSFORM),
        pool,
    };

    if params.fast_mode {
        let (quant_dc, quant_ac) = fast_mode_quants(params.butteraugli_distance);
        let mut field = aq_map.try_clone()?;
        for y in 0..field.ysize() {
            for v in field.row_mut(y) {
                *v *= quant_ac;
            }
        }
        quantizer.set_quant_field(quant_dc, &field);
    } else if target_size > 0 {
        let overhead = header_bytes.len();
        let budget = target_size.saturating_sub(overhead).max(1);
        let mut comparator = OpsinDistanceComparator::new(image, params.hf_asymmetry)?;
        let mut encoded_size = |quantizer: &Quantizer| -> Result<usize> {
            let qcoeffs = compute_coefficients(&opsin, quantizer, &ctan)?;
            let frame =
                encode_frame(&qcoeffs, quantizer, &ctan, &noise_params, smooth_dc, params)?;
            Ok(frame.len())
        };
        if params.target_size_search_fast_mode {
            find_best_quantization(
                &state,
                1.0,
                params.max_butteraugli_iters,
                &mut quantizer,
                &mut comparator,
            )?;
            scale_to_target_size(budget, &mut quantizer, &mut encoded_size)?;
        } else {
            compress_to_target_size(
                &state,
                budget,
                params.max_butteraugli_iters,
                &mut quantizer,
                &mut comparator,
                &mut encoded_size,
            )?;
        }
    } else if params.uniform_quant > 0.0 {
        quantizer.set_quant(params.uniform_quant)?;
    } else {
        let mut comparator = OpsinDistanceComparator::new(image, params.hf_asymmetry)?;
        if params.butteraugli_distance < MAX_BUTTERAUGLI_FOR_HQ {
            find_best_quantization_hq(
                &state,
                params.butteraugli_distance,
                params.max_butteraugli_iters,
                false,
                &mut quantizer,
                &mut comparator,
            )?;
        } else {
            find_best_quantization(
                &state,
                params.butteraugli_distance,
                params.max_butteraugli_iters,
                &mut quantizer,
                &mut comparator,
            )?;
        }
    }

    let qcoeffs = compute_coefficients(&opsin, &quantizer, &ctan)?;
    let frame = encode_frame(&qcoeffs, &quantizer, &ctan, &noise_params, smooth_dc, params)?;
    debug!(
        "encoded {} header bytes + {} frame bytes",
        header_bytes.len(),
        frame.len()
    );
    let mut out = header_bytes;
    out.extend_from_slice(&frame);
    Ok(out)
}

/// Delta-codes the raw quant field against the previous block, wrapping
/// modulo 2^16 so 16-bit raw values survive the signed residual plane.
fn quant_field_deltas(quantizer: &Quantizer) -> Result<Image<i16>> {
    let raw = quantizer.raw_quant_field();
    let (xsize, ysize) = raw.size();
    let mut deltas = Image::new((xsize, ysize))?;
    for y in 0..ysize {
        for x in 0..xsize {
            let pred = if x > 0 {
                raw.row(y)[x - 1]
            } else if y > 0 {
                raw.row(y - 1)[x]
            } else {
                64
            };
            deltas.row_mut(y)[x] = (raw.row(y)[x] as u16).wrapping_sub(pred as u16) as i16;
        }
    }
    Ok(deltas)
}

/// Everything after the fixed header: noise, chroma-from-luma, quantizer,
/// histograms, scan orders, DC residuals and the AC token stream.
pub fn encode_frame(
    qcoeffs: &QuantizedCoeffs,
    quantizer: &Quantizer,
    ctan: &ColorTransform,
    noise_params: &NoiseParams,
    smooth_dc: bool,
    params: &CompressParams,
) -> Result<Vec<u8>> {
    let mut writer = BitWriter::new();

    encode_noise(noise_params, &mut writer);

    // Chroma-from-luma: global factors, then per-tile offsets.
    writer.write(8, ctan.ytox_dc as u64);
    writer.write(8, ctan.ytob_dc as u64);
    let (tile_xsize, tile_ysize) = ctan.tile_size();
    let mut xmap = Image::<i16>::new((tile_xsize, tile_ysize))?;
    let mut bmap = Image::<i16>::new((tile_xsize, tile_ysize))?;
    for ty in 0..tile_ysize {
        for tx in 0..tile_xsize {
            xmap.row_mut(ty)[tx] = (ctan.ytox_map.row(ty)[tx] - ctan.ytox_dc) as i16;
            bmap.row_mut(ty)[tx] = (ctan.ytob_map.row(ty)[tx] - ctan.ytob_dc) as i16;
        }
    }
    encode_residual_section(&[&xmap, &bmap], &mut writer)?;

    // Quantizer: scalars plus the delta-coded field.
    quantizer.write(&mut writer);
    let deltas = quant_field_deltas(quantizer)?;
    encode_residual_section(&[&deltas], &mut writer)?;

    // Scan orders from the observed statistics (natural order in fast mode).
    let block_ctx = compute_block_contexts(&qcoeffs.dc)?;
    let orders: CoeffOrders = if params.fast_mode {
        natural_orders()
    } else {
        let mut stats = [[0u64; crate::BLOCK_SIZE]; crate::block_context::NUM_ORDER_CONTEXTS];
        accumulate_order_stats(&qcoeffs.ac, &block_ctx, &mut stats);
        compute_coeff_order(&stats)
    };

    let (block_xsize, block_ysize) = qcoeffs.block_size();
    let dc_residuals = shrink_dc((0, 0, block_xsize, block_ysize), &qcoeffs.dc, smooth_dc)?;
    let mut dc_tokens = vec![];
    tokenize_residual_planes(
        &[
            dc_residuals.plane(0),
            dc_residuals.plane(1),
            dc_residuals.plane(2),
        ],
        0,
        &mut dc_tokens,
    );
    let mut ac_tokens = vec![];
    tokenize_coefficients(&qcoeffs.ac, &block_ctx, &orders, &mut ac_tokens)?;

    let (tables, context_map) = if params.fast_mode {
        build_and_encode_histograms_fast(NUM_CONTEXTS, &[&dc_tokens, &ac_tokens], &mut writer)?
    } else {
        build_and_encode_histograms(NUM_CONTEXTS, &[&dc_tokens, &ac_tokens], &mut writer)?
    };
    encode_coeff_orders(&orders, &mut writer);
    write_tokens(&dc_tokens, &tables, &context_map, &mut writer);
    write_tokens(&ac_tokens, &tables, &context_map, &mut writer);

    Ok(writer.finalize())
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::parallel::Sequential;

    #[test]
    fn rejects_negative_distance_without_target() {
        let image = Image3::<u8>::new((8, 8)).unwrap();
        let params = CompressParams {
            butteraugli_distance: -1.0,
            ..CompressParams::default()
        };
        assert!(matches!(
            encode(&params, &image, &Sequential),
            Err(Error::NegativeDistance)
        ));
    }

    #[test]
    fn fast_mode_produces_a_stream() -> Result<()> {
        let mut image = Image3::<u8>::new((16, 16))?;
        for c in 0..3 {
            for y in 0..16 {
                for x in 0..16 {
                    image.row_mut(c, y)[x] = (x * 16 + y) as u8;
                }
            }
        }
        let params = CompressParams {
            fast_mode: true,
            ..CompressParams::default()
        };
        let bytes = encode(&params, &image, &Sequential)?;
        assert!(bytes.len() > crate::headers::HEADER_SIZE);
        assert_eq!(bytes.len() % 8, 0);
        Ok(())
    }
}
