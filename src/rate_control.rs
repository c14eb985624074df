// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Iterative quantization-field search against a perceptual comparator,
//! plus the binary searches used for byte-budget targets.

use crate::{
    chroma_from_luma::ColorTransform,
    coefficients::{compute_coefficients, recon_opsin_image},
    comparator::Comparator,
    error::Result,
    gaborish::gaborish,
    image::Image,
    image::Image3,
    opsin::centered_opsin_to_srgb,
    parallel::ParallelRunner,
    quantizer::Quantizer,
    util::tracing_wrappers::*,
    BLOCK_DIM,
};

/// Iteration exponents of the quant update; `diff^0 == 1` short-circuits
/// iterations that only raise precision where the target is missed.
const POW: [f64; 7] = [
    0.99905005931122937,
    1.0027778288237166,
    0.74286297793691547,
    0.85172198919496955,
    0.0,
    0.0,
    0.0,
];

/// Per-iteration margins of the tile-maximum reduction, in pixels.
const MARGINS: [usize; 7] = [0, 0, 1, 2, 1, 0, 0];

const DC_TARGET_EXPONENT: f64 = 0.74500252220422669;
const INITIAL_QUANT_DC_NUMERATOR: f64 = 0.93831260858660503;
const INITIAL_QUANT_AC_NUMERATOR: f64 = 1.176060090135594;

pub const FAST_DC_TARGET_EXPONENT: f64 = 0.69822238825785388;
pub const FAST_QUANT_DC_NUMERATOR: f64 = 0.57;
pub const FAST_QUANT_AC_NUMERATOR: f64 = 1.8570494508273865;

/// Scalars derived from the quality target that seed the quant field.
pub fn initial_quants(butteraugli_target: f32) -> (f32, f32) {
    let target = butteraugli_target.max(0.1) as f64;
    let dc_target = target.min(target.powf(DC_TARGET_EXPONENT));
    let quant_dc = INITIAL_QUANT_DC_NUMERATOR / dc_target;
    let quant_ac = INITIAL_QUANT_AC_NUMERATOR / target;
    (quant_dc as f32, quant_ac as f32)
}

pub fn fast_mode_quants(butteraugli_target: f32) -> (f32, f32) {
    let target = butteraugli_target.max(0.1) as f64;
    let dc_target = target.min(target.powf(FAST_DC_TARGET_EXPONENT));
    (
        (FAST_QUANT_DC_NUMERATOR / dc_target) as f32,
        (FAST_QUANT_AC_NUMERATOR / target) as f32,
    )
}

/// Reduces a pixel-resolution distance map to per-tile maxima, with a small
/// margin of surrounding pixels pulled into each tile.
pub fn tile_dist_map(distmap: &Image<f32>, tile_size: usize, margin: usize) -> Result<Image<f32>> {
    let tile_xsize = distmap.xsize().div_ceil(tile_size);
    let tile_ysize = distmap.ysize().div_ceil(tile_size);
    let mut tiles = Image::new((tile_xsize, tile_ysize))?;
    for tile_y in 0..tile_ysize {
        for tile_x in 0..tile_xsize {
            let y_min = (tile_size * tile_y).saturating_sub(margin);
            let x_min = (tile_size * tile_x).saturating_sub(margin);
            let y_max = (tile_size * (tile_y + 1) + margin).min(distmap.ysize());
            let x_max = (tile_size * (tile_x + 1) + margin).min(distmap.xsize());
            let mut max_dist = 0.0f32;
            for y in y_min..y_max {
                let row = distmap.row(y);
                for &v in &row[x_min..x_max] {
                    max_dist = max_dist.max(v);
                }
            }
            tiles.row_mut(tile_y)[tile_x] = max_dist;
        }
    }
    Ok(tiles)
}

/// For every tile, the distance to the nearest local peak above `peak_min`
/// within `local_radius`; -1 where no peak is nearby.
fn dist_to_peak_map(
    field: &Image<f32>,
    peak_min: f32,
    local_radius: usize,
    peak_weight: f32,
) -> Result<Image<f32>> {
    let (xsize, ysize) = field.size();
    let mut result = Image::new_constant((xsize, ysize), -1.0f32)?;
    for y0 in 0..ysize {
        for x0 in 0..xsize {
            let x_min = x0.saturating_sub(local_radius);
            let y_min = y0.saturating_sub(local_radius);
            let x_max = (x0 + 1 + local_radius).min(xsize);
            let y_max = (y0 + 1 + local_radius).min(ysize);
            let mut local_max = peak_min;
            for y in y_min..y_max {
                for &v in &field.row(y)[x_min..x_max] {
                    local_max = local_max.max(v);
                }
            }
            if field.row(y0)[x0] > (1.0 - peak_weight) * peak_min + peak_weight * local_max {
                for y in y_min..y_max {
                    for x in x_min..x_max {
                        let dist = (y.abs_diff(y0)).max(x.abs_diff(x0)) as f32;
                        let cur = result.row(y)[x];
                        if cur < 0.0 || cur > dist {
                            result.row_mut(y)[x] = dist;
                        }
                    }
                }
            }
        }
    }
    Ok(result)
}

fn adjust_quant_val(q: &mut f32, dist: f32, factor: f32, quant_max: f32) -> bool {
    if *q >= 0.999 * quant_max {
        return false;
    }
    let inv_q = 1.0 / *q;
    let adj_inv_q = inv_q - factor / (dist + 1.0);
    *q = 1.0 / adj_inv_q.max(1.0 / quant_max);
    true
}

/// Everything the search needs to decode a candidate field.
pub struct SearchState<'a> {
    /// Centered, block-aligned opsin the coefficients are computed from
    /// (already sharpened when the gaborish flag is set).
    pub opsin: &'a Image3<f32>,
    pub ctan: &'a ColorTransform,
    /// Adaptive quantization multipliers at block resolution.
    pub aq_map: &'a Image<f32>,
    /// True size of the image, before block alignment.
    pub image_size: (usize, usize),
    pub apply_gaborish: bool,
    pub pool: &'a dyn ParallelRunner,
}

impl SearchState<'_> {
    fn decode_candidate(&self, quantizer: &Quantizer) -> Result<Image3<u8>> {
        let qcoeffs = compute_coefficients(self.opsin, quantizer, self.ctan)?;
        let mut recon = recon_opsin_image(&qcoeffs, quantizer, self.ctan, self.pool)?;
        if self.apply_gaborish {
            recon = gaborish(&recon)?;
        }
        recon.shrink_to(self.image_size.0, self.image_size.1);
        centered_opsin_to_srgb(&recon)
    }

    fn scaled_aq_field(&self, scale: f32) -> Result<Image<f32>> {
        let mut field = self.aq_map.try_clone()?;
        for y in 0..field.ysize() {
            for v in field.row_mut(y) {
                *v *= scale;
            }
        }
        Ok(field)
    }
}

/// The standard search: a bounded number of encode/compare iterations, each
/// scaling tiles by `(dist/target)^pow`. Keeps the best field seen.
pub fn find_best_quantization(
    state: &SearchState,
    butteraugli_target: f32,
    max_iters: usize,
    quantizer: &mut Quantizer,
    comparator: &mut dyn Comparator,
) -> Result<()> {
    let (quant_dc, quant_ac) = initial_quants(butteraugli_target);
    let mut quant_field = state.scaled_aq_field(quant_ac)?;
    let mut best_quant_field = quant_field.try_clone()?;
    let mut best_butteraugli = 1000.0f32;
    let mut tile_distmap: Option<Image<f32>> = None;
    for i in 0..max_iters.min(POW.len()) {
        if quantizer.set_quant_field(quant_dc, &quant_field) {
            let candidate = state.decode_candidate(quantizer)?;
            let distmap = comparator.compare(&candidate)?;
            let distance = comparator.score(&distmap);
            debug!("search iteration {i}: distance {distance}");
            if distance <= best_butteraugli {
                best_quant_field = quant_field.try_clone()?;
                best_butteraugli = distance.max(butteraugli_target);
            }
            tile_distmap = Some(tile_dist_map(&distmap, BLOCK_DIM, MARGINS[i])?);
        }
        let Some(tile_distmap) = tile_distmap.as_ref() else {
            break;
        };
        let cur_pow = POW[i];
        for y in 0..quant_field.ysize() {
            let row_dist = tile_distmap.row(y);
            let row_q = quant_field.row_mut(y);
            for x in 0..row_q.len() {
                let diff = row_dist[x] / butteraugli_target;
                if diff >= 1.0 {
                    row_q[x] *= diff;
                } else if cur_pow != 0.0 {
                    row_q[x] *= (diff as f64).powf(cur_pow) as f32;
                }
            }
        }
    }
    quantizer.set_quant_field(quant_dc, &best_quant_field);
    Ok(())
}

const HQ_MAX_OUTER_ITERS: usize = 2;
const HQ_ADJ_SPEED: [f32; HQ_MAX_OUTER_ITERS] = [0.1, 0.04];
const HQ_QUANT_SHRINK: f32 = 0.75;

/// The high-quality search: raises precision only near distance peaks,
/// widening the search radius and ceilings when stalled, with a global
/// shrink-and-retry between outer iterations.
pub fn find_best_quantization_hq(
    state: &SearchState,
    butteraugli_target: f32,
    max_iters: usize,
    slow: bool,
    quantizer: &mut Quantizer,
    comparator: &mut dyn Comparator,
) -> Result<()> {
    let mut quant_field = state.scaled_aq_field(if slow { 1.2 } else { 1.5 })?;
    let mut best_quant_field = quant_field.try_clone()?;
    let mut best_butteraugli = 1000.0f32;
    let mut tile_distmap = Image::new_constant(quant_field.size(), 0.0f32)?;
    let mut distance = 1000.0f32;
    let mut outer_iter = 0;
    let mut butteraugli_iter = 0;
    let mut search_radius = 0usize;
    let mut quant_ceil = 5.0f32;
    let mut quant_dc = if slow { 1.2 } else { 1.6 };
    let mut num_stalling_iters = 0;
    // The quantizer granularity bounds progress; the cap is a backstop for
    // fields that stop registering changes.
    'outer: for _ in 0..max_iters * 8 {
        let mut qmax = 0.0f32;
        for y in 0..quant_field.ysize() {
            for &v in quant_field.row(y) {
                qmax = qmax.max(v);
            }
        }
        if quantizer.set_quant_field(quant_dc, &quant_field) {
            let candidate = state.decode_candidate(quantizer)?;
            let distmap = comparator.compare(&candidate)?;
            distance = comparator.score(&distmap);
            butteraugli_iter += 1;
            debug!("hq iteration {butteraugli_iter}: distance {distance}");
            if distance <= best_butteraugli {
                best_quant_field = quant_field.try_clone()?;
                best_butteraugli = distance.max(butteraugli_target);
                num_stalling_iters = 0;
            } else if outer_iter == 0 {
                num_stalling_iters += 1;
            }
            tile_distmap = tile_dist_map(&distmap, BLOCK_DIM, 0)?;
            if butteraugli_iter >= max_iters {
                break;
            }
        }
        let mut changed = false;
        while !changed && distance > butteraugli_target {
            for radius in 0..=search_radius {
                if changed {
                    break;
                }
                let dist_to_peak =
                    dist_to_peak_map(&tile_distmap, butteraugli_target, radius, 0.0)?;
                for y in 0..quant_field.ysize() {
                    for x in 0..quant_field.xsize() {
                        let peak_dist = dist_to_peak.row(y)[x];
                        if peak_dist >= 0.0 {
                            let factor = if slow { HQ_ADJ_SPEED[outer_iter] } else { 0.2 }
                                * tile_distmap.row(y)[x];
                            let mut q = quant_field.row(y)[x];
                            if adjust_quant_val(&mut q, peak_dist, factor, quant_ceil) {
                                quant_field.row_mut(y)[x] = q;
                                changed = true;
                            }
                        }
                    }
                }
            }
            if !changed || num_stalling_iters >= if slow { 3 } else { 1 } {
                // Try to extend the search parameters.
                if search_radius < 4
                    && (qmax < 0.99 * quant_ceil || quant_ceil >= 3.0 + search_radius as f32)
                {
                    search_radius += 1;
                    continue;
                }
                if quant_dc < 0.4 * quant_ceil - 0.8 {
                    quant_dc += 0.2;
                    changed = true;
                    continue;
                }
                if quant_ceil < 8.0 {
                    quant_ceil += 0.5;
                    continue;
                }
                break;
            }
        }
        if !changed {
            outer_iter += 1;
            if !slow || outer_iter == HQ_MAX_OUTER_ITERS {
                break 'outer;
            }
            for y in 0..quant_field.ysize() {
                for v in quant_field.row_mut(y) {
                    *v *= HQ_QUANT_SHRINK;
                }
            }
            num_stalling_iters = 0;
        }
    }
    quantizer.set_quant_field(quant_dc, &best_quant_field);
    Ok(())
}

fn scale_quantization_map(
    quant_dc: f32,
    quant_field: &Image<f32>,
    scale: f32,
    quantizer: &mut Quantizer,
) -> Result<bool> {
    let scale_dc = 0.8 * scale + 0.2;
    let mut scaled = quant_field.try_clone()?;
    for y in 0..scaled.ysize() {
        for v in scaled.row_mut(y) {
            *v *= scale;
        }
    }
    Ok(quantizer.set_quant_field(scale_dc * quant_dc, &scaled))
}

/// Fast byte-budget mode: shrinks the found quant field by a scalar until
/// the encoded size fits, then bisects the scalar.
pub fn scale_to_target_size(
    target_size: usize,
    quantizer: &mut Quantizer,
    encoded_size: &mut dyn FnMut(&Quantizer) -> Result<usize>,
) -> Result<()> {
    let (quant_dc, quant_field) = quantizer.quant_field()?;
    let mut scale_bad = 1.0f32;
    let mut scale_good = 1.0f32;
    let mut found = false;
    for _ in 0..10 {
        scale_quantization_map(quant_dc, &quant_field, scale_good, quantizer)?;
        if encoded_size(quantizer)? <= target_size {
            found = true;
            break;
        }
        scale_bad = scale_good;
        scale_good *= 0.5;
    }
    if !found {
        // The compressed size cannot be made small enough.
        return Ok(());
    }
    if scale_good == 1.0 {
        return Ok(());
    }
    for _ in 0..16 {
        let scale = 0.5 * (scale_bad + scale_good);
        if !scale_quantization_map(quant_dc, &quant_field, scale, quantizer)? {
            break;
        }
        if encoded_size(quantizer)? <= target_size {
            scale_good = scale;
        } else {
            scale_bad = scale;
        }
    }
    scale_quantization_map(quant_dc, &quant_field, scale_good, quantizer)?;
    Ok(())
}

const SIZE_SEARCH_INTERVAL_THRESH: f32 = 0.05;

/// Slow byte-budget mode: bisects the butteraugli-distance target, running
/// the full quality search at each probe.
#[allow(clippy::too_many_arguments)]
pub fn compress_to_target_size(
    state: &SearchState,
    target_size: usize,
    max_iters: usize,
    quantizer: &mut Quantizer,
    comparator: &mut dyn Comparator,
    encoded_size: &mut dyn FnMut(&Quantizer) -> Result<usize>,
) -> Result<()> {
    let mut quant_dc_good = 1.0f32;
    let mut quant_ac_good: Option<Image<f32>> = None;
    let mut dist_bad = -1.0f32;
    let mut dist_good = -1.0f32;
    loop {
        let mut dist = 1.0f32;
        if dist_good >= 0.0 && dist_bad >= 0.0 {
            if dist_good - dist_bad < SIZE_SEARCH_INTERVAL_THRESH {
                break;
            }
            dist = 0.5 * (dist_good + dist_bad);
        } else if dist_good >= 0.0 {
            dist = dist_good * 0.8;
            if dist < 0.3 {
                break;
            }
        } else if dist_bad >= 0.0 {
            dist = dist_bad * 1.25;
            if dist > 32.0 {
                break;
            }
        }
        find_best_quantization(state, dist, max_iters, quantizer, comparator)?;
        if encoded_size(quantizer)? <= target_size {
            dist_good = dist;
            let (dc, field) = quantizer.quant_field()?;
            quant_dc_good = dc;
            quant_ac_good = Some(field);
        } else {
            dist_bad = dist;
        }
    }
    if let Some(field) = quant_ac_good {
        quantizer.set_quant_field(quant_dc_good, &field);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn tile_dist_map_takes_maxima() -> Result<()> {
        let mut distmap = Image::new_constant((16, 16), 0.5f32)?;
        distmap.row_mut(3)[2] = 2.0;
        distmap.row_mut(9)[12] = 4.0;
        let tiles = tile_dist_map(&distmap, 8, 0)?;
        assert_eq!(tiles.size(), (2, 2));
        assert_eq!(tiles.row(0)[0], 2.0);
        assert_eq!(tiles.row(1)[1], 4.0);
        assert_eq!(tiles.row(0)[1], 0.5);
        Ok(())
    }

    #[test]
    fn margin_pulls_in_neighbors() -> Result<()> {
        let mut distmap = Image::new_constant((16, 8), 0.0f32)?;
        // Just across the tile boundary.
        distmap.row_mut(0)[8] = 3.0;
        let tiles = tile_dist_map(&distmap, 8, 1)?;
        assert_eq!(tiles.row(0)[0], 3.0);
        assert_eq!(tiles.row(0)[1], 3.0);
        Ok(())
    }

    #[test]
    fn adjust_quant_raises_precision() {
        let mut q = 1.0f32;
        assert!(adjust_quant_val(&mut q, 0.0, 0.5, 5.0));
        assert!(q > 1.0);
        let mut at_ceiling = 5.0f32;
        assert!(!adjust_quant_val(&mut at_ceiling, 0.0, 0.5, 5.0));
    }

    #[test]
    fn initial_quants_shrink_with_distance() {
        let (dc1, ac1) = initial_quants(1.0);
        let (dc3, ac3) = initial_quants(3.0);
        assert!(ac3 < ac1);
        assert!(dc3 < dc1);
    }

    #[test]
    fn peak_map_marks_neighborhood() -> Result<()> {
        let mut field = Image::new_constant((8, 8), 0.1f32)?;
        field.row_mut(4)[4] = 5.0;
        let peaks = dist_to_peak_map(&field, 1.0, 1, 0.0)?;
        assert_eq!(peaks.row(4)[4], 0.0);
        assert_eq!(peaks.row(4)[5], 1.0);
        assert_eq!(peaks.row(0)[0], -1.0);
        Ok(())
    }
}
