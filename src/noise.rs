// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Photon-noise modeling. The encoder fits a power law `σ(I) = α·I^γ + β`
//! to flat patches of the opsin image; the decoder synthesizes matching
//! noise from a seeded PRNG and adds it to the reconstruction.

use crate::{
    bit_reader::BitReader,
    bit_writer::BitWriter,
    error::Result,
    image::{Image, Image3},
    opsin::{XYB_CENTER, XYB_RADIUS},
    optimize::{scaled_conjugate_gradient, LossFunction},
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseParams {
    pub alpha: f32,
    pub gamma: f32,
    pub beta: f32,
}

impl NoiseParams {
    pub fn have_noise(&self) -> bool {
        self.alpha != 0.0 || self.gamma != 0.0 || self.beta != 0.0
    }
}

/// Fixed-point precision of the serialized parameters.
const NOISE_PRECISION: f32 = 1000.0;

fn encode_float_param(val: f32, writer: &mut BitWriter) {
    writer.write(1, if val >= 0.0 { 1 } else { 0 });
    let quantized = (val.abs() * NOISE_PRECISION + 0.5) as u64;
    writer.write(16, quantized.min(0xffff));
}

fn decode_float_param(br: &mut BitReader) -> Result<f32> {
    let sign = if br.read(1)? == 1 { 1.0 } else { -1.0 };
    let quantized = br.read(16)? as f32;
    Ok(sign * quantized / NOISE_PRECISION)
}

pub fn encode_noise(params: &NoiseParams, writer: &mut BitWriter) {
    if params.have_noise() {
        writer.write(1, 1);
        encode_float_param(params.alpha, writer);
        encode_float_param(params.gamma, writer);
        encode_float_param(params.beta, writer);
    } else {
        writer.write(1, 0);
    }
    writer.zero_pad_to_byte();
}

pub fn decode_noise(br: &mut BitReader) -> Result<NoiseParams> {
    let params = if br.read(1)? == 1 {
        NoiseParams {
            alpha: decode_float_param(br)?,
            gamma: decode_float_param(br)?,
            beta: decode_float_param(br)?,
        }
    } else {
        NoiseParams::default()
    };
    br.jump_to_byte_boundary()?;
    Ok(params)
}

// ---------------------------------------------------------------------------
// Synthesis.

/// xorshift128+ with a fixed seed, so every decode of the same stream adds
/// the same noise.
pub struct Xorshift128Plus {
    s0: u64,
    s1: u64,
}

impl Xorshift128Plus {
    pub fn new(seed0: u64, seed1: u64) -> Xorshift128Plus {
        // Avoid the all-zero state.
        Xorshift128Plus {
            s0: seed0 | 1,
            s1: seed1 | 2,
        }
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.s0;
        let y = self.s1;
        self.s0 = y;
        x ^= x << 23;
        self.s1 = x ^ y ^ (x >> 17) ^ (y >> 26);
        self.s1.wrapping_add(y)
    }
}

const NOISE_SEED: (u64, u64) = (65537, 123456789);

/// Normalizer of the Laplacian-filtered uniform field.
const NOISE_NORM: f32 = 0.22;

/// Correlated/independent mix of the red and green noise components.
const RG_CORR: f32 = 0.9;
const RG_INDEPENDENT: f32 = 0.1;

/// Share of the red+green noise leaking into the B channel.
const B_LEAK: f32 = 0.9375;

fn uniform_from_bits(bits: u32) -> f32 {
    // 1.0 + 23 random mantissa bits lies in [1, 2).
    f32::from_bits((bits >> 9) | 0x3f80_0000) - 1.0
}

/// A uniform random field passed through a 3x3 Laplacian, giving zero-mean
/// high-frequency noise.
fn random_image(rng: &mut Xorshift128Plus, size: (usize, usize)) -> Result<Image<f32>> {
    let (xsize, ysize) = size;
    let mut uniform = Image::new(size)?;
    for y in 0..ysize {
        let row = uniform.row_mut(y);
        let mut x = 0;
        while x < xsize {
            let bits = rng.next();
            row[x] = uniform_from_bits(bits as u32);
            if x + 1 < xsize {
                row[x + 1] = uniform_from_bits((bits >> 32) as u32);
            }
            x += 2;
        }
    }
    let mut out = Image::new(size)?;
    let at = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, xsize as i64 - 1) as usize;
        let y = y.clamp(0, ysize as i64 - 1) as usize;
        uniform.row(y)[x]
    };
    for y in 0..ysize {
        let row = out.row_mut(y);
        for x in 0..xsize {
            let (xi, yi) = (x as i64, y as i64);
            row[x] = 4.0 * at(xi, yi)
                - at(xi - 1, yi)
                - at(xi + 1, yi)
                - at(xi, yi - 1)
                - at(xi, yi + 1);
        }
    }
    Ok(out)
}

fn noise_strength(params: &NoiseParams, intensity: f32) -> f32 {
    (params.alpha * intensity.max(0.0).powf(params.gamma) + params.beta).clamp(0.0, 1.0)
}

/// Adds synthesized noise to a centered opsin image in place.
pub fn add_noise(params: &NoiseParams, opsin: &mut Image3<f32>) -> Result<()> {
    if !params.have_noise() {
        return Ok(());
    }
    let size = opsin.size();
    let mut rng = Xorshift128Plus::new(NOISE_SEED.0, NOISE_SEED.1);
    let rnd_red = random_image(&mut rng, size)?;
    let rnd_green = random_image(&mut rng, size)?;
    let rnd_cor = random_image(&mut rng, size)?;
    for y in 0..size.1 {
        let [row_x, row_y, row_b] = opsin.rows_mut(y);
        let row_r = rnd_red.row(y);
        let row_g = rnd_green.row(y);
        let row_c = rnd_cor.row(y);
        for x in 0..size.0 {
            let in_g = 0.5 * (row_y[x] - row_x[x]);
            let in_r = 0.5 * (row_y[x] + row_x[x]);
            let clamped_g = in_g.clamp(-XYB_RADIUS[1], XYB_RADIUS[1]);
            let clamped_r = in_r.clamp(-XYB_RADIUS[1], XYB_RADIUS[1]);
            let strength_g = noise_strength(params, clamped_g + XYB_CENTER[1]);
            let strength_r = noise_strength(params, clamped_r + XYB_CENTER[1]);
            let rnd_r = row_r[x] * NOISE_NORM;
            let rnd_g = row_g[x] * NOISE_NORM;
            let rnd_c = row_c[x] * NOISE_NORM;
            let red_noise = RG_INDEPENDENT * rnd_r * strength_r + RG_CORR * rnd_c * strength_r;
            let green_noise = RG_INDEPENDENT * rnd_g * strength_g + RG_CORR * rnd_c * strength_g;
            row_x[x] = (row_x[x] + red_noise - green_noise)
                .clamp(-XYB_RADIUS[0], XYB_RADIUS[0]);
            row_y[x] = (row_y[x] + red_noise + green_noise)
                .clamp(-XYB_RADIUS[1], XYB_RADIUS[1]);
            row_b[x] = (row_b[x] + B_LEAK * (red_noise + green_noise))
                .clamp(-XYB_RADIUS[2], XYB_RADIUS[2]);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Estimation.

const PATCH_SIZE: usize = 8;
const NUM_SAD_BINS: usize = 256;

/// The patch SAD comparison keeps the smallest half of the window scores,
/// as in rank-order absolute distance.
fn patch_sad_score(opsin: &Image3<f32>, x0: usize, y0: usize) -> f32 {
    const SMALL_X: usize = 3;
    const SMALL_Y: usize = 4;
    const OFFSET: usize = 2;
    let mut sads = vec![];
    for y_bl in 0..PATCH_SIZE - SMALL_Y {
        for x_bl in 0..PATCH_SIZE - SMALL_X {
            let mut sad_sum = 0.0f32;
            for cy in 0..SMALL_Y {
                for cx in 0..SMALL_X {
                    let wnd = 0.5
                        * (opsin.row(1, y0 + y_bl + cy)[x0 + x_bl + cx]
                            + opsin.row(0, y0 + y_bl + cy)[x0 + x_bl + cx]);
                    let center = 0.5
                        * (opsin.row(1, y0 + OFFSET + cy)[x0 + OFFSET + cx]
                            + opsin.row(0, y0 + OFFSET + cy)[x0 + OFFSET + cx]);
                    sad_sum += (center - wnd).abs();
                }
            }
            sads.push(sad_sum);
        }
    }
    let keep = sads.len() / 2;
    sads.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sads[..keep].iter().sum::<f32>() / keep as f32
}

fn sad_scores(opsin: &Image3<f32>, histogram: &mut [u32; NUM_SAD_BINS]) -> Vec<f32> {
    let mut scores = vec![];
    let (xsize, ysize) = opsin.size();
    let mut y = 0;
    while y + PATCH_SIZE <= ysize {
        let mut x = 0;
        while x + PATCH_SIZE <= xsize {
            let score = patch_sad_score(opsin, x, y);
            scores.push(score);
            let bin = ((score * NUM_SAD_BINS as f32) as usize).min(NUM_SAD_BINS - 1);
            histogram[bin] += 1;
            x += PATCH_SIZE;
        }
        y += PATCH_SIZE;
    }
    scores
}

fn histogram_mode(histogram: &[u32; NUM_SAD_BINS]) -> usize {
    let mut mode = 0;
    for (i, &c) in histogram.iter().enumerate() {
        if c > histogram[mode] {
            mode = i;
        }
    }
    mode
}

#[derive(Clone, Copy, Debug)]
struct NoiseLevel {
    intensity: f32,
    noise_level: f32,
}

#[rustfmt::skip]
const LAPL_FILTER: [[f32; 3]; 3] = [
    [-0.25, -1.0, -0.25],
    [-1.0,   5.0, -1.0],
    [-0.25, -1.0, -0.25],
];

/// Measures per-patch noise as the mean absolute response of a Laplacian
/// on 0.5·(X+Y), for patches flat enough to be noise-dominated.
fn noise_levels(opsin: &Image3<f32>, scores: &[f32], threshold: f32) -> Vec<NoiseLevel> {
    let (xsize, ysize) = opsin.size();
    let intensity_at = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, xsize as i64 - 1) as usize;
        let y = y.clamp(0, ysize as i64 - 1) as usize;
        0.5 * (opsin.row(1, y)[x] + opsin.row(0, y)[x])
    };
    let mut levels = vec![];
    let mut patch = 0usize;
    let mut y0 = 0;
    while y0 + PATCH_SIZE <= ysize {
        let mut x0 = 0;
        while x0 + PATCH_SIZE <= xsize {
            if scores[patch] <= threshold {
                let mut mean = 0.0f32;
                for y in 0..PATCH_SIZE {
                    for x in 0..PATCH_SIZE {
                        mean += intensity_at((x0 + x) as i64, (y0 + y) as i64);
                    }
                }
                mean /= (PATCH_SIZE * PATCH_SIZE) as f32;

                let mut level = 0.0f32;
                for y in 0..PATCH_SIZE {
                    for x in 0..PATCH_SIZE {
                        let mut filtered = 0.0f32;
                        for (fy, filter_row) in LAPL_FILTER.iter().enumerate() {
                            for (fx, &weight) in filter_row.iter().enumerate() {
                                filtered += weight
                                    * intensity_at(
                                        (x0 + x) as i64 + fx as i64 - 1,
                                        (y0 + y) as i64 + fy as i64 - 1,
                                    );
                            }
                        }
                        level += filtered.abs();
                    }
                }
                level /= (PATCH_SIZE * PATCH_SIZE) as f32;
                levels.push(NoiseLevel {
                    intensity: mean,
                    noise_level: level,
                });
            }
            patch += 1;
            x0 += PATCH_SIZE;
        }
        y0 += PATCH_SIZE;
    }
    levels
}

/// Pins the fit down at both ends of the intensity range.
fn add_points_for_extrapolation(levels: &mut Vec<NoiseLevel>) {
    let mut nl_min = NoiseLevel {
        intensity: 0.5,
        noise_level: 2.0,
    };
    let mut nl_max = NoiseLevel {
        intensity: -0.5,
        noise_level: -2.0,
    };
    for nl in levels.iter() {
        if nl.noise_level < nl_min.noise_level {
            nl_min.noise_level = nl.noise_level;
        }
        if nl.noise_level > nl_max.noise_level {
            nl_max.noise_level = nl.noise_level;
        }
    }
    levels.push(nl_min);
    levels.push(nl_max);
}

/// `(1-n)·Σ (y_i - (α·x_i^γ + β))² + n·α·γ` over the measured levels, with
/// intensities shifted into the positive domain.
struct PowerLawLoss {
    levels: Vec<NoiseLevel>,
}

impl LossFunction for PowerLawLoss {
    fn compute(&self, w: &[f64], grad: &mut [f64]) -> f64 {
        const EPSILON: f64 = 1e-2;
        const REGUL: f64 = 0.00005;
        let mut loss = 0.0;
        grad.fill(0.0);
        for nl in self.levels.iter() {
            let x = nl.intensity as f64 + XYB_CENTER[1] as f64;
            if x <= EPSILON {
                continue;
            }
            let powed = x.powf(w[1]);
            let l_f = nl.noise_level as f64 - (w[0] * powed + w[2]);
            grad[0] += (1.0 - REGUL) * 2.0 * l_f * powed + REGUL * w[1];
            grad[1] += (1.0 - REGUL) * 2.0 * l_f * w[0] * powed * x.ln() + REGUL * w[0];
            grad[2] += (1.0 - REGUL) * 2.0 * l_f;
            loss += (1.0 - REGUL) * l_f * l_f + REGUL * w[0] * w[1];
        }
        // The gradient of the squared error enters with opposite sign.
        grad[0] = -grad[0];
        grad[1] = -grad[1];
        grad[2] = -grad[2];
        loss
    }
}

/// The SAD threshold above which the image is considered patterned rather
/// than noisy; such images get no synthesized noise.
const MAX_SAD_THRESHOLD: f32 = 0.15;

/// Fits the noise power law on a centered opsin image. Returns all-zero
/// parameters when the image has no usable flat patches.
pub fn estimate_noise(opsin: &Image3<f32>, quality_coef: f32) -> NoiseParams {
    let (xsize, ysize) = opsin.size();
    if xsize < PATCH_SIZE || ysize < PATCH_SIZE {
        return NoiseParams::default();
    }
    let mut histogram = [0u32; NUM_SAD_BINS];
    let scores = sad_scores(opsin, &mut histogram);
    let threshold = histogram_mode(&histogram) as f32 / NUM_SAD_BINS as f32;
    if threshold > MAX_SAD_THRESHOLD || threshold <= 0.0 {
        return NoiseParams::default();
    }
    let mut levels = noise_levels(opsin, &scores, threshold);
    if levels.is_empty() {
        return NoiseParams::default();
    }
    add_points_for_extrapolation(&mut levels);
    let loss = PowerLawLoss { levels };
    let fitted = scaled_conjugate_gradient(&loss, &[-0.05, 2.6, 0.025], 1e-8, 1000);
    NoiseParams {
        alpha: fitted[0] as f32 * quality_coef,
        gamma: fitted[1] as f32,
        beta: fitted[2] as f32 * quality_coef,
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn params_roundtrip() -> Result<()> {
        let params = NoiseParams {
            alpha: -0.043,
            gamma: 2.61,
            beta: 0.025,
        };
        let mut writer = BitWriter::new();
        encode_noise(&params, &mut writer);
        let bytes = writer.finalize();
        let decoded = decode_noise(&mut BitReader::new(&bytes))?;
        assert!((decoded.alpha - params.alpha).abs() < 1e-3);
        assert!((decoded.gamma - params.gamma).abs() < 1e-3);
        assert!((decoded.beta - params.beta).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn no_noise_is_one_byte() {
        let mut writer = BitWriter::new();
        encode_noise(&NoiseParams::default(), &mut writer);
        assert_eq!(writer.total_bits_written(), 8);
    }

    #[test]
    fn prng_is_deterministic() {
        let mut a = Xorshift128Plus::new(NOISE_SEED.0, NOISE_SEED.1);
        let mut b = Xorshift128Plus::new(NOISE_SEED.0, NOISE_SEED.1);
        for _ in 0..100 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn noise_injection_is_bounded_and_deterministic() -> Result<()> {
        let params = NoiseParams {
            alpha: 0.0,
            gamma: 0.0,
            beta: 0.02,
        };
        let mut a = Image3::new((32, 16))?;
        for y in 0..16 {
            a.row_mut(1, y).fill(0.1);
        }
        let mut b = a.try_clone()?;
        add_noise(&params, &mut a)?;
        add_noise(&params, &mut b)?;
        let mut any_changed = false;
        for c in 0..3 {
            for y in 0..16 {
                for x in 0..32 {
                    let v = a.row(c, y)[x];
                    assert_eq!(v, b.row(c, y)[x]);
                    assert!(v.abs() <= XYB_RADIUS[c]);
                    any_changed |= v != if c == 1 { 0.1 } else { 0.0 };
                }
            }
        }
        assert!(any_changed);
        Ok(())
    }

    #[test]
    fn zero_params_add_nothing() -> Result<()> {
        let mut image = Image3::new((8, 8))?;
        image.row_mut(0, 3)[4] = 0.02;
        add_noise(&NoiseParams::default(), &mut image)?;
        assert_eq!(image.row(0, 3)[4], 0.02);
        Ok(())
    }

    #[test]
    fn smooth_image_yields_finite_fit() -> Result<()> {
        let mut opsin = Image3::new((64, 64))?;
        let mut rng = Xorshift128Plus::new(5, 6);
        for y in 0..64 {
            for x in 0..64 {
                let n = uniform_from_bits(rng.next() as u32) * 0.01;
                opsin.row_mut(1, y)[x] = 0.1 + n;
                opsin.row_mut(0, y)[x] = 0.002;
            }
        }
        let params = estimate_noise(&opsin, 1.0);
        assert!(params.alpha.is_finite());
        assert!(params.gamma.is_finite());
        assert!(params.beta.is_finite());
        Ok(())
    }
}
