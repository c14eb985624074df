// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! DC coefficients serve as an image preview, so they are coded separately.
//! Subtracting predicted values leads to a residual distribution with lower
//! entropy and magnitudes than the original values.
//!
//! The predictors use immediately adjacent causal pixels because more distant
//! pixels are only weakly correlated in subsampled DC images. Cross-channel
//! correlation is exploited by choosing a predictor based upon its
//! performance on a previously decoded channel, so no side information needs
//! to be transmitted.

use crate::{
    error::Result,
    image::{Image, Image3, ImageRect},
};

pub const NUM_PREDICTORS: usize = 8;

/// Causal neighborhood of a pixel. Missing neighbors are substituted from
/// the nearest decoded value, identically on both sides.
#[derive(Clone, Copy)]
struct Neighbors {
    w: i32,
    n: i32,
    nw: i32,
    ne: i32,
}

impl Neighbors {
    fn gather(value: &impl Fn(usize, usize) -> i32, x: usize, y: usize, xsize: usize) -> Neighbors {
        let w = if x > 0 {
            value(x - 1, y)
        } else if y > 0 {
            value(x, y - 1)
        } else {
            0
        };
        let n = if y > 0 { value(x, y - 1) } else { w };
        let nw = if x > 0 && y > 0 { value(x - 1, y - 1) } else { n };
        let ne = if y > 0 {
            if x + 1 < xsize {
                value(x + 1, y - 1)
            } else {
                n
            }
        } else {
            w
        };
        Neighbors { w, n, nw, ne }
    }
}

fn clamp16(v: i32) -> i32 {
    v.clamp(i16::MIN as i32, i16::MAX as i32)
}

/// Gradient predictor clamped to the range of its horizontal and vertical
/// neighbors, as in JPEG-LS MED.
fn clamped_gradient(nb: Neighbors) -> i32 {
    let grad = nb.w + nb.n - nb.nw;
    grad.clamp(nb.w.min(nb.n), nb.w.max(nb.n))
}

fn predict(bank_smooth: bool, p: usize, nb: Neighbors) -> i32 {
    let v = if bank_smooth {
        // Average-heavy bank used when the SmoothDCPred header flag is set.
        match p {
            0 => (nb.w + nb.n) >> 1,
            1 => (nb.w + nb.nw) >> 1,
            2 => (nb.n + nb.ne) >> 1,
            3 => (nb.w + nb.n + nb.nw + nb.ne) >> 2,
            4 => nb.w,
            5 => nb.n,
            6 => clamped_gradient(nb),
            _ => (nb.w + 2 * nb.n + nb.ne) >> 2,
        }
    } else {
        match p {
            0 => nb.w,
            1 => nb.n,
            2 => nb.ne,
            3 => nb.nw,
            4 => (nb.w + nb.n) >> 1,
            5 => (nb.n + nb.ne) >> 1,
            6 => clamped_gradient(nb),
            _ => (nb.w + nb.n + nb.nw + nb.ne) >> 2,
        }
    };
    clamp16(v)
}

/// Index of the predictor with the smallest cost; ties break toward the
/// lowest index so both sides agree.
fn best_of(costs: &[u32; NUM_PREDICTORS]) -> usize {
    let mut best = 0;
    for p in 1..NUM_PREDICTORS {
        if costs[p] < costs[best] {
            best = p;
        }
    }
    best
}

/// Measures every predictor against the already-decoded values at the west
/// and north positions of (x, y).
fn same_channel_costs(
    value: &impl Fn(usize, usize) -> i32,
    smooth: bool,
    x: usize,
    y: usize,
    xsize: usize,
) -> [u32; NUM_PREDICTORS] {
    let mut costs = [0u32; NUM_PREDICTORS];
    for (px, py) in [(x.wrapping_sub(1), y), (x, y.wrapping_sub(1))] {
        if px >= xsize || py == usize::MAX || (px == x && py == y) {
            continue;
        }
        let actual = value(px, py);
        let nb = Neighbors::gather(value, px, py, xsize);
        for (p, cost) in costs.iter_mut().enumerate() {
            *cost += (predict(smooth, p, nb) - actual).unsigned_abs();
        }
    }
    costs
}

/// Measures every predictor against the fully decoded luminance value at
/// (x, y) itself; used as the side-channel hint for X and B.
fn luma_hint_costs(
    y_value: &impl Fn(usize, usize) -> i32,
    smooth: bool,
    x: usize,
    y: usize,
    xsize: usize,
) -> [u32; NUM_PREDICTORS] {
    let actual = y_value(x, y);
    let nb = Neighbors::gather(y_value, x, y, xsize);
    let mut costs = [0u32; NUM_PREDICTORS];
    for (p, cost) in costs.iter_mut().enumerate() {
        *cost = (predict(smooth, p, nb) - actual).unsigned_abs();
    }
    costs
}

/// Predicts luminance within `rect` and stores residuals into `residuals`
/// starting at (0, 0). Residuals wrap modulo 2^16, which keeps the inverse
/// exact for the full signed 16-bit range.
pub fn shrink_y(rect: ImageRect<i16>, smooth: bool, residuals: &mut Image<i16>) {
    let (xsize, ysize) = rect.size();
    assert!(residuals.xsize() >= xsize && residuals.ysize() >= ysize);
    let value = |x: usize, y: usize| rect.row(y)[x] as i32;
    for y in 0..ysize {
        for x in 0..xsize {
            let costs = same_channel_costs(&value, smooth, x, y, xsize);
            let nb = Neighbors::gather(&value, x, y, xsize);
            let pred = predict(smooth, best_of(&costs), nb);
            residuals.row_mut(y)[x] = (value(x, y) as i16).wrapping_sub(pred as i16);
        }
    }
}

/// Reconstructs luminance from residuals produced by `shrink_y`.
pub fn expand_y(rect_size: (usize, usize), smooth: bool, residuals: &Image<i16>, out: &mut Image<i16>) {
    let (xsize, ysize) = rect_size;
    assert!(out.xsize() >= xsize && out.ysize() >= ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            // The closure only reads positions decoded in prior iterations.
            let value = |px: usize, py: usize| out.row(py)[px] as i32;
            let costs = same_channel_costs(&value, smooth, x, y, xsize);
            let nb = Neighbors::gather(&value, x, y, xsize);
            let pred = predict(smooth, best_of(&costs), nb);
            out.row_mut(y)[x] = (pred as i16).wrapping_add(residuals.row(y)[x]);
        }
    }
}

/// Stores residuals of predicting a chroma plane, using the predictor that
/// performed best on the decoded luminance at the same position.
pub fn shrink_xb(
    rect: ImageRect<i16>,
    smooth: bool,
    y_plane: &Image<i16>,
    residuals: &mut Image<i16>,
) {
    let (xsize, ysize) = rect.size();
    let y_value = |x: usize, y: usize| y_plane.row(y)[x] as i32;
    let value = |x: usize, y: usize| rect.row(y)[x] as i32;
    for y in 0..ysize {
        for x in 0..xsize {
            let costs = luma_hint_costs(&y_value, smooth, x, y, xsize);
            let nb = Neighbors::gather(&value, x, y, xsize);
            let pred = predict(smooth, best_of(&costs), nb);
            residuals.row_mut(y)[x] = (value(x, y) as i16).wrapping_sub(pred as i16);
        }
    }
}

/// Inverse of `shrink_xb`; `y_plane` must already be fully expanded.
pub fn expand_xb(
    rect_size: (usize, usize),
    smooth: bool,
    y_plane: &Image<i16>,
    residuals: &Image<i16>,
    out: &mut Image<i16>,
) {
    let (xsize, ysize) = rect_size;
    let y_value = |x: usize, y: usize| y_plane.row(y)[x] as i32;
    for y in 0..ysize {
        for x in 0..xsize {
            let value = |px: usize, py: usize| out.row(py)[px] as i32;
            let costs = luma_hint_costs(&y_value, smooth, x, y, xsize);
            let nb = Neighbors::gather(&value, x, y, xsize);
            let pred = predict(smooth, best_of(&costs), nb);
            out.row_mut(y)[x] = (pred as i16).wrapping_add(residuals.row(y)[x]);
        }
    }
}

/// Predicts all three DC planes of `dc` within `rect` and returns the
/// residual planes, each starting at (0, 0).
pub fn shrink_dc(
    rect: (usize, usize, usize, usize),
    dc: &Image3<i16>,
    smooth: bool,
) -> Result<Image3<i16>> {
    let (x0, y0, xsize, ysize) = rect;
    let mut residuals = Image3::new((xsize, ysize))?;
    let rect_y = dc.plane(1).as_rect().rect((x0, y0), (xsize, ysize))?;
    shrink_y(rect_y, smooth, residuals.plane_mut(1));
    // The luminance hint is measured on decoded values; residual coding is
    // exact, so the original window serves as the decoded plane.
    let y_dec = rect_y.to_image()?;
    for c in [0usize, 2] {
        let rect_c = dc.plane(c).as_rect().rect((x0, y0), (xsize, ysize))?;
        shrink_xb(rect_c, smooth, &y_dec, residuals.plane_mut(c));
    }
    Ok(residuals)
}

/// Reconstructs the DC planes from residuals produced by `shrink_dc`.
pub fn expand_dc(residuals: &Image3<i16>, smooth: bool) -> Result<Image3<i16>> {
    let (xsize, ysize) = residuals.size();
    let mut dc = Image3::new((xsize, ysize))?;
    expand_y((xsize, ysize), smooth, residuals.plane(1), dc.plane_mut(1));
    let y_dec = dc.plane(1).try_clone()?;
    for c in [0usize, 2] {
        expand_xb(
            (xsize, ysize),
            smooth,
            &y_dec,
            residuals.plane(c),
            dc.plane_mut(c),
        );
    }
    Ok(dc)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::error::Result;

    fn roundtrip(dc: &Image3<i16>, smooth: bool) -> Result<()> {
        let (xsize, ysize) = dc.size();
        let residuals = shrink_dc((0, 0, xsize, ysize), dc, smooth)?;
        let expanded = expand_dc(&residuals, smooth)?;
        for c in 0..3 {
            for y in 0..ysize {
                assert_eq!(dc.row(c, y), expanded.row(c, y), "plane {c} row {y}");
            }
        }
        Ok(())
    }

    #[test]
    fn roundtrip_smooth_ramp() -> Result<()> {
        let mut dc = Image3::<i16>::new((16, 8))?;
        for c in 0..3 {
            for y in 0..8 {
                for x in 0..16 {
                    dc.row_mut(c, y)[x] = (x as i16) * 13 + (y as i16) * 7 - 50;
                }
            }
        }
        roundtrip(&dc, false)?;
        roundtrip(&dc, true)
    }

    #[test]
    fn roundtrip_random_full_range() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
        arbtest::arbtest(|u| {
            let xsize = u.int_in_range(1usize..=33)?;
            let ysize = u.int_in_range(1usize..=17)?;
            let dc = Image3::<i16>::new_random((xsize, ysize), &mut rng).unwrap();
            roundtrip(&dc, u.arbitrary()?).unwrap();
            Ok(())
        });
    }

    #[test]
    fn residuals_smaller_than_values_on_gradients() -> Result<()> {
        let mut dc = Image3::<i16>::new((32, 32))?;
        for c in 0..3 {
            for y in 0..32 {
                for x in 0..32 {
                    dc.row_mut(c, y)[x] = 1000 + (x + 2 * y) as i16;
                }
            }
        }
        let residuals = shrink_dc((0, 0, 32, 32), &dc, false)?;
        let mut total: i64 = 0;
        for c in 0..3 {
            for y in 0..32 {
                for &r in residuals.row(c, y) {
                    total += (r as i64).abs();
                }
            }
        }
        // The first pixel carries the base value; everything else is nearly
        // perfectly predicted.
        assert!(total < 3 * 1500, "total residual magnitude {total}");
        Ok(())
    }

    #[test]
    fn window_matches_full_image() -> Result<()> {
        // Predicting a window is self-contained: residuals of a rect must
        // expand back to the rect contents regardless of surrounding pixels.
        let mut dc = Image3::<i16>::new((12, 12))?;
        for c in 0..3 {
            for y in 0..12 {
                for x in 0..12 {
                    dc.row_mut(c, y)[x] = ((x * 31 + y * 17 + c * 5) % 255) as i16 - 128;
                }
            }
        }
        let residuals = shrink_dc((4, 4, 8, 8), &dc, false)?;
        let expanded = expand_dc(&residuals, false)?;
        for c in 0..3 {
            for y in 0..8 {
                for x in 0..8 {
                    assert_eq!(expanded.row(c, y)[x], dc.row(c, y + 4)[x + 4]);
                }
            }
        }
        Ok(())
    }
}
