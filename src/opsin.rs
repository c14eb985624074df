// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::OnceLock;

use crate::{
    error::Result,
    image::{Image3, ImageDataType},
};

/// Linear-RGB-to-cone-response mixing matrix, row major.
pub const OPSIN_ABSORBANCE_MATRIX: [f32; 9] = [
    0.29956550340058319,
    0.63373087833825936,
    0.077705617820981968,
    0.22158691104574774,
    0.68491388044116142,
    0.10349920851309184,
    0.10600544816637855,
    0.14351034778309072,
    0.50126439972428609,
];

/// Inverse of `OPSIN_ABSORBANCE_MATRIX`, row major.
pub const OPSIN_INVERSE_MATRIX: [f32; 9] = [
    10.332605472195773,
    -9.6419850573099026,
    0.38908873264584304,
    -3.1488928924906552,
    4.4644838335741914,
    -0.4336710838649358,
    -1.28358159890739,
    0.7608825198742003,
    2.0368307886015815,
];

/// Per-channel scales applied in the gamma-compressed domain before the
/// opponent rotation.
pub const SCALE_R: f32 = 1.001746913108605;
pub const SCALE_G: f32 = 2.0 - SCALE_R;

/// Center of each opsin channel over the sRGB cube; subtracted before the
/// DCT so coefficients are roughly symmetric around zero.
pub const XYB_CENTER: [f32; 3] = [0.0062, 0.502, 0.454];

/// Half-width of each opsin channel over the sRGB cube, with a small margin.
pub const XYB_RADIUS: [f32; 3] = [0.035, 0.51, 0.465];

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// 256-entry sRGB-to-linear table; materialized once, shared immutably.
pub fn srgb8_to_linear_table() -> &'static [f32; 256] {
    static TABLE: OnceLock<[f32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0.0f32; 256];
        for (i, val) in table.iter_mut().enumerate() {
            *val = srgb_to_linear(i as f32 / 255.0);
        }
        table
    })
}

/// Cube-root response curve applied to mixed cone signals.
fn simple_gamma(v: f32) -> f32 {
    v.cbrt()
}

#[inline]
fn linear_to_xyb(rgb: [f32; 3]) -> [f32; 3] {
    let m = &OPSIN_ABSORBANCE_MATRIX;
    let mixed = [
        simple_gamma(m[0] * rgb[0] + m[1] * rgb[1] + m[2] * rgb[2]),
        simple_gamma(m[3] * rgb[0] + m[4] * rgb[1] + m[5] * rgb[2]),
        simple_gamma(m[6] * rgb[0] + m[7] * rgb[1] + m[8] * rgb[2]),
    ];
    [
        (SCALE_R * mixed[0] - SCALE_G * mixed[1]) * 0.5,
        (SCALE_R * mixed[0] + SCALE_G * mixed[1]) * 0.5,
        mixed[2],
    ]
}

#[inline]
fn xyb_to_linear(xyb: [f32; 3]) -> [f32; 3] {
    let gamma_r = (xyb[1] + xyb[0]) / SCALE_R;
    let gamma_g = (xyb[1] - xyb[0]) / SCALE_G;
    let gamma_b = xyb[2];
    let mixed = [
        gamma_r * gamma_r * gamma_r,
        gamma_g * gamma_g * gamma_g,
        gamma_b * gamma_b * gamma_b,
    ];
    let m = &OPSIN_INVERSE_MATRIX;
    [
        m[0] * mixed[0] + m[1] * mixed[1] + m[2] * mixed[2],
        m[3] * mixed[0] + m[4] * mixed[1] + m[5] * mixed[2],
        m[6] * mixed[0] + m[7] * mixed[1] + m[8] * mixed[2],
    ]
}

/// Converts an 8-bit sRGB image to the opsin dynamics space.
pub fn opsin_dynamics_image(srgb: &Image3<u8>) -> Result<Image3<f32>> {
    let lut = srgb8_to_linear_table();
    let (xsize, ysize) = srgb.size();
    let mut opsin = Image3::new((xsize, ysize))?;
    for y in 0..ysize {
        let [row_x, row_y, row_b] = opsin.rows_mut(y);
        let row_r = srgb.row(0, y);
        let row_g = srgb.row(1, y);
        let row_bl = srgb.row(2, y);
        for x in 0..xsize {
            let rgb = [
                lut[row_r[x] as usize],
                lut[row_g[x] as usize],
                lut[row_bl[x] as usize],
            ];
            [row_x[x], row_y[x], row_b[x]] = linear_to_xyb(rgb);
        }
    }
    Ok(opsin)
}

/// Converts a linear float image to the opsin dynamics space.
pub fn opsin_dynamics_image_linear(linear: &Image3<f32>) -> Result<Image3<f32>> {
    let (xsize, ysize) = linear.size();
    let mut opsin = Image3::new((xsize, ysize))?;
    for y in 0..ysize {
        let in_r = linear.row(0, y);
        let in_g = linear.row(1, y);
        let in_b = linear.row(2, y);
        let [row_x, row_y, row_b] = opsin.rows_mut(y);
        for x in 0..xsize {
            [row_x[x], row_y[x], row_b[x]] = linear_to_xyb([in_r[x], in_g[x], in_b[x]]);
        }
    }
    Ok(opsin)
}

/// Subtracts the per-channel centers in place; the DCT then sees values that
/// are roughly symmetric around zero.
pub fn center_opsin_values(opsin: &mut Image3<f32>) {
    for c in 0..3 {
        let center = XYB_CENTER[c];
        let plane = opsin.plane_mut(c);
        for y in 0..plane.ysize() {
            for v in plane.row_mut(y) {
                *v -= center;
            }
        }
    }
}

/// Converts a centered opsin image back to 8-bit sRGB, clamping and rounding.
pub fn centered_opsin_to_srgb(opsin: &Image3<f32>) -> Result<Image3<u8>> {
    let (xsize, ysize) = opsin.size();
    let mut srgb = Image3::new((xsize, ysize))?;
    for y in 0..ysize {
        let in_x = opsin.row(0, y);
        let in_y = opsin.row(1, y);
        let in_b = opsin.row(2, y);
        let [row_r, row_g, row_bl] = srgb.rows_mut(y);
        for x in 0..xsize {
            let xyb = [
                in_x[x] + XYB_CENTER[0],
                in_y[x] + XYB_CENTER[1],
                in_b[x] + XYB_CENTER[2],
            ];
            let rgb = xyb_to_linear(xyb);
            row_r[x] = u8::from_f64((linear_to_srgb(rgb[0].clamp(0.0, 1.0)) * 255.0).round() as f64);
            row_g[x] = u8::from_f64((linear_to_srgb(rgb[1].clamp(0.0, 1.0)) * 255.0).round() as f64);
            row_bl[x] =
                u8::from_f64((linear_to_srgb(rgb[2].clamp(0.0, 1.0)) * 255.0).round() as f64);
        }
    }
    Ok(srgb)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::error::Result;
    use crate::util::test::assert_almost_eq;

    #[test]
    fn matrix_is_inverse() {
        for i in 0..3 {
            for j in 0..3 {
                let mut sum = 0.0f64;
                for k in 0..3 {
                    sum += OPSIN_ABSORBANCE_MATRIX[i * 3 + k] as f64
                        * OPSIN_INVERSE_MATRIX[k * 3 + j] as f64;
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_almost_eq!(sum, expected, 1e-6);
            }
        }
    }

    #[test]
    fn pixel_roundtrip() {
        for (r, g, b) in [(0.5, 0.5, 0.5), (0.9, 0.1, 0.3), (0.02, 0.8, 0.96)] {
            let xyb = linear_to_xyb([r, g, b]);
            let rgb = xyb_to_linear(xyb);
            assert_almost_eq!(rgb[0], r, 1e-5);
            assert_almost_eq!(rgb[1], g, 1e-5);
            assert_almost_eq!(rgb[2], b, 1e-5);
        }
    }

    #[test]
    fn srgb8_roundtrip_within_one() -> Result<()> {
        // All 256 gray levels plus a color ramp; each channel must come back
        // within 1/255.
        let mut srgb = Image3::<u8>::new((256, 2))?;
        for x in 0..256 {
            srgb.row_mut(0, 0)[x] = x as u8;
            srgb.row_mut(1, 0)[x] = x as u8;
            srgb.row_mut(2, 0)[x] = x as u8;
            srgb.row_mut(0, 1)[x] = x as u8;
            srgb.row_mut(1, 1)[x] = (255 - x) as u8;
            srgb.row_mut(2, 1)[x] = (x / 2) as u8;
        }
        let mut opsin = opsin_dynamics_image(&srgb)?;
        center_opsin_values(&mut opsin);
        let back = centered_opsin_to_srgb(&opsin)?;
        for c in 0..3 {
            for y in 0..2 {
                for x in 0..256 {
                    let orig = srgb.row(c, y)[x] as i32;
                    let got = back.row(c, y)[x] as i32;
                    assert!(
                        (orig - got).abs() <= 1,
                        "channel {c} at {x}x{y}: {orig} vs {got}"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn values_within_declared_range() -> Result<()> {
        let mut srgb = Image3::<u8>::new((8, 8))?;
        for y in 0..8 {
            for x in 0..8 {
                srgb.row_mut(0, y)[x] = (x * 36) as u8;
                srgb.row_mut(1, y)[x] = (y * 36) as u8;
                srgb.row_mut(2, y)[x] = ((x + y) * 18) as u8;
            }
        }
        let mut opsin = opsin_dynamics_image(&srgb)?;
        center_opsin_values(&mut opsin);
        for c in 0..3 {
            for y in 0..8 {
                for &v in opsin.row(c, y) {
                    assert!(v.abs() <= XYB_RADIUS[c] + 1e-5);
                }
            }
        }
        Ok(())
    }
}
