// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    error::Result,
    image::{Image, Image3},
    BLOCK_DIM, BLOCK_SIZE,
};

/// Orthonormal DCT-II basis, `BASIS[k][n] = s_k * cos((2n+1)kπ/16)`.
/// The inverse transform is the transpose, so `idct(dct(x)) == x` up to
/// rounding.
#[rustfmt::skip]
const BASIS: [[f32; 8]; 8] = [
    [0.353553391, 0.353553391, 0.353553391, 0.353553391, 0.353553391, 0.353553391, 0.353553391, 0.353553391],
    [0.49039264, 0.415734806, 0.277785117, 0.097545161, -0.097545161, -0.277785117, -0.415734806, -0.49039264],
    [0.461939766, 0.191341716, -0.191341716, -0.461939766, -0.461939766, -0.191341716, 0.191341716, 0.461939766],
    [0.415734806, -0.097545161, -0.49039264, -0.277785117, 0.277785117, 0.49039264, 0.097545161, -0.415734806],
    [0.353553391, -0.353553391, -0.353553391, 0.353553391, 0.353553391, -0.353553391, -0.353553391, 0.353553391],
    [0.277785117, -0.49039264, 0.097545161, 0.415734806, -0.415734806, -0.097545161, 0.49039264, -0.277785117],
    [0.191341716, -0.461939766, 0.461939766, -0.191341716, -0.191341716, 0.461939766, -0.461939766, 0.191341716],
    [0.097545161, -0.277785117, 0.415734806, -0.49039264, 0.49039264, -0.415734806, 0.277785117, -0.097545161],
];

/// Transforms along the first index: `out[k][c] = Σ_n BASIS[k][n] in[n][c]`.
fn dct1d_columns(data: &mut [[f32; 8]; 8]) {
    let mut out = [[0.0f32; 8]; 8];
    for (k, basis_row) in BASIS.iter().enumerate() {
        for col in 0..8 {
            let mut sum = 0.0;
            for n in 0..8 {
                sum += basis_row[n] * data[n][col];
            }
            out[k][col] = sum;
        }
    }
    *data = out;
}

/// Inverse along the first index: `out[n][c] = Σ_k BASIS[k][n] in[k][c]`.
fn idct1d_columns(data: &mut [[f32; 8]; 8]) {
    let mut out = [[0.0f32; 8]; 8];
    for n in 0..8 {
        for col in 0..8 {
            let mut sum = 0.0;
            for k in 0..8 {
                sum += BASIS[k][n] * data[k][col];
            }
            out[n][col] = sum;
        }
    }
    *data = out;
}

fn transpose(data: &mut [[f32; 8]; 8]) {
    for i in 0..8 {
        for j in 0..i {
            let (a, b) = (data[i][j], data[j][i]);
            data[i][j] = b;
            data[j][i] = a;
        }
    }
}

/// 2D DCT of one block. `block` holds 64 samples row-major; the output holds
/// coefficient (ky, kx) at index `ky * 8 + kx`. The DC coefficient at index 0
/// is the block mean times 8.
pub fn dct2d(block: &mut [f32; BLOCK_SIZE]) {
    let mut tmp = [[0.0f32; 8]; 8];
    for y in 0..8 {
        tmp[y].copy_from_slice(&block[y * 8..y * 8 + 8]);
    }
    dct1d_columns(&mut tmp); // [ky][x]
    transpose(&mut tmp); // [x][ky]
    dct1d_columns(&mut tmp); // [kx][ky]
    for ky in 0..8 {
        for kx in 0..8 {
            block[ky * 8 + kx] = tmp[kx][ky];
        }
    }
}

/// Exact inverse of `dct2d`.
pub fn idct2d(block: &mut [f32; BLOCK_SIZE]) {
    let mut tmp = [[0.0f32; 8]; 8];
    for ky in 0..8 {
        for kx in 0..8 {
            tmp[kx][ky] = block[ky * 8 + kx];
        }
    }
    idct1d_columns(&mut tmp); // [x][ky]
    transpose(&mut tmp); // [ky][x]
    idct1d_columns(&mut tmp); // [y][x]
    for y in 0..8 {
        block[y * 8..y * 8 + 8].copy_from_slice(&tmp[y]);
    }
}

/// DCT of a whole plane whose dimensions are multiples of 8. Each 8×8 block
/// occupies 64 consecutive samples of the output row for its block row.
pub fn transposed_scaled_dct_plane(plane: &Image<f32>) -> Result<Image<f32>> {
    let (xsize, ysize) = plane.size();
    assert_eq!(xsize % BLOCK_DIM, 0);
    assert_eq!(ysize % BLOCK_DIM, 0);
    let block_xsize = xsize / BLOCK_DIM;
    let block_ysize = ysize / BLOCK_DIM;
    let mut out = Image::new((block_xsize * BLOCK_SIZE, block_ysize))?;
    let mut block = [0.0f32; BLOCK_SIZE];
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            for iy in 0..BLOCK_DIM {
                let row = plane.row(by * BLOCK_DIM + iy);
                block[iy * BLOCK_DIM..(iy + 1) * BLOCK_DIM]
                    .copy_from_slice(&row[bx * BLOCK_DIM..(bx + 1) * BLOCK_DIM]);
            }
            dct2d(&mut block);
            out.row_mut(by)[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE].copy_from_slice(&block);
        }
    }
    Ok(out)
}

pub fn transposed_scaled_dct(image: &Image3<f32>) -> Result<Image3<f32>> {
    Ok(Image3::from_planes([
        transposed_scaled_dct_plane(image.plane(0))?,
        transposed_scaled_dct_plane(image.plane(1))?,
        transposed_scaled_dct_plane(image.plane(2))?,
    ]))
}

/// Inverse of `transposed_scaled_dct_plane`.
pub fn transposed_scaled_idct_plane(coeffs: &Image<f32>) -> Result<Image<f32>> {
    let block_xsize = coeffs.xsize() / BLOCK_SIZE;
    let block_ysize = coeffs.ysize();
    let mut out = Image::new((block_xsize * BLOCK_DIM, block_ysize * BLOCK_DIM))?;
    let mut block = [0.0f32; BLOCK_SIZE];
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            block.copy_from_slice(&coeffs.row(by)[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE]);
            idct2d(&mut block);
            for iy in 0..BLOCK_DIM {
                let row = out.row_mut(by * BLOCK_DIM + iy);
                row[bx * BLOCK_DIM..(bx + 1) * BLOCK_DIM]
                    .copy_from_slice(&block[iy * BLOCK_DIM..(iy + 1) * BLOCK_DIM]);
            }
        }
    }
    Ok(out)
}

pub fn transposed_scaled_idct(coeffs: &Image3<f32>) -> Result<Image3<f32>> {
    Ok(Image3::from_planes([
        transposed_scaled_idct_plane(coeffs.plane(0))?,
        transposed_scaled_idct_plane(coeffs.plane(1))?,
        transposed_scaled_idct_plane(coeffs.plane(2))?,
    ]))
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::util::test::assert_almost_eq;

    #[test]
    fn block_roundtrip() {
        arbtest::arbtest(|u| {
            let mut block = [0.0f32; BLOCK_SIZE];
            let mut max_abs = 0.0f32;
            for v in block.iter_mut() {
                *v = u.int_in_range(-255..=255)? as f32 / 17.0;
                max_abs = max_abs.max(v.abs());
            }
            let orig = block;
            dct2d(&mut block);
            idct2d(&mut block);
            for (a, b) in orig.iter().zip(block.iter()) {
                assert!((a - b).abs() <= 1e-5 * max_abs.max(1.0));
            }
            Ok(())
        });
    }

    #[test]
    fn dc_is_scaled_mean() {
        let mut block = [3.0f32; BLOCK_SIZE];
        dct2d(&mut block);
        assert_almost_eq!(block[0], 24.0, 1e-4);
        for &ac in &block[1..] {
            assert_almost_eq!(ac, 0.0, 1e-5);
        }
    }

    #[test]
    fn plane_roundtrip() -> Result<()> {
        let mut plane = Image::<f32>::new((16, 16))?;
        for y in 0..16 {
            for x in 0..16 {
                plane.row_mut(y)[x] = ((x * 7 + y * 3) % 13) as f32 - 6.0;
            }
        }
        let coeffs = transposed_scaled_dct_plane(&plane)?;
        assert_eq!(coeffs.size(), (128, 2));
        let back = transposed_scaled_idct_plane(&coeffs)?;
        for y in 0..16 {
            for x in 0..16 {
                assert_almost_eq!(back.row(y)[x], plane.row(y)[x], 1e-4);
            }
        }
        Ok(())
    }
}
