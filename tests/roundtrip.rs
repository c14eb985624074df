// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! End-to-end encode/decode scenarios.

use xybik::error::ErrorKind;
use xybik::parallel::{Sequential, ThreadPool};
use xybik::{decode, encode, CompressParams, DecompressParams, Image3, Override};

fn solid_image(rgb: (u8, u8, u8), size: (usize, usize)) -> Image3<u8> {
    let mut image = Image3::new(size).unwrap();
    for y in 0..size.1 {
        image.row_mut(0, y).fill(rgb.0);
        image.row_mut(1, y).fill(rgb.1);
        image.row_mut(2, y).fill(rgb.2);
    }
    image
}

fn noise_image(size: (usize, usize), seed: u64) -> Image3<u8> {
    let mut image = Image3::new(size).unwrap();
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    for c in 0..3 {
        for y in 0..size.1 {
            for v in image.row_mut(c, y) {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                *v = (state >> 56) as u8;
            }
        }
    }
    image
}

fn gradient_image(size: (usize, usize)) -> Image3<u8> {
    let mut image = Image3::new(size).unwrap();
    for c in 0..3 {
        for y in 0..size.1 {
            for x in 0..size.0 {
                image.row_mut(c, y)[x] =
                    ((x * 255 / size.0.max(1) + y * 31 + c * 17) % 256) as u8;
            }
        }
    }
    image
}

fn mean_abs_diff(a: &Image3<u8>, b: &Image3<u8>) -> f64 {
    let (xsize, ysize) = a.size();
    let mut total = 0u64;
    for c in 0..3 {
        for y in 0..ysize {
            for x in 0..xsize {
                total += (a.row(c, y)[x] as i64 - b.row(c, y)[x] as i64).unsigned_abs();
            }
        }
    }
    total as f64 / (3 * xsize * ysize) as f64
}

#[test]
fn single_gray_pixel_is_tiny_and_accurate() {
    // S1.
    let image = solid_image((128, 128, 128), (1, 1));
    let params = CompressParams {
        butteraugli_distance: 1.0,
        ..CompressParams::default()
    };
    let bytes = encode(&params, &image, &Sequential).unwrap();
    assert!(bytes.len() < 64, "stream is {} bytes", bytes.len());
    let decoded = decode(&DecompressParams::default(), &bytes, &Sequential).unwrap();
    assert_eq!(decoded.size(), (1, 1));
    for c in 0..3 {
        let v = decoded.row(c, 0)[0] as i32;
        assert!((v - 128).abs() <= 2, "channel {c} decoded to {v}");
    }
}

#[test]
fn uniform_black_is_small_and_exact() {
    // S2.
    let image = solid_image((0, 0, 0), (64, 64));
    let bytes = encode(&CompressParams::default(), &image, &Sequential).unwrap();
    assert!(bytes.len() < 200, "stream is {} bytes", bytes.len());
    let decoded = decode(&DecompressParams::default(), &bytes, &Sequential).unwrap();
    for c in 0..3 {
        for y in 0..64 {
            assert!(decoded.row(c, y).iter().all(|&v| v == 0), "plane {c} row {y}");
        }
    }
}

#[test]
fn byte_budget_is_respected() {
    // S3.
    let image = noise_image((256, 256), 1);
    let params = CompressParams {
        target_size: 4096,
        target_size_search_fast_mode: true,
        max_butteraugli_iters: 3,
        ..CompressParams::default()
    };
    let bytes = encode(&params, &image, &Sequential).unwrap();
    assert!(bytes.len() <= 4096, "stream is {} bytes", bytes.len());
    let decoded = decode(&DecompressParams::default(), &bytes, &ThreadPool::new(4)).unwrap();
    let diff = mean_abs_diff(&image, &decoded);
    assert!(diff.is_finite());
}

#[test]
fn truncated_stream_reports_truncation() {
    // S5.
    let image = gradient_image((24, 16));
    let bytes = encode(&CompressParams::default(), &image, &Sequential).unwrap();
    let truncated = &bytes[..bytes.len() - 1];
    let err = decode(&DecompressParams::default(), truncated, &Sequential).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Truncated);
}

#[test]
fn denoise_flag_without_filter_changes_nothing() {
    // S6, with the pluggable edge-preserving filter absent.
    let image = gradient_image((40, 40));
    let with_flag = CompressParams {
        butteraugli_distance: 1.5,
        denoise: Override::On,
        max_butteraugli_iters: 2,
        ..CompressParams::default()
    };
    let without_flag = CompressParams {
        butteraugli_distance: 1.5,
        denoise: Override::Off,
        max_butteraugli_iters: 2,
        ..CompressParams::default()
    };
    let decoded_on = decode(
        &DecompressParams::default(),
        &encode(&with_flag, &image, &Sequential).unwrap(),
        &Sequential,
    )
    .unwrap();
    let decoded_off = decode(
        &DecompressParams::default(),
        &encode(&without_flag, &image, &Sequential).unwrap(),
        &Sequential,
    )
    .unwrap();
    assert!(mean_abs_diff(&decoded_on, &decoded_off) <= 3.0);
}

#[test]
fn gradient_roundtrip_is_visually_close() {
    let image = gradient_image((48, 32));
    let params = CompressParams {
        butteraugli_distance: 1.0,
        max_butteraugli_iters: 3,
        ..CompressParams::default()
    };
    let bytes = encode(&params, &image, &Sequential).unwrap();
    let decoded = decode(&DecompressParams::default(), &bytes, &Sequential).unwrap();
    assert_eq!(decoded.size(), (48, 32));
    let diff = mean_abs_diff(&image, &decoded);
    assert!(diff < 12.0, "mean abs diff {diff}");
}

#[test]
fn larger_distance_does_not_grow_streams() {
    // Soft monotonicity over a handful of random images: the total size at
    // distance 3 must not exceed the total at distance 1.
    let mut total_tight = 0usize;
    let mut total_loose = 0usize;
    for seed in 0..5 {
        let image = noise_image((32, 32), seed);
        let tight = CompressParams {
            butteraugli_distance: 1.0,
            max_butteraugli_iters: 2,
            ..CompressParams::default()
        };
        let loose = CompressParams {
            butteraugli_distance: 3.0,
            max_butteraugli_iters: 2,
            ..CompressParams::default()
        };
        total_tight += encode(&tight, &image, &Sequential).unwrap().len();
        total_loose += encode(&loose, &image, &Sequential).unwrap().len();
    }
    assert!(
        total_loose <= total_tight,
        "distance 3 total {total_loose} vs distance 1 total {total_tight}"
    );
}

#[test]
fn high_quality_path_roundtrips() {
    // Distance below 1.0 selects the HQ template and the peak-driven search.
    let image = gradient_image((16, 16));
    let params = CompressParams {
        butteraugli_distance: 0.5,
        max_butteraugli_iters: 4,
        ..CompressParams::default()
    };
    let bytes = encode(&params, &image, &Sequential).unwrap();
    let decoded = decode(&DecompressParams::default(), &bytes, &Sequential).unwrap();
    let diff = mean_abs_diff(&image, &decoded);
    assert!(diff < 8.0, "mean abs diff {diff}");
}

#[test]
fn fast_mode_roundtrips() {
    let image = gradient_image((17, 9));
    let params = CompressParams {
        fast_mode: true,
        butteraugli_distance: 2.0,
        ..CompressParams::default()
    };
    let bytes = encode(&params, &image, &Sequential).unwrap();
    let decoded = decode(&DecompressParams::default(), &bytes, &Sequential).unwrap();
    assert_eq!(decoded.size(), (17, 9));
}

#[test]
fn threaded_and_sequential_decodes_agree() {
    let image = gradient_image((80, 72));
    let params = CompressParams {
        fast_mode: true,
        ..CompressParams::default()
    };
    let bytes = encode(&params, &image, &Sequential).unwrap();
    let a = decode(&DecompressParams::default(), &bytes, &Sequential).unwrap();
    let b = decode(&DecompressParams::default(), &bytes, &ThreadPool::new(3)).unwrap();
    for c in 0..3 {
        for y in 0..72 {
            assert_eq!(a.row(c, y), b.row(c, y));
        }
    }
}

#[test]
fn corrupt_byte_fails_cleanly() {
    let image = gradient_image((24, 24));
    let mut bytes = encode(&CompressParams::default(), &image, &Sequential).unwrap();
    // Flip bits in the middle of the entropy-coded payload; decoding must
    // either fail with a decode error or produce an image, never panic.
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xa5;
    let _ = decode(&DecompressParams::default(), &bytes, &Sequential);
}
