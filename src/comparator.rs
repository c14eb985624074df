// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Perceptual-distance collaborator of the rate-control search. The loop
//! only depends on this trait, so a full butteraugli implementation can be
//! plugged in without touching the search.

use crate::{
    error::Result,
    image::{Image, Image3},
    opsin::opsin_dynamics_image,
};

pub trait Comparator {
    /// Distance map between the reference and `candidate`, one value per
    /// pixel, calibrated so 1.0 is roughly one just-noticeable difference.
    fn compare(&mut self, candidate: &Image3<u8>) -> Result<Image<f32>>;

    /// Collapses a distance map to the scalar the search targets.
    fn score(&self, distmap: &Image<f32>) -> f32;
}

/// Per-channel just-noticeable differences in opsin space; X (red-green
/// opponency) is by far the most sensitive axis.
const CHANNEL_JND: [f32; 3] = [0.0011, 0.0030, 0.0085];

/// Built-in comparator: channel-weighted opsin-space error with a small
/// spatial pooling window. `hf_asymmetry` > 1 penalizes introduced energy
/// (ringing) more than lost detail.
pub struct OpsinDistanceComparator {
    reference: Image3<f32>,
    hf_asymmetry: f32,
}

impl OpsinDistanceComparator {
    pub fn new(reference: &Image3<u8>, hf_asymmetry: f32) -> Result<OpsinDistanceComparator> {
        Ok(OpsinDistanceComparator {
            reference: opsin_dynamics_image(reference)?,
            hf_asymmetry: hf_asymmetry.max(0.1),
        })
    }
}

impl Comparator for OpsinDistanceComparator {
    fn compare(&mut self, candidate: &Image3<u8>) -> Result<Image<f32>> {
        let candidate = opsin_dynamics_image(candidate)?;
        let (xsize, ysize) = self.reference.size();
        assert_eq!(candidate.size(), (xsize, ysize));
        let mut pointwise: Image<f32> = Image::new((xsize, ysize))?;
        for y in 0..ysize {
            let out = pointwise.row_mut(y);
            for (c, &jnd) in CHANNEL_JND.iter().enumerate() {
                let row_ref = self.reference.row(c, y);
                let row_cand = candidate.row(c, y);
                for x in 0..xsize {
                    let diff = (row_cand[x] - row_ref[x]) / jnd;
                    // Local contrast: energy the candidate adds hurts more
                    // than energy it loses.
                    let asym = if row_cand[x].abs() > row_ref[x].abs() {
                        self.hf_asymmetry
                    } else {
                        1.0
                    };
                    out[x] += diff * diff * asym;
                }
            }
        }
        // 3x3 pooling; a lone wrong pixel is less visible than a patch.
        let mut distmap = Image::new((xsize, ysize))?;
        for y in 0..ysize {
            let out = distmap.row_mut(y);
            for x in 0..xsize {
                let mut sum = 0.0f32;
                let mut weight = 0.0f32;
                for dy in -1i64..=1 {
                    let yy = (y as i64 + dy).clamp(0, ysize as i64 - 1) as usize;
                    for dx in -1i64..=1 {
                        let xx = (x as i64 + dx).clamp(0, xsize as i64 - 1) as usize;
                        let w = if dx == 0 && dy == 0 { 2.0 } else { 1.0 };
                        sum += w * pointwise.row(yy)[xx];
                        weight += w;
                    }
                }
                out[x] = (sum / weight).sqrt();
            }
        }
        Ok(distmap)
    }

    fn score(&self, distmap: &Image<f32>) -> f32 {
        let mut max = 0.0f32;
        for y in 0..distmap.ysize() {
            for &v in distmap.row(y) {
                max = max.max(v);
            }
        }
        max
    }
}
