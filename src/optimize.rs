// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Scaled conjugate-gradient minimizer used by the noise-parameter fit.

pub trait LossFunction {
    /// Returns the loss at `w` and writes the gradient into `grad`.
    fn compute(&self, w: &[f64], grad: &mut [f64]) -> f64;
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Minimizes `loss` starting from `w0`. Conjugate directions are refreshed
/// with the Polak-Ribiere factor; step sizes come from a backtracking line
/// search scaled by the previous accepted step.
pub fn scaled_conjugate_gradient(
    loss: &dyn LossFunction,
    w0: &[f64],
    precision: f64,
    max_iters: usize,
) -> Vec<f64> {
    let dim = w0.len();
    let mut w = w0.to_vec();
    let mut grad = vec![0.0; dim];
    let mut value = loss.compute(&w, &mut grad);
    let mut direction: Vec<f64> = grad.iter().map(|g| -g).collect();
    let mut prev_grad = grad.clone();
    let mut step_scale = 1.0f64;

    for _ in 0..max_iters {
        let grad_norm = dot(&grad, &grad);
        if grad_norm < precision {
            break;
        }
        // Backtracking line search along `direction`.
        let mut step = step_scale;
        let mut accepted = None;
        let mut candidate = vec![0.0; dim];
        let mut candidate_grad = vec![0.0; dim];
        for _ in 0..32 {
            for i in 0..dim {
                candidate[i] = w[i] + step * direction[i];
            }
            let candidate_value = loss.compute(&candidate, &mut candidate_grad);
            if candidate_value < value {
                accepted = Some(candidate_value);
                break;
            }
            step *= 0.5;
        }
        let Some(candidate_value) = accepted else {
            // The direction is exhausted; restart along the gradient once,
            // then give up.
            if direction.iter().zip(&grad).any(|(d, g)| *d != -*g) {
                direction = grad.iter().map(|g| -g).collect();
                step_scale = 1.0;
                continue;
            }
            break;
        };
        w.copy_from_slice(&candidate);
        value = candidate_value;
        prev_grad.copy_from_slice(&grad);
        grad.copy_from_slice(&candidate_grad);
        step_scale = (step * 2.0).min(4.0);
        if value.abs() < precision {
            break;
        }
        // Polak-Ribiere update.
        let denom = dot(&prev_grad, &prev_grad);
        let beta = if denom > 0.0 {
            let diff: Vec<f64> = grad.iter().zip(&prev_grad).map(|(g, p)| g - p).collect();
            (dot(&grad, &diff) / denom).max(0.0)
        } else {
            0.0
        };
        for i in 0..dim {
            direction[i] = -grad[i] + beta * direction[i];
        }
    }
    w
}
