// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;
use std::ops::Sub;

/// Fails unless `a` and `b` are within `tolerance` of each other. NaN in
/// any position is an ordering failure and therefore a test failure.
pub fn check_near<T>(a: T, b: T, tolerance: T, what: &str)
where
    T: PartialOrd + Sub<Output = T> + Copy + Debug,
{
    let delta = if a > b { a - b } else { b - a };
    let within = matches!(
        delta.partial_cmp(&tolerance),
        Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
    );
    assert!(
        within,
        "{what}: {a:?} and {b:?} differ by {delta:?}, tolerance {tolerance:?}"
    );
}

macro_rules! assert_almost_eq {
    ($a:expr, $b:expr, $tolerance:expr $(,)?) => {
        $crate::util::test::check_near(
            $a,
            $b,
            $tolerance,
            concat!(stringify!($a), " vs ", stringify!($b)),
        )
    };
}
pub(crate) use assert_almost_eq;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_tolerance_passes() {
        assert_almost_eq!(1.0f32, 1.05, 0.1);
        assert_almost_eq!(-3.0f64, -3.0, 0.0);
        assert_almost_eq!(7u32, 9, 2);
    }

    #[test]
    #[should_panic]
    fn outside_tolerance_fails() {
        assert_almost_eq!(1.0f32, 2.0, 0.5);
    }

    #[test]
    #[should_panic]
    fn nan_fails() {
        assert_almost_eq!(f32::NAN, 0.0, 1.0);
    }
}
