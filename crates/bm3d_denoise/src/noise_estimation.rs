use crate::float_trait::Bm3dFloat;
use ndarray::{ArrayView2, ArrayView3, Axis};
use std::cmp::Ordering;

/// Median of |N(0, 1)|, the MAD-to-sigma scale of Gaussian noise.
const GAUSSIAN_MAD: f64 = 0.6745;

/// Estimate the standard deviation of additive white noise in one plane.
///
/// Uses Donoho's rule on the finest diagonal detail band of an orthonormal
/// Haar decomposition: `sigma = median(|HH|) / 0.6745`. Piecewise smooth
/// content barely reaches the HH band, so the estimate is dominated by noise.
/// Returns zero for planes smaller than 2x2.
pub fn estimate_noise_sigma<F: Bm3dFloat>(plane: ArrayView2<F>) -> F {
    let (rows, cols) = plane.dim();
    let (half_rows, half_cols) = (rows / 2, cols / 2);
    if half_rows == 0 || half_cols == 0 {
        return F::zero();
    }

    let half = F::from_f64_c(0.5);
    let mut detail = Vec::with_capacity(half_rows * half_cols);
    for r in (0..2 * half_rows).step_by(2) {
        for c in (0..2 * half_cols).step_by(2) {
            let hh = (plane[[r, c]] - plane[[r, c + 1]] - plane[[r + 1, c]]
                + plane[[r + 1, c + 1]])
                * half;
            detail.push(hh.abs());
        }
    }

    median_of_slice(&mut detail) / F::from_f64_c(GAUSSIAN_MAD)
}

/// Noise estimate for a multi-channel image: the largest per-channel estimate.
pub fn estimate_noise_sigma_per_channel<F: Bm3dFloat>(image: ArrayView3<F>) -> F {
    image
        .axis_iter(Axis(0))
        .map(estimate_noise_sigma)
        .fold(F::zero(), |a, b| if b > a { b } else { a })
}

fn median_of_slice<F: Bm3dFloat>(data: &mut [F]) -> F {
    let len = data.len();
    if len == 0 {
        return F::zero();
    }
    let mid = len / 2;
    let (left, &mut median, _) = data.select_nth_unstable_by(mid, |a, b| {
        a.partial_cmp(b).unwrap_or(Ordering::Equal)
    });

    if len % 2 == 1 {
        median
    } else {
        // Everything left of `mid` is <= the selected element.
        let below = left
            .iter()
            .fold(F::neg_infinity(), |a, &b| if b > a { b } else { a });
        (below + median) * F::from_f64_c(0.5)
    }
}
