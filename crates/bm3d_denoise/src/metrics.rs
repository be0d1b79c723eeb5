//! Reconstruction quality measures.

use ndarray::ArrayView3;

use crate::error::Result;
use crate::float_trait::Bm3dFloat;
use crate::image::ensure_same_shape;

/// Root mean squared error between two images of the same shape.
///
/// Accumulates in `f64` so long sums of `f32` pixels stay accurate.
pub fn rmse<F: Bm3dFloat>(reference: ArrayView3<F>, estimate: ArrayView3<F>) -> Result<f64> {
    ensure_same_shape(reference, estimate)?;
    if reference.is_empty() {
        return Ok(0.0);
    }
    let sum_sq: f64 = reference
        .iter()
        .zip(estimate.iter())
        .map(|(&a, &b)| (a.as_f64() - b.as_f64()).powi(2))
        .sum();
    Ok((sum_sq / reference.len() as f64).sqrt())
}

/// Peak signal-to-noise ratio in dB for signals with range `[0, peak]`.
///
/// Identical images give `f64::INFINITY`.
pub fn psnr<F: Bm3dFloat>(
    reference: ArrayView3<F>,
    estimate: ArrayView3<F>,
    peak: f64,
) -> Result<f64> {
    let error = rmse(reference, estimate)?;
    if error == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(20.0 * (peak / error).log10())
}
