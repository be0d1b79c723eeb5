//! Collaborative filtering of one 3D group.
//!
//! A group holds, per channel, the 2D-transform coefficients of the `nSx`
//! matched patches. Filtering mixes the group along the candidate axis with a
//! Walsh-Hadamard transform, shrinks the mixed coefficients, unmixes, and
//! reports one aggregation weight per channel.

use crate::error::{try_zeroed, Result};
use crate::float_trait::Bm3dFloat;
use crate::hadamard;

/// BM3D filtering mode.
///
/// Determines whether to use hard thresholding (first pass) or Wiener filtering (second pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bm3dMode {
    /// Hard thresholding: zeroes coefficients below threshold.
    /// Used as the first pass to get an initial estimate.
    HardThreshold,
    /// Wiener filtering: applies an empirical Wiener filter using the basic estimate.
    /// Used as the second pass for refinement.
    Wiener,
}

/// Coefficients of one group, laid out `[channel][candidate][coefficient]`.
///
/// The buffer is sized for the largest group of the pass and reused; only the
/// first `n_sx` candidates of every channel are live.
pub struct Group3d<F: Bm3dFloat> {
    channels: usize,
    max_candidates: usize,
    coeffs: usize,
    n_sx: usize,
    data: Vec<F>,
}

impl<F: Bm3dFloat> Group3d<F> {
    pub fn new(channels: usize, max_candidates: usize, coeffs: usize) -> Result<Self> {
        Ok(Self {
            channels,
            max_candidates,
            coeffs,
            n_sx: 0,
            data: try_zeroed("3D group", channels * max_candidates * coeffs)?,
        })
    }

    /// Start a new group of `n_sx` candidates.
    pub fn reset(&mut self, n_sx: usize) {
        debug_assert!(n_sx >= 1 && n_sx <= self.max_candidates);
        self.n_sx = n_sx;
    }

    pub fn n_sx(&self) -> usize {
        self.n_sx
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Live coefficients of one channel (`n_sx * k*k` values).
    pub fn channel(&self, channel: usize) -> &[F] {
        let start = channel * self.max_candidates * self.coeffs;
        &self.data[start..start + self.n_sx * self.coeffs]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [F] {
        let start = channel * self.max_candidates * self.coeffs;
        &mut self.data[start..start + self.n_sx * self.coeffs]
    }

    /// Coefficients of candidate `index` in `channel`.
    pub fn patch_mut(&mut self, channel: usize, index: usize) -> &mut [F] {
        let start = (channel * self.max_candidates + index) * self.coeffs;
        &mut self.data[start..start + self.coeffs]
    }

    fn mix(&mut self, channel: usize) {
        let (n_sx, coeffs) = (self.n_sx, self.coeffs);
        hadamard::transform_group(self.channel_mut(channel), n_sx, coeffs);
    }

    fn unmix(&mut self, channel: usize) {
        let (n_sx, coeffs) = (self.n_sx, self.coeffs);
        hadamard::inverse_group(self.channel_mut(channel), n_sx, coeffs);
    }
}

/// Pass-1 shrinkage.
///
/// Zeroes every mixed coefficient with `|x| <= lambda * sigma_c * sqrt(nSx)`
/// and writes one aggregation weight per channel into `weights`:
/// `1 / (sigma_c^2 * survivors)`, or the standard-deviation weight when
/// `use_std_dev_weight` is set.
pub fn hard_threshold<F: Bm3dFloat>(
    group: &mut Group3d<F>,
    sigmas: &[F],
    lambda: F,
    use_std_dev_weight: bool,
    weights: &mut [F],
) {
    let n_sx = group.n_sx;
    let sqrt_n = F::usize_as(n_sx).sqrt();

    for c in 0..group.channels {
        group.mix(c);
        let threshold = lambda * sigmas[c] * sqrt_n;
        let mut survivors = 0usize;
        for v in group.channel_mut(c).iter_mut() {
            if v.abs() > threshold {
                survivors += 1;
            } else {
                *v = F::zero();
            }
        }
        group.unmix(c);

        weights[c] = if use_std_dev_weight {
            std_dev_weight(group.channel(c))
        } else {
            let denom = sigmas[c] * sigmas[c] * F::usize_as(survivors);
            if denom > F::zero() {
                F::one() / denom
            } else {
                F::one()
            }
        };
    }
}

/// Pass-2 shrinkage of `noisy` against the co-located `basic` group.
///
/// Each mixed coefficient is scaled by the empirical Wiener gain
/// `g = (b^2 / nSx) / (b^2 / nSx + sigma_c^2)` before unmixing. `basic` is
/// left in the mixed domain.
///
/// The weight written per channel is `1 / (sigma_c^2 * sum(g))` over the
/// group's gains, `1` when that product is zero, or the standard-deviation
/// weight when `use_std_dev_weight` is set.
pub fn wiener_filter<F: Bm3dFloat>(
    noisy: &mut Group3d<F>,
    basic: &mut Group3d<F>,
    sigmas: &[F],
    use_std_dev_weight: bool,
    weights: &mut [F],
) {
    debug_assert_eq!(noisy.n_sx, basic.n_sx);
    let n_sx = F::usize_as(noisy.n_sx);

    for c in 0..noisy.channels {
        noisy.mix(c);
        basic.mix(c);
        let sigma2 = sigmas[c] * sigmas[c];
        let mut gain_sum = F::zero();
        for (v, &b) in noisy.channel_mut(c).iter_mut().zip(basic.channel(c)) {
            let energy = b * b / n_sx;
            let total = energy + sigma2;
            let gain = if total > F::zero() {
                energy / total
            } else {
                F::zero()
            };
            *v *= gain;
            gain_sum += gain;
        }
        noisy.unmix(c);

        weights[c] = if use_std_dev_weight {
            std_dev_weight(noisy.channel(c))
        } else {
            let denom = sigma2 * gain_sum;
            if denom > F::zero() {
                F::one() / denom
            } else {
                F::one()
            }
        };
    }
}

/// `1 / std` of the filtered coefficients (Bessel-corrected), `0` when the
/// variance is not positive.
pub fn std_dev_weight<F: Bm3dFloat>(values: &[F]) -> F {
    let n = values.len();
    if n < 2 {
        return F::zero();
    }
    let (sum, sum_sq) = values
        .iter()
        .fold((F::zero(), F::zero()), |(s, q), &v| (s + v, q + v * v));
    let nf = F::usize_as(n);
    let variance = (sum_sq - sum * sum / nf) / (nf - F::one());
    if variance > F::zero() {
        F::one() / variance.sqrt()
    } else {
        F::zero()
    }
}
