use ndarray::{Array2, ArrayView2};
use rustfft::{num_complex::Complex, Fft};
use std::sync::Arc;

use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;

// =============================================================================
// Constants for Transform Operations
// =============================================================================

/// Patch sizes the denoiser accepts.
pub const SUPPORTED_PATCH_SIZES: [usize; 3] = [4, 8, 12];

/// Shape parameter of the Kaiser synthesis window.
const KAISER_BETA: f64 = 2.0;

/// Series terms used for the modified Bessel function I0.
const BESSEL_I0_TERMS: usize = 32;

/// 2D transform applied to every patch before collaborative filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformKind {
    /// Orthonormal DCT-II.
    #[default]
    Dct,
    /// CDF 5/3 biorthogonal wavelet (bior2.2), full Mallat decomposition.
    Bior,
}

/// 1D DCT-II / DCT-III kernels of length `k`, computed through a `2k` FFT of
/// the even extension of the signal.
struct DctKernel<F: Bm3dFloat> {
    forward: Arc<dyn Fft<F>>,
    inverse: Arc<dyn Fft<F>>,
    /// `exp(-i*pi*u / 2k)` for `u` in `0..k`.
    twiddles: Vec<Complex<F>>,
}

impl<F: Bm3dFloat> DctKernel<F> {
    fn new(k: usize) -> Self {
        let mut planner = rustfft::FftPlanner::new();
        let forward = planner.plan_fft_forward(2 * k);
        let inverse = planner.plan_fft_inverse(2 * k);
        let twiddles = (0..k)
            .map(|u| {
                let angle = -std::f64::consts::PI * u as f64 / (2 * k) as f64;
                Complex::new(F::from_f64_c(angle.cos()), F::from_f64_c(angle.sin()))
            })
            .collect();
        Self {
            forward,
            inverse,
            twiddles,
        }
    }

    fn scratch_len(&self) -> usize {
        self.forward
            .get_inplace_scratch_len()
            .max(self.inverse.get_inplace_scratch_len())
    }

    /// Unnormalized DCT-II: `y[u] = 2 * sum_n x[n] cos(pi (2n+1) u / 2k)`.
    fn forward_line(
        &self,
        line: &mut [F],
        spectrum: &mut [Complex<F>],
        fft_scratch: &mut [Complex<F>],
    ) {
        let k = line.len();
        for (n, &x) in line.iter().enumerate() {
            spectrum[n] = Complex::new(x, F::zero());
            spectrum[2 * k - 1 - n] = Complex::new(x, F::zero());
        }
        self.forward.process_with_scratch(spectrum, fft_scratch);
        for (u, out) in line.iter_mut().enumerate() {
            *out = (spectrum[u] * self.twiddles[u]).re;
        }
    }

    /// Unnormalized DCT-III: `x[n] = y[0] + 2 * sum_{u>0} y[u] cos(pi (2n+1) u / 2k)`.
    fn inverse_line(
        &self,
        line: &mut [F],
        spectrum: &mut [Complex<F>],
        fft_scratch: &mut [Complex<F>],
    ) {
        let k = line.len();
        for (u, &y) in line.iter().enumerate() {
            spectrum[u] = self.twiddles[u].conj() * y;
        }
        spectrum[k] = Complex::new(F::zero(), F::zero());
        for u in 1..k {
            spectrum[2 * k - u] = spectrum[u].conj();
        }
        self.inverse.process_with_scratch(spectrum, fft_scratch);
        for (n, out) in line.iter_mut().enumerate() {
            *out = spectrum[n].re;
        }
    }
}

/// Per-worker scratch space for [`PatchTransform`].
pub struct TransformScratch<F: Bm3dFloat> {
    line: Vec<F>,
    lifting: Vec<F>,
    spectrum: Vec<Complex<F>>,
    fft_scratch: Vec<Complex<F>>,
}

/// Forward/inverse 2D transform of one `k x k` patch.
///
/// Coefficients are stored row-major in a flat slice of length `k*k`. The
/// forward transform applies `coef_norm` so that the DCT variant is
/// orthonormal; the inverse applies `coef_norm_inv` and the global scale,
/// making `inverse(forward(x)) == x` up to rounding for both kinds.
pub struct PatchTransform<F: Bm3dFloat> {
    kind: TransformKind,
    patch_size: usize,
    coef_norm: Vec<F>,
    coef_norm_inv: Vec<F>,
    inverse_scale: F,
    dct: Option<DctKernel<F>>,
}

impl<F: Bm3dFloat> PatchTransform<F> {
    pub fn new(kind: TransformKind, patch_size: usize) -> Result<Self> {
        if !SUPPORTED_PATCH_SIZES.contains(&patch_size) {
            return Err(Bm3dError::InvalidConfiguration(format!(
                "patch_size must be one of {SUPPORTED_PATCH_SIZES:?}, got {patch_size}"
            )));
        }
        if kind == TransformKind::Bior && !patch_size.is_power_of_two() {
            return Err(Bm3dError::InvalidConfiguration(format!(
                "the biorthogonal transform needs a power-of-two patch_size, got {patch_size}"
            )));
        }

        let k = patch_size;
        let (coef_norm, coef_norm_inv, inverse_scale, dct) = match kind {
            TransformKind::Dct => {
                let inv_sqrt2 = F::one() / F::SQRT_TWO;
                let a = |i: usize| if i == 0 { inv_sqrt2 } else { F::one() };
                let b = |i: usize| if i == 0 { F::SQRT_TWO } else { F::one() };
                let two_k = F::usize_as(2 * k);
                let mut norm = Vec::with_capacity(k * k);
                let mut norm_inv = Vec::with_capacity(k * k);
                for i in 0..k {
                    for j in 0..k {
                        norm.push(a(i) * a(j) / two_k);
                        norm_inv.push(b(i) * b(j));
                    }
                }
                (norm, norm_inv, F::one() / two_k, Some(DctKernel::new(k)))
            }
            TransformKind::Bior => (vec![F::one(); k * k], vec![F::one(); k * k], F::one(), None),
        };

        Ok(Self {
            kind,
            patch_size,
            coef_norm,
            coef_norm_inv,
            inverse_scale,
            dct,
        })
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Number of coefficients per patch (`k*k`).
    pub fn coefficient_count(&self) -> usize {
        self.patch_size * self.patch_size
    }

    pub fn coef_norm(&self) -> &[F] {
        &self.coef_norm
    }

    pub fn coef_norm_inv(&self) -> &[F] {
        &self.coef_norm_inv
    }

    pub fn make_scratch(&self) -> TransformScratch<F> {
        let k = self.patch_size;
        let fft_len = self.dct.as_ref().map_or(0, |d| d.scratch_len());
        TransformScratch {
            line: vec![F::zero(); k],
            lifting: vec![F::zero(); k],
            spectrum: vec![Complex::new(F::zero(), F::zero()); 2 * k],
            fft_scratch: vec![Complex::new(F::zero(), F::zero()); fft_len],
        }
    }

    /// Transform `patch` into `out` (length `k*k`).
    pub fn forward(&self, patch: ArrayView2<F>, out: &mut [F], scratch: &mut TransformScratch<F>) {
        let k = self.patch_size;
        debug_assert_eq!(patch.dim(), (k, k));
        debug_assert_eq!(out.len(), k * k);
        for (dst, &src) in out.iter_mut().zip(patch.iter()) {
            *dst = src;
        }

        match self.kind {
            TransformKind::Dct => {
                if let Some(dct) = &self.dct {
                    let TransformScratch {
                        line,
                        spectrum,
                        fft_scratch,
                        ..
                    } = scratch;
                    for_each_line(out, k, k, line, |l| dct.forward_line(l, spectrum, fft_scratch));
                }
            }
            TransformKind::Bior => {
                let TransformScratch { line, lifting, .. } = scratch;
                let mut m = k;
                while m >= 2 && m % 2 == 0 {
                    for_each_line(out, k, m, line, |l| bior_forward_line(l, lifting));
                    m /= 2;
                }
            }
        }

        for (c, &n) in out.iter_mut().zip(self.coef_norm.iter()) {
            *c *= n;
        }
    }

    /// Invert one patch of coefficients in place.
    pub fn inverse(&self, coeffs: &mut [F], scratch: &mut TransformScratch<F>) {
        let k = self.patch_size;
        debug_assert_eq!(coeffs.len(), k * k);
        for (c, &n) in coeffs.iter_mut().zip(self.coef_norm_inv.iter()) {
            *c *= n;
        }

        match self.kind {
            TransformKind::Dct => {
                if let Some(dct) = &self.dct {
                    let TransformScratch {
                        line,
                        spectrum,
                        fft_scratch,
                        ..
                    } = scratch;
                    for_each_line(coeffs, k, k, line, |l| {
                        dct.inverse_line(l, spectrum, fft_scratch)
                    });
                }
            }
            TransformKind::Bior => {
                let TransformScratch { line, lifting, .. } = scratch;
                // Undo the levels from the coarsest block outwards.
                let mut m = 1;
                while m < k {
                    m *= 2;
                    for_each_line(coeffs, k, m, line, |l| bior_inverse_line(l, lifting));
                }
            }
        }

        if self.inverse_scale != F::one() {
            for c in coeffs.iter_mut() {
                *c *= self.inverse_scale;
            }
        }
    }

    /// Invert a contiguous batch of patches (`len` a multiple of `k*k`).
    pub fn inverse_batch(&self, batch: &mut [F], scratch: &mut TransformScratch<F>) {
        for coeffs in batch.chunks_exact_mut(self.coefficient_count()) {
            self.inverse(coeffs, scratch);
        }
    }
}

/// Apply `op` to every row and then every column of the top-left `m x m`
/// block of a row-major `k x k` buffer.
///
/// Both passes are separable and commute, so the same helper serves the
/// forward and the inverse transforms.
fn for_each_line<F: Bm3dFloat>(
    data: &mut [F],
    k: usize,
    m: usize,
    line: &mut [F],
    mut op: impl FnMut(&mut [F]),
) {
    let line = &mut line[..m];
    for r in 0..m {
        op(&mut data[r * k..r * k + m]);
    }
    for c in 0..m {
        for (r, v) in line.iter_mut().enumerate() {
            *v = data[r * k + c];
        }
        op(line);
        for (r, &v) in line.iter().enumerate() {
            data[r * k + c] = v;
        }
    }
}

/// One level of CDF 5/3 lifting on an even-length line, symmetric extension
/// at both ends. Output is `[approximation | detail]`.
fn bior_forward_line<F: Bm3dFloat>(line: &mut [F], tmp: &mut [F]) {
    let n = line.len();
    let half = n / 2;
    let half_f = F::from_f64_c(0.5);
    let quarter = F::from_f64_c(0.25);
    let (approx, detail) = tmp[..n].split_at_mut(half);

    for i in 0..half {
        let left = line[2 * i];
        let right = if 2 * i + 2 < n {
            line[2 * i + 2]
        } else {
            line[n - 2]
        };
        detail[i] = line[2 * i + 1] - half_f * (left + right);
    }
    for i in 0..half {
        let prev = if i == 0 { detail[0] } else { detail[i - 1] };
        approx[i] = line[2 * i] + quarter * (prev + detail[i]);
    }
    for a in approx.iter_mut() {
        *a *= F::SQRT_TWO;
    }
    for d in detail.iter_mut() {
        *d /= F::SQRT_TWO;
    }
    line.copy_from_slice(&tmp[..n]);
}

fn bior_inverse_line<F: Bm3dFloat>(line: &mut [F], tmp: &mut [F]) {
    let n = line.len();
    let half = n / 2;
    let half_f = F::from_f64_c(0.5);
    let quarter = F::from_f64_c(0.25);
    let out = &mut tmp[..n];

    let approx = |i: usize| line[i] / F::SQRT_TWO;
    let detail = |i: usize| line[half + i] * F::SQRT_TWO;

    for i in 0..half {
        let prev = if i == 0 { detail(0) } else { detail(i - 1) };
        out[2 * i] = approx(i) - quarter * (prev + detail(i));
    }
    for i in 0..half {
        let left = out[2 * i];
        let right = if 2 * i + 2 < n { out[2 * i + 2] } else { out[n - 2] };
        out[2 * i + 1] = detail(i) + half_f * (left + right);
    }
    line.copy_from_slice(out);
}

/// Modified Bessel function of the first kind, order zero.
fn bessel_i0(x: f64) -> f64 {
    let quarter_x2 = x * x / 4.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for m in 1..BESSEL_I0_TERMS {
        term *= quarter_x2 / (m * m) as f64;
        sum += term;
        if term < 1e-17 * sum {
            break;
        }
    }
    sum
}

fn kaiser_1d(len: usize, beta: f64) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    (0..len)
        .map(|n| {
            let t = 2.0 * n as f64 / (len - 1) as f64 - 1.0;
            bessel_i0(beta * (1.0 - t * t).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Synthesis window used by aggregation: a separable Kaiser window for
/// `k` in {8, 12} and a flat window otherwise.
pub fn window_coefficients<F: Bm3dFloat>(patch_size: usize) -> Array2<F> {
    match patch_size {
        8 | 12 => {
            let w = kaiser_1d(patch_size, KAISER_BETA);
            Array2::from_shape_fn((patch_size, patch_size), |(r, c)| {
                F::from_f64_c(w[r] * w[c])
            })
        }
        _ => Array2::from_elem((patch_size, patch_size), F::one()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    // Helper: Simple Linear Congruential Generator for deterministic "random" test data
    struct SimpleLcg {
        state: u64,
    }

    impl SimpleLcg {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_u64(&mut self) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            self.state
        }

        fn next_f64(&mut self) -> f64 {
            // [-1.0, 1.0)
            let u = self.next_u64();
            ((u >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    fn random_patch_f64(k: usize, seed: u64) -> Array2<f64> {
        let mut rng = SimpleLcg::new(seed);
        Array2::from_shape_fn((k, k), |_| 128.0 + 100.0 * rng.next_f64())
    }

    fn random_patch_f32(k: usize, seed: u64) -> Array2<f32> {
        random_patch_f64(k, seed).mapv(|v| v as f32)
    }

    fn roundtrip<F: Bm3dFloat>(t: &PatchTransform<F>, patch: &Array2<F>) -> Vec<F> {
        let mut scratch = t.make_scratch();
        let mut coeffs = vec![F::zero(); t.coefficient_count()];
        t.forward(patch.view(), &mut coeffs, &mut scratch);
        t.inverse(&mut coeffs, &mut scratch);
        coeffs
    }

    #[test]
    fn test_dct_roundtrip_all_sizes() {
        for &k in &SUPPORTED_PATCH_SIZES {
            let t = PatchTransform::<f64>::new(TransformKind::Dct, k).unwrap();
            for seed in [1, 42, 9001] {
                let patch = random_patch_f64(k, seed);
                let back = roundtrip(&t, &patch);
                for (a, b) in patch.iter().zip(back.iter()) {
                    assert!((a - b).abs() < 1e-9, "k={k}: {a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn test_dct_roundtrip_f32() {
        for &k in &SUPPORTED_PATCH_SIZES {
            let t = PatchTransform::<f32>::new(TransformKind::Dct, k).unwrap();
            let patch = random_patch_f32(k, 7);
            let back = roundtrip(&t, &patch);
            for (a, b) in patch.iter().zip(back.iter()) {
                assert!((a - b).abs() <= 1e-4 * a.abs().max(1.0), "k={k}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_dct_matches_direct_orthonormal_formula() {
        let k = 8;
        let t = PatchTransform::<f64>::new(TransformKind::Dct, k).unwrap();
        let patch = random_patch_f64(k, 3);
        let mut scratch = t.make_scratch();
        let mut coeffs = vec![0.0; k * k];
        t.forward(patch.view(), &mut coeffs, &mut scratch);

        let pi = std::f64::consts::PI;
        let scale = |u: usize| {
            if u == 0 {
                (1.0 / k as f64).sqrt()
            } else {
                (2.0 / k as f64).sqrt()
            }
        };
        for u in 0..k {
            for v in 0..k {
                let mut acc = 0.0;
                for r in 0..k {
                    for c in 0..k {
                        acc += patch[[r, c]]
                            * ((2 * r + 1) as f64 * u as f64 * pi / (2 * k) as f64).cos()
                            * ((2 * c + 1) as f64 * v as f64 * pi / (2 * k) as f64).cos();
                    }
                }
                let expected = scale(u) * scale(v) * acc;
                assert!(
                    (coeffs[u * k + v] - expected).abs() < 1e-8,
                    "({u},{v}): {} vs {expected}",
                    coeffs[u * k + v]
                );
            }
        }
    }

    #[test]
    fn test_dct_preserves_energy() {
        let t = PatchTransform::<f64>::new(TransformKind::Dct, 12).unwrap();
        let patch = random_patch_f64(12, 77);
        let mut scratch = t.make_scratch();
        let mut coeffs = vec![0.0; 144];
        t.forward(patch.view(), &mut coeffs, &mut scratch);
        let e_in: f64 = patch.iter().map(|v| v * v).sum();
        let e_out: f64 = coeffs.iter().map(|v| v * v).sum();
        assert!((e_in - e_out).abs() / e_in < 1e-12);
    }

    #[test]
    fn test_dct_constant_patch_is_pure_dc() {
        let t = PatchTransform::<f64>::new(TransformKind::Dct, 8).unwrap();
        let patch = Array2::from_elem((8, 8), 50.0);
        let mut scratch = t.make_scratch();
        let mut coeffs = vec![0.0; 64];
        t.forward(patch.view(), &mut coeffs, &mut scratch);
        assert!((coeffs[0] - 400.0).abs() < 1e-9);
        assert!(coeffs[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_dct_norm_tables_are_reciprocal_up_to_scale() {
        let k = 8;
        let t = PatchTransform::<f64>::new(TransformKind::Dct, k).unwrap();
        assert!((t.coef_norm_inv()[0] - 2.0).abs() < 1e-12);
        assert!((t.coef_norm_inv()[1] - 2f64.sqrt()).abs() < 1e-12);
        assert!((t.coef_norm_inv()[k + 1] - 1.0).abs() < 1e-12);
        for (n, ni) in t.coef_norm().iter().zip(t.coef_norm_inv()) {
            assert!((n * ni * (2 * k) as f64 - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bior_roundtrip() {
        for k in [4, 8] {
            let t = PatchTransform::<f64>::new(TransformKind::Bior, k).unwrap();
            for seed in [5, 6] {
                let patch = random_patch_f64(k, seed);
                let back = roundtrip(&t, &patch);
                for (a, b) in patch.iter().zip(back.iter()) {
                    assert!((a - b).abs() < 1e-9, "k={k}: {a} vs {b}");
                }
            }
            let t32 = PatchTransform::<f32>::new(TransformKind::Bior, k).unwrap();
            let patch = random_patch_f32(k, 11);
            let back = roundtrip(&t32, &patch);
            for (a, b) in patch.iter().zip(back.iter()) {
                assert!((a - b).abs() <= 1e-4 * a.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_bior_constant_patch_has_no_detail() {
        let t = PatchTransform::<f64>::new(TransformKind::Bior, 8).unwrap();
        let patch = Array2::from_elem((8, 8), 10.0);
        let mut scratch = t.make_scratch();
        let mut coeffs = vec![0.0; 64];
        t.forward(patch.view(), &mut coeffs, &mut scratch);
        assert!(coeffs[0].abs() > 1.0);
        assert!(coeffs[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_rejects_unsupported_sizes() {
        assert!(matches!(
            PatchTransform::<f32>::new(TransformKind::Dct, 6),
            Err(Bm3dError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PatchTransform::<f32>::new(TransformKind::Bior, 12),
            Err(Bm3dError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_inverse_batch_handles_every_patch() {
        let t = PatchTransform::<f64>::new(TransformKind::Dct, 4).unwrap();
        let mut scratch = t.make_scratch();
        let patches = [random_patch_f64(4, 1), random_patch_f64(4, 2), random_patch_f64(4, 3)];
        let mut batch = vec![0.0; 3 * 16];
        for (p, chunk) in patches.iter().zip(batch.chunks_exact_mut(16)) {
            t.forward(p.view(), chunk, &mut scratch);
        }
        t.inverse_batch(&mut batch, &mut scratch);
        for (p, chunk) in patches.iter().zip(batch.chunks_exact(16)) {
            for (a, b) in p.iter().zip(chunk.iter()) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_kaiser_window_k8_table() {
        let w = window_coefficients::<f64>(8);
        assert!((w[[0, 0]] - 0.1924).abs() < 1e-4);
        assert!((w[[0, 3]] - 0.4325).abs() < 1e-4);
        assert!((w[[3, 3]] - 0.9718).abs() < 1e-4);
        for r in 0..8 {
            for c in 0..8 {
                assert!((w[[r, c]] - w[[c, r]]).abs() < 1e-15);
                assert!((w[[r, c]] - w[[7 - r, 7 - c]]).abs() < 1e-15);
                assert!(w[[r, c]] > 0.0);
            }
        }
    }

    #[test]
    fn test_window_flat_for_small_patches() {
        let w = window_coefficients::<f32>(4);
        assert!(w.iter().all(|&v| v == 1.0));
        let w12 = window_coefficients::<f32>(12);
        assert!(w12[[0, 0]] < w12[[6, 6]]);
    }
}
