//! Two-pass BM3D denoising driver.
//!
//! `denoise` runs the complete pipeline on a `(channel, row, col)` image:
//! - colour decorrelation and per-channel noise levels
//! - pass 1: block matching on the noisy image + hard thresholding
//! - pass 2: block matching on the basic estimate + empirical Wiener shrinkage
//! - inverse colour transform of both estimates
//!
//! Each pass pads its input by its own search half-window, so the two passes
//! may use different window and patch sizes.

use ndarray::{Array3, ArrayView3};
use tracing::info;

use crate::color::{transform_color, ColorSpace};
use crate::error::{Bm3dError, Result};
use crate::filtering::Bm3dMode;
use crate::float_trait::Bm3dFloat;
use crate::image::mirror_pad;
use crate::pipeline::{run_pass, PassContext, PassStats};
use crate::transforms::{TransformKind, SUPPORTED_PATCH_SIZES};

// =============================================================================
// Constants
// =============================================================================

/// Default patch size of both passes.
const DEFAULT_PATCH_SIZE: usize = 8;

/// Patch size used with the DCT for heavy noise.
const LARGE_PATCH_SIZE: usize = 12;

/// Noise level from which the DCT switches to `LARGE_PATCH_SIZE`.
const LARGE_PATCH_SIGMA: f64 = 40.0;

/// Default search half-window of both passes.
const DEFAULT_SEARCH_HALF_WINDOW: usize = 16;

/// Default reference grid step of both passes.
const DEFAULT_REFERENCE_STEP: usize = 3;

/// Maximum group sizes.
const DEFAULT_MAX_CANDIDATES_HARD: usize = 16;
const DEFAULT_MAX_CANDIDATES_WIENER: usize = 32;

/// Noise level from which the looser similarity thresholds apply.
const HIGH_NOISE_SIGMA: f64 = 35.0;

/// Similarity thresholds (mean squared difference per pixel).
const TAU_HARD_LOW_NOISE: f64 = 2500.0;
const TAU_HARD_HIGH_NOISE: f64 = 5000.0;
const TAU_WIENER_LOW_NOISE: f64 = 400.0;
const TAU_WIENER_HIGH_NOISE: f64 = 3500.0;

/// Single-channel images match on noisier data than a decorrelated luma plane.
const SINGLE_CHANNEL_TAU_FACTOR: f64 = 3.0;

/// Hard threshold multiplier.
const DEFAULT_LAMBDA_HARD: f64 = 2.7;

/// Largest supported channel count.
const MAX_CHANNELS: usize = 4;

// =============================================================================
// Configuration
// =============================================================================

/// Parameters of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassConfig<F: Bm3dFloat> {
    /// Patch side `k`. One of 4, 8 or 12.
    pub patch_size: usize,
    /// Search half-window `n`: candidates lie within `n` pixels of the reference.
    pub search_half_window: usize,
    /// Largest group size. Must be a power of two.
    pub max_candidates: usize,
    /// Spacing `p` of the reference grid, `1..=k`.
    pub reference_step: usize,
    /// Match threshold `tau` as a mean squared difference per pixel.
    pub similarity_threshold: F,
    /// Weight groups by `1/std` of their filtered coefficients instead of
    /// the survivor count (pass 1) or Wiener energy (pass 2).
    pub use_std_dev_weight: bool,
}

impl<F: Bm3dFloat> PassConfig<F> {
    /// Published pass-1 parameters for low noise.
    pub fn hard_default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            search_half_window: DEFAULT_SEARCH_HALF_WINDOW,
            max_candidates: DEFAULT_MAX_CANDIDATES_HARD,
            reference_step: DEFAULT_REFERENCE_STEP,
            similarity_threshold: F::from_f64_c(TAU_HARD_LOW_NOISE),
            use_std_dev_weight: false,
        }
    }

    /// Published pass-2 parameters for low noise.
    pub fn wiener_default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            search_half_window: DEFAULT_SEARCH_HALF_WINDOW,
            max_candidates: DEFAULT_MAX_CANDIDATES_WIENER,
            reference_step: DEFAULT_REFERENCE_STEP,
            similarity_threshold: F::from_f64_c(TAU_WIENER_LOW_NOISE),
            use_std_dev_weight: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let k = self.patch_size;
        if !SUPPORTED_PATCH_SIZES.contains(&k) {
            return Err(invalid(format!(
                "patch_size must be one of {SUPPORTED_PATCH_SIZES:?}, got {k}"
            )));
        }
        if !self.max_candidates.is_power_of_two() {
            return Err(invalid(format!(
                "max_candidates must be a non-zero power of two, got {}",
                self.max_candidates
            )));
        }
        if self.reference_step == 0 || self.reference_step > k {
            return Err(invalid(format!(
                "reference_step must be in 1..={k}, got {}",
                self.reference_step
            )));
        }
        if self.search_half_window < k / 2 {
            return Err(invalid(format!(
                "search_half_window must be >= {}, got {}",
                k / 2,
                self.search_half_window
            )));
        }
        if self.similarity_threshold.is_nan() || self.similarity_threshold < F::zero() {
            return Err(invalid("similarity_threshold must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Configuration of a two-pass run.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm3dConfig<F: Bm3dFloat> {
    pub hard: PassConfig<F>,
    pub wiener: PassConfig<F>,
    /// 2D patch transform used by both passes. Default: DCT
    pub transform: TransformKind,
    /// Hard threshold multiplier `lambda`. Default: 2.7
    pub lambda_hard: F,
    /// Colour space for three-channel images. Default: opponent
    pub color_space: ColorSpace,
}

impl<F: Bm3dFloat> Default for Bm3dConfig<F> {
    fn default() -> Self {
        Self {
            hard: PassConfig::hard_default(),
            wiener: PassConfig::wiener_default(),
            transform: TransformKind::default(),
            lambda_hard: F::from_f64_c(DEFAULT_LAMBDA_HARD),
            color_space: ColorSpace::default(),
        }
    }
}

impl<F: Bm3dFloat> Bm3dConfig<F> {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Published parameters for noise level `sigma`.
    pub fn for_sigma(sigma: F, channels: usize, transform: TransformKind) -> Self {
        let sigma = sigma.as_f64();
        let mut config = Self {
            transform,
            ..Self::default()
        };

        if transform == TransformKind::Dct && sigma >= LARGE_PATCH_SIGMA {
            config.hard.patch_size = LARGE_PATCH_SIZE;
            config.wiener.patch_size = LARGE_PATCH_SIZE;
        }

        let (tau_hard, tau_wiener) = if sigma < HIGH_NOISE_SIGMA {
            (TAU_HARD_LOW_NOISE, TAU_WIENER_LOW_NOISE)
        } else {
            (TAU_HARD_HIGH_NOISE, TAU_WIENER_HIGH_NOISE)
        };
        let factor = if channels == 1 {
            SINGLE_CHANNEL_TAU_FACTOR
        } else {
            1.0
        };
        config.hard.similarity_threshold = F::from_f64_c(tau_hard * factor);
        config.wiener.similarity_threshold = F::from_f64_c(tau_wiener);
        config
    }

    /// Check both passes and the settings shared by them for an image with
    /// `channels` channels.
    pub fn validate(&self, channels: usize) -> Result<()> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(invalid(format!(
                "channel count must be in 1..={MAX_CHANNELS}, got {channels}"
            )));
        }
        self.hard.validate()?;
        self.wiener.validate()?;
        if self.transform == TransformKind::Bior {
            for k in [self.hard.patch_size, self.wiener.patch_size] {
                if !k.is_power_of_two() {
                    return Err(invalid(format!(
                        "the biorthogonal transform needs a power-of-two patch size, got {k}"
                    )));
                }
            }
        }
        if self.lambda_hard.is_nan() || self.lambda_hard < F::zero() {
            return Err(invalid("lambda_hard must be >= 0".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> Bm3dError {
    Bm3dError::InvalidConfiguration(message)
}

// =============================================================================
// Results
// =============================================================================

/// Statistics of both passes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineStats {
    pub hard: PassStats,
    pub wiener: PassStats,
}

/// Output of [`denoise`].
#[derive(Debug, Clone)]
pub struct Bm3dOutput<F: Bm3dFloat> {
    /// Hard-thresholding estimate, used as the oracle of pass 2.
    pub basic: Array3<F>,
    pub final_estimate: Array3<F>,
    pub stats: PipelineStats,
}

// =============================================================================
// Entry Points
// =============================================================================

/// Colour-transformed image and per-channel noise levels.
fn prepare<F: Bm3dFloat>(
    image: ArrayView3<F>,
    sigma: F,
    config: &Bm3dConfig<F>,
) -> Result<(Array3<F>, Vec<F>)> {
    let (channels, rows, cols) = image.dim();
    config.validate(channels)?;
    if !sigma.is_finite() || sigma < F::zero() {
        return Err(invalid(format!(
            "sigma must be finite and >= 0, got {}",
            sigma.as_f64()
        )));
    }
    let k = config.hard.patch_size.max(config.wiener.patch_size);
    if rows < k || cols < k {
        return Err(Bm3dError::DegenerateImage {
            rows,
            cols,
            patch_size: k,
        });
    }

    let sigmas = config.color_space.channel_sigmas(sigma, channels);
    info!(
        channels,
        rows,
        cols,
        sigmas = ?sigmas.iter().map(|s| s.as_f64()).collect::<Vec<_>>(),
        color_space = ?config.color_space,
        "estimated channel noise levels"
    );
    let transformed = transform_color(image, config.color_space, true)?;
    Ok((transformed, sigmas))
}

fn hard_pass<F: Bm3dFloat>(
    noisy: ArrayView3<F>,
    sigmas: &[F],
    config: &Bm3dConfig<F>,
) -> Result<(Array3<F>, PassStats)> {
    let border = config.hard.search_half_window;
    info!(border, patch_size = config.hard.patch_size, "pass 1 (hard threshold) started");
    let padded = mirror_pad(noisy, border)?;
    let result = run_pass(&PassContext {
        mode: Bm3dMode::HardThreshold,
        noisy: padded.view(),
        basic: None,
        border,
        sigmas,
        pass: &config.hard,
        transform: config.transform,
        lambda_hard: config.lambda_hard,
    })?;
    info!(
        reference_patches = result.1.reference_patches,
        "pass 1 (hard threshold) finished"
    );
    Ok(result)
}

fn wiener_pass<F: Bm3dFloat>(
    noisy: ArrayView3<F>,
    basic: ArrayView3<F>,
    sigmas: &[F],
    config: &Bm3dConfig<F>,
) -> Result<(Array3<F>, PassStats)> {
    let border = config.wiener.search_half_window;
    info!(border, patch_size = config.wiener.patch_size, "pass 2 (Wiener) started");
    let padded_noisy = mirror_pad(noisy, border)?;
    let padded_basic = mirror_pad(basic, border)?;
    let result = run_pass(&PassContext {
        mode: Bm3dMode::Wiener,
        noisy: padded_noisy.view(),
        basic: Some(padded_basic.view()),
        border,
        sigmas,
        pass: &config.wiener,
        transform: config.transform,
        lambda_hard: config.lambda_hard,
    })?;
    info!(
        reference_patches = result.1.reference_patches,
        "pass 2 (Wiener) finished"
    );
    Ok(result)
}

/// Denoise `image` corrupted by white noise of standard deviation `sigma`.
///
/// Returns the basic (pass 1) and final (pass 2) estimates in the colour
/// space of the input.
///
/// # Errors
/// `InvalidConfiguration` for out-of-range parameters, `DegenerateImage`
/// when the image cannot hold a patch, `Allocation` when a working buffer
/// cannot be reserved. No partial result is returned.
pub fn denoise<F: Bm3dFloat>(
    image: ArrayView3<F>,
    sigma: F,
    config: &Bm3dConfig<F>,
) -> Result<Bm3dOutput<F>> {
    let (noisy, sigmas) = prepare(image, sigma, config)?;
    let (basic, hard_stats) = hard_pass(noisy.view(), &sigmas, config)?;
    let (final_estimate, wiener_stats) = wiener_pass(noisy.view(), basic.view(), &sigmas, config)?;
    drop(noisy);

    let output = Bm3dOutput {
        basic: transform_color(basic.view(), config.color_space, false)?,
        final_estimate: transform_color(final_estimate.view(), config.color_space, false)?,
        stats: PipelineStats {
            hard: hard_stats,
            wiener: wiener_stats,
        },
    };
    info!("denoising done");
    Ok(output)
}

/// Run pass 1 only and return the basic estimate.
pub fn denoise_basic<F: Bm3dFloat>(
    image: ArrayView3<F>,
    sigma: F,
    config: &Bm3dConfig<F>,
) -> Result<(Array3<F>, PassStats)> {
    let (noisy, sigmas) = prepare(image, sigma, config)?;
    let (basic, stats) = hard_pass(noisy.view(), &sigmas, config)?;
    let basic = transform_color(basic.view(), config.color_space, false)?;
    info!("basic estimate done");
    Ok((basic, stats))
}
