//! Float trait abstraction for f32/f64 support.
//!
//! Every kernel in the crate is generic over this trait so that the same
//! denoiser runs in single precision (the usual case for 8/16-bit images)
//! or double precision (reference comparisons and tests).

use num_traits::{Float, FromPrimitive, NumAssign};
use rustfft::FftNum;
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for floating point types supported by the denoiser.
///
/// This trait combines all the bounds needed for BM3D operations:
/// - Basic float operations (Float, NumAssign)
/// - FFT compatibility (FftNum from rustfft, used by the DCT kernel)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug printing
pub trait Bm3dFloat:
    Float + FftNum + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// The constant sqrt(2) for this float type.
    const SQRT_TWO: Self;

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Widen to f64 for statistics and logging.
    fn as_f64(self) -> f64;
}

impl Bm3dFloat for f32 {
    const SQRT_TWO: Self = std::f32::consts::SQRT_2;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Bm3dFloat for f64 {
    const SQRT_TWO: Self = std::f64::consts::SQRT_2;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}
