//! Fixed linear colour transforms applied around the denoiser.
//!
//! Three-channel images are decorrelated before block matching so that the
//! first channel carries most of the structure; matching is then performed on
//! that channel only and the grouping is shared by all channels. The
//! transforms are plain 3x3 matrices without offsets, and the inverse is the
//! exact matrix inverse so a forward/inverse round trip is lossless up to
//! rounding.

use ndarray::{Array3, ArrayView3, Axis};

use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;
use crate::image::try_zeros;

/// Colour space the denoiser works in for three-channel input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// Channels are denoised as given.
    Rgb,
    /// Analog YUV (BT.601 luma).
    Yuv,
    /// YCbCr without the 128 chroma offset.
    YCbCr,
    /// Opponent colour space, the usual choice for colour BM3D.
    #[default]
    Opponent,
}

type Matrix3 = [[f64; 3]; 3];

const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

const YUV: Matrix3 = [
    [0.299, 0.587, 0.114],
    [-0.14713, -0.28886, 0.436],
    [0.615, -0.51498, -0.10001],
];

const YCBCR: Matrix3 = [
    [0.299, 0.587, 0.114],
    [-0.169, -0.331, 0.5],
    [0.5, -0.419, -0.081],
];

const OPPONENT: Matrix3 = [
    [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [0.5, 0.0, -0.5],
    [0.25, -0.5, 0.25],
];

impl ColorSpace {
    fn forward_matrix(self) -> Matrix3 {
        match self {
            ColorSpace::Rgb => IDENTITY,
            ColorSpace::Yuv => YUV,
            ColorSpace::YCbCr => YCBCR,
            ColorSpace::Opponent => OPPONENT,
        }
    }

    /// Per-channel noise standard deviation after the forward transform.
    ///
    /// For white noise of standard deviation `sigma` on every input channel,
    /// output channel `c` has standard deviation `sigma * ||row_c||`.
    /// Images that are not three-channel are never transformed, so every
    /// channel keeps `sigma`.
    pub fn channel_sigmas<F: Bm3dFloat>(self, sigma: F, channels: usize) -> Vec<F> {
        if channels != 3 {
            return vec![sigma; channels];
        }
        self.forward_matrix()
            .iter()
            .map(|row| {
                let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
                sigma * F::from_f64_c(norm)
            })
            .collect()
    }
}

fn invert(m: &Matrix3) -> Result<Matrix3> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return Err(Bm3dError::InvalidConfiguration(
            "colour transform matrix is singular".to_string(),
        ));
    }
    let inv_det = 1.0 / det;
    let mut inv = [[0.0; 3]; 3];
    for (r, inv_row) in inv.iter_mut().enumerate() {
        for (c, slot) in inv_row.iter_mut().enumerate() {
            // Adjugate: transpose of the cofactor matrix.
            let (r0, r1) = match c {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let (c0, c1) = match r {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let minor = m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
            let sign = if (r + c) % 2 == 0 { 1.0 } else { -1.0 };
            *slot = sign * minor * inv_det;
        }
    }
    Ok(inv)
}

fn apply_matrix<F: Bm3dFloat>(image: ArrayView3<F>, m: &Matrix3) -> Result<Array3<F>> {
    let dim = image.dim();
    let mut out = try_zeros::<F>("colour transformed image", dim)?;
    let coef: Vec<F> = m.iter().flatten().map(|&v| F::from_f64_c(v)).collect();
    let src = [
        image.index_axis(Axis(0), 0),
        image.index_axis(Axis(0), 1),
        image.index_axis(Axis(0), 2),
    ];
    for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
        let (a, b, d) = (coef[3 * c], coef[3 * c + 1], coef[3 * c + 2]);
        ndarray::Zip::from(&mut plane)
            .and(&src[0])
            .and(&src[1])
            .and(&src[2])
            .for_each(|o, &x, &y, &z| *o = a * x + b * y + d * z);
    }
    Ok(out)
}

/// Transform `image` into `space` (`forward == true`) or back to RGB.
///
/// Anything but a three-channel image is returned unchanged.
pub fn transform_color<F: Bm3dFloat>(
    image: ArrayView3<F>,
    space: ColorSpace,
    forward: bool,
) -> Result<Array3<F>> {
    let channels = image.dim().0;
    if channels != 3 || space == ColorSpace::Rgb {
        let mut out = try_zeros::<F>("colour transformed image", image.dim())?;
        out.assign(&image);
        return Ok(out);
    }
    let matrix = if forward {
        space.forward_matrix()
    } else {
        invert(&space.forward_matrix())?
    };
    apply_matrix(image, &matrix)
}
