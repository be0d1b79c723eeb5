//! Plane buffers and symmetric border handling.
//!
//! Images are `(channel, row, col)` arrays. Block matching and the
//! sliding patch transforms need every patch inside the search window to be
//! addressable, so each pass works on a copy of the image surrounded by a
//! mirrored border and strips it again once aggregation is done.

use ndarray::{s, Array3, ArrayView3};

use crate::error::{try_zeroed, Bm3dError, Result};
use crate::float_trait::Bm3dFloat;

/// Allocate a zero-filled `(channels, rows, cols)` buffer.
pub fn try_zeros<F: Bm3dFloat>(
    what: &'static str,
    shape: (usize, usize, usize),
) -> Result<Array3<F>> {
    let len = shape
        .0
        .checked_mul(shape.1)
        .and_then(|v| v.checked_mul(shape.2))
        .ok_or(Bm3dError::Allocation {
            what,
            elements: usize::MAX,
        })?;
    let data = try_zeroed::<F>(what, len)?;
    Array3::from_shape_vec(shape, data)
        .map_err(|e| Bm3dError::InvalidConfiguration(format!("{what}: {e}")))
}

/// Map a possibly out-of-range coordinate onto `[0, len)` by half-sample
/// symmetric reflection (`... b a | a b c ... | c b ...`).
///
/// The reflection is periodic with period `2 * len`, so borders wider than
/// the image itself are still defined.
#[inline]
pub fn reflect_index(i: isize, len: usize) -> usize {
    debug_assert!(len > 0);
    let period = 2 * len as isize;
    let m = i.rem_euclid(period) as usize;
    if m < len {
        m
    } else {
        2 * len - 1 - m
    }
}

/// Surround every plane with a mirrored border of `border` pixels.
pub fn mirror_pad<F: Bm3dFloat>(image: ArrayView3<F>, border: usize) -> Result<Array3<F>> {
    let (channels, rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Err(Bm3dError::DegenerateImage {
            rows,
            cols,
            patch_size: 1,
        });
    }
    let padded_rows = rows + 2 * border;
    let padded_cols = cols + 2 * border;
    let mut padded = try_zeros::<F>("padded image", (channels, padded_rows, padded_cols))?;

    // Column lookup is shared by every row.
    let col_src: Vec<usize> = (0..padded_cols)
        .map(|pc| reflect_index(pc as isize - border as isize, cols))
        .collect();

    for c in 0..channels {
        for pr in 0..padded_rows {
            let sr = reflect_index(pr as isize - border as isize, rows);
            let src_row = image.slice(s![c, sr, ..]);
            let mut dst_row = padded.slice_mut(s![c, pr, ..]);
            for (dst, &sc) in dst_row.iter_mut().zip(col_src.iter()) {
                *dst = src_row[sc];
            }
        }
    }
    Ok(padded)
}

/// Remove a border previously added by [`mirror_pad`].
pub fn strip_border<F: Bm3dFloat>(padded: ArrayView3<F>, border: usize) -> Result<Array3<F>> {
    let (channels, rows, cols) = padded.dim();
    if rows < 2 * border || cols < 2 * border {
        return Err(Bm3dError::DegenerateImage {
            rows,
            cols,
            patch_size: 2 * border,
        });
    }
    let inner = (channels, rows - 2 * border, cols - 2 * border);
    let mut out = try_zeros::<F>("unpadded image", inner)?;
    out.assign(&padded.slice(s![.., border..rows - border, border..cols - border]));
    Ok(out)
}

/// Fail unless `actual` has the same shape as `expected`.
pub fn ensure_same_shape<F>(expected: ArrayView3<F>, actual: ArrayView3<F>) -> Result<()> {
    if expected.dim() != actual.dim() {
        return Err(Bm3dError::ShapeMismatch {
            expected: expected.dim(),
            actual: actual.dim(),
        });
    }
    Ok(())
}
