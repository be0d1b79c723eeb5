//! Error type shared by every fallible stage of the denoiser.

use thiserror::Error;

/// Errors that abort a denoising run.
///
/// A pass never continues with partially allocated or partially filled
/// buffers: any of these propagates straight to the caller of
/// [`crate::denoise`].
#[derive(Debug, Error)]
pub enum Bm3dError {
    /// A working buffer could not be reserved.
    #[error("failed to allocate {what} ({elements} elements)")]
    Allocation { what: &'static str, elements: usize },

    /// A configuration value is outside the supported domain.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The image cannot hold a single patch.
    #[error("image of {rows}x{cols} pixels is smaller than one {patch_size}x{patch_size} patch")]
    DegenerateImage {
        rows: usize,
        cols: usize,
        patch_size: usize,
    },

    /// Two images that must be co-located have different shapes.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
}

pub type Result<T> = std::result::Result<T, Bm3dError>;

/// Reserve a zero-filled vector, reporting allocation failure instead of aborting.
pub(crate) fn try_zeroed<T: Clone + num_traits::Zero>(
    what: &'static str,
    elements: usize,
) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| Bm3dError::Allocation { what, elements })?;
    buf.resize(elements, T::zero());
    Ok(buf)
}

/// Reserve an empty vector that can take `elements` pushes without reallocating.
pub(crate) fn try_with_capacity<T>(what: &'static str, elements: usize) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| Bm3dError::Allocation { what, elements })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_zeroed_len_and_contents() {
        let buf: Vec<f32> = try_zeroed("test buffer", 17).unwrap();
        assert_eq!(buf.len(), 17);
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_try_zeroed_reports_impossible_request() {
        let err = try_zeroed::<f64>("huge buffer", usize::MAX / 4).unwrap_err();
        match err {
            Bm3dError::Allocation { what, elements } => {
                assert_eq!(what, "huge buffer");
                assert_eq!(elements, usize::MAX / 4);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_try_with_capacity() {
        let buf: Vec<u64> = try_with_capacity("test list", 9).unwrap();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 9);
        let err = try_with_capacity::<u64>("huge list", usize::MAX / 4).unwrap_err();
        assert!(matches!(
            err,
            Bm3dError::Allocation {
                what: "huge list",
                ..
            }
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = Bm3dError::DegenerateImage {
            rows: 3,
            cols: 5,
            patch_size: 8,
        };
        assert_eq!(
            err.to_string(),
            "image of 3x5 pixels is smaller than one 8x8 patch"
        );
        let err = Bm3dError::InvalidConfiguration("patch_size must be 4, 8 or 12".into());
        assert!(err.to_string().contains("patch_size"));
    }
}
