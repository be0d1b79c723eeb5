//! Walsh-Hadamard transform along the candidate axis of a 3D group.
//!
//! The transform is the natural-order butterfly without normalization, so
//! applying it twice multiplies every element by `len`. [`inverse`] folds the
//! `1/len` back in.

use crate::float_trait::Bm3dFloat;

/// In-place Walsh-Hadamard transform of the `len` elements
/// `data[0], data[stride], ..., data[(len - 1) * stride]`.
///
/// `len` must be a power of two. A length of 1 is the identity.
pub fn transform<F: Bm3dFloat>(data: &mut [F], len: usize, stride: usize) {
    debug_assert!(len.is_power_of_two());
    debug_assert!(len == 0 || (len - 1) * stride < data.len());
    let mut half = 1;
    while half < len {
        let mut start = 0;
        while start < len {
            for i in start..start + half {
                let a = i * stride;
                let b = (i + half) * stride;
                let x = data[a];
                let y = data[b];
                data[a] = x + y;
                data[b] = x - y;
            }
            start += 2 * half;
        }
        half *= 2;
    }
}

/// Inverse of [`transform`]: the butterfly followed by a `1/len` scale.
pub fn inverse<F: Bm3dFloat>(data: &mut [F], len: usize, stride: usize) {
    transform(data, len, stride);
    let scale = F::one() / F::usize_as(len);
    for i in 0..len {
        data[i * stride] *= scale;
    }
}

/// Transform every coefficient column of a group laid out as
/// `[candidate][coefficient]` with `coeffs` entries per candidate.
pub fn transform_group<F: Bm3dFloat>(group: &mut [F], candidates: usize, coeffs: usize) {
    for offset in 0..coeffs {
        transform(&mut group[offset..], candidates, coeffs);
    }
}

/// Inverse of [`transform_group`].
pub fn inverse_group<F: Bm3dFloat>(group: &mut [F], candidates: usize, coeffs: usize) {
    for offset in 0..coeffs {
        inverse(&mut group[offset..], candidates, coeffs);
    }
}
