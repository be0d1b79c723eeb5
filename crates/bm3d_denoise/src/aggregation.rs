//! Weighted overlap-add of filtered groups.
//!
//! Every filtered patch is scattered back to its position with
//! `numerator += window * weight * value` and `denominator += window * weight`.
//! Workers accumulate into private row bands which are summed into the full
//! padded plane before the final division.

use ndarray::{s, Array2, Array3, ArrayView3, Axis};

use crate::block_matching::PatchMatch;
use crate::error::Result;
use crate::filtering::Group3d;
use crate::float_trait::Bm3dFloat;
use crate::image::try_zeros;

/// Numerator/denominator planes for padded rows
/// `row_offset..row_offset + rows`.
pub struct BandAccumulator<F: Bm3dFloat> {
    row_offset: usize,
    numerator: Array3<F>,
    denominator: Array3<F>,
}

impl<F: Bm3dFloat> BandAccumulator<F> {
    pub fn new(channels: usize, row_offset: usize, rows: usize, cols: usize) -> Result<Self> {
        Ok(Self {
            row_offset,
            numerator: try_zeros("aggregation numerator", (channels, rows, cols))?,
            denominator: try_zeros("aggregation denominator", (channels, rows, cols))?,
        })
    }

    /// Number of padded rows this band covers.
    pub fn rows(&self) -> usize {
        self.numerator.dim().1
    }

    /// Add one `k x k` spatial patch whose top-left pixel is `(row, col)`.
    pub fn accumulate_patch(
        &mut self,
        channel: usize,
        row: usize,
        col: usize,
        patch: &[F],
        window: &Array2<F>,
        weight: F,
    ) {
        let k = window.dim().0;
        debug_assert!(row >= self.row_offset && row - self.row_offset + k <= self.rows());
        let r0 = row - self.row_offset;
        let mut num = self.numerator.index_axis_mut(Axis(0), channel);
        let mut den = self.denominator.index_axis_mut(Axis(0), channel);
        for p in 0..k {
            for q in 0..k {
                let w = window[[p, q]] * weight;
                num[[r0 + p, col + q]] += w * patch[p * k + q];
                den[[r0 + p, col + q]] += w;
            }
        }
    }

    /// Scatter a filtered group (already back in the pixel domain) to the
    /// positions in `matches`, one weight per channel.
    pub fn accumulate_group(
        &mut self,
        group: &Group3d<F>,
        matches: &[PatchMatch<F>],
        window: &Array2<F>,
        weights: &[F],
    ) {
        let coeffs = window.len();
        for c in 0..group.channels() {
            let data = group.channel(c);
            for (m, patch) in matches.iter().zip(data.chunks_exact(coeffs)) {
                self.accumulate_patch(c, m.row, m.col, patch, window, weights[c]);
            }
        }
    }

    /// Add a band into this (larger) accumulator.
    pub fn merge(&mut self, band: &BandAccumulator<F>) {
        let start = band.row_offset - self.row_offset;
        let end = start + band.rows();
        let mut num = self.numerator.slice_mut(s![.., start..end, ..]);
        num += &band.numerator;
        let mut den = self.denominator.slice_mut(s![.., start..end, ..]);
        den += &band.denominator;
    }

    /// Divide numerator by denominator over the `rows x cols` interior that
    /// starts at padded `(border, border)`.
    ///
    /// Pixels that received no weight take the value of `fallback` (a padded
    /// image of the same geometry). Returns the unpadded estimate and the
    /// number of such pixels.
    pub fn finalize(
        &self,
        fallback: ArrayView3<F>,
        border: usize,
        rows: usize,
        cols: usize,
    ) -> Result<(Array3<F>, usize)> {
        debug_assert_eq!(self.row_offset, 0);
        let channels = self.numerator.dim().0;
        let mut out = try_zeros("aggregated estimate", (channels, rows, cols))?;
        let mut uncovered = 0usize;
        for c in 0..channels {
            for r in 0..rows {
                for col in 0..cols {
                    let (pr, pc) = (r + border, col + border);
                    let den = self.denominator[[c, pr, pc]];
                    out[[c, r, col]] = if den > F::zero() {
                        self.numerator[[c, pr, pc]] / den
                    } else {
                        uncovered += 1;
                        fallback[[c, pr, pc]]
                    };
                }
            }
        }
        Ok((out, uncovered))
    }
}
