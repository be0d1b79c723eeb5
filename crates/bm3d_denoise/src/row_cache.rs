//! Sliding window of 2D patch transforms.
//!
//! Consecutive reference rows search overlapping row ranges, so the forward
//! transforms of every patch in rows `[r - n, r + n]` are kept and only the
//! rows that enter the window are computed when the reference row advances.

use ndarray::{s, ArrayView3};
use std::collections::VecDeque;

use crate::error::{try_zeroed, Result};
use crate::float_trait::Bm3dFloat;
use crate::transforms::{PatchTransform, TransformScratch};

/// Forward transforms of all patches in a band of patch rows.
///
/// Each cached row holds `channels * patch_cols * k*k` coefficients laid out
/// as `[channel][col][coefficient]`.
pub struct RowTransformCache<F: Bm3dFloat> {
    channels: usize,
    patch_cols: usize,
    coeffs_per_patch: usize,
    last_patch_row: usize,
    half_window: usize,
    rows: VecDeque<(usize, Vec<F>)>,
    spare: Vec<Vec<F>>,
    full_refreshes: usize,
    incremental_refreshes: usize,
}

impl<F: Bm3dFloat> RowTransformCache<F> {
    /// Cache for a `(channels, rows, cols)` image. The caller guarantees the
    /// image holds at least one patch.
    pub fn new(dim: (usize, usize, usize), patch_size: usize, half_window: usize) -> Self {
        let (channels, rows, cols) = dim;
        debug_assert!(rows >= patch_size && cols >= patch_size);
        Self {
            channels,
            patch_cols: cols + 1 - patch_size,
            coeffs_per_patch: patch_size * patch_size,
            last_patch_row: rows - patch_size,
            half_window,
            rows: VecDeque::with_capacity(2 * half_window + 1),
            spare: Vec::new(),
            full_refreshes: 0,
            incremental_refreshes: 0,
        }
    }

    /// Make the window around `ref_row` resident.
    ///
    /// Moving forward drops rows that left the window and computes only the
    /// new ones; any other move recomputes the whole window.
    pub fn refresh(
        &mut self,
        image: ArrayView3<F>,
        transform: &PatchTransform<F>,
        scratch: &mut TransformScratch<F>,
        ref_row: usize,
    ) -> Result<()> {
        let lo = ref_row.saturating_sub(self.half_window);
        let hi = (ref_row + self.half_window).min(self.last_patch_row);

        let reusable = match (self.rows.front(), self.rows.back()) {
            (Some(&(front, _)), Some(&(back, _))) => front <= lo && back <= hi && back + 1 >= lo,
            _ => false,
        };
        if !reusable {
            while let Some((_, buf)) = self.rows.pop_back() {
                self.spare.push(buf);
            }
        }
        while self.rows.front().is_some_and(|&(row, _)| row < lo) {
            if let Some((_, buf)) = self.rows.pop_front() {
                self.spare.push(buf);
            }
        }

        if self.rows.is_empty() {
            self.full_refreshes += 1;
        } else {
            self.incremental_refreshes += 1;
        }

        let next = self.rows.back().map_or(lo, |&(row, _)| row + 1);
        for row in next..=hi {
            let mut buf = match self.spare.pop() {
                Some(buf) => buf,
                None => try_zeroed(
                    "patch transform row cache",
                    self.channels * self.patch_cols * self.coeffs_per_patch,
                )?,
            };
            self.compute_row(image, transform, scratch, row, &mut buf);
            self.rows.push_back((row, buf));
        }
        Ok(())
    }

    fn compute_row(
        &self,
        image: ArrayView3<F>,
        transform: &PatchTransform<F>,
        scratch: &mut TransformScratch<F>,
        row: usize,
        buf: &mut [F],
    ) {
        let k = transform.patch_size();
        let mut chunks = buf.chunks_exact_mut(self.coeffs_per_patch);
        for c in 0..self.channels {
            for col in 0..self.patch_cols {
                if let Some(out) = chunks.next() {
                    let patch = image.slice(s![c, row..row + k, col..col + k]);
                    transform.forward(patch, out, scratch);
                }
            }
        }
    }

    /// Coefficients of the patch at `(row, col)` in `channel`, if resident.
    pub fn patch(&self, channel: usize, row: usize, col: usize) -> Option<&[F]> {
        let &(front, _) = self.rows.front()?;
        if row < front || col >= self.patch_cols || channel >= self.channels {
            return None;
        }
        let (_, data) = self.rows.get(row - front)?;
        let start = (channel * self.patch_cols + col) * self.coeffs_per_patch;
        data.get(start..start + self.coeffs_per_patch)
    }

    /// Number of rows currently resident.
    pub fn resident_rows(&self) -> usize {
        self.rows.len()
    }

    /// `(full, incremental)` refresh counts since construction.
    pub fn refresh_counts(&self) -> (usize, usize) {
        (self.full_refreshes, self.incremental_refreshes)
    }
}
