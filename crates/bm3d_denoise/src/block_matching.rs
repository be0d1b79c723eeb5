use ndarray::{s, ArrayView2};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{try_with_capacity, Bm3dError, Result};
use crate::float_trait::Bm3dFloat;

#[derive(Debug, Clone, Copy)]
pub struct PatchMatch<F: Bm3dFloat> {
    pub row: usize,
    pub col: usize,
    pub distance: F,
}

impl<F: Bm3dFloat> PartialEq for PatchMatch<F> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<F: Bm3dFloat> Eq for PatchMatch<F> {}

impl<F: Bm3dFloat> Ord for PatchMatch<F> {
    /// Ascending distance; ties are broken by position so that every
    /// matcher produces the same group for the same image.
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.row.cmp(&other.row))
            .then(self.col.cmp(&other.col))
    }
}

impl<F: Bm3dFloat> PartialOrd for PatchMatch<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Matched patches of one reference patch.
///
/// `matches[0]` is always the reference patch itself with distance 0; the
/// rest are sorted by ascending distance. The length is a power of two.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateList<F: Bm3dFloat> {
    pub matches: Vec<PatchMatch<F>>,
    /// Set when no other patch passed the similarity threshold.
    pub self_referential: bool,
}

impl<F: Bm3dFloat> CandidateList<F> {
    /// Group size (`nSx`).
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Search parameters of one pass.
#[derive(Debug, Clone, Copy)]
pub struct MatchParams<F: Bm3dFloat> {
    pub patch_size: usize,
    pub search_half_window: usize,
    pub max_candidates: usize,
    /// Per-pixel similarity threshold; the SSD bound is this times `k*k`.
    pub similarity_threshold: F,
}

impl<F: Bm3dFloat> MatchParams<F> {
    fn distance_bound(&self) -> F {
        self.similarity_threshold * F::usize_as(self.patch_size * self.patch_size)
    }
}

/// Top-left coordinates (in padded space) at which block matching runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceGrid {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl ReferenceGrid {
    /// Grid for an `rows x cols` image padded by `border` on every side.
    pub fn new(
        border: usize,
        rows: usize,
        cols: usize,
        patch_size: usize,
        step: usize,
    ) -> Result<Self> {
        if rows < patch_size || cols < patch_size {
            return Err(Bm3dError::DegenerateImage {
                rows,
                cols,
                patch_size,
            });
        }
        Ok(Self {
            rows: reference_offsets(border, rows, patch_size, step)?,
            cols: reference_offsets(border, cols, patch_size, step)?,
        })
    }

    /// Number of reference patches.
    pub fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Offsets `border, border + step, ...` up to the last patch that fits in
/// `len` pixels, with that last offset always included.
pub fn reference_offsets(
    border: usize,
    len: usize,
    patch_size: usize,
    step: usize,
) -> Result<Vec<usize>> {
    if step == 0 || step > patch_size {
        return Err(Bm3dError::InvalidConfiguration(format!(
            "reference_step must be in 1..={patch_size}, got {step}"
        )));
    }
    if len < patch_size {
        return Err(Bm3dError::DegenerateImage {
            rows: len,
            cols: len,
            patch_size,
        });
    }
    let last = border + len - patch_size;
    let mut offsets: Vec<usize> = (border..=last).step_by(step).collect();
    if offsets.last() != Some(&last) {
        offsets.push(last);
    }
    Ok(offsets)
}

/// Valid region of the distance map for one displacement.
#[derive(Debug, Clone, Copy)]
struct MapBounds {
    row_lo: usize,
    row_hi: usize,
    col_lo: usize,
    col_hi: usize,
    width: usize,
}

impl MapBounds {
    #[inline]
    fn get<F: Bm3dFloat>(&self, dist: &[F], row: usize, col: usize) -> Option<F> {
        if row < self.row_lo || row > self.row_hi || col < self.col_lo || col > self.col_hi {
            return None;
        }
        Some(dist[(row - self.row_lo) * self.width + col].max(F::zero()))
    }
}

/// Reusable buffers for [`match_band`].
pub struct MatchScratch<F: Bm3dFloat> {
    diff: Vec<F>,
    dist: Vec<F>,
    heaps: Vec<BinaryHeap<PatchMatch<F>>>,
}

impl<F: Bm3dFloat> Default for MatchScratch<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Bm3dFloat> MatchScratch<F> {
    pub fn new() -> Self {
        Self {
            diff: Vec::new(),
            dist: Vec::new(),
            heaps: Vec::new(),
        }
    }

    /// Hold `n_refs` empty heaps, each able to take `capacity` entries
    /// without reallocating.
    fn prepare_heaps(&mut self, n_refs: usize, capacity: usize) -> Result<()> {
        if self.heaps.len() < n_refs {
            self.heaps
                .try_reserve_exact(n_refs - self.heaps.len())
                .map_err(|_| Bm3dError::Allocation {
                    what: "candidate heaps",
                    elements: n_refs,
                })?;
        }
        self.heaps.resize_with(n_refs, BinaryHeap::new);
        for heap in self.heaps.iter_mut() {
            heap.clear();
            heap.try_reserve_exact(capacity)
                .map_err(|_| Bm3dError::Allocation {
                    what: "candidate heap",
                    elements: capacity,
                })?;
        }
        Ok(())
    }
}

fn ensure_len<F: Bm3dFloat>(buf: &mut Vec<F>, len: usize, what: &'static str) -> Result<()> {
    if buf.len() < len {
        buf.try_reserve_exact(len - buf.len())
            .map_err(|_| Bm3dError::Allocation {
                what,
                elements: len,
            })?;
        buf.resize(len, F::zero());
    }
    Ok(())
}

/// Fill `scratch.dist` with the k x k SSD between the patch at `(i, j)` and
/// the patch at `(i + di, j + dj)` for base rows `row_lo..=row_hi`.
///
/// Squared differences are computed once per pixel and turned into window
/// sums with the running-sum recurrence, so the cost does not depend on `k`.
fn fill_distance_map<F: Bm3dFloat>(
    image: ArrayView2<F>,
    patch_size: usize,
    di: usize,
    dj: isize,
    row_lo: usize,
    row_hi: usize,
    scratch: &mut MatchScratch<F>,
) -> Result<Option<MapBounds>> {
    let k = patch_size;
    let (h, w) = image.dim();
    let shift = dj.unsigned_abs();
    if h < k + di || w < k + shift {
        return Ok(None);
    }
    let row_hi = row_hi.min(h - k - di);
    if row_lo > row_hi {
        return Ok(None);
    }
    let col_lo = if dj < 0 { shift } else { 0 };
    let col_hi = w - k - if dj > 0 { shift } else { 0 };

    let map_rows = row_hi - row_lo + 1;
    let diff_rows = map_rows + k - 1;
    ensure_len(&mut scratch.diff, diff_rows * w, "block-matching difference rows")?;
    ensure_len(&mut scratch.dist, map_rows * w, "block-matching distance map")?;

    for t in 0..diff_rows {
        let base = image.row(row_lo + t);
        let shifted = image.row(row_lo + t + di);
        let out = &mut scratch.diff[t * w..(t + 1) * w];
        for c in col_lo..col_hi + k {
            let d = shifted[(c as isize + dj) as usize] - base[c];
            out[c] = d * d;
        }
    }

    let diff = &scratch.diff;
    let dist = &mut scratch.dist;
    let at = |t: usize, c: usize| diff[t * w + c];

    let mut first = F::zero();
    for p in 0..k {
        for q in 0..k {
            first += at(p, col_lo + q);
        }
    }
    dist[col_lo] = first;

    for j in col_lo + 1..=col_hi {
        let mut delta = F::zero();
        for p in 0..k {
            delta += at(p, j + k - 1) - at(p, j - 1);
        }
        dist[j] = dist[j - 1] + delta;
    }

    for t in 1..map_rows {
        let row = t * w;
        let prev = (t - 1) * w;
        let mut delta = F::zero();
        for q in 0..k {
            delta += at(t + k - 1, col_lo + q) - at(t - 1, col_lo + q);
        }
        dist[row + col_lo] = dist[prev + col_lo] + delta;

        for j in col_lo + 1..=col_hi {
            dist[row + j] = dist[prev + j] + dist[row + j - 1] - dist[prev + j - 1]
                + at(t + k - 1, j + k - 1)
                - at(t - 1, j + k - 1)
                - at(t + k - 1, j - 1)
                + at(t - 1, j - 1);
        }
    }

    Ok(Some(MapBounds {
        row_lo,
        row_hi,
        col_lo,
        col_hi,
        width: w,
    }))
}

/// Keep the `capacity` closest candidates below `bound`.
#[inline]
fn offer<F: Bm3dFloat>(
    heap: &mut BinaryHeap<PatchMatch<F>>,
    candidate: PatchMatch<F>,
    bound: F,
    capacity: usize,
) {
    if capacity == 0 || candidate.distance >= bound {
        return;
    }
    if heap.len() < capacity {
        heap.push(candidate);
    } else if let Some(worst) = heap.peek() {
        if candidate < *worst {
            heap.pop();
            heap.push(candidate);
        }
    }
}

#[inline]
fn largest_power_of_two_at_most(n: usize) -> usize {
    debug_assert!(n > 0);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

fn finish_candidates<F: Bm3dFloat>(
    heap: &mut BinaryHeap<PatchMatch<F>>,
    reference: (usize, usize),
    max_candidates: usize,
) -> CandidateList<F> {
    let mut others: Vec<PatchMatch<F>> = heap.drain().collect();
    others.sort();
    let found = others.len() + 1;
    let n_sx = if found >= max_candidates {
        max_candidates
    } else {
        largest_power_of_two_at_most(found)
    };
    others.truncate(n_sx - 1);

    let mut matches = Vec::with_capacity(n_sx);
    matches.push(PatchMatch {
        row: reference.0,
        col: reference.1,
        distance: F::zero(),
    });
    matches.extend(others);
    CandidateList {
        self_referential: n_sx == 1,
        matches,
    }
}

/// Match every reference patch `(r, c)` with `r` in `ref_rows` and `c` in
/// `ref_cols` against its search window in `image` (channel 0 of a padded
/// image). Results are row-major over the band.
///
/// Only the half window `di > 0` (and `di == 0, dj > 0`) gets a distance map:
/// the same map value at `(r, c)` scores the candidate `(r + di, c + dj)`,
/// and at `(r - di, c - dj)` it scores the mirrored candidate, because the
/// SSD between two patches does not depend on which one is the reference.
pub fn match_band<F: Bm3dFloat>(
    image: ArrayView2<F>,
    ref_rows: &[usize],
    ref_cols: &[usize],
    params: &MatchParams<F>,
    scratch: &mut MatchScratch<F>,
) -> Result<Vec<CandidateList<F>>> {
    let n_refs = ref_rows.len() * ref_cols.len();
    let (Some(&r_first), Some(&r_last)) = (ref_rows.first(), ref_rows.last()) else {
        return Ok(Vec::new());
    };
    if n_refs == 0 {
        return Ok(Vec::new());
    }

    let n = params.search_half_window as isize;
    let bound = params.distance_bound();
    let capacity = params.max_candidates.saturating_sub(1);
    let n_cols = ref_cols.len();

    scratch.prepare_heaps(n_refs, capacity)?;

    for di in 0..=params.search_half_window {
        let dj_first = if di == 0 { 1 } else { -n };
        for dj in dj_first..=n {
            let Some(bounds) = fill_distance_map(
                image,
                params.patch_size,
                di,
                dj,
                r_first.saturating_sub(di),
                r_last,
                scratch,
            )?
            else {
                continue;
            };

            let MatchScratch { dist, heaps, .. } = &mut *scratch;
            let dist: &[F] = dist;
            for (ri, &r) in ref_rows.iter().enumerate() {
                for (ci, &c) in ref_cols.iter().enumerate() {
                    let heap = &mut heaps[ri * n_cols + ci];
                    if let Some(d) = bounds.get(dist, r, c) {
                        let candidate = PatchMatch {
                            row: r + di,
                            col: (c as isize + dj) as usize,
                            distance: d,
                        };
                        offer(heap, candidate, bound, capacity);
                    }
                    let mirror_col = c as isize - dj;
                    if r >= di && mirror_col >= 0 {
                        let (mr, mc) = (r - di, mirror_col as usize);
                        if let Some(d) = bounds.get(dist, mr, mc) {
                            let candidate = PatchMatch {
                                row: mr,
                                col: mc,
                                distance: d,
                            };
                            offer(heap, candidate, bound, capacity);
                        }
                    }
                }
            }
        }
    }

    let mut lists = try_with_capacity("candidate lists", n_refs)?;
    for (ri, &r) in ref_rows.iter().enumerate() {
        for (ci, &c) in ref_cols.iter().enumerate() {
            let heap = &mut scratch.heaps[ri * n_cols + ci];
            lists.push(finish_candidates(heap, (r, c), params.max_candidates));
        }
    }
    Ok(lists)
}

/// Match the whole reference grid, row-major.
pub fn match_patches<F: Bm3dFloat>(
    image: ArrayView2<F>,
    grid: &ReferenceGrid,
    params: &MatchParams<F>,
) -> Result<Vec<CandidateList<F>>> {
    let mut scratch = MatchScratch::new();
    match_band(image, &grid.rows, &grid.cols, params, &mut scratch)
}

#[inline]
fn patch_ssd<F: Bm3dFloat>(
    image: ArrayView2<F>,
    a: (usize, usize),
    b: (usize, usize),
    k: usize,
) -> F {
    let pa = image.slice(s![a.0..a.0 + k, a.1..a.1 + k]);
    let pb = image.slice(s![b.0..b.0 + k, b.1..b.1 + k]);
    pa.iter()
        .zip(pb.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .fold(F::zero(), |acc, v| acc + v)
}

/// Direct O(k^2)-per-candidate search over the full window around `reference`.
///
/// Produces the same candidate list as [`match_band`] up to floating-point
/// rounding of the distances.
pub fn find_candidates_brute_force<F: Bm3dFloat>(
    image: ArrayView2<F>,
    reference: (usize, usize),
    params: &MatchParams<F>,
) -> CandidateList<F> {
    let k = params.patch_size;
    let n = params.search_half_window;
    let (h, w) = image.dim();
    let (r, c) = reference;
    let bound = params.distance_bound();
    let capacity = params.max_candidates.saturating_sub(1);
    let mut heap = BinaryHeap::new();

    let r_lo = r.saturating_sub(n);
    let r_hi = (r + n).min(h.saturating_sub(k));
    let c_lo = c.saturating_sub(n);
    let c_hi = (c + n).min(w.saturating_sub(k));
    for rr in r_lo..=r_hi {
        for cc in c_lo..=c_hi {
            if (rr, cc) == (r, c) {
                continue;
            }
            let distance = patch_ssd(image, (r, c), (rr, cc), k);
            offer(
                &mut heap,
                PatchMatch {
                    row: rr,
                    col: cc,
                    distance,
                },
                bound,
                capacity,
            );
        }
    }
    finish_candidates(&mut heap, reference, params.max_candidates)
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
            // [0.0, 1.0)
            let u = self.next_u64();
            (u >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    fn random_matrix_f64(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = SimpleLcg::new(seed);
        Array2::from_shape_fn((rows, cols), |_| 255.0 * rng.next_f64())
    }

    fn params(k: usize, n: usize, max: usize, tau: f64) -> MatchParams<f64> {
        MatchParams {
            patch_size: k,
            search_half_window: n,
            max_candidates: max,
            similarity_threshold: tau,
        }
    }

    // ==================== PatchMatch ====================

    #[test]
    fn test_patch_match_ordering_by_distance_then_position() {
        let a: PatchMatch<f32> = PatchMatch {
            row: 4,
            col: 0,
            distance: 0.5,
        };
        let b: PatchMatch<f32> = PatchMatch {
            row: 0,
            col: 0,
            distance: 1.0,
        };
        let c: PatchMatch<f32> = PatchMatch {
            row: 0,
            col: 3,
            distance: 1.0,
        };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_heap_keeps_closest() {
        let mut heap = BinaryHeap::new();
        for (i, d) in [5.0f64, 1.0, 4.0, 2.0, 3.0].iter().enumerate() {
            offer(
                &mut heap,
                PatchMatch {
                    row: i,
                    col: 0,
                    distance: *d,
                },
                4.5,
                2,
            );
        }
        let mut kept: Vec<f64> = heap.into_iter().map(|m| m.distance).collect();
        kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(kept, vec![1.0, 2.0]);
    }

    #[test]
    fn test_prepare_heaps_clears_and_reserves() {
        let mut scratch = MatchScratch::<f64>::new();
        scratch.prepare_heaps(3, 7).unwrap();
        scratch.heaps[1].push(PatchMatch {
            row: 1,
            col: 2,
            distance: 0.5,
        });
        scratch.prepare_heaps(2, 7).unwrap();
        assert_eq!(scratch.heaps.len(), 2);
        assert!(scratch.heaps.iter().all(|h| h.is_empty() && h.capacity() >= 7));
    }

    #[test]
    fn test_prepare_heaps_reports_impossible_request() {
        let mut scratch = MatchScratch::<f64>::new();
        match scratch.prepare_heaps(usize::MAX / 4, 1).unwrap_err() {
            Bm3dError::Allocation { what, elements } => {
                assert_eq!(what, "candidate heaps");
                assert_eq!(elements, usize::MAX / 4);
            }
            other => panic!("unexpected error {other:?}"),
        }
        match scratch.prepare_heaps(2, usize::MAX / 4).unwrap_err() {
            Bm3dError::Allocation { what, .. } => assert_eq!(what, "candidate heap"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_largest_power_of_two() {
        let got: Vec<usize> = (1..=9).map(largest_power_of_two_at_most).collect();
        assert_eq!(got, vec![1, 2, 2, 4, 4, 4, 4, 8, 8]);
    }

    // ==================== Reference grid ====================

    #[test]
    fn test_reference_offsets_include_last() {
        assert_eq!(reference_offsets(2, 10, 4, 3).unwrap(), vec![2, 5, 8]);
        assert_eq!(reference_offsets(2, 11, 4, 3).unwrap(), vec![2, 5, 8, 9]);
        assert_eq!(reference_offsets(0, 8, 8, 3).unwrap(), vec![0]);
        assert_eq!(reference_offsets(1, 5, 4, 1).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_reference_grid_covers_every_pixel() {
        for (len, k, step) in [(37usize, 8usize, 3usize), (64, 8, 8), (13, 4, 4), (50, 12, 5)] {
            let offsets = reference_offsets(0, len, k, step).unwrap();
            let mut covered = vec![false; len];
            for &o in &offsets {
                for v in covered.iter_mut().skip(o).take(k) {
                    *v = true;
                }
            }
            assert!(covered.iter().all(|&c| c), "len={len} k={k} step={step}");
        }
    }

    #[test]
    fn test_reference_grid_errors() {
        assert!(matches!(
            reference_offsets(0, 10, 4, 0),
            Err(Bm3dError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            reference_offsets(0, 10, 4, 5),
            Err(Bm3dError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReferenceGrid::new(4, 3, 20, 4, 2),
            Err(Bm3dError::DegenerateImage { .. })
        ));
    }

    // ==================== Matching ====================

    #[test]
    fn test_self_match_always_first() {
        let img = random_matrix_f64(30, 30, 17);
        let grid = ReferenceGrid::new(5, 20, 20, 4, 3).unwrap();
        // A tiny threshold rejects every other candidate.
        let lists = match_patches(img.view(), &grid, &params(4, 5, 8, 1e-6)).unwrap();
        assert_eq!(lists.len(), grid.len());
        let mut idx = 0;
        for &r in &grid.rows {
            for &c in &grid.cols {
                let list = &lists[idx];
                assert_eq!(list.matches[0].row, r);
                assert_eq!(list.matches[0].col, c);
                assert_eq!(list.matches[0].distance, 0.0);
                assert_eq!(list.len(), 1);
                assert!(list.self_referential);
                idx += 1;
            }
        }
    }

    #[test]
    fn test_lengths_are_powers_of_two() {
        let img = random_matrix_f64(40, 36, 5);
        let grid = ReferenceGrid::new(6, 28, 24, 8, 3).unwrap();
        for tau in [50.0, 5000.0, 9000.0, 20000.0] {
            let lists = match_patches(img.view(), &grid, &params(8, 6, 16, tau)).unwrap();
            for list in &lists {
                assert!(list.len().is_power_of_two());
                assert!(list.len() <= 16);
                assert_eq!(list.self_referential, list.len() == 1);
                for pair in list.matches[1..].windows(2) {
                    assert!(pair[0].distance <= pair[1].distance);
                }
                let bound = tau * 64.0;
                assert!(list.matches.iter().all(|m| m.distance < bound));
            }
        }
    }

    #[test]
    fn test_flat_image_fills_every_group() {
        let img = Array2::<f32>::from_elem((24, 24), 42.0);
        let grid = ReferenceGrid::new(4, 16, 16, 4, 2).unwrap();
        let p = MatchParams {
            patch_size: 4,
            search_half_window: 4,
            max_candidates: 32,
            similarity_threshold: 1.0f32,
        };
        let lists = match_patches(img.view(), &grid, &p).unwrap();
        for list in &lists {
            assert_eq!(list.len(), 32);
            assert!(list.matches.iter().all(|m| m.distance == 0.0));
        }
    }

    #[test]
    fn test_matches_brute_force() {
        let img = random_matrix_f64(26, 29, 99);
        let border = 4;
        let grid = ReferenceGrid::new(border, 18, 21, 4, 3).unwrap();
        for (max, tau) in [(8, 1e9), (16, 1e9), (32, 9000.0)] {
            let p = params(4, border, max, tau);
            let lists = match_patches(img.view(), &grid, &p).unwrap();
            let mut idx = 0;
            for &r in &grid.rows {
                for &c in &grid.cols {
                    let brute = find_candidates_brute_force(img.view(), (r, c), &p);
                    let fast = &lists[idx];
                    assert_eq!(fast.len(), brute.len(), "ref ({r},{c})");
                    for (a, b) in fast.matches.iter().zip(brute.matches.iter()) {
                        assert_eq!((a.row, a.col), (b.row, b.col), "ref ({r},{c})");
                        assert!((a.distance - b.distance).abs() < 1e-6 * b.distance.max(1.0));
                    }
                    idx += 1;
                }
            }
        }
    }

    #[test]
    fn test_finds_patch_in_lower_left_half_window() {
        // Plant a copy of the reference patch up and to the left of it.
        let mut img = random_matrix_f64(24, 24, 3);
        let (r, c) = (10, 10);
        let (tr, tc) = (6, 7);
        let patch = img.slice(s![r..r + 4, c..c + 4]).to_owned();
        img.slice_mut(s![tr..tr + 4, tc..tc + 4]).assign(&patch);

        let p = params(4, 4, 2, 10.0);
        let lists = match_band(img.view(), &[r], &[c], &p, &mut MatchScratch::new()).unwrap();
        assert_eq!(lists[0].len(), 2);
        assert_eq!((lists[0].matches[1].row, lists[0].matches[1].col), (tr, tc));
        assert!(lists[0].matches[1].distance.abs() < 1e-6);
    }

    #[test]
    fn test_band_split_matches_full_grid() {
        let img = random_matrix_f64(34, 30, 8);
        let grid = ReferenceGrid::new(5, 24, 20, 8, 3).unwrap();
        let p = params(8, 5, 8, 6000.0);
        let full = match_patches(img.view(), &grid, &p).unwrap();

        let mut scratch = MatchScratch::new();
        let mut pieced = Vec::new();
        for band in grid.rows.chunks(3) {
            pieced.extend(match_band(img.view(), band, &grid.cols, &p, &mut scratch).unwrap());
        }
        assert_eq!(full.len(), pieced.len());
        for (a, b) in full.iter().zip(pieced.iter()) {
            assert_eq!(a.len(), b.len());
            for (x, y) in a.matches.iter().zip(b.matches.iter()) {
                assert_eq!((x.row, x.col), (y.row, y.col));
            }
        }
    }
}
