//! BM3D Pipeline - one pass over the reference grid.
//!
//! A pass matches, filters and aggregates every reference patch of a padded
//! image. Reference rows are split into bands that run on the rayon pool;
//! each band owns its matcher scratch, transform row caches and a private
//! aggregation band, and the bands are summed once all of them finished.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::aggregation::BandAccumulator;
use crate::block_matching::{match_band, MatchParams, MatchScratch, PatchMatch, ReferenceGrid};
use crate::error::{try_zeroed, Bm3dError, Result};
use crate::filtering::{hard_threshold, wiener_filter, Bm3dMode, Group3d};
use crate::float_trait::Bm3dFloat;
use crate::image::ensure_same_shape;
use crate::orchestration::PassConfig;
use crate::row_cache::RowTransformCache;
use crate::transforms::{window_coefficients, PatchTransform, TransformKind};

// =============================================================================
// Constants for BM3D Pipeline
// =============================================================================

/// Reference rows handled by one band when the environment does not say otherwise.
const ROWS_PER_BAND_ENV: &str = "BM3D_ROWS_PER_BAND";

/// Lower bound on the default band height. Every band recomputes the
/// `2n + 1` transform rows of its first window, so very thin bands waste work.
const MIN_ROWS_PER_BAND: usize = 4;

/// Counters and timings of one pass.
///
/// Timings are summed over worker threads, so they can exceed wall time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassStats {
    pub reference_patches: usize,
    pub matched_patches: usize,
    /// Groups where nothing but the reference patch passed the threshold.
    pub single_patch_groups: usize,
    pub bands: usize,
    pub full_cache_refreshes: usize,
    pub incremental_cache_refreshes: usize,
    /// Interior pixels that received no aggregation weight.
    pub uncovered_pixels: usize,
    pub matching_time: Duration,
    pub filtering_time: Duration,
    pub aggregation_time: Duration,
}

impl PassStats {
    fn merge(self, other: Self) -> Self {
        Self {
            reference_patches: self.reference_patches + other.reference_patches,
            matched_patches: self.matched_patches + other.matched_patches,
            single_patch_groups: self.single_patch_groups + other.single_patch_groups,
            bands: self.bands + other.bands,
            full_cache_refreshes: self.full_cache_refreshes + other.full_cache_refreshes,
            incremental_cache_refreshes: self.incremental_cache_refreshes
                + other.incremental_cache_refreshes,
            uncovered_pixels: self.uncovered_pixels + other.uncovered_pixels,
            matching_time: self.matching_time + other.matching_time,
            filtering_time: self.filtering_time + other.filtering_time,
            aggregation_time: self.aggregation_time + other.aggregation_time,
        }
    }
}

/// Everything one pass reads.
pub struct PassContext<'a, F: Bm3dFloat> {
    pub mode: Bm3dMode,
    /// Noisy image padded by `border`.
    pub noisy: ArrayView3<'a, F>,
    /// Basic estimate padded by `border`; required by the Wiener pass, where
    /// it drives block matching and serves as the oracle.
    pub basic: Option<ArrayView3<'a, F>>,
    pub border: usize,
    /// Noise standard deviation per channel.
    pub sigmas: &'a [F],
    pub pass: &'a PassConfig<F>,
    pub transform: TransformKind,
    pub lambda_hard: F,
}

/// Read-only state shared by all bands of a pass.
///
/// `'s` borrows the per-pass locals, `'a` is the lifetime of the image views.
struct BandShared<'s, 'a, F: Bm3dFloat> {
    ctx: &'s PassContext<'a, F>,
    oracle: Option<ArrayView3<'a, F>>,
    matching_image: ArrayView2<'a, F>,
    grid: &'s ReferenceGrid,
    params: MatchParams<F>,
    transform: &'s PatchTransform<F>,
    window: &'s Array2<F>,
}

/// Resolve the band height from the environment with a thread-count default.
fn resolve_rows_per_band(reference_rows: usize) -> usize {
    std::env::var(ROWS_PER_BAND_ENV)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or_else(|| {
            reference_rows
                .div_ceil(rayon::current_num_threads().max(1))
                .max(MIN_ROWS_PER_BAND)
        })
}

/// Run one pass and return the unpadded estimate.
pub fn run_pass<F: Bm3dFloat>(ctx: &PassContext<'_, F>) -> Result<(Array3<F>, PassStats)> {
    let (_, padded_rows, _) = ctx.noisy.dim();
    let approx_reference_rows = padded_rows.saturating_sub(2 * ctx.border)
        / ctx.pass.reference_step.max(1)
        + 1;
    run_pass_in_bands(ctx, resolve_rows_per_band(approx_reference_rows))
}

fn run_pass_in_bands<F: Bm3dFloat>(
    ctx: &PassContext<'_, F>,
    rows_per_band: usize,
) -> Result<(Array3<F>, PassStats)> {
    let pass = ctx.pass;
    let (channels, padded_rows, padded_cols) = ctx.noisy.dim();
    let border = ctx.border;
    if padded_rows < 2 * border || padded_cols < 2 * border {
        return Err(Bm3dError::DegenerateImage {
            rows: padded_rows,
            cols: padded_cols,
            patch_size: pass.patch_size,
        });
    }
    let (rows, cols) = (padded_rows - 2 * border, padded_cols - 2 * border);
    if border < pass.search_half_window {
        return Err(Bm3dError::InvalidConfiguration(format!(
            "border {border} is narrower than the search half-window {}",
            pass.search_half_window
        )));
    }
    if ctx.sigmas.len() != channels {
        return Err(Bm3dError::InvalidConfiguration(format!(
            "expected {channels} channel noise levels, got {}",
            ctx.sigmas.len()
        )));
    }
    let oracle = match ctx.mode {
        Bm3dMode::HardThreshold => None,
        Bm3dMode::Wiener => {
            let basic = ctx.basic.ok_or_else(|| {
                Bm3dError::InvalidConfiguration(
                    "the Wiener pass needs a basic estimate".to_string(),
                )
            })?;
            ensure_same_shape(ctx.noisy, basic)?;
            Some(basic)
        }
    };

    let grid = ReferenceGrid::new(border, rows, cols, pass.patch_size, pass.reference_step)?;
    let transform = PatchTransform::new(ctx.transform, pass.patch_size)?;
    let window = window_coefficients::<F>(pass.patch_size);
    let shared = BandShared {
        ctx,
        oracle,
        matching_image: oracle.unwrap_or(ctx.noisy).index_axis_move(Axis(0), 0),
        grid: &grid,
        params: MatchParams {
            patch_size: pass.patch_size,
            search_half_window: pass.search_half_window,
            max_candidates: pass.max_candidates,
            similarity_threshold: pass.similarity_threshold,
        },
        transform: &transform,
        window: &window,
    };

    let bands: Vec<&[usize]> = grid.rows.chunks(rows_per_band.max(1)).collect();
    let partials = bands
        .par_iter()
        .map(|band| process_band(&shared, band))
        .collect::<Result<Vec<_>>>()?;

    let started = Instant::now();
    let mut total = BandAccumulator::new(channels, 0, padded_rows, padded_cols)?;
    let mut stats = PassStats::default();
    for (band, band_stats) in &partials {
        total.merge(band);
        stats = stats.merge(*band_stats);
    }
    drop(partials);

    let fallback = oracle.unwrap_or(ctx.noisy);
    let (estimate, uncovered) = total.finalize(fallback, border, rows, cols)?;
    stats.aggregation_time += started.elapsed();
    stats.uncovered_pixels = uncovered;

    debug!(
        mode = ?ctx.mode,
        rows,
        cols,
        reference_patches = stats.reference_patches,
        matched_patches = stats.matched_patches,
        single_patch_groups = stats.single_patch_groups,
        bands = stats.bands,
        full_cache_refreshes = stats.full_cache_refreshes,
        incremental_cache_refreshes = stats.incremental_cache_refreshes,
        matching_ms = stats.matching_time.as_secs_f64() * 1e3,
        filtering_ms = stats.filtering_time.as_secs_f64() * 1e3,
        aggregation_ms = stats.aggregation_time.as_secs_f64() * 1e3,
        "pass finished"
    );
    if uncovered > 0 {
        warn!(
            mode = ?ctx.mode,
            uncovered,
            "pixels received no aggregation weight; kept their pre-filter value"
        );
    }
    Ok((estimate, stats))
}

/// Copy the transforms of `matches` from `cache` into `group`.
fn load_group<F: Bm3dFloat>(
    group: &mut Group3d<F>,
    cache: &RowTransformCache<F>,
    matches: &[PatchMatch<F>],
) -> Result<()> {
    group.reset(matches.len());
    for c in 0..group.channels() {
        for (i, m) in matches.iter().enumerate() {
            let coeffs = cache.patch(c, m.row, m.col).ok_or_else(|| {
                Bm3dError::InvalidConfiguration(format!(
                    "matched patch ({}, {}) lies outside the transform window",
                    m.row, m.col
                ))
            })?;
            group.patch_mut(c, i).copy_from_slice(coeffs);
        }
    }
    Ok(())
}

fn process_band<F: Bm3dFloat>(
    shared: &BandShared<'_, '_, F>,
    band_rows: &[usize],
) -> Result<(BandAccumulator<F>, PassStats)> {
    let ctx = shared.ctx;
    let pass = ctx.pass;
    let (channels, padded_rows, padded_cols) = ctx.noisy.dim();
    let k = pass.patch_size;
    let n = pass.search_half_window;
    let mut stats = PassStats {
        bands: 1,
        ..PassStats::default()
    };
    let (Some(&first), Some(&last)) = (band_rows.first(), band_rows.last()) else {
        return Ok((BandAccumulator::new(channels, 0, 0, padded_cols)?, stats));
    };

    let row_lo = first.saturating_sub(n);
    let row_hi = (last + n + k).min(padded_rows);
    let mut acc = BandAccumulator::new(channels, row_lo, row_hi - row_lo, padded_cols)?;

    let started = Instant::now();
    let lists = {
        let mut scratch = MatchScratch::new();
        match_band(
            shared.matching_image,
            band_rows,
            &shared.grid.cols,
            &shared.params,
            &mut scratch,
        )?
    };
    stats.matching_time = started.elapsed();

    let transform = shared.transform;
    let mut scratch = transform.make_scratch();
    let mut noisy_cache = RowTransformCache::new(ctx.noisy.dim(), k, n);
    let mut basic_cache = shared.oracle.map(|b| RowTransformCache::new(b.dim(), k, n));
    let coeffs = transform.coefficient_count();
    let mut group = Group3d::new(channels, pass.max_candidates, coeffs)?;
    let mut basic_group = match shared.oracle {
        Some(_) => Some(Group3d::new(channels, pass.max_candidates, coeffs)?),
        None => None,
    };
    let mut weights: Vec<F> = try_zeroed("group weights", channels)?;
    let n_cols = shared.grid.cols.len();

    for (ri, &r) in band_rows.iter().enumerate() {
        let started = Instant::now();
        noisy_cache.refresh(ctx.noisy, transform, &mut scratch, r)?;
        if let (Some(cache), Some(basic)) = (basic_cache.as_mut(), shared.oracle) {
            cache.refresh(basic, transform, &mut scratch, r)?;
        }
        stats.filtering_time += started.elapsed();

        for list in &lists[ri * n_cols..(ri + 1) * n_cols] {
            let started = Instant::now();
            stats.reference_patches += 1;
            stats.matched_patches += list.len();
            if list.self_referential {
                stats.single_patch_groups += 1;
            }

            load_group(&mut group, &noisy_cache, &list.matches)?;
            match (basic_group.as_mut(), basic_cache.as_ref()) {
                (Some(oracle_group), Some(cache)) => {
                    load_group(oracle_group, cache, &list.matches)?;
                    wiener_filter(
                        &mut group,
                        oracle_group,
                        ctx.sigmas,
                        pass.use_std_dev_weight,
                        &mut weights,
                    );
                }
                _ => hard_threshold(
                    &mut group,
                    ctx.sigmas,
                    ctx.lambda_hard,
                    pass.use_std_dev_weight,
                    &mut weights,
                ),
            }
            for c in 0..channels {
                transform.inverse_batch(group.channel_mut(c), &mut scratch);
            }
            stats.filtering_time += started.elapsed();

            let started = Instant::now();
            acc.accumulate_group(&group, &list.matches, shared.window, &weights);
            stats.aggregation_time += started.elapsed();
        }
    }

    let (full, incremental) = noisy_cache.refresh_counts();
    stats.full_cache_refreshes += full;
    stats.incremental_cache_refreshes += incremental;
    if let Some(cache) = &basic_cache {
        let (full, incremental) = cache.refresh_counts();
        stats.full_cache_refreshes += full;
        stats.incremental_cache_refreshes += incremental;
    }
    Ok((acc, stats))
}
