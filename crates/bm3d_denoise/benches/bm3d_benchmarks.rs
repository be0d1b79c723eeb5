//! Criterion benchmarks for the BM3D denoiser.
//!
//! Run with: cargo bench -p bm3d_denoise
//! Run specific: cargo bench -p bm3d_denoise -- patch_transform

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array2, Array3};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use bm3d_denoise::block_matching::{match_patches, MatchParams, ReferenceGrid};
use bm3d_denoise::hadamard;
use bm3d_denoise::{denoise, mirror_pad, Bm3dConfig, PatchTransform, TransformKind};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

fn random_matrix_f32(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen::<f32>() * 255.0)
}

/// Smooth synthetic scene plus Gaussian noise.
fn noisy_scene(channels: usize, size: usize, sigma: f64, seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).unwrap();
    Array3::from_shape_fn((channels, size, size), |(c, r, col)| {
        let (x, y) = (col as f64, r as f64);
        let clean = 120.0 + 60.0 * (0.07 * x + c as f64).sin() * (0.05 * y).cos();
        clean + normal.sample(&mut rng)
    })
}

// =============================================================================
// Transform Benchmarks
// =============================================================================

fn bench_patch_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_transform");

    for (kind, k) in [
        (TransformKind::Dct, 4),
        (TransformKind::Dct, 8),
        (TransformKind::Dct, 12),
        (TransformKind::Bior, 8),
    ] {
        let transform = PatchTransform::<f32>::new(kind, k).unwrap();
        let mut scratch = transform.make_scratch();
        let patch = random_matrix_f32(k, k, 42);
        let mut coeffs = vec![0.0f32; k * k];
        let label = format!("{kind:?}_{k}");

        group.throughput(Throughput::Elements((k * k) as u64));

        group.bench_function(BenchmarkId::new("forward", &label), |b| {
            b.iter(|| transform.forward(black_box(patch.view()), &mut coeffs, &mut scratch))
        });

        transform.forward(patch.view(), &mut coeffs, &mut scratch);
        group.bench_function(BenchmarkId::new("inverse", &label), |b| {
            b.iter(|| {
                let mut work = coeffs.clone();
                transform.inverse(black_box(&mut work), &mut scratch);
                work
            })
        });
    }

    group.finish();
}

fn bench_hadamard_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("hadamard_group");

    for candidates in [8, 16, 32] {
        let data = random_matrix_f32(candidates, 64, 7);
        let flat: Vec<f32> = data.iter().copied().collect();
        group.throughput(Throughput::Elements((candidates * 64) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(candidates),
            &candidates,
            |b, &n| {
                b.iter(|| {
                    let mut work = flat.clone();
                    hadamard::transform_group(black_box(&mut work), n, 64);
                    work
                })
            },
        );
    }

    group.finish();
}

// =============================================================================
// Block Matching Benchmarks
// =============================================================================

fn bench_block_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_matching");
    group.sample_size(20);

    for size in [64, 128] {
        let image = random_matrix_f32(size, size, 42);
        let padded = mirror_pad(image.view().insert_axis(ndarray::Axis(0)), 16).unwrap();
        let plane = padded.index_axis(ndarray::Axis(0), 0);
        let grid = ReferenceGrid::new(16, size, size, 8, 3).unwrap();
        let params = MatchParams {
            patch_size: 8,
            search_half_window: 16,
            max_candidates: 16,
            similarity_threshold: 2500.0f32,
        };

        group.throughput(Throughput::Elements(grid.len() as u64));
        group.bench_with_input(BenchmarkId::new("grid_8x8_win16", size), &size, |b, _| {
            b.iter(|| match_patches(black_box(plane), &grid, &params).unwrap())
        });
    }

    group.finish();
}

// =============================================================================
// Full Pipeline Benchmarks
// =============================================================================

fn bench_denoise(c: &mut Criterion) {
    let mut group = c.benchmark_group("denoise");
    group.sample_size(10);

    for (channels, size) in [(1, 64), (1, 128), (3, 64)] {
        let noisy = noisy_scene(channels, size, 20.0, 42);
        let config = Bm3dConfig::for_sigma(20.0, channels, TransformKind::Dct);
        let label = format!("{channels}ch_{size}");

        group.throughput(Throughput::Elements((channels * size * size) as u64));
        group.bench_function(BenchmarkId::new("two_pass", &label), |b| {
            b.iter(|| denoise(black_box(noisy.view()), 20.0, &config).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_patch_transform,
    bench_hadamard_group,
    bench_block_matching,
    bench_denoise,
);
criterion_main!(benches);
