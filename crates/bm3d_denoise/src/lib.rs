//! BM3D Denoising Library
//!
//! Pure Rust implementation of two-pass BM3D (Block-Matching and 3D filtering)
//! for images corrupted by additive white Gaussian noise. Pass 1 groups similar
//! patches and hard-thresholds them jointly; pass 2 regroups on the basic
//! estimate and applies empirical Wiener shrinkage.

pub mod aggregation;
pub mod block_matching;
pub mod color;
pub mod error;
pub mod filtering;
pub mod float_trait;
pub mod hadamard;
pub mod image;
pub mod metrics;
pub mod noise_estimation;
pub mod orchestration;
pub mod pipeline;
pub mod row_cache;
pub mod transforms;

// Re-export commonly used types at the crate root
pub use block_matching::{find_candidates_brute_force, match_patches, PatchMatch};
pub use color::ColorSpace;
pub use error::{Bm3dError, Result};
pub use filtering::Bm3dMode;
pub use float_trait::Bm3dFloat;
pub use image::{mirror_pad, strip_border};
pub use metrics::{psnr, rmse};
pub use noise_estimation::{estimate_noise_sigma, estimate_noise_sigma_per_channel};
pub use orchestration::{denoise, denoise_basic, Bm3dConfig, Bm3dOutput, PassConfig, PipelineStats};
pub use pipeline::PassStats;
pub use transforms::{PatchTransform, TransformKind};
