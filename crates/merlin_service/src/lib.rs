//! # Merlin Service
//!
//! The orchestration layer: every operation a user runs against jobs and pipelines.
//!
//! Services are generic over [`MerlinServices`](merlin_core::traits::MerlinServices), so the same
//! code drives the real platform clients and the in-memory doubles of `merlin_mock`.
//!
//! - **[`JobService`](job::JobService)**: `build`, `push`, `run`, `stop` of training jobs.
//! - **[`PipelineService`](pipeline::PipelineService)**: `build`, `push`, `deploy`, `run`, `stop`
//!   of pipelines.
//! - **[`TensorboardService`](tensorboard::TensorboardService)**: `create`, `delete`, `list` of
//!   the declared tensorboards.
//! - **[`ManifestRunner`](runner::ManifestRunner)**: `run` of built manifests, with only storage
//!   and the platform at hand.

pub mod error;
pub mod function;
pub mod job;
pub mod pipeline;
pub mod runner;
pub mod services;
pub mod tensorboard;

mod resolve;

pub mod prelude {
    pub use super::error::ServiceError;
    pub use super::job::JobService;
    pub use super::pipeline::{PipelineService, PushMode};
    pub use super::runner::ManifestRunner;
    pub use super::services::CoreServices;
    pub use super::tensorboard::TensorboardService;
}
