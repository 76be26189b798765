//! # Merlin Core
//!
//! Types and traits shared by every merlin crate.
//!
//! - **[`MerlinConfig`](config::MerlinConfig)**: `merlin.yaml`, enriched from the gcp profile and validated.
//! - **[`JobManifest`](manifest::JobManifest)**: The built form of a job. Its `job_type` tag decides what gets submitted.
//! - **[`PipelineManifest`](pipeline::PipelineManifest)**: The built form of a pipeline.
//! - **[`MlPlatform`](traits::MlPlatform)**, **[`ImageRegistry`](traits::ImageRegistry)**,
//!   **[`BlobStore`](traits::BlobStore)**: The remote collaborators, injected into the services.

pub mod config;
pub mod constants;
pub mod error;
pub mod job;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod platform;
pub mod traits;

pub mod prelude {
    pub use super::config::*;
    pub use super::error::*;
    pub use super::job::*;
    pub use super::manifest::*;
    pub use super::pipeline::*;
    pub use super::platform::*;
    pub use super::traits::*;
}
