//! # Merlin
//!
//! Declarative orchestration of managed machine-learning resources on Vertex AI.
//!
//! A `merlin.yaml` describes training jobs and pipelines. Merlin turns each one into a
//! *manifest* (a JSON hand-off file), pushes the manifest and its container images, and
//! later runs, schedules or cancels the resource using nothing but the manifest.
//!
//! This crate serves as an entry point, re-exporting the core types and optionally
//! including the REST client, storage backends and orchestration services via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`service`** | Job and pipeline orchestration services (`merlin_service`). |
//! | **`client`** | REST clients for Vertex AI, Cloud Functions and Cloud Scheduler (`merlin_client`). |
//! | **`fs`** | Manifest storage on the local filesystem (`merlin_fs`). |
//! | **`opendal`** | Manifest storage on GCS, S3 or local paths through OpenDAL (`merlin_opendal`). |
//! | **`docker`** | Image registry backed by the local Docker daemon (`merlin_docker`). |
//! | **`mock`** | In-memory doubles for tests and dry runs (`merlin_mock`). |
//!
//! ## Example: Building a job manifest
//!
//! ```toml
//! [dependencies]
//! merlin = { version = "0.3", features = ["service", "fs", "mock"] }
//! ```
//!
//! ```rust,ignore
//! use merlin::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = MerlinConfig::load("merlin.yaml")?;
//! let services = CoreServices {
//!     storage: FileSystemStorage::new("."),
//!     platform: MockPlatform::default(),
//!     registry: MockRegistry::with_images(["trainer"]),
//!     functions: MockFunctions::default(),
//!     scheduler: MockScheduler::default(),
//! };
//!
//! let jobs = JobService::new(services, config, ".", "dev");
//! for (path, manifest) in jobs.build("all").await? {
//!     println!("{} -> {}", manifest.job_type(), path);
//! }
//! # Ok(())
//! # }
//! ```

pub use merlin_core::*;

#[cfg(feature = "service")]
pub mod service {
    pub use merlin_service::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use merlin_client::*;
}

#[cfg(feature = "fs")]
pub mod fs {
    pub use merlin_fs::*;
}

#[cfg(feature = "opendal")]
pub mod opendal {
    pub use merlin_opendal::*;
}

#[cfg(feature = "docker")]
pub mod docker {
    pub use merlin_docker::*;
}

#[cfg(feature = "mock")]
pub mod mock {
    pub use merlin_mock::*;
}

pub mod prelude {
    pub use merlin_core::prelude::*;

    #[cfg(feature = "service")]
    pub use merlin_service::prelude::*;

    #[cfg(feature = "client")]
    pub use merlin_client::{CloudFunctionsClient, CloudSchedulerClient, VertexClient};

    #[cfg(feature = "fs")]
    pub use merlin_fs::FileSystemStorage;

    #[cfg(feature = "opendal")]
    pub use merlin_opendal::OpendalStorage;

    #[cfg(feature = "docker")]
    pub use merlin_docker::DockerRegistry;

    #[cfg(feature = "mock")]
    pub use merlin_mock::{MemoryStorage, MockFunctions, MockPlatform, MockRegistry, MockScheduler};
}
