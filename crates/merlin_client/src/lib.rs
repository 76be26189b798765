//! # Merlin Client
//!
//! Async REST clients for the Google Cloud services merlin drives:
//!
//! - [`VertexClient`]: custom jobs, tuning jobs, training pipelines, pipeline jobs and
//!   tensorboards on Vertex AI. Implements [`MlPlatform`](merlin_core::traits::MlPlatform).
//! - [`CloudFunctionsClient`]: trigger functions of scheduled pipelines.
//! - [`CloudSchedulerClient`]: cron jobs calling those functions.
//!
//! Every request carries a bearer token from a [`TokenSource`]. Non-success responses are
//! returned with their status and body and never retried.
//!
//! ## Example
//!
//! ```no_run
//! use merlin_client::{TokenSource, VertexClient};
//! use merlin_core::prelude::*;
//!
//! async fn run() -> Result<(), PlatformError> {
//!     let vertex = VertexClient::new(TokenSource::from_env());
//!     let ctx = PlatformContext::new("my-project", "europe-west1");
//!
//!     let filter = list_filter(&[JobState::Running, JobState::Pending], None);
//!     for job in vertex.list_jobs(&ctx, JobFamily::CustomJob, &filter).await? {
//!         println!("{} {}", job.display_name, job.state);
//!     }
//!     Ok(())
//! }
//! ```

mod api;
pub mod error;
pub mod functions;
pub mod scheduler;
pub mod token;
pub mod vertex;

pub use error::ClientError;
pub use functions::CloudFunctionsClient;
pub use scheduler::CloudSchedulerClient;
pub use token::{ACCESS_TOKEN_ENV, TokenSource};
pub use vertex::VertexClient;
