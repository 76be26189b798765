//! Build, push, run and stop of training jobs.
//!
//! A job moves through the phases as a manifest file: [`JobService::build`] writes it,
//! [`JobService::push`] publishes it and [`JobService::run`] submits whatever manifest it is
//! pointed at, without going back to the configuration.

use crate::error::Result;
use crate::resolve;
use crate::runner::ManifestRunner;

use bytes::Bytes;
use merlin_core::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct JobService<S: MerlinServices> {
    services: S,
    config: MerlinConfig,
    workdir: PathBuf,
    version: String,
}

impl<S: MerlinServices> JobService<S> {
    pub fn new(
        services: S,
        config: MerlinConfig,
        workdir: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            services,
            config,
            workdir: workdir.into(),
            version: version.into(),
        }
    }

    /// Builds and writes the manifest of every job selected by `name`.
    ///
    /// Each job is validated before anything remote is called for it.
    pub async fn build(&self, name: &str) -> Result<Vec<(String, JobManifest)>> {
        let mut built = Vec::new();
        for job in self.config.jobs(name)? {
            job.validate()?;

            let images = resolve::images(self.services.registry(), &job.image_refs()).await?;
            let tensorboard = resolve::tensorboard(
                self.services.platform(),
                &self.config,
                &job.context(),
                job.tensorboard_ref.as_deref(),
            )
            .await?;

            let manifest = JobManifest::from_config(job, &images, tensorboard)?;
            let path = self.write(&manifest).await?;
            info!(job = %job.name, job_type = manifest.job_type(), path = %path, "Built job manifest");
            built.push((path, manifest));
        }
        Ok(built)
    }

    /// Writes `manifest` to its build location and returns the path.
    pub async fn write(&self, manifest: &JobManifest) -> Result<String> {
        let path = local_manifest_path(&self.workdir, &manifest.config().name)
            .to_string_lossy()
            .into_owned();
        let bytes = manifest.to_bytes()?;
        self.services
            .storage()
            .write_file(&path, Bytes::from(bytes))
            .await?;
        Ok(path)
    }

    fn runner(&self) -> ManifestRunner<S::Storage, S::Platform> {
        ManifestRunner::new(
            self.services.storage().clone(),
            self.services.platform().clone(),
        )
    }

    /// Reads a manifest from a local path or an object URI.
    pub async fn read(&self, path: &str) -> Result<JobManifest> {
        self.runner().read_job(path).await
    }

    /// Pushes the images of each manifest and publishes the manifest for this version.
    ///
    /// Manifests go to the job's bucket, or next to the local build when `local` is set.
    /// Returns the published locations.
    pub async fn push(&self, manifests: &[String], local: bool) -> Result<Vec<String>> {
        let mut pushed = Vec::new();
        for path in manifests {
            let manifest = self.read(path).await?;
            let config = manifest.config();

            for image in manifest.image_refs() {
                info!(image = %image, "Pushing docker image");
                self.services.registry().push_image(image).await?;
            }

            let target = if local {
                local_release_path(&self.workdir, &config.name, &self.version)
                    .to_string_lossy()
                    .into_owned()
            } else {
                release_manifest_uri(&config.bucket, &config.name, &self.version)
            };
            self.services.storage().copy(path, &target).await?;
            info!(job = %config.name, target = %target, "Published job manifest");
            pushed.push(target);
        }
        Ok(pushed)
    }

    /// Submits each manifest, see [`ManifestRunner::run_jobs`].
    pub async fn run(&self, manifests: &[String], sync: bool) -> Result<Vec<RemoteJob>> {
        self.runner().run_jobs(manifests, sync).await
    }

    /// Offers to cancel every running or pending job of the instances selected by `name`.
    ///
    /// Returns how many were cancelled.
    pub async fn stop(&self, name: &str, confirm: &dyn Confirm) -> Result<usize> {
        let platform = self.services.platform();
        let mut cancelled = 0;
        for job in self.config.jobs(name)? {
            let (family, filter) = match &job.workload {
                Workload::Custom { hp_tuning, .. } => (
                    if hp_tuning.is_some() {
                        JobFamily::HyperparameterTuningJob
                    } else {
                        JobFamily::CustomJob
                    },
                    list_filter(&[JobState::Running, JobState::Pending], Some(&job.name)),
                ),
                Workload::Training { .. } => (
                    JobFamily::TrainingPipeline,
                    list_filter(
                        &[PipelineState::Running, PipelineState::Pending],
                        Some(&job.name),
                    ),
                ),
            };

            let active = platform.list_jobs(&job.context(), family, &filter).await?;
            if active.is_empty() {
                warn!(job = %job.name, "No running or pending job");
                continue;
            }
            cancelled += resolve::cancel_confirmed(platform, active, confirm).await;
        }
        Ok(cancelled)
    }
}
