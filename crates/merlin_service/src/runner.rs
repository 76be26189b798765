//! Submission of built manifests.
//!
//! Running needs nothing but the manifest: project, region and payload are all recorded in it.
//! [`ManifestRunner`] therefore only holds storage to read manifests from and the platform to
//! submit to, and works without a configuration file.

use crate::error::Result;
use crate::resolve;

use merlin_core::constants::urls;
use merlin_core::prelude::*;
use serde_json::Value;
use std::path::Path;
use tracing::info;

#[derive(Clone)]
pub struct ManifestRunner<B, P> {
    storage: B,
    platform: P,
}

impl<B: BlobStore, P: MlPlatform> ManifestRunner<B, P> {
    pub fn new(storage: B, platform: P) -> Self {
        Self { storage, platform }
    }

    async fn read_bytes(&self, path: &str) -> Result<bytes::Bytes> {
        Ok(self
            .storage
            .read_file(path)
            .await
            .map_err(ManifestError::from)?)
    }

    /// Reads a job manifest from a local path or an object URI.
    pub async fn read_job(&self, path: &str) -> Result<JobManifest> {
        let bytes = self.read_bytes(path).await?;
        Ok(JobManifest::from_bytes(path, &bytes)?)
    }

    pub async fn read_pipeline(&self, path: &str) -> Result<PipelineManifest> {
        let bytes = self.read_bytes(path).await?;
        Ok(PipelineManifest::from_bytes(path, &bytes)?)
    }

    /// Submits each job manifest in the project and region it records.
    ///
    /// With `sync` every job is awaited until it finishes; otherwise this returns once the
    /// platform has created the resource.
    pub async fn run_jobs(&self, manifests: &[String], sync: bool) -> Result<Vec<RemoteJob>> {
        let mut jobs = Vec::new();
        for path in manifests {
            let manifest = self.read_job(path).await?;
            let ctx = manifest.context();

            let job = self.platform.submit_job(&ctx, &manifest.submission()).await?;
            info!(
                job = %manifest.config().name,
                dashboard = %manifest.dashboard_url(job.id()),
                "Job created"
            );

            let job = if sync {
                let done = self.platform.wait_job(job.family, &job.name).await?;
                info!(job = %manifest.config().name, state = %done.state, "Job finished");
                done
            } else {
                job
            };
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Submits one run per pipeline manifest, bypassing the trigger function.
    ///
    /// `params` is a YAML file whose values override the manifest's parameter values.
    /// With `sync` each run is awaited and its task summary logged.
    pub async fn run_pipelines(
        &self,
        manifests: &[String],
        params: Option<&Path>,
        sync: bool,
    ) -> Result<Vec<RemoteJob>> {
        let overrides = match params {
            Some(path) => {
                let bytes = self.storage.read_file(&path.to_string_lossy()).await?;
                Some(parse_params(&String::from_utf8_lossy(&bytes))?)
            }
            None => None,
        };

        let mut jobs = Vec::new();
        for path in manifests {
            let manifest = self.read_pipeline(path).await?;
            let spec_bytes = self.read_bytes(&manifest.json_spec_path).await?;
            let spec: Value =
                serde_json::from_slice(&spec_bytes).map_err(|e| ManifestError::Malformed {
                    path: manifest.json_spec_path.clone(),
                    reason: e.to_string(),
                })?;

            let project_number = resolve::project_number(
                &self.platform,
                &manifest.project,
                manifest.network.as_deref(),
            )
            .await?;
            let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
            let request = manifest.job_request(
                spec,
                overrides.as_ref(),
                &timestamp,
                project_number.as_deref(),
            );
            let ctx = manifest.context();

            let job = self.platform.submit_pipeline(&ctx, &request).await?;
            info!(
                pipeline = %manifest.pipeline_name,
                dashboard = %urls::pipeline_dashboard(&ctx.project, &ctx.region, job.id()),
                "Pipeline job created"
            );

            let job = if sync {
                let done = self
                    .platform
                    .wait_job(JobFamily::PipelineJob, &job.name)
                    .await?;
                let tasks = self.platform.pipeline_summary(&done.name).await?;
                info!(
                    pipeline = %manifest.pipeline_name,
                    "Pipeline results:\n{}",
                    render_summary(&tasks)
                );
                done
            } else {
                job
            };
            jobs.push(job);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use bytes::Bytes;
    use merlin_mock::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn runner() -> (MemoryStorage, MockPlatform, ManifestRunner<MemoryStorage, MockPlatform>) {
        let storage = MemoryStorage::default();
        let platform = MockPlatform::default();
        let runner = ManifestRunner::new(storage.clone(), platform.clone());
        (storage, platform, runner)
    }

    fn pipeline_manifest(network: Option<&str>) -> PipelineManifest {
        PipelineManifest {
            pipeline_name: "nightly".into(),
            project: "proj".into(),
            location: "europe-west1".into(),
            pipeline_root: "gs://b/merlin-pipelines/nightly/executions/".into(),
            json_spec_path: "gs://b/spec.json".into(),
            parameter_values: Default::default(),
            labels: BTreeMap::new(),
            enable_caching: true,
            service_account: Some("runner@proj.iam.gserviceaccount.com".into()),
            network: network.map(str::to_string),
            schedule: None,
            image_refs: Vec::new(),
            compile_env_params: Default::default(),
            tensorboard: None,
        }
    }

    async fn store_pipeline(storage: &MemoryStorage, manifest: &PipelineManifest) {
        storage
            .write_file("gs://b/spec.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        storage
            .write_file("gs://b/manifest.json", Bytes::from(manifest.to_bytes().unwrap()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn job_manifest_runs_on_its_own() {
        let (storage, platform, runner) = runner();
        let config: JobConfig = serde_json::from_value(json!({
            "name": "train-a",
            "project_id": "proj",
            "region": "us-east1",
            "bucket": "b",
            "worker": {"container": {"docker_image_ref": "img1"}}
        }))
        .unwrap();
        let images = BTreeMap::from([(
            "img1".to_string(),
            ImageTags {
                local_tag: "l".into(),
                remote_tag: "r".into(),
                pushed_uri: "uri".into(),
            },
        )]);
        let manifest = JobManifest::from_config(&config, &images, None).unwrap();
        storage
            .write_file("gs://b/job-manifest.json", Bytes::from(manifest.to_bytes().unwrap()))
            .await
            .unwrap();

        let jobs = runner
            .run_jobs(&["gs://b/job-manifest.json".to_string()], false)
            .await
            .unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].family, JobFamily::TrainingPipeline);
        assert_eq!(platform.submitted().len(), 1);
    }

    #[tokio::test]
    async fn missing_manifest_is_a_storage_error() {
        let (_, platform, runner) = runner();
        let err = runner
            .run_jobs(&["gs://b/nothing.json".to_string()], false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Manifest(ManifestError::Storage(StorageError::NotFound(_)))
        ));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn pipeline_network_is_expanded_with_the_project_number() {
        let (storage, platform, runner) = runner();
        store_pipeline(&storage, &pipeline_manifest(Some("ml-vpc"))).await;

        runner
            .run_pipelines(&["gs://b/manifest.json".to_string()], None, false)
            .await
            .unwrap();

        let calls = platform.calls();
        assert_eq!(calls[0], PlatformCall::ProjectNumber("proj".into()));
        let Some(PlatformCall::SubmitPipeline(_, request)) = calls.get(1) else {
            panic!("expected a pipeline submission, got {calls:?}");
        };
        assert_eq!(
            request.network.as_deref(),
            Some("projects/123456789012/global/networks/ml-vpc")
        );
    }

    #[tokio::test]
    async fn pipeline_without_network_skips_the_lookup() {
        let (storage, platform, runner) = runner();
        store_pipeline(&storage, &pipeline_manifest(None)).await;

        runner
            .run_pipelines(&["gs://b/manifest.json".to_string()], None, false)
            .await
            .unwrap();

        assert!(
            !platform
                .calls()
                .iter()
                .any(|c| matches!(c, PlatformCall::ProjectNumber(_)))
        );
    }
}
