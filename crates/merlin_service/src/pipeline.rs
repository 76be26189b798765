//! Build, push, deploy, run and stop of pipelines.
//!
//! The compiled pipeline template is an input: building copies it next to the pipeline manifest,
//! pushing publishes both, and deploying wires the published template to a trigger function and,
//! when the pipeline has a schedule, to a scheduler job.

use crate::error::Result;
use crate::runner::ManifestRunner;
use crate::{function, resolve};

use bytes::Bytes;
use merlin_core::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// What a push publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushMode {
    #[default]
    All,
    Manifests,
    Containers,
    /// Manifests only, for iterating on a pipeline whose images did not change.
    Quick,
}

impl PushMode {
    pub fn pushes_containers(self) -> bool {
        matches!(self, PushMode::All | PushMode::Containers)
    }

    pub fn pushes_manifests(self) -> bool {
        matches!(self, PushMode::All | PushMode::Manifests | PushMode::Quick)
    }
}

impl FromStr for PushMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(PushMode::All),
            "manifests" => Ok(PushMode::Manifests),
            "containers" => Ok(PushMode::Containers),
            "quick" => Ok(PushMode::Quick),
            other => Err(ConfigError::Invalid(format!(
                "unknown push mode `{other}`, expected all, manifests, containers or quick"
            ))),
        }
    }
}

impl fmt::Display for PushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PushMode::All => "all",
            PushMode::Manifests => "manifests",
            PushMode::Containers => "containers",
            PushMode::Quick => "quick",
        })
    }
}

pub struct PipelineService<S: MerlinServices> {
    services: S,
    config: MerlinConfig,
    workdir: PathBuf,
    version: String,
}

impl<S: MerlinServices> PipelineService<S> {
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

    fn paths(&self, pipeline: &PipelineConfig) -> PipelinePaths {
        PipelinePaths::new(&self.workdir, &pipeline.bucket, &pipeline.name)
    }

    /// Builds every pipeline selected by `name`: copies its compiled template into the build
    /// directory and writes its manifest there.
    pub async fn build(&self, name: &str) -> Result<Vec<(String, PipelineManifest)>> {
        let storage = self.services.storage();
        let mut built = Vec::new();
        for pipeline in self.config.pipelines(name)? {
            pipeline.validate()?;

            let images = resolve::images(self.services.registry(), &pipeline.docker_image_ref).await?;
            let tensorboard = resolve::tensorboard(
                self.services.platform(),
                &self.config,
                &pipeline.context(),
                pipeline.tensorboard_ref.as_deref(),
            )
            .await?;
            let project_number = resolve::project_number(
                self.services.platform(),
                &pipeline.project_id,
                pipeline.network.as_deref(),
            )
            .await?;

            let paths = self.paths(pipeline);
            let template = self.workdir.join(&pipeline.pipeline_spec);
            let json_spec = paths.json_spec(true, &self.version);
            storage
                .copy(&template.to_string_lossy(), &json_spec)
                .await?;

            let manifest = PipelineManifest::from_config(
                pipeline,
                &paths,
                json_spec,
                &self.version,
                &images,
                tensorboard,
                project_number.as_deref(),
            )?;
            let path = paths.manifest(true, &self.version);
            storage
                .write_file(&path, Bytes::from(manifest.to_bytes()?))
                .await?;

            info!(pipeline = %pipeline.name, path = %path, "Built pipeline manifest");
            built.push((path, manifest));
        }
        Ok(built)
    }

    fn runner(&self) -> ManifestRunner<S::Storage, S::Platform> {
        ManifestRunner::new(
            self.services.storage().clone(),
            self.services.platform().clone(),
        )
    }

    pub async fn read(&self, path: &str) -> Result<PipelineManifest> {
        self.runner().read_pipeline(path).await
    }

    /// Publishes what `mode` selects for each built manifest.
    ///
    /// The published manifest points at the published template. Returns the published manifest
    /// locations; a containers-only push publishes none.
    pub async fn push(
        &self,
        manifests: &[String],
        mode: PushMode,
        local: bool,
    ) -> Result<Vec<String>> {
        let storage = self.services.storage();
        let mut pushed = Vec::new();
        for path in manifests {
            let mut manifest = self.read(path).await?;

            if mode.pushes_containers() {
                for image in &manifest.image_refs {
                    info!(image = %image, "Pushing docker image");
                    self.services.registry().push_image(image).await?;
                }
            }

            if !mode.pushes_manifests() {
                continue;
            }

            let paths = self.manifest_paths(&manifest)?;
            let spec_target = paths.json_spec(local, &self.version);
            if spec_target != manifest.json_spec_path {
                storage.copy(&manifest.json_spec_path, &spec_target).await?;
            }
            manifest.json_spec_path = spec_target;

            let target = paths.manifest(local, &self.version);
            storage
                .write_file(&target, Bytes::from(manifest.to_bytes()?))
                .await?;
            info!(pipeline = %manifest.pipeline_name, target = %target, "Published pipeline manifest");
            pushed.push(target);
        }
        Ok(pushed)
    }

    /// Deploys the version of every pipeline selected by `name` published to its bucket to `env`.
    ///
    /// The trigger function is always created or updated; the scheduler job only when the
    /// pipeline has a schedule. Both read from the bucket, so a local push cannot be deployed.
    pub async fn deploy(&self, name: &str, env: &str) -> Result<Vec<DeployedFunction>> {
        let mut deployed = Vec::new();
        for pipeline in self.config.pipelines(name)? {
            let paths = self.paths(pipeline);
            let manifest = self.read(&paths.manifest(false, &self.version)).await?;
            let ctx = manifest.context();
            let deployment = manifest.deployment_name(env);

            let service_account = manifest
                .schedule
                .as_ref()
                .and_then(|s| s.service_account.clone())
                .or_else(|| manifest.service_account.clone())
                .ok_or_else(|| ConfigError::Missing {
                    instance: format!("pipeline {}", manifest.pipeline_name),
                    field: "service_account".into(),
                })?;

            let package = paths.function_package(false, &self.version);
            self.services
                .storage()
                .write_file(&package, Bytes::from(function::package(&manifest)?))
                .await?;

            info!(pipeline = %manifest.pipeline_name, version = %self.version, env, "Deploying trigger function");
            let function = self
                .services
                .functions()
                .upsert_function(
                    &ctx,
                    &FunctionResource {
                        name: deployment.clone(),
                        description: format!(
                            "merlin {} function for {env} pipeline",
                            manifest.pipeline_name
                        ),
                        source_archive_url: package,
                        entry_point: function::ENTRY_POINT.to_string(),
                        runtime: function::RUNTIME.to_string(),
                        service_account: service_account.clone(),
                        labels: manifest.labels.clone(),
                        env_variables: manifest.compile_env_vars(),
                    },
                )
                .await?;

            match &manifest.schedule {
                Some(schedule) => {
                    info!(pipeline = %manifest.pipeline_name, cron = %schedule.cron, "Deploying scheduler job");
                    let body = json!({
                        "pipeline_spec_uri": manifest.json_spec_path,
                        "parameter_values": manifest.parameter_values,
                    });
                    let headers = BTreeMap::from([
                        ("Content-Type".to_string(), "application/octet-stream".to_string()),
                        ("User-Agent".to_string(), "Google-Cloud-Scheduler".to_string()),
                        ("Merlin-Pipeline-Version".to_string(), self.version.clone()),
                    ]);
                    self.services
                        .scheduler()
                        .upsert_schedule(
                            &ctx,
                            &SchedulerResource {
                                name: deployment,
                                description: format!(
                                    "merlin {} scheduler for {env} pipeline",
                                    manifest.pipeline_name
                                ),
                                cron: schedule.cron.clone(),
                                timezone: schedule.timezone.clone(),
                                target_url: function.url.clone(),
                                body,
                                headers,
                                service_account,
                            },
                        )
                        .await?;
                }
                None => info!(
                    pipeline = %manifest.pipeline_name,
                    "No schedule set, skipping scheduler sync"
                ),
            }

            deployed.push(function);
        }
        Ok(deployed)
    }

    /// Submits one run per manifest, see [`ManifestRunner::run_pipelines`].
    pub async fn run(
        &self,
        manifests: &[String],
        params: Option<&Path>,
        sync: bool,
    ) -> Result<Vec<RemoteJob>> {
        self.runner().run_pipelines(manifests, params, sync).await
    }

    /// Offers to cancel every running or pending run of the pipelines selected by `name`.
    pub async fn stop(&self, name: &str, confirm: &dyn Confirm) -> Result<usize> {
        let platform = self.services.platform();
        let mut cancelled = 0;
        for pipeline in self.config.pipelines(name)? {
            let filter = list_filter(
                &[PipelineState::Running, PipelineState::Pending],
                Some(&pipeline.name),
            );
            let active = platform
                .list_jobs(&pipeline.context(), JobFamily::PipelineJob, &filter)
                .await?;
            if active.is_empty() {
                warn!(pipeline = %pipeline.name, "No running or pending pipeline job");
                continue;
            }
            cancelled += resolve::cancel_confirmed(platform, active, confirm).await;
        }
        Ok(cancelled)
    }

    fn manifest_paths(&self, manifest: &PipelineManifest) -> Result<PipelinePaths> {
        let pipeline = self
            .config
            .pipelines
            .iter()
            .find(|p| p.name == manifest.pipeline_name)
            .ok_or_else(|| ConfigError::UnknownInstance {
                kind: "pipeline".into(),
                name: manifest.pipeline_name.clone(),
            })?;
        Ok(self.paths(pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::services::CoreServices;
    use merlin_mock::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
project:
  name: demo
gcp_profile:
  project_id: proj
  region: europe-west1
  bucket: b
  service_account: runner@proj.iam.gserviceaccount.com
docker:
  images:
    - name: trainer
      build_type: provided_image
      image_url: europe-docker.pkg.dev/proj/repo/trainer:1
pipelines:
  - name: nightly
    pipeline_spec: pipeline/spec.json
    docker_image_ref: [trainer]
    pipeline_params:
      epochs: 1
      lr: 0.1
    schedule:
      cron: "0 2 * * *"
  - name: adhoc
    pipeline_spec: pipeline/spec.json
"#;

    const SPEC: &[u8] = br#"{"pipelineInfo": {"name": "nightly"}}"#;

    type Mocked = CoreServices<MemoryStorage, MockPlatform, MockRegistry, MockFunctions, MockScheduler>;

    async fn setup(platform: MockPlatform) -> (Mocked, PipelineService<Mocked>) {
        setup_with(platform, MerlinConfig::from_yaml_str(CONFIG).unwrap()).await
    }

    async fn setup_with(
        platform: MockPlatform,
        config: MerlinConfig,
    ) -> (Mocked, PipelineService<Mocked>) {
        let services = CoreServices {
            storage: MemoryStorage::default(),
            platform,
            registry: MockRegistry::with_images(["trainer"]),
            functions: MockFunctions::default(),
            scheduler: MockScheduler::default(),
        };
        services
            .storage
            .write_file("/work/pipeline/spec.json", Bytes::from_static(SPEC))
            .await
            .unwrap();

        let pipelines = PipelineService::new(services.clone(), config, "/work", "dev");
        (services, pipelines)
    }

    async fn build_and_push(pipelines: &PipelineService<Mocked>, name: &str) -> Vec<String> {
        let built: Vec<String> = pipelines
            .build(name)
            .await
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        pipelines.push(&built, PushMode::All, false).await.unwrap()
    }

    #[tokio::test]
    async fn build_copies_template_next_to_manifest() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        let built = pipelines.build("nightly").await.unwrap();

        let (path, manifest) = &built[0];
        assert_eq!(
            path,
            "/work/build/merlin-pipelines/nightly/deployment/dev/manifests/merlin-manifest.json"
        );
        assert_eq!(
            manifest.json_spec_path,
            "/work/build/merlin-pipelines/nightly/deployment/dev/manifests/pipeline-spec.json"
        );
        assert_eq!(manifest.labels["merlin_pipeline"], "nightly");
        assert_eq!(
            manifest.compile_env_params["trainer_docker_uri"],
            "mock.registry/trainer:latest"
        );
        assert_eq!(
            &services.storage.read_file(&manifest.json_spec_path).await.unwrap()[..],
            SPEC
        );
        assert_eq!(&pipelines.read(path).await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn build_hands_the_full_network_path_to_the_compiler() {
        let mut config = MerlinConfig::from_yaml_str(CONFIG).unwrap();
        config.pipelines[1].network = Some("ml-vpc".into());
        let (services, pipelines) = setup_with(MockPlatform::default(), config).await;

        let built = pipelines.build("adhoc").await.unwrap();
        let (_, manifest) = &built[0];
        assert_eq!(
            manifest.compile_env_params["pipeline_network"],
            "projects/123456789012/global/networks/ml-vpc"
        );
        assert_eq!(manifest.network.as_deref(), Some("ml-vpc"));
        assert_eq!(
            services.platform.calls(),
            vec![PlatformCall::ProjectNumber("proj".into())]
        );
    }

    #[tokio::test]
    async fn push_points_the_manifest_at_the_published_template() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        let pushed = build_and_push(&pipelines, "nightly").await;

        assert_eq!(
            pushed,
            vec!["gs://b/merlin-pipelines/nightly/deployment/dev/manifests/merlin-manifest.json"]
        );
        assert_eq!(services.registry.pushed(), vec!["trainer"]);

        let published = pipelines.read(&pushed[0]).await.unwrap();
        assert_eq!(
            published.json_spec_path,
            "gs://b/merlin-pipelines/nightly/deployment/dev/manifests/pipeline-spec.json"
        );
        assert!(services.storage.exists(&published.json_spec_path).await.unwrap());
    }

    #[tokio::test]
    async fn push_modes_select_what_is_published() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        let built: Vec<String> = pipelines
            .build("nightly")
            .await
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        let pushed = pipelines
            .push(&built, PushMode::Containers, false)
            .await
            .unwrap();
        assert!(pushed.is_empty());
        assert_eq!(services.registry.pushed().len(), 1);

        let pushed = pipelines.push(&built, PushMode::Quick, false).await.unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(services.registry.pushed().len(), 1);

        assert_eq!("quick".parse::<PushMode>().unwrap(), PushMode::Quick);
        assert!("everything".parse::<PushMode>().is_err());
    }

    #[tokio::test]
    async fn deploy_without_schedule_skips_the_scheduler() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        build_and_push(&pipelines, "adhoc").await;

        let deployed = pipelines.deploy("adhoc", "dev").await.unwrap();
        assert_eq!(deployed[0].url, "https://europe-west1-proj.cloudfunctions.net/adhoc-dev");

        let functions = services.functions.deployed();
        assert_eq!(functions.len(), 1);
        let (ctx, function) = &functions[0];
        assert_eq!(ctx, &PlatformContext::new("proj", "europe-west1"));
        assert_eq!(function.name, "adhoc-dev");
        assert_eq!(function.entry_point, "process_request");
        assert_eq!(
            function.source_archive_url,
            "gs://b/merlin-pipelines/adhoc/deployment/dev/functions/package.zip"
        );
        assert!(services.storage.exists(&function.source_archive_url).await.unwrap());
        assert_eq!(
            function.env_variables["ADHOC_PIPELINE_ROOT"],
            "gs://b/merlin-pipelines/adhoc/executions/"
        );

        assert!(services.scheduler.schedules().is_empty());
    }

    #[tokio::test]
    async fn deploy_with_schedule_targets_the_function() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        build_and_push(&pipelines, "nightly").await;

        pipelines.deploy("nightly", "prod").await.unwrap();

        let schedules = services.scheduler.schedules();
        assert_eq!(schedules.len(), 1);
        let (_, schedule) = &schedules[0];
        assert_eq!(schedule.name, "nightly-prod");
        assert_eq!(schedule.cron, "0 2 * * *");
        assert_eq!(schedule.timezone, "Etc/UTC");
        assert_eq!(
            schedule.target_url,
            "https://europe-west1-proj.cloudfunctions.net/nightly-prod"
        );
        assert_eq!(schedule.service_account, "runner@proj.iam.gserviceaccount.com");
        assert_eq!(
            schedule.body,
            json!({
                "pipeline_spec_uri": "gs://b/merlin-pipelines/nightly/deployment/dev/manifests/pipeline-spec.json",
                "parameter_values": {"epochs": 1, "lr": 0.1},
            })
        );
        assert_eq!(schedule.headers["Merlin-Pipeline-Version"], "dev");
    }

    #[tokio::test]
    async fn deploy_needs_a_published_manifest() {
        let (services, pipelines) = setup(MockPlatform::default()).await;

        let err = pipelines.deploy("adhoc", "dev").await.unwrap_err();
        assert!(matches!(err, ServiceError::Manifest(_)));
        assert!(services.functions.deployed().is_empty());
    }

    #[tokio::test]
    async fn deploy_ignores_local_pushes() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        let built: Vec<String> = pipelines
            .build("adhoc")
            .await
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        pipelines.push(&built, PushMode::All, true).await.unwrap();

        let err = pipelines.deploy("adhoc", "dev").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Manifest(ManifestError::Storage(StorageError::NotFound(_)))
        ));
        assert!(services.functions.deployed().is_empty());
        assert!(
            services
                .storage
                .locations()
                .iter()
                .all(|l| !l.ends_with("package.zip"))
        );
    }

    #[tokio::test]
    async fn sync_run_applies_overrides_and_logs_summary() {
        let platform = MockPlatform::default().with_tasks(vec![TaskSummary {
            task_name: "train".into(),
            state: "SUCCEEDED".into(),
            start_time: None,
            end_time: None,
        }]);
        let (services, pipelines) = setup(platform).await;
        let pushed = build_and_push(&pipelines, "nightly").await;
        services
            .storage
            .write_file("/work/params.yaml", Bytes::from_static(b"epochs: 5\n"))
            .await
            .unwrap();

        let jobs = pipelines
            .run(&pushed, Some(Path::new("/work/params.yaml")), true)
            .await
            .unwrap();
        assert_eq!(jobs[0].state, "PIPELINE_STATE_SUCCEEDED");

        let calls = services.platform.calls();
        let PlatformCall::SubmitPipeline(ctx, request) = &calls[0] else {
            panic!("unexpected call {:?}", calls[0]);
        };
        assert_eq!(ctx.project, "proj");
        assert!(request.job_id.starts_with("pipeline-nightly-"));
        assert_eq!(request.parameter_values["epochs"], json!(5));
        assert_eq!(request.parameter_values["lr"], json!(0.1));
        assert_eq!(request.pipeline_spec["pipelineInfo"]["name"], "nightly");
        assert!(matches!(calls[1], PlatformCall::Wait(_)));
        assert!(matches!(calls[2], PlatformCall::Summary(_)));
    }

    #[tokio::test]
    async fn async_run_does_not_wait() {
        let (services, pipelines) = setup(MockPlatform::default()).await;
        let pushed = build_and_push(&pipelines, "adhoc").await;

        pipelines.run(&pushed, None, false).await.unwrap();
        assert_eq!(services.platform.calls().len(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_confirmed_pipeline_jobs() {
        let platform = MockPlatform::with_jobs([RemoteJob {
            family: JobFamily::PipelineJob,
            name: "projects/proj/locations/europe-west1/pipelineJobs/pipeline-nightly-1".into(),
            display_name: "nightly".into(),
            state: PipelineState::Running.as_str().into(),
            create_time: None,
            error: None,
        }]);
        let (services, pipelines) = setup(platform).await;

        assert_eq!(pipelines.stop("nightly", &AlwaysConfirm(true)).await.unwrap(), 1);
        assert_eq!(
            services.platform.cancelled(),
            vec!["projects/proj/locations/europe-west1/pipelineJobs/pipeline-nightly-1"]
        );
    }
}
