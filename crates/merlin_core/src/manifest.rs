//! Job manifests: the fully resolved, serialized form of a job, written at build time and
//! read back to push and run it.

use crate::constants::{files, labels, urls};
use crate::error::{ManifestError, RegistryError};
use crate::job::{
    Goal, HyperparameterTuning, JobConfig, Parameter, ReductionServer, Scale, SearchAlgorithm,
    WorkerCode, WorkerPool, Workload,
};
use crate::normalize::{KeyCase, normalize, to_snake_case};
use crate::platform::{
    ContainerSpec, CustomJobResource, CustomJobSpec, DiskSpec, GcsDestination,
    HyperparameterTuningJobResource, ImageTags, JobSubmission, MachineSpec, MetricGoal,
    PlatformContext, PythonPackageSpec, Scheduling, StudySpec, TrainingPipelineResource,
    WorkerPoolSpec,
};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Fields every manifest variant carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestBody<P> {
    pub job_config: JobConfig,
    pub image_refs: Vec<String>,
    pub job_payload: P,
    /// Resolved tensorboard resource name.
    #[serde(default)]
    pub tensorboard: Option<String>,
}

/// A built job. The `job_type` tag decides how `job_payload` is read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum JobManifest {
    CustomJob(ManifestBody<CustomJobPayload>),
    CustomPythonPackageTrainingJob(ManifestBody<PythonPackagePayload>),
    CustomContainerTrainingJob(ManifestBody<ContainerPayload>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomJobPayload {
    pub display_name: String,
    pub worker_pool_specs: Vec<WorkerPoolSpec>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub staging_bucket: String,
    #[serde(default)]
    pub study_spec: Option<StudySpec>,
    #[serde(default)]
    pub max_trial_count: Option<u32>,
    #[serde(default)]
    pub parallel_trial_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonPackagePayload {
    pub display_name: String,
    pub python_package_gcs_uri: String,
    pub python_module_name: String,
    /// Executor image.
    pub container_uri: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub staging_bucket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerPayload {
    pub display_name: String,
    pub container_uri: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub staging_bucket: String,
}

impl JobManifest {
    /// Builds the manifest of a validated job.
    ///
    /// `images` must hold the resolved tags of every ref in [`JobConfig::image_refs`].
    pub fn from_config(
        config: &JobConfig,
        images: &BTreeMap<String, ImageTags>,
        tensorboard: Option<String>,
    ) -> Result<Self, RegistryError> {
        let uri = |r: &str| {
            images
                .get(r)
                .map(|tags| tags.pushed_uri.clone())
                .ok_or_else(|| RegistryError::UnknownRef(r.to_string()))
        };

        let mut job_labels = config.labels.clone();
        job_labels.insert(labels::JOB.to_string(), kebab(&config.name));
        let staging_bucket = format!("gs://{}", config.bucket);
        let image_refs = config.image_refs();

        let manifest = match &config.workload {
            Workload::Custom { workers, hp_tuning } => {
                let worker_pool_specs = workers
                    .iter()
                    .map(|w| Ok(worker_pool_spec(w, &uri(w.code.docker_image_ref())?)))
                    .collect::<Result<Vec<_>, RegistryError>>()?;

                JobManifest::CustomJob(ManifestBody {
                    job_config: config.clone(),
                    image_refs,
                    job_payload: CustomJobPayload {
                        display_name: config.name.clone(),
                        worker_pool_specs,
                        labels: job_labels,
                        staging_bucket,
                        study_spec: hp_tuning.as_ref().map(study_spec),
                        max_trial_count: hp_tuning.as_ref().map(|hp| hp.max_trial_count),
                        parallel_trial_count: hp_tuning.as_ref().map(|hp| hp.parallel_trial_count),
                    },
                    tensorboard,
                })
            }
            Workload::Training { worker, .. } => match &worker.code {
                WorkerCode::PythonPackage(code) => {
                    JobManifest::CustomPythonPackageTrainingJob(ManifestBody {
                        job_config: config.clone(),
                        image_refs,
                        job_payload: PythonPackagePayload {
                            display_name: config.name.clone(),
                            python_package_gcs_uri: code.package_gcs_uri.clone(),
                            python_module_name: code.module_name.clone(),
                            container_uri: uri(&code.docker_image_ref)?,
                            labels: job_labels,
                            staging_bucket,
                        },
                        tensorboard,
                    })
                }
                WorkerCode::Container(code) => {
                    JobManifest::CustomContainerTrainingJob(ManifestBody {
                        job_config: config.clone(),
                        image_refs,
                        job_payload: ContainerPayload {
                            display_name: config.name.clone(),
                            container_uri: uri(&code.docker_image_ref)?,
                            command: code.command.clone(),
                            labels: job_labels,
                            staging_bucket,
                        },
                        tensorboard,
                    })
                }
            },
        };

        Ok(manifest)
    }

    pub fn job_type(&self) -> &'static str {
        match self {
            JobManifest::CustomJob(_) => "CustomJob",
            JobManifest::CustomPythonPackageTrainingJob(_) => "CustomPythonPackageTrainingJob",
            JobManifest::CustomContainerTrainingJob(_) => "CustomContainerTrainingJob",
        }
    }

    pub fn config(&self) -> &JobConfig {
        match self {
            JobManifest::CustomJob(b) => &b.job_config,
            JobManifest::CustomPythonPackageTrainingJob(b) => &b.job_config,
            JobManifest::CustomContainerTrainingJob(b) => &b.job_config,
        }
    }

    pub fn image_refs(&self) -> &[String] {
        match self {
            JobManifest::CustomJob(b) => &b.image_refs,
            JobManifest::CustomPythonPackageTrainingJob(b) => &b.image_refs,
            JobManifest::CustomContainerTrainingJob(b) => &b.image_refs,
        }
    }

    pub fn tensorboard(&self) -> Option<&str> {
        match self {
            JobManifest::CustomJob(b) => b.tensorboard.as_deref(),
            JobManifest::CustomPythonPackageTrainingJob(b) => b.tensorboard.as_deref(),
            JobManifest::CustomContainerTrainingJob(b) => b.tensorboard.as_deref(),
        }
    }

    /// Project and region of the job, taken from the manifest itself.
    pub fn context(&self) -> PlatformContext {
        self.config().context()
    }

    /// The request the platform receives for this manifest.
    pub fn submission(&self) -> JobSubmission {
        let config = self.config();
        let tensorboard = self.tensorboard().map(str::to_string);

        match self {
            JobManifest::CustomJob(body) => {
                let p = &body.job_payload;
                let job_spec = job_spec(config, p.worker_pool_specs.clone(), tensorboard);

                match &p.study_spec {
                    Some(study) => {
                        JobSubmission::HyperparameterTuning(HyperparameterTuningJobResource {
                            display_name: p.display_name.clone(),
                            study_spec: study.clone(),
                            max_trial_count: p
                                .max_trial_count
                                .unwrap_or(crate::constants::defaults::MAX_TRIAL_COUNT),
                            parallel_trial_count: p
                                .parallel_trial_count
                                .unwrap_or(crate::constants::defaults::PARALLEL_TRIAL_COUNT),
                            trial_job_spec: job_spec,
                            labels: p.labels.clone(),
                        })
                    }
                    None => JobSubmission::Custom(CustomJobResource {
                        display_name: p.display_name.clone(),
                        job_spec,
                        labels: p.labels.clone(),
                    }),
                }
            }
            JobManifest::CustomPythonPackageTrainingJob(body) => {
                let p = &body.job_payload;
                let mut pool = worker_pool_spec(training_worker(config), &p.container_uri);
                pool.container_spec = None;
                pool.python_package_spec = Some(PythonPackageSpec {
                    executor_image_uri: p.container_uri.clone(),
                    package_uris: vec![p.python_package_gcs_uri.clone()],
                    python_module: p.python_module_name.clone(),
                    args: training_worker(config).args.clone(),
                    env: training_worker(config).env.clone(),
                });
                training_submission(config, &p.display_name, &p.labels, pool, tensorboard)
            }
            JobManifest::CustomContainerTrainingJob(body) => {
                let p = &body.job_payload;
                let mut pool = worker_pool_spec(training_worker(config), &p.container_uri);
                if let Some(spec) = pool.container_spec.as_mut() {
                    spec.command = p.command.clone();
                }
                training_submission(config, &p.display_name, &p.labels, pool, tensorboard)
            }
        }
    }

    /// Serializes with nulls dropped and keys in `snake_case`.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        Ok(normalize(serde_json::to_value(self)?, KeyCase::Snake))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&self.to_json()?)
    }

    /// Reads a manifest back. `path` only labels the error.
    ///
    /// The `job_type` tag must agree with the workload recorded in `job_config`.
    pub fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, ManifestError> {
        let malformed = |reason: String| ManifestError::Malformed {
            path: path.to_string(),
            reason,
        };

        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
        if !manifest.tag_matches_workload() {
            return Err(malformed(format!(
                "job_type {} does not match the job_config workload",
                manifest.job_type()
            )));
        }
        Ok(manifest)
    }

    fn tag_matches_workload(&self) -> bool {
        match (self, &self.config().workload) {
            (JobManifest::CustomJob(_), Workload::Custom { .. }) => true,
            (JobManifest::CustomPythonPackageTrainingJob(_), Workload::Training { worker, .. }) => {
                matches!(worker.code, WorkerCode::PythonPackage(_))
            }
            (JobManifest::CustomContainerTrainingJob(_), Workload::Training { worker, .. }) => {
                matches!(worker.code, WorkerCode::Container(_))
            }
            _ => false,
        }
    }

    /// Console page of the job once it exists remotely.
    pub fn dashboard_url(&self, remote_id: &str) -> String {
        let ctx = self.context();
        urls::training_dashboard(&ctx.project, &ctx.region, remote_id)
    }
}

fn training_worker(config: &JobConfig) -> &WorkerPool {
    match &config.workload {
        Workload::Training { worker, .. } => worker,
        // Unreachable for manifests that went through `from_config` or `from_bytes`.
        Workload::Custom { workers, .. } => &workers[0],
    }
}

fn training_submission(
    config: &JobConfig,
    display_name: &str,
    labels: &BTreeMap<String, String>,
    pool: WorkerPoolSpec,
    tensorboard: Option<String>,
) -> JobSubmission {
    let reduction_server = match &config.workload {
        Workload::Training {
            reduction_server, ..
        } => reduction_server.as_ref(),
        Workload::Custom { .. } => None,
    };

    let pools = split_replicas(pool, reduction_server);
    JobSubmission::TrainingPipeline(TrainingPipelineResource {
        display_name: display_name.to_string(),
        training_task_definition: urls::CUSTOM_TASK_DEFINITION.to_string(),
        training_task_inputs: job_spec(config, pools, tensorboard),
        labels: labels.clone(),
    })
}

/// Chief pool with one replica, then the remaining replicas, then the reduction server.
fn split_replicas(pool: WorkerPoolSpec, reduction: Option<&ReductionServer>) -> Vec<WorkerPoolSpec> {
    let replicas = pool.replica_count;
    let mut pools = vec![WorkerPoolSpec {
        replica_count: 1,
        ..pool.clone()
    }];

    if replicas > 1 || reduction.is_some() {
        pools.push(WorkerPoolSpec {
            replica_count: replicas.saturating_sub(1),
            ..pool
        });
    }

    if let Some(server) = reduction {
        pools.push(WorkerPoolSpec {
            machine_spec: MachineSpec {
                machine_type: server.machine_type.clone(),
                accelerator_type: None,
                accelerator_count: None,
            },
            replica_count: server.replica_count,
            disk_spec: None,
            container_spec: Some(ContainerSpec {
                image_uri: server.container_uri.clone(),
                command: Vec::new(),
                args: Vec::new(),
                env: Vec::new(),
            }),
            python_package_spec: None,
        });
    }

    pools
}

fn job_spec(
    config: &JobConfig,
    worker_pool_specs: Vec<WorkerPoolSpec>,
    tensorboard: Option<String>,
) -> CustomJobSpec {
    CustomJobSpec {
        worker_pool_specs,
        scheduling: Scheduling::from_seconds(config.timeout_seconds),
        base_output_directory: GcsDestination {
            output_uri_prefix: config.base_output_directory.clone(),
        },
        service_account: config.service_account.clone(),
        network: config.network.clone(),
        tensorboard,
        enable_web_access: config.enable_web_access,
    }
}

/// Platform shape of one worker pool running from `image_uri`.
pub fn worker_pool_spec(pool: &WorkerPool, image_uri: &str) -> WorkerPoolSpec {
    let (container_spec, python_package_spec) = match &pool.code {
        WorkerCode::Container(code) => (
            Some(ContainerSpec {
                image_uri: image_uri.to_string(),
                command: code.command.clone(),
                args: pool.args.clone(),
                env: pool.env.clone(),
            }),
            None,
        ),
        WorkerCode::PythonPackage(code) => (
            None,
            Some(PythonPackageSpec {
                executor_image_uri: image_uri.to_string(),
                package_uris: vec![code.package_gcs_uri.clone()],
                python_module: code.module_name.clone(),
                args: pool.args.clone(),
                env: pool.env.clone(),
            }),
        ),
    };

    WorkerPoolSpec {
        machine_spec: MachineSpec {
            machine_type: pool.machine_type.clone(),
            accelerator_type: pool.gpu.as_ref().map(|g| g.accelerator_type.clone()),
            accelerator_count: pool.gpu.as_ref().map(|g| g.count),
        },
        replica_count: pool.replica_count,
        disk_spec: pool.boot_disk.as_ref().map(|d| DiskSpec {
            boot_disk_type: d.disk_type.clone(),
            boot_disk_size_gb: d.size_gb,
        }),
        container_spec,
        python_package_spec,
    }
}

fn study_spec(hp: &HyperparameterTuning) -> StudySpec {
    let scale = |s: &Scale| match s {
        Scale::Linear => "UNIT_LINEAR_SCALE",
        Scale::Log => "UNIT_LOG_SCALE",
    };

    let parameters = hp
        .parameters
        .iter()
        .map(|p| match p {
            Parameter::Integer {
                var_name,
                min,
                max,
                scale: s,
            } => json!({
                "parameter_id": var_name,
                "integer_value_spec": {"min_value": min, "max_value": max},
                "scale_type": scale(s),
            }),
            Parameter::Double {
                var_name,
                min,
                max,
                scale: s,
            } => json!({
                "parameter_id": var_name,
                "double_value_spec": {"min_value": min, "max_value": max},
                "scale_type": scale(s),
            }),
            Parameter::Categorical { var_name, values } => json!({
                "parameter_id": var_name,
                "categorical_value_spec": {"values": values},
            }),
            Parameter::Discrete {
                var_name,
                values,
                scale: s,
            } => json!({
                "parameter_id": var_name,
                "discrete_value_spec": {"values": values},
                "scale_type": scale(s),
            }),
        })
        .collect();

    StudySpec {
        metrics: hp
            .metrics
            .iter()
            .map(|m| MetricGoal {
                metric_id: m.metric_id.clone(),
                goal: match m.goal {
                    Goal::Maximize => "MAXIMIZE".to_string(),
                    Goal::Minimize => "MINIMIZE".to_string(),
                },
            })
            .collect(),
        parameters,
        algorithm: hp.search_algorithm.map(|a| {
            match a {
                SearchAlgorithm::Grid => "GRID_SEARCH",
                SearchAlgorithm::Random => "RANDOM_SEARCH",
            }
            .to_string()
        }),
    }
}

/// `train_model` -> `train-model`
pub fn kebab(name: &str) -> String {
    to_snake_case(name).replace(['_', ' '], "-")
}

/// `{workdir}/build/jobs/{kebab(name)}/job-manifest.json`
pub fn local_manifest_path(workdir: &Path, name: &str) -> PathBuf {
    workdir
        .join(files::BUILD_DIR)
        .join("jobs")
        .join(kebab(name))
        .join(files::JOB_MANIFEST)
}

/// `gs://{bucket}/jobs/{kebab(name)}/deployment/release/{version}/job-manifest.json`
pub fn release_manifest_uri(bucket: &str, name: &str, version: &str) -> String {
    format!(
        "gs://{bucket}/jobs/{}/deployment/release/{version}/{}",
        kebab(name),
        files::JOB_MANIFEST
    )
}

/// Local counterpart of [`release_manifest_uri`], next to the built manifest.
pub fn local_release_path(workdir: &Path, name: &str, version: &str) -> PathBuf {
    workdir
        .join(files::BUILD_DIR)
        .join("jobs")
        .join(kebab(name))
        .join("deployment")
        .join("release")
        .join(version)
        .join(files::JOB_MANIFEST)
}
