use crate::constants::defaults;
use crate::error::ConfigError;
use crate::platform::PlatformContext;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A job as declared in `merlin.yaml`, enriched with the gcp profile and validated.
///
/// Deserialization goes through [`JobConfigDef`], so an instance that exists has passed
/// [`JobConfig::validate`]. Fields stay public; the builder re-validates before any remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JobConfigDef", into = "JobConfigDef")]
pub struct JobConfig {
    pub name: String,
    pub project_id: String,
    pub region: String,
    pub bucket: String,
    pub service_account: Option<String>,
    pub network: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub description: Option<String>,
    /// Defaults to `gs://{bucket}/jobs/{name}/outputs`.
    pub base_output_directory: String,
    /// Display name of a tensorboard instance to attach. Requires a service account.
    pub tensorboard_ref: Option<String>,
    pub timeout_seconds: u64,
    pub enable_web_access: bool,
    pub workload: Workload,
}

/// What the job runs, which decides the remote resource it becomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    /// A custom job: one or more worker pools, optionally wrapped into a hyperparameter search.
    Custom {
        workers: Vec<WorkerPool>,
        hp_tuning: Option<HyperparameterTuning>,
    },
    /// A custom training pipeline with a single worker pool.
    Training {
        worker: WorkerPool,
        reduction_server: Option<ReductionServer>,
    },
}

impl JobConfig {
    pub fn context(&self) -> PlatformContext {
        PlatformContext::new(&self.project_id, &self.region)
    }

    /// Every worker pool of the job, in declaration order.
    pub fn workers(&self) -> Vec<&WorkerPool> {
        match &self.workload {
            Workload::Custom { workers, .. } => workers.iter().collect(),
            Workload::Training { worker, .. } => vec![worker],
        }
    }

    /// Distinct docker image refs, in first-seen order.
    pub fn image_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        for worker in self.workers() {
            let r = worker.code.docker_image_ref();
            if !refs.iter().any(|x| x == r) {
                refs.push(r.to_string());
            }
        }
        refs
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(format!("job {}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("job name must not be empty".into()));
        }

        if self.tensorboard_ref.is_some() && self.service_account.is_none() {
            return invalid("service_account must be set when using tensorboard in jobs".into());
        }

        if self.timeout_seconds == 0 {
            return invalid("timeout_seconds must be positive".into());
        }

        match &self.workload {
            Workload::Custom { workers, hp_tuning } => {
                if workers.is_empty() {
                    return invalid("workers must not be empty".into());
                }
                let packages = workers
                    .iter()
                    .filter(|w| matches!(w.code, WorkerCode::PythonPackage(_)))
                    .count();
                if packages != 0 && packages != workers.len() {
                    return invalid(
                        "custom job workers must be of the same spec, either python_package or container"
                            .into(),
                    );
                }
                if let Some(hp) = hp_tuning {
                    hp.validate().or_else(invalid)?;
                }
            }
            Workload::Training { worker, .. } => {
                if worker.replica_count == 0 {
                    return invalid("worker replica_count must be positive".into());
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobConfigDef {
    name: String,
    project_id: Option<String>,
    region: Option<String>,
    bucket: Option<String>,
    service_account: Option<String>,
    network: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    description: Option<String>,
    base_output_directory: Option<String>,
    tensorboard_ref: Option<String>,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
    #[serde(default)]
    enable_web_access: bool,
    workers: Option<Vec<WorkerPool>>,
    hp_tuning: Option<HyperparameterTuning>,
    worker: Option<WorkerPool>,
    reduction_server: Option<ReductionServer>,
}

fn default_timeout() -> u64 {
    defaults::TIMEOUT_SECONDS
}

impl TryFrom<JobConfigDef> for JobConfig {
    type Error = ConfigError;

    fn try_from(def: JobConfigDef) -> Result<Self, Self::Error> {
        let instance = format!("job {}", def.name);
        let required = |value: Option<String>, field: &str| {
            value.ok_or_else(|| ConfigError::Missing {
                instance: instance.clone(),
                field: field.to_string(),
            })
        };

        let project_id = required(def.project_id, "project_id")?;
        let region = required(def.region, "region")?;
        let bucket = required(def.bucket, "bucket")?;

        let workload = match (def.workers, def.worker) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "{instance}: only one of workers or worker can be set"
                )));
            }
            (None, None) => {
                return Err(ConfigError::Invalid(format!(
                    "{instance}: one of workers or worker must be set"
                )));
            }
            (Some(workers), None) => {
                if def.reduction_server.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "{instance}: reduction_server is only supported with a single worker"
                    )));
                }
                Workload::Custom {
                    workers,
                    hp_tuning: def.hp_tuning,
                }
            }
            (None, Some(worker)) => {
                if def.hp_tuning.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "{instance}: hp_tuning is only supported with workers"
                    )));
                }
                Workload::Training {
                    worker,
                    reduction_server: def.reduction_server,
                }
            }
        };

        let base_output_directory = def
            .base_output_directory
            .unwrap_or_else(|| format!("gs://{}/jobs/{}/outputs", bucket, def.name));

        let config = JobConfig {
            name: def.name,
            project_id,
            region,
            bucket,
            service_account: def.service_account,
            network: def.network,
            labels: def.labels,
            description: def.description,
            base_output_directory,
            tensorboard_ref: def.tensorboard_ref,
            timeout_seconds: def.timeout_seconds,
            enable_web_access: def.enable_web_access,
            workload,
        };

        config.validate()?;
        Ok(config)
    }
}

impl From<JobConfig> for JobConfigDef {
    fn from(config: JobConfig) -> Self {
        let (workers, hp_tuning, worker, reduction_server) = match config.workload {
            Workload::Custom { workers, hp_tuning } => (Some(workers), hp_tuning, None, None),
            Workload::Training {
                worker,
                reduction_server,
            } => (None, None, Some(worker), reduction_server),
        };

        JobConfigDef {
            name: config.name,
            project_id: Some(config.project_id),
            region: Some(config.region),
            bucket: Some(config.bucket),
            service_account: config.service_account,
            network: config.network,
            labels: config.labels,
            description: config.description,
            base_output_directory: Some(config.base_output_directory),
            tensorboard_ref: config.tensorboard_ref,
            timeout_seconds: config.timeout_seconds,
            enable_web_access: config.enable_web_access,
            workers,
            hp_tuning,
            worker,
            reduction_server,
        }
    }
}

/// One homogeneous group of replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkerPoolDef", into = "WorkerPoolDef")]
pub struct WorkerPool {
    pub code: WorkerCode,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub machine_type: String,
    pub gpu: Option<Gpu>,
    pub boot_disk: Option<Disk>,
    pub replica_count: u32,
}

impl WorkerPool {
    pub fn container(docker_image_ref: impl Into<String>) -> Self {
        Self::with_code(WorkerCode::Container(ContainerCode {
            docker_image_ref: docker_image_ref.into(),
            command: Vec::new(),
        }))
    }

    pub fn python_package(
        docker_image_ref: impl Into<String>,
        package_gcs_uri: impl Into<String>,
        module_name: impl Into<String>,
    ) -> Self {
        Self::with_code(WorkerCode::PythonPackage(PythonPackageCode {
            docker_image_ref: docker_image_ref.into(),
            package_gcs_uri: package_gcs_uri.into(),
            module_name: module_name.into(),
        }))
    }

    fn with_code(code: WorkerCode) -> Self {
        Self {
            code,
            args: Vec::new(),
            env: Vec::new(),
            machine_type: defaults::MACHINE_TYPE.to_string(),
            gpu: None,
            boot_disk: None,
            replica_count: 1,
        }
    }
}

/// Exactly one of these runs on a worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCode {
    Container(ContainerCode),
    PythonPackage(PythonPackageCode),
}

impl WorkerCode {
    pub fn docker_image_ref(&self) -> &str {
        match self {
            WorkerCode::Container(c) => &c.docker_image_ref,
            WorkerCode::PythonPackage(p) => &p.docker_image_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerCode {
    pub docker_image_ref: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PythonPackageCode {
    pub docker_image_ref: String,
    pub package_gcs_uri: String,
    pub module_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Gpu {
    /// e.g. `NVIDIA_TESLA_T4`
    pub accelerator_type: String,
    #[serde(default = "one")]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Disk {
    #[serde(default = "default_disk_type")]
    pub disk_type: String,
    #[serde(default = "default_disk_size")]
    pub size_gb: u32,
}

fn one() -> u32 {
    1
}

fn default_disk_type() -> String {
    "pd-ssd".to_string()
}

fn default_disk_size() -> u32 {
    100
}

fn default_machine_type() -> String {
    defaults::MACHINE_TYPE.to_string()
}

/// Env accepts the `{KEY: value}` form in configs; manifests store the list form so that
/// key normalization never touches variable names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum EnvDef {
    List(Vec<EnvVar>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerPoolDef {
    python_package: Option<PythonPackageCode>,
    container: Option<ContainerCode>,
    #[serde(default)]
    args: Vec<Value>,
    env: Option<EnvDef>,
    #[serde(default = "default_machine_type")]
    machine_type: String,
    gpu: Option<Gpu>,
    boot_disk: Option<Disk>,
    #[serde(default = "one")]
    replica_count: u32,
}

impl TryFrom<WorkerPoolDef> for WorkerPool {
    type Error = ConfigError;

    fn try_from(def: WorkerPoolDef) -> Result<Self, Self::Error> {
        let code = match (def.python_package, def.container) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "only one of python_package or container can be set".into(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "at least one of python_package or container must be set".into(),
                ));
            }
            (Some(package), None) => WorkerCode::PythonPackage(package),
            (None, Some(container)) => WorkerCode::Container(container),
        };

        let args = def
            .args
            .into_iter()
            .map(|arg| match arg {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(b.to_string()),
                other => Err(ConfigError::Invalid(format!(
                    "worker args must be strings or numbers, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let env = match def.env {
            None => Vec::new(),
            Some(EnvDef::List(list)) => list,
            Some(EnvDef::Map(map)) => map
                .into_iter()
                .map(|(name, value)| EnvVar { name, value })
                .collect(),
        };

        Ok(WorkerPool {
            code,
            args,
            env,
            machine_type: def.machine_type,
            gpu: def.gpu,
            boot_disk: def.boot_disk,
            replica_count: def.replica_count,
        })
    }
}

impl From<WorkerPool> for WorkerPoolDef {
    fn from(pool: WorkerPool) -> Self {
        let (python_package, container) = match pool.code {
            WorkerCode::PythonPackage(p) => (Some(p), None),
            WorkerCode::Container(c) => (None, Some(c)),
        };

        WorkerPoolDef {
            python_package,
            container,
            args: pool.args.into_iter().map(Value::String).collect(),
            env: (!pool.env.is_empty()).then_some(EnvDef::List(pool.env)),
            machine_type: pool.machine_type,
            gpu: pool.gpu,
            boot_disk: pool.boot_disk,
            replica_count: pool.replica_count,
        }
    }
}

/// Auxiliary pool aggregating gradients for distributed training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReductionServer {
    pub replica_count: u32,
    pub machine_type: String,
    pub container_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HyperparameterTuning {
    pub metrics: Vec<MetricSpec>,
    pub parameters: Vec<Parameter>,
    #[serde(default = "default_max_trials")]
    pub max_trial_count: u32,
    #[serde(default = "default_parallel_trials")]
    pub parallel_trial_count: u32,
    pub search_algorithm: Option<SearchAlgorithm>,
}

fn default_max_trials() -> u32 {
    defaults::MAX_TRIAL_COUNT
}

fn default_parallel_trials() -> u32 {
    defaults::PARALLEL_TRIAL_COUNT
}

impl HyperparameterTuning {
    fn validate(&self) -> Result<(), String> {
        if self.metrics.is_empty() {
            return Err("hp_tuning needs at least one metric".into());
        }
        if self.parameters.is_empty() {
            return Err("hp_tuning needs at least one parameter".into());
        }
        if self.parallel_trial_count == 0 || self.max_trial_count == 0 {
            return Err("hp_tuning trial counts must be positive".into());
        }
        for p in &self.parameters {
            match p {
                Parameter::Integer { var_name, min, max, .. } if min >= max => {
                    return Err(format!("parameter {var_name}: min must be lower than max"));
                }
                Parameter::Double { var_name, min, max, .. } if min >= max => {
                    return Err(format!("parameter {var_name}: min must be lower than max"));
                }
                Parameter::Categorical { var_name, values } if values.is_empty() => {
                    return Err(format!("parameter {var_name}: values must not be empty"));
                }
                Parameter::Discrete { var_name, values, .. } if values.is_empty() => {
                    return Err(format!("parameter {var_name}: values must not be empty"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    pub metric_id: String,
    pub goal: Goal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Maximize,
    Minimize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Linear,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchAlgorithm {
    Grid,
    Random,
}

/// One dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Parameter {
    Integer {
        var_name: String,
        min: i64,
        max: i64,
        #[serde(default)]
        scale: Scale,
    },
    Double {
        var_name: String,
        min: f64,
        max: f64,
        #[serde(default)]
        scale: Scale,
    },
    Categorical {
        var_name: String,
        values: Vec<String>,
    },
    Discrete {
        var_name: String,
        values: Vec<f64>,
        #[serde(default)]
        scale: Scale,
    },
}
