//! `merlin.yaml` loading.
//!
//! Sources, later ones winning:
//! 1. the YAML file
//! 2. environment variables prefixed with `MERLIN_`, nested with `__`
//!    (e.g. `MERLIN_GCP_PROFILE__BUCKET`)
//!
//! Jobs and pipelines inherit `project_id`, `region`, `bucket`, `service_account` and `network`
//! from `gcp_profile` when they do not set them; labels are merged with the instance winning.

use crate::error::ConfigError;
use crate::job::JobConfig;
use crate::pipeline::PipelineConfig;
use crate::platform::PlatformContext;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Selects every instance of a kind.
pub const ALL: &str = "all";

#[derive(Debug, Clone, PartialEq)]
pub struct MerlinConfig {
    pub project: ProjectSettings,
    pub gcp_profile: GcpProfile,
    pub docker: DockerSettings,
    pub tensorboards: Vec<TensorboardConfig>,
    pub jobs: Vec<JobConfig>,
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpProfile {
    pub project_id: String,
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub bucket: String,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerSettings {
    /// Registry host. Defaults to `{region}-docker.pkg.dev`.
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub images: Vec<DockerImage>,
}

/// An image jobs and pipelines can refer to by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "build_type", rename_all = "snake_case")]
pub enum DockerImage {
    /// Already pushed somewhere the platform can pull from.
    ProvidedImage { name: String, image_url: String },
    /// Built locally, then pushed to the configured repository.
    LocalBuild {
        name: String,
        #[serde(default = "default_context_dir")]
        context_dir: String,
        #[serde(default)]
        dockerfile: Option<String>,
    },
}

fn default_context_dir() -> String {
    ".".to_string()
}

impl DockerImage {
    pub fn name(&self) -> &str {
        match self {
            DockerImage::ProvidedImage { name, .. } | DockerImage::LocalBuild { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorboardConfig {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct RawConfig {
    project: ProjectSettings,
    gcp_profile: GcpProfile,
    #[serde(default)]
    docker: DockerSettings,
    #[serde(default)]
    tensorboards: Vec<TensorboardConfig>,
    #[serde(default)]
    jobs: Vec<Value>,
    #[serde(default)]
    pipelines: Vec<Value>,
}

const INHERITED: [&str; 5] = ["project_id", "region", "bucket", "service_account", "network"];

impl GcpProfile {
    /// Fills unset inherited fields of `instance` and merges labels.
    fn enrich(&self, mut instance: Value) -> Value {
        let Some(map) = instance.as_object_mut() else {
            return instance;
        };

        for key in INHERITED {
            let inherited = match key {
                "project_id" => Some(&self.project_id),
                "region" => Some(&self.region),
                "bucket" => Some(&self.bucket),
                "service_account" => self.service_account.as_ref(),
                _ => self.network.as_ref(),
            };
            let unset = map.get(key).is_none_or(Value::is_null);
            if let (true, Some(value)) = (unset, inherited) {
                map.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        if !self.labels.is_empty() {
            let mut labels: serde_json::Map<String, Value> = self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            if let Some(Value::Object(own)) = map.get("labels") {
                labels.extend(own.clone());
            }
            map.insert("labels".to_string(), Value::Object(labels));
        }

        instance
    }
}

impl MerlinConfig {
    /// Loads `path`, applies env overrides, enriches and validates every instance.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Parse(format!(
                "config file {} not found",
                path.display()
            )));
        }

        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("MERLIN_").split("__"));
        let config = Self::from_figment(figment)?;
        debug!(
            path = %path.display(),
            jobs = config.jobs.len(),
            pipelines = config.pipelines.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses a YAML document without consulting the environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::new().merge(Yaml::string(yaml)))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let raw: RawConfig = figment.extract()?;

        let jobs = raw
            .jobs
            .into_iter()
            .map(|job| {
                serde_json::from_value::<JobConfig>(raw.gcp_profile.enrich(job))
                    .map_err(|e| ConfigError::Invalid(format!("jobs: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pipelines = raw
            .pipelines
            .into_iter()
            .map(|p| {
                serde_json::from_value::<PipelineConfig>(raw.gcp_profile.enrich(p))
                    .map_err(|e| ConfigError::Invalid(format!("pipelines: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            project: raw.project,
            gcp_profile: raw.gcp_profile,
            docker: raw.docker,
            tensorboards: raw.tensorboards,
            jobs,
            pipelines,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        unique("job", self.jobs.iter().map(|j| j.name.as_str()))?;
        unique("pipeline", self.pipelines.iter().map(|p| p.name.as_str()))?;
        unique("docker image", self.docker.images.iter().map(DockerImage::name))?;
        unique("tensorboard", self.tensorboards.iter().map(|t| t.name.as_str()))?;

        let local_builds = self
            .docker
            .images
            .iter()
            .any(|i| matches!(i, DockerImage::LocalBuild { .. }));
        if local_builds && self.docker.repository.is_none() {
            return Err(ConfigError::Invalid(
                "docker.repository must be set when images are built locally".into(),
            ));
        }

        for job in &self.jobs {
            job.validate()?;
            for r in job.image_refs() {
                self.check_image(&format!("job {}", job.name), &r)?;
            }
            if let Some(board) = &job.tensorboard_ref {
                self.check_tensorboard(&format!("job {}", job.name), board)?;
            }
        }

        for pipeline in &self.pipelines {
            pipeline.validate()?;
            for r in &pipeline.docker_image_ref {
                self.check_image(&format!("pipeline {}", pipeline.name), r)?;
            }
            if let Some(board) = &pipeline.tensorboard_ref {
                self.check_tensorboard(&format!("pipeline {}", pipeline.name), board)?;
            }
        }

        Ok(())
    }

    fn check_image(&self, owner: &str, name: &str) -> Result<(), ConfigError> {
        match self.image(name) {
            Some(_) => Ok(()),
            None => Err(ConfigError::Invalid(format!(
                "{owner}: docker image `{name}` is not defined in the docker section"
            ))),
        }
    }

    fn check_tensorboard(&self, owner: &str, name: &str) -> Result<(), ConfigError> {
        match self.tensorboard(name) {
            Some(_) => Ok(()),
            None => Err(ConfigError::Invalid(format!(
                "{owner}: tensorboard `{name}` is not defined in the tensorboards section"
            ))),
        }
    }

    pub fn image(&self, name: &str) -> Option<&DockerImage> {
        self.docker.images.iter().find(|i| i.name() == name)
    }

    pub fn tensorboard(&self, name: &str) -> Option<&TensorboardConfig> {
        self.tensorboards.iter().find(|t| t.name == name)
    }

    /// The jobs selected by `name`, or all of them for [`ALL`].
    pub fn jobs(&self, name: &str) -> Result<Vec<&JobConfig>, ConfigError> {
        select("job", &self.jobs, name, |j| &j.name)
    }

    /// The pipelines selected by `name`, or all of them for [`ALL`].
    pub fn pipelines(&self, name: &str) -> Result<Vec<&PipelineConfig>, ConfigError> {
        select("pipeline", &self.pipelines, name, |p| &p.name)
    }

    /// The tensorboards selected by `name`, or all of them for [`ALL`].
    pub fn tensorboards(&self, name: &str) -> Result<Vec<&TensorboardConfig>, ConfigError> {
        select("tensorboard", &self.tensorboards, name, |t| &t.name)
    }

    /// Where the tensorboard lives: its own region when set, the profile's otherwise.
    pub fn tensorboard_context(&self, board: &TensorboardConfig) -> PlatformContext {
        PlatformContext::new(
            &self.gcp_profile.project_id,
            board.region.as_deref().unwrap_or(&self.gcp_profile.region),
        )
    }

    /// Project version, falling back to `dev`.
    pub fn version(&self) -> &str {
        self.project
            .version
            .as_deref()
            .unwrap_or(crate::constants::defaults::VERSION)
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!(
                "{kind} name `{name}` is used more than once"
            )));
        }
    }
    Ok(())
}

fn select<'a, T>(
    kind: &str,
    items: &'a [T],
    name: &str,
    key: impl Fn(&T) -> &String,
) -> Result<Vec<&'a T>, ConfigError> {
    if name == ALL {
        return Ok(items.iter().collect());
    }
    let found: Vec<&T> = items.iter().filter(|i| key(*i) == name).collect();
    if found.is_empty() {
        return Err(ConfigError::UnknownInstance {
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }
    Ok(found)
}
