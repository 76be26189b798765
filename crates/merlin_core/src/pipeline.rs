use crate::constants::{defaults, files, labels};
use crate::error::{ConfigError, ManifestError, RegistryError};
use crate::manifest::kebab;
use crate::normalize::to_snake_case;
use crate::platform::{ImageTags, PipelineJobRequest, PlatformContext, network_path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// A pipeline as declared in `merlin.yaml`, enriched with the gcp profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    pub project_id: String,
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Compiled pipeline template, relative to the working directory.
    pub pipeline_spec: String,
    /// Default parameter values passed to every run.
    #[serde(default)]
    pub pipeline_params: Map<String, Value>,
    #[serde(default)]
    pub docker_image_ref: Vec<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub tensorboard_ref: Option<String>,
    #[serde(default = "enabled")]
    pub enable_caching: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Five-field cron expression.
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Identity used for the scheduler's OIDC token. Falls back to the pipeline's.
    #[serde(default)]
    pub service_account: Option<String>,
}

fn default_timezone() -> String {
    defaults::TIMEZONE.to_string()
}

impl PipelineConfig {
    pub fn context(&self) -> PlatformContext {
        PlatformContext::new(&self.project_id, &self.region)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| {
            Err(ConfigError::Invalid(format!("pipeline {}: {msg}", self.name)))
        };

        if !valid_resource_name(&self.name) {
            return invalid(
                "name must be 3-63 characters of lowercase letters, digits and dashes, starting with a letter",
            );
        }

        if let Some(schedule) = &self.schedule {
            if schedule.cron.split_whitespace().count() != 5 {
                return invalid("schedule cron must have five fields");
            }
            if schedule.service_account.is_none() && self.service_account.is_none() {
                return invalid("a scheduled pipeline needs a service_account");
            }
        }

        if self.tensorboard_ref.is_some() && self.service_account.is_none() {
            return invalid("service_account must be set when using tensorboard in pipelines");
        }

        Ok(())
    }
}

fn valid_resource_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    (3..=63).contains(&bytes.len())
        && bytes[0].is_ascii_lowercase()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[bytes.len() - 1] != b'-'
}

/// Locations of a pipeline's build and deployment artifacts.
///
/// Local paths live under `{workdir}/build`, remote ones under `gs://{bucket}`; both share the
/// `merlin-pipelines/{kebab(name)}` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    local_root: String,
    remote_root: String,
}

impl PipelinePaths {
    pub fn new(workdir: &Path, bucket: &str, pipeline_name: &str) -> Self {
        let dir = format!("merlin-pipelines/{}", kebab(pipeline_name));
        Self {
            local_root: format!("{}/{}/{dir}", workdir.display(), files::BUILD_DIR),
            remote_root: format!("gs://{}/{dir}", bucket.trim_start_matches("gs://")),
        }
    }

    fn root(&self, local: bool) -> &str {
        if local {
            &self.local_root
        } else {
            &self.remote_root
        }
    }

    pub fn deployment_dir(&self, local: bool, version: &str) -> String {
        format!("{}/deployment/{version}", self.root(local))
    }

    pub fn manifests_dir(&self, local: bool, version: &str) -> String {
        format!("{}/manifests", self.deployment_dir(local, version))
    }

    pub fn json_spec(&self, local: bool, version: &str) -> String {
        format!("{}/{}", self.manifests_dir(local, version), files::PIPELINE_SPEC)
    }

    pub fn manifest(&self, local: bool, version: &str) -> String {
        format!(
            "{}/{}",
            self.manifests_dir(local, version),
            files::PIPELINE_MANIFEST
        )
    }

    /// Where the trigger function's source archive is uploaded.
    pub fn function_package(&self, local: bool, version: &str) -> String {
        format!(
            "{}/functions/{}",
            self.deployment_dir(local, version),
            files::FUNCTION_PACKAGE
        )
    }

    pub fn pipeline_root(&self) -> String {
        format!("{}/executions/", self.remote_root)
    }
}

/// The built form of a pipeline, pushed next to its compiled template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineManifest {
    pub pipeline_name: String,
    pub project: String,
    pub location: String,
    pub pipeline_root: String,
    /// Where the compiled template of this manifest lives.
    pub json_spec_path: String,
    #[serde(default)]
    pub parameter_values: Map<String, Value>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "enabled")]
    pub enable_caching: bool,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub image_refs: Vec<String>,
    /// Values the template was compiled against.
    #[serde(default)]
    pub compile_env_params: BTreeMap<String, String>,
    #[serde(default)]
    pub tensorboard: Option<String>,
}

impl PipelineManifest {
    /// Builds the manifest of a validated pipeline whose template sits at `json_spec_path`.
    ///
    /// `project_number` expands the network name handed to the template compiler; it is only
    /// needed when the pipeline has a network.
    pub fn from_config(
        config: &PipelineConfig,
        paths: &PipelinePaths,
        json_spec_path: String,
        version: &str,
        images: &BTreeMap<String, ImageTags>,
        tensorboard: Option<String>,
        project_number: Option<&str>,
    ) -> Result<Self, ManifestError> {
        let mut pipeline_labels = config.labels.clone();
        pipeline_labels.insert(labels::PIPELINE.to_string(), config.name.clone());

        let pipeline_root = paths.pipeline_root();
        let mut env = BTreeMap::from([
            ("project_id".to_string(), config.project_id.clone()),
            ("pipeline_name".to_string(), config.name.clone()),
            ("version".to_string(), version.to_string()),
            ("bucket".to_string(), format!("gs://{}", config.bucket)),
            ("region".to_string(), config.region.clone()),
            ("pipeline_root".to_string(), pipeline_root.clone()),
            (
                "pipeline_labels".to_string(),
                serde_json::to_string(&pipeline_labels)?,
            ),
            (
                "pipeline_network".to_string(),
                expand_network(config.network.as_deref(), project_number).unwrap_or_default(),
            ),
            (
                "pipeline_service_account".to_string(),
                config.service_account.clone().unwrap_or_default(),
            ),
        ]);
        if let Some(board) = &tensorboard {
            env.insert("tensorboard".to_string(), board.clone());
        }
        for r in &config.docker_image_ref {
            let tags = images
                .get(r)
                .ok_or_else(|| RegistryError::UnknownRef(r.clone()))?;
            env.insert(format!("{}_docker_uri", to_snake_case(r)), tags.pushed_uri.clone());
        }

        Ok(Self {
            pipeline_name: config.name.clone(),
            project: config.project_id.clone(),
            location: config.region.clone(),
            pipeline_root,
            json_spec_path,
            parameter_values: config.pipeline_params.clone(),
            labels: pipeline_labels,
            enable_caching: config.enable_caching,
            service_account: config.service_account.clone(),
            network: config.network.clone(),
            schedule: config.schedule.clone(),
            image_refs: config.docker_image_ref.clone(),
            compile_env_params: env,
            tensorboard,
        })
    }

    pub fn context(&self) -> PlatformContext {
        PlatformContext::new(&self.project, &self.location)
    }

    /// Compile params as environment variables, e.g. `MY_PIPELINE_PIPELINE_ROOT`.
    pub fn compile_env_vars(&self) -> BTreeMap<String, String> {
        let prefix = to_snake_case(&self.pipeline_name).replace('-', "_").to_uppercase();
        self.compile_env_params
            .iter()
            .map(|(k, v)| {
                let key = if k.ends_with("_docker_uri") {
                    k.to_uppercase()
                } else {
                    format!("{prefix}_{}", k.to_uppercase())
                };
                (key, v.clone())
            })
            .collect()
    }

    /// Parameter values with `overrides` applied on top.
    pub fn merged_parameters(&self, overrides: Option<&Map<String, Value>>) -> Map<String, Value> {
        let mut params = self.parameter_values.clone();
        if let Some(extra) = overrides {
            for (k, v) in extra {
                params.insert(k.clone(), v.clone());
            }
        }
        params
    }

    /// The run request for this pipeline, identified by `pipeline-{name}-{timestamp}`.
    pub fn job_request(
        &self,
        pipeline_spec: Value,
        overrides: Option<&Map<String, Value>>,
        timestamp: &str,
        project_number: Option<&str>,
    ) -> PipelineJobRequest {
        PipelineJobRequest {
            job_id: format!("pipeline-{}-{timestamp}", self.pipeline_name),
            display_name: self.pipeline_name.clone(),
            pipeline_spec,
            pipeline_root: self.pipeline_root.clone(),
            parameter_values: self.merged_parameters(overrides),
            labels: self.labels.clone(),
            enable_caching: self.enable_caching,
            service_account: self.service_account.clone(),
            network: expand_network(self.network.as_deref(), project_number),
        }
    }

    /// Name of the trigger function and the scheduler job for `env`.
    pub fn deployment_name(&self, env: &str) -> String {
        format!("{}-{env}", self.pipeline_name)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(|e| ManifestError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

fn expand_network(network: Option<&str>, project_number: Option<&str>) -> Option<String> {
    let network = network?;
    Some(match project_number {
        Some(number) => network_path(number, network),
        None => network.to_string(),
    })
}

/// Parses a YAML parameter file used to override parameter values at run time.
pub fn parse_params(yaml: &str) -> Result<Map<String, Value>, ConfigError> {
    let value: Value = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(ConfigError::Invalid(
            "pipeline params must be a mapping of names to values".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> PipelineConfig {
        serde_json::from_value(json!({
            "name": "sklearn-sample",
            "project_id": "proj",
            "region": "europe-west1",
            "bucket": "merlin-ml",
            "service_account": "sa@proj.iam.gserviceaccount.com",
            "labels": {"team": "ml"},
            "pipeline_spec": "pipeline/spec.json",
            "pipeline_params": {"eval_acc_threshold": 0.8, "epochs": 3},
            "docker_image_ref": ["trainer"],
            "schedule": {"cron": "2 * * * *"}
        }))
        .unwrap()
    }

    fn images() -> BTreeMap<String, ImageTags> {
        BTreeMap::from([(
            "trainer".to_string(),
            ImageTags {
                local_tag: "l".into(),
                remote_tag: "r".into(),
                pushed_uri: "europe-docker.pkg.dev/proj/repo/trainer:dev".into(),
            },
        )])
    }

    #[test]
    fn schedule_defaults_and_validation() {
        let cfg = config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.enable_caching);
        assert_eq!(cfg.schedule.as_ref().unwrap().timezone, "Etc/UTC");

        let mut bad = cfg.clone();
        bad.schedule.as_mut().unwrap().cron = "every hour".into();
        assert!(bad.validate().is_err());

        let mut unnamed = cfg;
        unnamed.name = "Bad_Name".into();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn paths_layout() {
        let paths = PipelinePaths::new(Path::new("/w"), "merlin-ml", "sklearn_sample");
        assert_eq!(
            paths.json_spec(false, "1.0.0"),
            "gs://merlin-ml/merlin-pipelines/sklearn-sample/deployment/1.0.0/manifests/pipeline-spec.json"
        );
        assert_eq!(
            paths.manifest(true, "dev"),
            "/w/build/merlin-pipelines/sklearn-sample/deployment/dev/manifests/merlin-manifest.json"
        );
        assert_eq!(
            paths.function_package(false, "dev"),
            "gs://merlin-ml/merlin-pipelines/sklearn-sample/deployment/dev/functions/package.zip"
        );
        assert_eq!(
            paths.pipeline_root(),
            "gs://merlin-ml/merlin-pipelines/sklearn-sample/executions/"
        );
    }

    #[test]
    fn manifest_carries_compile_params_and_labels() {
        let cfg = config();
        let paths = PipelinePaths::new(Path::new("/w"), &cfg.bucket, &cfg.name);
        let manifest = PipelineManifest::from_config(
            &cfg,
            &paths,
            paths.json_spec(true, "dev"),
            "dev",
            &images(),
            None,
            None,
        )
        .unwrap();

        assert_eq!(manifest.labels["merlin_pipeline"], "sklearn-sample");
        assert_eq!(manifest.labels["team"], "ml");
        assert_eq!(
            manifest.compile_env_params["trainer_docker_uri"],
            "europe-docker.pkg.dev/proj/repo/trainer:dev"
        );
        assert_eq!(manifest.compile_env_params["bucket"], "gs://merlin-ml");
        assert!(!manifest.compile_env_params.contains_key("tensorboard"));

        let vars = manifest.compile_env_vars();
        assert_eq!(
            vars["SKLEARN_SAMPLE_PIPELINE_ROOT"],
            "gs://merlin-ml/merlin-pipelines/sklearn-sample/executions/"
        );
        assert!(vars.contains_key("TRAINER_DOCKER_URI"));

        let back = PipelineManifest::from_bytes("m", &manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn undeclared_image_fails_the_build() {
        let cfg = config();
        let paths = PipelinePaths::new(Path::new("/w"), &cfg.bucket, &cfg.name);
        let err = PipelineManifest::from_config(
            &cfg,
            &paths,
            "spec".into(),
            "dev",
            &BTreeMap::new(),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Registry(RegistryError::UnknownRef(_))));
    }

    #[test]
    fn run_request_applies_overrides() {
        let cfg = config();
        let paths = PipelinePaths::new(Path::new("/w"), &cfg.bucket, &cfg.name);
        let manifest =
            PipelineManifest::from_config(&cfg, &paths, "spec".into(), "dev", &images(), None, None)
                .unwrap();

        let overrides = parse_params("epochs: 10\nextra: yes-please\n").unwrap();
        let req = manifest.job_request(json!({}), Some(&overrides), "20240101120000", None);

        assert_eq!(req.job_id, "pipeline-sklearn-sample-20240101120000");
        assert_eq!(req.parameter_values["epochs"], json!(10));
        assert_eq!(req.parameter_values["eval_acc_threshold"], json!(0.8));
        assert_eq!(req.parameter_values["extra"], json!("yes-please"));
        assert_eq!(manifest.deployment_name("prod"), "sklearn-sample-prod");
    }

    #[test]
    fn network_is_addressed_by_project_number() {
        let mut cfg = config();
        cfg.network = Some("ml-vpc".into());
        let paths = PipelinePaths::new(Path::new("/w"), &cfg.bucket, &cfg.name);
        let manifest = PipelineManifest::from_config(
            &cfg,
            &paths,
            "spec".into(),
            "dev",
            &images(),
            None,
            Some("123456789012"),
        )
        .unwrap();

        assert_eq!(manifest.network.as_deref(), Some("ml-vpc"));
        assert_eq!(
            manifest.compile_env_params["pipeline_network"],
            "projects/123456789012/global/networks/ml-vpc"
        );

        let req = manifest.job_request(json!({}), None, "1", Some("123456789012"));
        assert_eq!(
            req.network.as_deref(),
            Some("projects/123456789012/global/networks/ml-vpc")
        );
    }

    #[test]
    fn full_network_paths_are_kept() {
        let mut cfg = config();
        cfg.network = Some("projects/42/global/networks/ml-vpc".into());
        let paths = PipelinePaths::new(Path::new("/w"), &cfg.bucket, &cfg.name);
        let manifest =
            PipelineManifest::from_config(&cfg, &paths, "spec".into(), "dev", &images(), None, None)
                .unwrap();

        let req = manifest.job_request(json!({}), None, "1", None);
        assert_eq!(req.network.as_deref(), Some("projects/42/global/networks/ml-vpc"));
    }

    #[test]
    fn params_file_must_be_a_mapping() {
        assert!(parse_params("- a\n- b\n").is_err());
        assert!(parse_params("{}").unwrap().is_empty());
    }
}
