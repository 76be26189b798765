//! Request and response shapes exchanged with the managed ML platform and its neighbours.
//!
//! Field names follow the platform's proto field names (`snake_case`), which its JSON
//! transcoding accepts alongside `lowerCamelCase`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Project and region every remote call is scoped to.
///
/// Always derived from the manifest or config at hand, never from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformContext {
    pub project: String,
    pub region: String,
}

impl PlatformContext {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
        }
    }

    /// `projects/{project}/locations/{region}`
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.region)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolSpec {
    pub machine_spec: MachineSpec,
    pub replica_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_spec: Option<DiskSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<ContainerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_package_spec: Option<PythonPackageSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub machine_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub boot_disk_type: String,
    pub boot_disk_size_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image_uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<crate::job::EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonPackageSpec {
    pub executor_image_uri: String,
    pub package_uris: Vec<String>,
    pub python_module: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<crate::job::EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheduling {
    /// Duration in the platform's `"{seconds}s"` form.
    pub timeout: String,
}

impl Scheduling {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            timeout: format!("{seconds}s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcsDestination {
    pub output_uri_prefix: String,
}

/// The body shared by custom jobs, tuning trials and custom training tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomJobSpec {
    pub worker_pool_specs: Vec<WorkerPoolSpec>,
    pub scheduling: Scheduling,
    pub base_output_directory: GcsDestination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensorboard: Option<String>,
    pub enable_web_access: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomJobResource {
    pub display_name: String,
    pub job_spec: CustomJobSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySpec {
    pub metrics: Vec<MetricGoal>,
    pub parameters: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGoal {
    pub metric_id: String,
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterTuningJobResource {
    pub display_name: String,
    pub study_spec: StudySpec,
    pub max_trial_count: u32,
    pub parallel_trial_count: u32,
    pub trial_job_spec: CustomJobSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPipelineResource {
    pub display_name: String,
    pub training_task_definition: String,
    pub training_task_inputs: CustomJobSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A fully shaped request for one of the platform's job collections.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSubmission {
    Custom(CustomJobResource),
    HyperparameterTuning(HyperparameterTuningJobResource),
    TrainingPipeline(TrainingPipelineResource),
}

impl JobSubmission {
    pub fn family(&self) -> JobFamily {
        match self {
            JobSubmission::Custom(_) => JobFamily::CustomJob,
            JobSubmission::HyperparameterTuning(_) => JobFamily::HyperparameterTuningJob,
            JobSubmission::TrainingPipeline(_) => JobFamily::TrainingPipeline,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            JobSubmission::Custom(r) => &r.display_name,
            JobSubmission::HyperparameterTuning(r) => &r.display_name,
            JobSubmission::TrainingPipeline(r) => &r.display_name,
        }
    }
}

/// The platform collection a remote resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobFamily {
    CustomJob,
    HyperparameterTuningJob,
    TrainingPipeline,
    PipelineJob,
}

impl JobFamily {
    /// REST collection id, e.g. `customJobs`.
    pub fn collection(self) -> &'static str {
        match self {
            JobFamily::CustomJob => "customJobs",
            JobFamily::HyperparameterTuningJob => "hyperparameterTuningJobs",
            JobFamily::TrainingPipeline => "trainingPipelines",
            JobFamily::PipelineJob => "pipelineJobs",
        }
    }
}

/// What the platform reports about a job it knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub family: JobFamily,
    /// Full resource name, e.g. `projects/p/locations/r/customJobs/123`.
    pub name: String,
    pub display_name: String,
    pub state: String,
    pub create_time: Option<String>,
    pub error: Option<String>,
}

impl RemoteJob {
    /// The trailing id of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATES.contains(&self.state.as_str())
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(
            self.state.as_str(),
            "JOB_STATE_SUCCEEDED" | "PIPELINE_STATE_SUCCEEDED"
        )
    }
}

const TERMINAL_STATES: &[&str] = &[
    "JOB_STATE_SUCCEEDED",
    "JOB_STATE_FAILED",
    "JOB_STATE_CANCELLED",
    "JOB_STATE_EXPIRED",
    "PIPELINE_STATE_SUCCEEDED",
    "PIPELINE_STATE_FAILED",
    "PIPELINE_STATE_CANCELLED",
];

/// States of custom jobs and tuning jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelling,
    Cancelled,
    Paused,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "JOB_STATE_QUEUED",
            JobState::Pending => "JOB_STATE_PENDING",
            JobState::Running => "JOB_STATE_RUNNING",
            JobState::Succeeded => "JOB_STATE_SUCCEEDED",
            JobState::Failed => "JOB_STATE_FAILED",
            JobState::Cancelling => "JOB_STATE_CANCELLING",
            JobState::Cancelled => "JOB_STATE_CANCELLED",
            JobState::Paused => "JOB_STATE_PAUSED",
        }
    }
}

/// States of training pipelines and pipeline jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Queued,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelling,
    Cancelled,
    Paused,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Queued => "PIPELINE_STATE_QUEUED",
            PipelineState::Pending => "PIPELINE_STATE_PENDING",
            PipelineState::Running => "PIPELINE_STATE_RUNNING",
            PipelineState::Succeeded => "PIPELINE_STATE_SUCCEEDED",
            PipelineState::Failed => "PIPELINE_STATE_FAILED",
            PipelineState::Cancelling => "PIPELINE_STATE_CANCELLING",
            PipelineState::Cancelled => "PIPELINE_STATE_CANCELLED",
            PipelineState::Paused => "PIPELINE_STATE_PAUSED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a list filter: every state OR-ed in one group, AND-ed with an exact
/// display name match when a name is given.
///
/// ```
/// use merlin_core::platform::{list_filter, JobState};
///
/// let filter = list_filter(&[JobState::Running, JobState::Pending], Some("train"));
/// assert_eq!(
///     filter,
///     r#"(state="JOB_STATE_RUNNING" OR state="JOB_STATE_PENDING") AND display_name="train""#
/// );
/// ```
pub fn list_filter<S: fmt::Display>(states: &[S], display_name: Option<&str>) -> String {
    let states = states
        .iter()
        .map(|s| format!("state=\"{s}\""))
        .collect::<Vec<_>>()
        .join(" OR ");

    let mut filter = format!("({states})");
    if let Some(name) = display_name {
        filter.push_str(&format!(" AND display_name=\"{name}\""));
    }
    filter
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJobRequest {
    pub job_id: String,
    pub display_name: String,
    /// The compiled pipeline template, inlined.
    pub pipeline_spec: Value,
    pub pipeline_root: String,
    pub parameter_values: Map<String, Value>,
    pub labels: BTreeMap<String, String>,
    pub enable_caching: bool,
    pub service_account: Option<String>,
    /// Full network path, see [`network_path`].
    pub network: Option<String>,
}

/// `projects/{project_number}/global/networks/{network}`. Full paths are returned as given.
pub fn network_path(project_number: &str, network: &str) -> String {
    if network.starts_with("projects/") {
        network.to_string()
    } else {
        format!("projects/{project_number}/global/networks/{network}")
    }
}

/// One row of a pipeline run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_name: String,
    pub state: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Renders task rows as a fixed-width table.
pub fn render_summary(tasks: &[TaskSummary]) -> String {
    let header = ["task", "state", "start", "end"];
    let rows: Vec<[String; 4]> = tasks
        .iter()
        .map(|t| {
            [
                t.task_name.clone(),
                t.state.clone(),
                t.start_time.clone().unwrap_or_else(|| "-".into()),
                t.end_time.clone().unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(header)];
    for row in &rows {
        out.push(line([&row[0], &row[1], &row[2], &row[3]]));
    }
    out.join("\n")
}

/// A tensorboard instance as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tensorboard {
    /// Full resource name.
    pub name: String,
    pub display_name: String,
    pub create_time: Option<String>,
}

/// The three tags a docker image ref resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTags {
    pub local_tag: String,
    pub remote_tag: String,
    /// The URI the platform pulls from.
    pub pushed_uri: String,
}

/// An HTTP-triggered function that submits a pipeline job when called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResource {
    /// Function id, e.g. `{pipeline}-{env}`.
    pub name: String,
    pub description: String,
    pub source_archive_url: String,
    pub entry_point: String,
    pub runtime: String,
    pub service_account: String,
    pub labels: BTreeMap<String, String>,
    pub env_variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedFunction {
    /// Full resource name.
    pub name: String,
    pub url: String,
}

/// A recurring HTTP call to a deployed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerResource {
    /// Job id, e.g. `{pipeline}-{env}`.
    pub name: String,
    pub description: String,
    pub cron: String,
    pub timezone: String,
    pub target_url: String,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub service_account: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_with_name() {
        let filter = list_filter(
            &[JobState::Paused, JobState::Running, JobState::Failed],
            Some("123"),
        );
        assert_eq!(
            filter,
            r#"(state="JOB_STATE_PAUSED" OR state="JOB_STATE_RUNNING" OR state="JOB_STATE_FAILED") AND display_name="123""#
        );
    }

    #[test]
    fn filter_without_name_has_no_and_clause() {
        let filter = list_filter(&[PipelineState::Running, PipelineState::Pending], None);
        assert_eq!(
            filter,
            r#"(state="PIPELINE_STATE_RUNNING" OR state="PIPELINE_STATE_PENDING")"#
        );
        assert!(!filter.contains(" AND "));
    }

    #[test]
    fn filter_single_state() {
        assert_eq!(
            list_filter(&[JobState::Paused], None),
            r#"(state="JOB_STATE_PAUSED")"#
        );
    }

    #[test]
    fn remote_job_id_and_states() {
        let job = RemoteJob {
            family: JobFamily::CustomJob,
            name: "projects/p/locations/r/customJobs/4242".into(),
            display_name: "train".into(),
            state: "JOB_STATE_RUNNING".into(),
            create_time: None,
            error: None,
        };
        assert_eq!(job.id(), "4242");
        assert!(!job.is_terminal());

        let done = RemoteJob {
            state: "PIPELINE_STATE_SUCCEEDED".into(),
            ..job
        };
        assert!(done.is_terminal());
        assert!(done.is_succeeded());
    }

    #[test]
    fn summary_table_is_aligned() {
        let table = render_summary(&[
            TaskSummary {
                task_name: "preprocess".into(),
                state: "SUCCEEDED".into(),
                start_time: Some("10:00".into()),
                end_time: Some("10:05".into()),
            },
            TaskSummary {
                task_name: "train".into(),
                state: "RUNNING".into(),
                start_time: Some("10:05".into()),
                end_time: None,
            },
        ]);

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("task        state"));
        assert!(lines[2].starts_with("train       RUNNING"));
        assert!(lines[2].ends_with('-'));
    }
}
