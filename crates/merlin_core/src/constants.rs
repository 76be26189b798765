pub mod defaults {
    pub const MACHINE_TYPE: &str = "n1-standard-4";
    pub const TIMEOUT_SECONDS: u64 = 60 * 60 * 24;
    pub const MAX_TRIAL_COUNT: u32 = 15;
    pub const PARALLEL_TRIAL_COUNT: u32 = 3;
    pub const TIMEZONE: &str = "Etc/UTC";
    pub const CONFIG_FILE: &str = "merlin.yaml";
    pub const VERSION: &str = "dev";
    pub const POLL_INTERVAL_SECS: u64 = 15;
}

pub mod files {
    pub const JOB_MANIFEST: &str = "job-manifest.json";
    pub const PIPELINE_MANIFEST: &str = "merlin-manifest.json";
    pub const PIPELINE_SPEC: &str = "pipeline-spec.json";
    pub const FUNCTION_PACKAGE: &str = "package.zip";
    pub const BUILD_DIR: &str = "build";
}

pub mod labels {
    pub const PIPELINE: &str = "merlin_pipeline";
    pub const JOB: &str = "merlin_job";
}

pub mod urls {
    pub const CONSOLE: &str = "https://console.cloud.google.com";
    pub const CUSTOM_TASK_DEFINITION: &str =
        "gs://google-cloud-aiplatform/schema/trainingjob/definition/custom_task_1.0.0.yaml";

    /// Dashboard of a training resource, available as soon as the resource exists.
    pub fn training_dashboard(project: &str, region: &str, id: &str) -> String {
        format!("{CONSOLE}/vertex-ai/locations/{region}/training/{id}?project={project}")
    }

    /// Experiments view of a tensorboard, `name` being its full resource name.
    pub fn tensorboard_dashboard(project: &str, region: &str, name: &str) -> String {
        let id = name.rsplit('/').next().unwrap_or(name);
        format!(
            "{CONSOLE}/vertex-ai/experiments/tensorboard-instances/regions/{region}/{id}/browse?project={project}"
        )
    }

    pub fn pipeline_dashboard(project: &str, region: &str, id: &str) -> String {
        format!("{CONSOLE}/vertex-ai/locations/{region}/pipelines/runs/{id}?project={project}")
    }
}
