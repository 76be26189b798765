use crate::api::{Api, field};
use crate::error::{ClientError, Result};
use crate::token::TokenSource;

use merlin_core::constants::defaults;
use merlin_core::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

const RESOURCE_MANAGER: &str = "https://cloudresourcemanager.googleapis.com/v1";

/// [`MlPlatform`] over the Vertex AI v1 REST API.
///
/// Project numbers are looked up through the Resource Manager v1 API.
#[derive(Clone, Debug)]
pub struct VertexClient {
    api: Api,
    endpoint: Option<String>,
    resource_manager: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    state: String,
    create_time: Option<String>,
    error: Option<Status>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TensorboardResponse {
    name: String,
    #[serde(default)]
    display_name: String,
    create_time: Option<String>,
}

impl From<TensorboardResponse> for Tensorboard {
    fn from(board: TensorboardResponse) -> Self {
        Self {
            name: board.name,
            display_name: board.display_name,
            create_time: board.create_time,
        }
    }
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

impl JobResponse {
    fn into_remote(self, family: JobFamily) -> RemoteJob {
        RemoteJob {
            family,
            name: self.name,
            display_name: self.display_name,
            state: self.state,
            create_time: self.create_time,
            error: self.error.map(|s| s.message),
        }
    }
}

fn parse_job(value: Value, family: JobFamily) -> Result<RemoteJob> {
    let response: JobResponse = serde_json::from_value(value)
        .map_err(|e| ClientError::Validation(format!("Failed to parse job: {e}")))?;
    Ok(response.into_remote(family))
}

/// `us-east1` out of `projects/p/locations/us-east1/customJobs/1`.
fn region_of(name: &str) -> Option<&str> {
    let mut parts = name.split('/');
    while let Some(part) = parts.next() {
        if part == "locations" {
            return parts.next();
        }
    }
    None
}

/// Disables the cache of every task of a compiled pipeline.
fn disable_caching(spec: &mut Value) {
    if let Some(tasks) = spec
        .pointer_mut("/root/dag/tasks")
        .and_then(Value::as_object_mut)
    {
        for task in tasks.values_mut() {
            task["cachingOptions"] = json!({"enableCache": false});
        }
    }
}

impl VertexClient {
    pub fn new(token: TokenSource) -> Self {
        Self {
            api: Api::new(token),
            endpoint: None,
            resource_manager: RESOURCE_MANAGER.to_string(),
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
        }
    }

    /// Sends every request to `endpoint` instead of the regional API host and Resource Manager.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        self.resource_manager = endpoint.clone();
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn base_url(&self, region: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{region}-aiplatform.googleapis.com/v1"),
        }
    }

    fn resource_url(&self, name: &str) -> Result<String> {
        let region = region_of(name)
            .ok_or_else(|| ClientError::Validation(format!("{name} is not a resource name")))?;
        Ok(format!("{}/{name}", self.base_url(region)))
    }

    fn collection_url(&self, ctx: &PlatformContext, collection: &str) -> String {
        format!("{}/{}/{collection}", self.base_url(&ctx.region), ctx.parent())
    }

    async fn create_job(&self, ctx: &PlatformContext, request: &JobSubmission) -> Result<RemoteJob> {
        let family = request.family();
        let url = self.collection_url(ctx, family.collection());

        let created = match request {
            JobSubmission::Custom(body) => self.api.post(&url, &[], body).await?,
            JobSubmission::HyperparameterTuning(body) => self.api.post(&url, &[], body).await?,
            JobSubmission::TrainingPipeline(body) => self.api.post(&url, &[], body).await?,
        };
        parse_job(created, family)
    }

    async fn fetch_job(&self, family: JobFamily, name: &str) -> Result<RemoteJob> {
        let value = self.api.get(&self.resource_url(name)?).await?;
        parse_job(value, family)
    }

    async fn list(
        &self,
        ctx: &PlatformContext,
        family: JobFamily,
        filter: &str,
    ) -> Result<Vec<RemoteJob>> {
        let url = self.collection_url(ctx, family.collection());
        let mut jobs = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut query = vec![("filter", filter)];
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.as_str()));
            }
            let page = self.api.get_query(&url, &query).await?;

            if let Some(items) = page[family.collection()].as_array() {
                for item in items {
                    jobs.push(parse_job(item.clone(), family)?);
                }
            }

            match page["nextPageToken"].as_str() {
                Some(token) if !token.is_empty() => page_token = token.to_string(),
                _ => break,
            }
        }

        Ok(jobs)
    }

    async fn create_pipeline_job(
        &self,
        ctx: &PlatformContext,
        request: &PipelineJobRequest,
    ) -> Result<RemoteJob> {
        let mut spec = request.pipeline_spec.clone();
        if !request.enable_caching {
            disable_caching(&mut spec);
        }

        let mut body = json!({
            "displayName": request.display_name,
            "pipelineSpec": spec,
            "labels": request.labels,
            "runtimeConfig": {
                "gcsOutputDirectory": request.pipeline_root,
                "parameterValues": request.parameter_values,
            },
        });
        if let Some(sa) = &request.service_account {
            body["serviceAccount"] = json!(sa);
        }
        if let Some(network) = &request.network {
            body["network"] = json!(network);
        }

        let url = self.collection_url(ctx, JobFamily::PipelineJob.collection());
        let created = self
            .api
            .post(&url, &[("pipelineJobId", request.job_id.as_str())], &body)
            .await?;
        parse_job(created, JobFamily::PipelineJob)
    }

    async fn summary(&self, name: &str) -> Result<Vec<TaskSummary>> {
        let job = self.api.get(&self.resource_url(name)?).await?;
        let tasks = job
            .pointer("/jobDetail/taskDetails")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tasks
            .iter()
            .map(|t| TaskSummary {
                task_name: t["taskName"].as_str().unwrap_or_default().to_string(),
                state: t["state"].as_str().unwrap_or_default().to_string(),
                start_time: t["startTime"].as_str().map(str::to_string),
                end_time: t["endTime"].as_str().map(str::to_string),
            })
            .collect())
    }

    async fn tensorboard(&self, ctx: &PlatformContext, display_name: &str) -> Result<String> {
        let url = self.collection_url(ctx, "tensorboards");
        let filter = format!("display_name=\"{display_name}\"");
        let found = self.api.get_query(&url, &[("filter", filter.as_str())]).await?;

        if let Some(existing) = found["tensorboards"].as_array().and_then(|b| b.first()) {
            return Ok(field(existing, "name")?.to_string());
        }

        info!(tensorboard = display_name, "Creating tensorboard");
        let operation = self
            .api
            .post(&url, &[], &json!({"displayName": display_name}))
            .await?;
        let created = self
            .api
            .wait_operation(&self.base_url(&ctx.region), operation, self.poll_interval)
            .await?;
        Ok(field(&created, "name")?.to_string())
    }

    async fn tensorboards(&self, ctx: &PlatformContext) -> Result<Vec<Tensorboard>> {
        let url = self.collection_url(ctx, "tensorboards");
        let mut boards = Vec::new();
        let mut page_token = String::new();

        loop {
            let query: Vec<(&str, &str)> = if page_token.is_empty() {
                Vec::new()
            } else {
                vec![("pageToken", page_token.as_str())]
            };
            let mut page = self.api.get_query(&url, &query).await?;

            if let Some(items) = page.get_mut("tensorboards").map(Value::take) {
                let items: Vec<TensorboardResponse> = serde_json::from_value(items).map_err(|e| {
                    ClientError::Validation(format!("Failed to parse tensorboards: {e}"))
                })?;
                boards.extend(items.into_iter().map(Tensorboard::from));
            }

            match page["nextPageToken"].as_str() {
                Some(token) if !token.is_empty() => page_token = token.to_string(),
                _ => break,
            }
        }

        Ok(boards)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.resource_url(name)?;
        info!(tensorboard = name, "Deleting tensorboard");
        let operation = self.api.delete(&url).await?;
        let region = region_of(name).unwrap_or_default();
        self.api
            .wait_operation(&self.base_url(region), operation, self.poll_interval)
            .await?;
        Ok(())
    }

    async fn lookup_project_number(&self, project: &str) -> Result<String> {
        let found = self
            .api
            .get(&format!("{}/projects/{project}", self.resource_manager))
            .await?;
        Ok(field(&found, "projectNumber")?.to_string())
    }
}

impl MlPlatform for VertexClient {
    async fn submit_job(
        &self,
        ctx: &PlatformContext,
        request: &JobSubmission,
    ) -> std::result::Result<RemoteJob, PlatformError> {
        Ok(self.create_job(ctx, request).await?)
    }

    async fn wait_job(
        &self,
        family: JobFamily,
        name: &str,
    ) -> std::result::Result<RemoteJob, PlatformError> {
        loop {
            let job = self.fetch_job(family, name).await?;
            if job.is_terminal() {
                if job.is_succeeded() {
                    return Ok(job);
                }
                return Err(PlatformError::JobFailed {
                    name: job.name,
                    state: job.state,
                });
            }
            debug!(job = name, state = %job.state, "Job still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn cancel_job(
        &self,
        _family: JobFamily,
        name: &str,
    ) -> std::result::Result<(), PlatformError> {
        let url = format!("{}:cancel", self.resource_url(name)?);
        self.api.post(&url, &[], &json!({})).await?;
        Ok(())
    }

    async fn list_jobs(
        &self,
        ctx: &PlatformContext,
        family: JobFamily,
        filter: &str,
    ) -> std::result::Result<Vec<RemoteJob>, PlatformError> {
        Ok(self.list(ctx, family, filter).await?)
    }

    async fn submit_pipeline(
        &self,
        ctx: &PlatformContext,
        request: &PipelineJobRequest,
    ) -> std::result::Result<RemoteJob, PlatformError> {
        Ok(self.create_pipeline_job(ctx, request).await?)
    }

    async fn pipeline_summary(
        &self,
        name: &str,
    ) -> std::result::Result<Vec<TaskSummary>, PlatformError> {
        Ok(self.summary(name).await?)
    }

    async fn get_or_create_tensorboard(
        &self,
        ctx: &PlatformContext,
        display_name: &str,
    ) -> std::result::Result<String, PlatformError> {
        Ok(self.tensorboard(ctx, display_name).await?)
    }

    async fn list_tensorboards(
        &self,
        ctx: &PlatformContext,
    ) -> std::result::Result<Vec<Tensorboard>, PlatformError> {
        Ok(self.tensorboards(ctx).await?)
    }

    async fn delete_tensorboard(&self, name: &str) -> std::result::Result<(), PlatformError> {
        Ok(self.delete(name).await?)
    }

    async fn project_number(&self, project: &str) -> std::result::Result<String, PlatformError> {
        Ok(self.lookup_project_number(project).await?)
    }
}
