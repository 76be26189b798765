use crate::api::Api;
use crate::error::Result;
use crate::token::TokenSource;

use merlin_core::constants::defaults;
use merlin_core::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

const DEFAULT_ENDPOINT: &str = "https://cloudfunctions.googleapis.com/v1";

/// [`FunctionPlatform`] over the Cloud Functions v1 REST API.
#[derive(Clone, Debug)]
pub struct CloudFunctionsClient {
    api: Api,
    endpoint: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudFunction<'a> {
    name: &'a str,
    description: &'a str,
    source_archive_url: &'a str,
    entry_point: &'a str,
    runtime: &'a str,
    https_trigger: HttpsTrigger,
    service_account_email: &'a str,
    labels: &'a BTreeMap<String, String>,
    environment_variables: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct HttpsTrigger {}

impl<'a> CloudFunction<'a> {
    fn new(name: &'a str, function: &'a FunctionResource) -> Self {
        Self {
            name,
            description: &function.description,
            source_archive_url: &function.source_archive_url,
            entry_point: &function.entry_point,
            runtime: &function.runtime,
            https_trigger: HttpsTrigger {},
            service_account_email: &function.service_account,
            labels: &function.labels,
            environment_variables: &function.env_variables,
        }
    }
}

impl CloudFunctionsClient {
    pub fn new(token: TokenSource) -> Self {
        Self {
            api: Api::new(token),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn upsert(
        &self,
        ctx: &PlatformContext,
        function: &FunctionResource,
    ) -> Result<DeployedFunction> {
        let parent = ctx.parent();
        let name = format!("{parent}/functions/{}", function.name);
        let body = CloudFunction::new(&name, function);

        let url = format!("{}/{name}", self.endpoint);
        let operation = match self.api.find(&url).await? {
            Some(_) => {
                info!(function = %name, "Updating cloud function");
                self.api.patch(&url, &body).await?
            }
            None => {
                info!(function = %name, "Creating cloud function");
                let create = format!("{}/{parent}/functions", self.endpoint);
                self.api.post(&create, &[], &body).await?
            }
        };
        let deployed = self
            .api
            .wait_operation(&self.endpoint, operation, self.poll_interval)
            .await?;

        let url = deployed
            .pointer("/httpsTrigger/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "https://{}-{}.cloudfunctions.net/{}",
                    ctx.region, ctx.project, function.name
                )
            });

        Ok(DeployedFunction { name, url })
    }
}

impl FunctionPlatform for CloudFunctionsClient {
    async fn upsert_function(
        &self,
        ctx: &PlatformContext,
        function: &FunctionResource,
    ) -> std::result::Result<DeployedFunction, PlatformError> {
        Ok(self.upsert(ctx, function).await?)
    }
}
