use crate::api::Api;
use crate::error::Result;
use crate::token::TokenSource;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use merlin_core::prelude::*;
use serde_json::{Value, json};
use tracing::info;

const DEFAULT_ENDPOINT: &str = "https://cloudscheduler.googleapis.com/v1";

/// [`SchedulerPlatform`] over the Cloud Scheduler v1 REST API.
#[derive(Clone, Debug)]
pub struct CloudSchedulerClient {
    api: Api,
    endpoint: String,
}

impl CloudSchedulerClient {
    pub fn new(token: TokenSource) -> Self {
        Self {
            api: Api::new(token),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn job_body(name: &str, schedule: &SchedulerResource) -> Result<Value> {
        let body = serde_json::to_vec(&schedule.body)?;
        Ok(json!({
            "name": name,
            "description": schedule.description,
            "schedule": schedule.cron,
            "timeZone": schedule.timezone,
            "httpTarget": {
                "uri": schedule.target_url,
                "httpMethod": "POST",
                "headers": schedule.headers,
                "body": STANDARD.encode(body),
                "oidcToken": {
                    "serviceAccountEmail": schedule.service_account,
                    "audience": schedule.target_url,
                },
            },
        }))
    }

    async fn upsert(&self, ctx: &PlatformContext, schedule: &SchedulerResource) -> Result<()> {
        let parent = ctx.parent();
        let name = format!("{parent}/jobs/{}", schedule.name);
        let body = Self::job_body(&name, schedule)?;
        let url = format!("{}/{name}", self.endpoint);

        match self.api.find(&url).await? {
            Some(_) => {
                info!(job = %name, "Updating cloud scheduler job");
                self.api.patch(&url, &body).await?;
            }
            None => {
                info!(job = %name, "Creating cloud scheduler job");
                let create = format!("{}/{parent}/jobs", self.endpoint);
                self.api.post(&create, &[], &body).await?;
            }
        }
        Ok(())
    }
}

impl SchedulerPlatform for CloudSchedulerClient {
    async fn upsert_schedule(
        &self,
        ctx: &PlatformContext,
        schedule: &SchedulerResource,
    ) -> std::result::Result<(), PlatformError> {
        Ok(self.upsert(ctx, schedule).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::collections::BTreeMap;

    fn schedule() -> SchedulerResource {
        SchedulerResource {
            name: "nightly-prod".into(),
            description: "merlin nightly scheduler for prod pipeline".into(),
            cron: "0 2 * * *".into(),
            timezone: "Etc/UTC".into(),
            target_url: "https://fn.example/nightly-prod".into(),
            body: json!({"pipeline_spec_uri": "gs://b/spec.json", "parameter_values": {}}),
            headers: BTreeMap::from([("Content-Type".into(), "application/octet-stream".into())]),
            service_account: "sa@proj.iam.gserviceaccount.com".into(),
        }
    }

    const NAME: &str = "/projects/proj/locations/europe-west1/jobs/nightly-prod";

    #[test]
    fn body_is_base64_json() {
        let body = CloudSchedulerClient::job_body("n", &schedule()).unwrap();
        let encoded = body["httpTarget"]["body"].as_str().unwrap();
        let decoded: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded["pipeline_spec_uri"], "gs://b/spec.json");
        assert_eq!(
            body["httpTarget"]["oidcToken"]["serviceAccountEmail"],
            "sa@proj.iam.gserviceaccount.com"
        );
    }

    #[tokio::test]
    async fn missing_job_is_created() {
        let mut server = Server::new_async().await;
        let _get = server
            .mock("GET", NAME)
            .with_status(404)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/projects/proj/locations/europe-west1/jobs")
            .match_body(Matcher::PartialJson(json!({
                "schedule": "0 2 * * *",
                "timeZone": "Etc/UTC",
                "httpTarget": {"uri": "https://fn.example/nightly-prod", "httpMethod": "POST"}
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let ctx = PlatformContext::new("proj", "europe-west1");
        CloudSchedulerClient::new(TokenSource::fixed("t"))
            .with_endpoint(server.url())
            .upsert_schedule(&ctx, &schedule())
            .await
            .unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn existing_job_is_patched() {
        let mut server = Server::new_async().await;
        let _get = server
            .mock("GET", NAME)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", NAME)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let create = server
            .mock("POST", "/projects/proj/locations/europe-west1/jobs")
            .expect(0)
            .create_async()
            .await;

        let ctx = PlatformContext::new("proj", "europe-west1");
        CloudSchedulerClient::new(TokenSource::fixed("t"))
            .with_endpoint(server.url())
            .upsert_schedule(&ctx, &schedule())
            .await
            .unwrap();
        patch.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn permission_errors_surface() {
        let mut server = Server::new_async().await;
        let _get = server
            .mock("GET", NAME)
            .with_status(403)
            .with_body("denied")
            .create_async()
            .await;

        let ctx = PlatformContext::new("proj", "europe-west1");
        let err = CloudSchedulerClient::new(TokenSource::fixed("t"))
            .with_endpoint(server.url())
            .upsert_schedule(&ctx, &schedule())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::InvalidRequest(msg) if msg.contains("denied")));
    }
}
