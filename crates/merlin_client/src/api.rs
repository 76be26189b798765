use crate::error::{ClientError, Result};
use crate::token::TokenSource;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Authenticated JSON calls shared by the REST clients.
#[derive(Clone, Debug)]
pub(crate) struct Api {
    client: Client,
    token: TokenSource,
}

impl Api {
    pub fn new(token: TokenSource) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    async fn auth_request(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token.token().await?;
        Ok(builder.header("Authorization", format!("Bearer {token}")))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let response = self.auth_request(builder).await?.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status, text));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ClientError::Validation(format!("Failed to parse response: {e}")))
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        debug!(url, "GET");
        self.send(self.client.get(url)).await
    }

    pub async fn get_query(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        debug!(url, ?query, "GET");
        self.send(self.client.get(url).query(query)).await
    }

    /// `None` when the resource does not exist.
    pub async fn find(&self, url: &str) -> Result<Option<Value>> {
        match self.get(url).await {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::ServerError(StatusCode::NOT_FOUND, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<Value> {
        debug!(url, "POST");
        self.send(self.client.post(url).query(query).json(body))
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value> {
        debug!(url, "PATCH");
        self.send(self.client.patch(url).json(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value> {
        debug!(url, "DELETE");
        self.send(self.client.delete(url)).await
    }

    /// Polls a long-running operation until done and returns its `response`.
    pub async fn wait_operation(
        &self,
        base_url: &str,
        mut operation: Value,
        poll_interval: Duration,
    ) -> Result<Value> {
        loop {
            let name = operation["name"].as_str().unwrap_or_default().to_string();

            if operation["done"].as_bool().unwrap_or(false) {
                if let Some(error) = operation.get("error") {
                    return Err(ClientError::Operation {
                        name,
                        message: error["message"].as_str().unwrap_or("unknown").to_string(),
                    });
                }
                return Ok(operation.get("response").cloned().unwrap_or(Value::Null));
            }

            if name.is_empty() {
                return Err(ClientError::Validation(
                    "long-running operation without a name".into(),
                ));
            }

            debug!(operation = %name, "Waiting for operation");
            tokio::time::sleep(poll_interval).await;
            operation = self.get(&format!("{base_url}/{name}")).await?;
        }
    }
}

/// Reads a string field, failing with a message naming it.
pub(crate) fn field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value[key]
        .as_str()
        .ok_or_else(|| ClientError::Validation(format!("response has no `{key}`")))
}
