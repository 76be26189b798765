use crate::error::{ClientError, Result};

use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

/// Environment variable holding a ready-made OAuth access token.
pub const ACCESS_TOKEN_ENV: &str = "MERLIN_ACCESS_TOKEN";

/// Where the bearer token of every request comes from.
#[derive(Clone, Debug)]
pub enum TokenSource {
    Static(String),
    /// `gcloud auth print-access-token`, asked once per process.
    Gcloud(Arc<OnceCell<String>>),
}

impl TokenSource {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    pub fn gcloud() -> Self {
        Self::Gcloud(Arc::new(OnceCell::new()))
    }

    /// [`ACCESS_TOKEN_ENV`] when set, the gcloud CLI otherwise.
    pub fn from_env() -> Self {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::fixed(token.trim()),
            _ => Self::gcloud(),
        }
    }

    pub async fn token(&self) -> Result<String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Gcloud(cell) => cell.get_or_try_init(print_access_token).await.cloned(),
        }
    }
}

async fn print_access_token() -> Result<String> {
    debug!("Requesting an access token from gcloud");
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| ClientError::Token(format!("failed to run gcloud: {e}")))?;

    if !output.status.success() {
        return Err(ClientError::Token(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ClientError::Token("gcloud returned an empty token".into()));
    }
    Ok(token)
}
