use merlin_core::error::PlatformError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Any non-success response, with its body.
    #[error("Server returned error {0}: {1}")]
    ServerError(StatusCode, String),

    /// A request body could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The response could not be understood.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No access token could be obtained.
    #[error("Token error: {0}")]
    Token(String),

    /// A long-running operation finished with an error.
    #[error("Operation {name} failed: {message}")]
    Operation { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<ClientError> for PlatformError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ServerError(StatusCode::NOT_FOUND, body) => PlatformError::NotFound(body),
            ClientError::ServerError(status, body) if status.is_client_error() => {
                PlatformError::InvalidRequest(format!("{status}: {body}"))
            }
            other => PlatformError::System(other.to_string()),
        }
    }
}
