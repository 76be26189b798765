use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested file or object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The path or URI could not be understood by the backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic system or backend-specific failure (e.g., GCS error).
    #[error("Storage system failure: {0}")]
    System(String),

    /// The backend cannot serve this kind of location (e.g. `gs://` on the local filesystem backend).
    #[error("Feature not supported: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration source could not be read or parsed.
    #[error("Configuration error: {0}")]
    Parse(String),

    /// A value was parsed but violates a rule of the schema.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A required field is missing and could not be inherited from the gcp profile.
    #[error("Missing field `{field}` in {instance}")]
    Missing { instance: String, field: String },

    /// No instance with the requested name exists.
    #[error("No {kind} named `{name}` in the configuration")]
    UnknownInstance { kind: String, name: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file is not valid JSON, or its payload does not match its `job_type`.
    #[error("Malformed manifest {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// The manifest could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A docker image ref of the manifest has no resolved tags.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform rejected the request (HTTP 4xx other than 404).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The requested job or resource was not found.
    #[error("Resource {0} not found")]
    NotFound(String),

    /// A job reached a terminal state other than success.
    #[error("Job {name} finished in state {state}")]
    JobFailed { name: String, state: String },

    /// Transport failure or server-side error.
    #[error("Platform failure: {0}")]
    System(String),

    /// The backend does not support this feature.
    #[error("Feature not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The docker image reference is not declared in the configuration.
    #[error("Docker image `{0}` is not defined in the docker section")]
    UnknownRef(String),

    /// The image is declared but was never built locally.
    #[error("Image {0} not found, build it before building manifests")]
    ImageNotFound(String),

    /// The registry rejected a pushed image.
    #[error("Failed to push {image}: {message}")]
    PushFailed { image: String, message: String },

    /// Failure talking to the docker daemon or the registry.
    #[error("Registry failure: {0}")]
    System(String),
}
