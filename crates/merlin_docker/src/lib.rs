//! # Merlin Docker Registry
//!
//! An [`ImageRegistry`] backed by the local Docker daemon through [bollard](https://docs.rs/bollard).
//!
//! Images declared with `build_type: provided_image` resolve to their `image_url` for all three
//! tags and are never touched. Images declared with `build_type: local_build` must have been
//! built beforehand as `{project}/{name}:{version}`; pushing tags them as
//! `{registry}/{project_id}/{repository}/{name}:{version}` and pushes that tag.

use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::errors::Error as DockerError;
use bollard::query_parameters::{PushImageOptions, TagImageOptions};
use futures::TryStreamExt;
use merlin_core::config::{DockerImage, MerlinConfig};
use merlin_core::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Tag resolution for the images of one project and version.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCatalog {
    images: Vec<DockerImage>,
    project_name: String,
    project_id: String,
    registry: String,
    repository: String,
    version: String,
}

impl ImageCatalog {
    pub fn from_config(config: &MerlinConfig, version: &str) -> Self {
        let registry = config
            .docker
            .registry
            .clone()
            .unwrap_or_else(|| format!("{}-docker.pkg.dev", config.gcp_profile.region));

        Self {
            images: config.docker.images.clone(),
            project_name: config.project.name.clone(),
            project_id: config.gcp_profile.project_id.clone(),
            registry,
            repository: config.docker.repository.clone().unwrap_or_default(),
            version: version.to_string(),
        }
    }

    pub fn image(&self, image_ref: &str) -> Result<&DockerImage, RegistryError> {
        self.images
            .iter()
            .find(|i| i.name() == image_ref)
            .ok_or_else(|| RegistryError::UnknownRef(image_ref.to_string()))
    }

    pub fn tags(&self, image: &DockerImage) -> ImageTags {
        match image {
            DockerImage::ProvidedImage { image_url, .. } => ImageTags {
                local_tag: image_url.clone(),
                remote_tag: image_url.clone(),
                pushed_uri: image_url.clone(),
            },
            DockerImage::LocalBuild { name, .. } => {
                let remote = format!(
                    "{}/{}/{}/{name}:{}",
                    self.registry, self.project_id, self.repository, self.version
                );
                ImageTags {
                    local_tag: format!("{}/{name}:{}", self.project_name, self.version),
                    remote_tag: remote.clone(),
                    pushed_uri: remote,
                }
            }
        }
    }
}

/// Splits `host/path/name:tag` into repository and tag.
fn split_tag(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

fn system(e: DockerError) -> RegistryError {
    RegistryError::System(e.to_string())
}

/// The failure a push progress message reports, from `errorDetail.message` or `error`.
fn push_error(progress: &Value) -> Option<String> {
    let detail = progress
        .get("errorDetail")
        .or_else(|| progress.get("error_detail"))
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str);

    detail
        .or_else(|| progress.get("error").and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct DockerRegistry {
    client: Docker,
    catalog: Arc<ImageCatalog>,
    credentials: Option<DockerCredentials>,
}

impl DockerRegistry {
    /// Connects to the local Docker socket (defaults to /var/run/docker.sock on Linux)
    pub fn connect_local(catalog: ImageCatalog) -> Result<Self, RegistryError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RegistryError::System(format!("Failed to connect to Docker: {e}")))?;
        Ok(Self {
            client,
            catalog: Arc::new(catalog),
            credentials: None,
        })
    }

    /// Authenticates pushes with an OAuth access token, as Artifact Registry expects.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(DockerCredentials {
            username: Some("oauth2accesstoken".to_string()),
            password: Some(token.into()),
            serveraddress: Some(format!("https://{}", self.catalog.registry)),
            ..Default::default()
        });
        self
    }
}

impl ImageRegistry for DockerRegistry {
    async fn get_image(&self, image_ref: &str) -> Result<ImageTags, RegistryError> {
        let image = self.catalog.image(image_ref)?;
        let tags = self.catalog.tags(image);

        if let DockerImage::LocalBuild { .. } = image {
            match self.client.inspect_image(&tags.local_tag).await {
                Ok(_) => debug!(image = %tags.local_tag, "Found local image"),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Err(RegistryError::ImageNotFound(tags.local_tag)),
                Err(e) => return Err(system(e)),
            }
        }

        Ok(tags)
    }

    async fn push_image(&self, image_ref: &str) -> Result<(), RegistryError> {
        let image = self.catalog.image(image_ref)?;
        let tags = self.catalog.tags(image);

        if let DockerImage::ProvidedImage { .. } = image {
            info!(image = %tags.pushed_uri, "Provided image, nothing to push");
            return Ok(());
        }

        let (repo, tag) = split_tag(&tags.remote_tag);
        self.client
            .tag_image(
                &tags.local_tag,
                Some(TagImageOptions {
                    repo: Some(repo.to_string()),
                    tag: Some(tag.to_string()),
                    ..Default::default()
                }),
            )
            .await
            .map_err(system)?;

        info!(image = %tags.remote_tag, "Pushing image");
        let options = PushImageOptions {
            tag: Some(tag.to_string()),
            ..Default::default()
        };
        let mut stream = std::pin::pin!(self.client.push_image(
            repo,
            Some(options),
            self.credentials.clone()
        ));
        let mut steps = 0usize;
        while let Some(info) = stream.try_next().await.map_err(system)? {
            steps += 1;
            let progress = serde_json::to_value(&info)
                .map_err(|e| RegistryError::System(e.to_string()))?;
            if let Some(message) = push_error(&progress) {
                return Err(RegistryError::PushFailed {
                    image: tags.remote_tag.clone(),
                    message,
                });
            }
        }
        debug!(image = %tags.remote_tag, steps, "Pushed image");

        Ok(())
    }
}
