pub mod job;
pub mod pipeline;
pub mod tensorboard;

use anyhow::Context as _;
use merlin_client::{CloudFunctionsClient, CloudSchedulerClient, TokenSource, VertexClient};
use merlin_core::prelude::*;
use merlin_docker::{DockerRegistry, ImageCatalog};
use merlin_opendal::OpendalStorage;
use merlin_service::prelude::*;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub type Services = CoreServices<
    OpendalStorage,
    VertexClient,
    DockerRegistry,
    CloudFunctionsClient,
    CloudSchedulerClient,
>;

/// Runs built manifests; needs neither a configuration file nor Docker.
pub type Runner = ManifestRunner<OpendalStorage, VertexClient>;

pub fn runner() -> anyhow::Result<Runner> {
    let cwd = std::env::current_dir().context("cannot resolve the working directory")?;
    Ok(ManifestRunner::new(
        OpendalStorage::new(&cwd.to_string_lossy())?,
        VertexClient::new(TokenSource::from_env()),
    ))
}

/// Everything a command needs: the loaded configuration and the live collaborators.
pub struct Context {
    pub config: MerlinConfig,
    pub services: Services,
    pub workdir: PathBuf,
    pub version: String,
}

impl Context {
    pub async fn load(file: &Path, version: Option<String>) -> anyhow::Result<Self> {
        let config = MerlinConfig::load(file)?;
        let version = version.unwrap_or_else(|| config.version().to_string());

        let dir = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let workdir = std::path::absolute(dir).context("cannot resolve the working directory")?;
        debug!(workdir = %workdir.display(), version = %version, "Loaded merlin project");

        let token = TokenSource::from_env();
        let mut registry =
            DockerRegistry::connect_local(ImageCatalog::from_config(&config, &version))?;
        match token.token().await {
            Ok(access_token) => registry = registry.with_access_token(access_token),
            Err(e) => warn!(error = %e, "No access token, pushing images without credentials"),
        }

        let services = CoreServices {
            storage: OpendalStorage::new(&workdir.to_string_lossy())?,
            platform: VertexClient::new(token.clone()),
            registry,
            functions: CloudFunctionsClient::new(token.clone()),
            scheduler: CloudSchedulerClient::new(token),
        };

        Ok(Self {
            config,
            services,
            workdir,
            version,
        })
    }

    pub fn jobs(self) -> JobService<Services> {
        JobService::new(self.services, self.config, self.workdir, self.version)
    }

    pub fn pipelines(self) -> PipelineService<Services> {
        PipelineService::new(self.services, self.config, self.workdir, self.version)
    }

    pub fn tensorboards(self) -> TensorboardService<Services> {
        TensorboardService::new(self.services, self.config)
    }
}

/// Asks on the terminal; anything but `y`/`yes` declines.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> bool {
        print!("{question} [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
