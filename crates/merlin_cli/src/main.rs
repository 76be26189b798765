//! Merlin CLI - build, push, run and schedule Vertex AI jobs and pipelines.

mod commands;

use clap::{Parser, Subcommand};
use merlin_core::config::ALL;
use merlin_core::constants::defaults;
use merlin_service::pipeline::PushMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "merlin")]
#[command(about = "Declarative orchestration of Vertex AI jobs and pipelines")]
struct Cli {
    /// Path to the merlin configuration
    #[arg(short, long, global = true, env = "MERLIN_CONFIG", default_value = defaults::CONFIG_FILE)]
    file: PathBuf,

    /// Version of the published artifacts (overrides project.version)
    #[arg(long, global = true, env = "MERLIN_VERSION")]
    version: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Training jobs
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },

    /// Vertex AI pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },

    /// Vertex AI tensorboards
    Tensorboard {
        #[command(subcommand)]
        command: TensorboardCommand,
    },
}

#[derive(Subcommand)]
pub enum JobCommand {
    /// Build job manifests
    Build {
        /// Job name, or `all`
        #[arg(short, long, default_value = ALL)]
        name: String,
    },

    /// Build, then push images and manifests
    Push {
        #[arg(short, long, default_value = ALL)]
        name: String,

        /// Publish manifests to the local build directory instead of the bucket
        #[arg(long)]
        local: bool,
    },

    /// Run jobs from manifests, building them first when none are given
    Run {
        #[arg(short, long, default_value = ALL)]
        name: String,

        /// Manifest path or URI to run (repeatable)
        #[arg(short, long = "manifest")]
        manifests: Vec<String>,

        /// Wait for the jobs to finish
        #[arg(long)]
        sync: bool,
    },

    /// Cancel running or pending jobs
    Stop {
        #[arg(short, long, default_value = ALL)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum PipelineCommand {
    /// Copy compiled templates and build pipeline manifests
    Build {
        /// Pipeline name, or `all`
        #[arg(short, long, default_value = ALL)]
        name: String,
    },

    /// Build, then publish what the push mode selects
    Push {
        #[arg(short, long, default_value = ALL)]
        name: String,

        /// all, manifests, containers or quick
        #[arg(short, long, default_value_t = PushMode::All)]
        mode: PushMode,

        #[arg(long)]
        local: bool,
    },

    /// Deploy published pipelines behind a trigger function and their schedule
    Deploy {
        #[arg(short, long, default_value = ALL)]
        name: String,

        /// Environment suffix of the deployed resources
        #[arg(short, long, default_value = "local")]
        env: String,
    },

    /// Run pipelines from manifests, building them first when none are given
    Run {
        #[arg(short, long, default_value = ALL)]
        name: String,

        #[arg(long = "manifest")]
        manifests: Vec<String>,

        /// YAML file overriding pipeline parameters
        #[arg(short, long)]
        params: Option<PathBuf>,

        #[arg(long)]
        sync: bool,
    },

    /// Cancel running or pending pipeline jobs
    Stop {
        #[arg(short, long, default_value = ALL)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TensorboardCommand {
    /// Create declared tensorboards, asking before replacing existing ones
    Create {
        /// Tensorboard name, or `all`
        #[arg(short, long, default_value = ALL)]
        name: String,
    },

    /// Delete declared tensorboards
    Delete {
        #[arg(short, long, default_value = ALL)]
        name: String,
    },

    /// List the tensorboards of the project
    List {
        /// Region to list instead of the gcp profile's
        #[arg(long)]
        region: Option<String>,

        /// Leave out the links to the experiments view
        #[arg(long)]
        no_url: bool,
    },
}

/// Runs `command`. Running given manifests needs no configuration file.
async fn execute(file: PathBuf, version: Option<String>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Job {
            command: JobCommand::Run {
                manifests, sync, ..
            },
        } if !manifests.is_empty() => {
            commands::job::run_manifests(&commands::runner()?, &manifests, sync).await
        }
        Commands::Pipeline {
            command:
                PipelineCommand::Run {
                    manifests,
                    params,
                    sync,
                    ..
                },
        } if !manifests.is_empty() => {
            commands::pipeline::run_manifests(
                &commands::runner()?,
                &manifests,
                params.as_deref(),
                sync,
            )
            .await
        }
        command => {
            let ctx = commands::Context::load(&file, version).await?;
            match command {
                Commands::Job { command } => commands::job::run(ctx, command).await,
                Commands::Pipeline { command } => commands::pipeline::run(ctx, command).await,
                Commands::Tensorboard { command } => commands::tensorboard::run(ctx, command).await,
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let Cli {
        file,
        version,
        verbose,
        command,
    } = Cli::parse();

    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    if let Err(e) = execute(file, version, command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use merlin_core::error::{ConfigError, ManifestError};
    use merlin_service::error::ServiceError;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pipeline_push_parses_mode() {
        let cli = Cli::try_parse_from([
            "merlin", "pipeline", "push", "-n", "nightly", "--mode", "quick", "--local",
        ])
        .unwrap();

        let Commands::Pipeline {
            command: PipelineCommand::Push { name, mode, local },
        } = cli.command
        else {
            panic!("expected pipeline push");
        };
        assert_eq!(name, "nightly");
        assert_eq!(mode, PushMode::Quick);
        assert!(local);
    }

    #[test]
    fn job_run_defaults_to_all() {
        let cli = Cli::try_parse_from(["merlin", "job", "run", "--sync"]).unwrap();

        let Commands::Job {
            command: JobCommand::Run {
                name,
                manifests,
                sync,
            },
        } = cli.command
        else {
            panic!("expected job run");
        };
        assert_eq!(name, ALL);
        assert!(manifests.is_empty());
        assert!(sync);
    }

    #[tokio::test]
    async fn job_manifest_runs_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("merlin.yaml");
        let manifest = dir.path().join("job-manifest.json");
        std::fs::write(&manifest, r#"{"job_type": "CustomJob"}"#).unwrap();

        let cli = parse(&[
            "merlin",
            "-f",
            config.to_str().unwrap(),
            "job",
            "run",
            "--manifest",
            manifest.to_str().unwrap(),
        ]);
        let err = execute(cli.file, cli.version, cli.command)
            .await
            .unwrap_err();

        // The manifest itself was read and rejected; the missing config was never looked at.
        let err = err.downcast::<ServiceError>().unwrap();
        assert!(
            matches!(err, ServiceError::Manifest(ManifestError::Malformed { .. })),
            "{err}"
        );
    }

    #[tokio::test]
    async fn pipeline_manifest_runs_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("merlin.yaml");
        let manifest = dir.path().join("merlin-manifest.json");
        std::fs::write(&manifest, "{}").unwrap();

        let cli = parse(&[
            "merlin",
            "-f",
            config.to_str().unwrap(),
            "pipeline",
            "run",
            "--manifest",
            manifest.to_str().unwrap(),
        ]);
        let err = execute(cli.file, cli.version, cli.command)
            .await
            .unwrap_err();

        let err = err.downcast::<ServiceError>().unwrap();
        assert!(
            matches!(err, ServiceError::Manifest(ManifestError::Malformed { .. })),
            "{err}"
        );
    }

    #[tokio::test]
    async fn building_still_needs_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("merlin.yaml");

        let cli = parse(&["merlin", "-f", config.to_str().unwrap(), "job", "run"]);
        let err = execute(cli.file, cli.version, cli.command)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some(), "{err}");
    }

    #[test]
    fn tensorboard_list_takes_a_region() {
        let cli = parse(&["merlin", "tensorboard", "list", "--region", "us-central1", "--no-url"]);

        let Commands::Tensorboard {
            command: TensorboardCommand::List { region, no_url },
        } = cli.command
        else {
            panic!("expected tensorboard list");
        };
        assert_eq!(region.as_deref(), Some("us-central1"));
        assert!(no_url);
    }
}
