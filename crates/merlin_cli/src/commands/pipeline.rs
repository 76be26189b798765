use super::{Context, Runner, StdinConfirm};
use crate::PipelineCommand;

use std::path::Path;
use tracing::info;

pub async fn run(ctx: Context, command: PipelineCommand) -> anyhow::Result<()> {
    let pipelines = ctx.pipelines();

    match command {
        PipelineCommand::Build { name } => {
            pipelines.build(&name).await?;
        }
        PipelineCommand::Push { name, mode, local } => {
            let built: Vec<String> = pipelines
                .build(&name)
                .await?
                .into_iter()
                .map(|(path, _)| path)
                .collect();
            pipelines.push(&built, mode, local).await?;
        }
        PipelineCommand::Deploy { name, env } => {
            for function in pipelines.deploy(&name, &env).await? {
                info!(function = %function.name, url = %function.url, "Deployed");
            }
        }
        PipelineCommand::Run {
            name,
            manifests,
            params,
            sync,
        } => {
            let manifests = if manifests.is_empty() {
                pipelines
                    .build(&name)
                    .await?
                    .into_iter()
                    .map(|(path, _)| path)
                    .collect()
            } else {
                manifests
            };
            pipelines.run(&manifests, params.as_deref(), sync).await?;
        }
        PipelineCommand::Stop { name } => {
            let cancelled = pipelines.stop(&name, &StdinConfirm).await?;
            info!(cancelled, "Done");
        }
    }

    Ok(())
}

pub async fn run_manifests(
    runner: &Runner,
    manifests: &[String],
    params: Option<&Path>,
    sync: bool,
) -> anyhow::Result<()> {
    runner.run_pipelines(manifests, params, sync).await?;
    Ok(())
}
