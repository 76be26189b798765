use super::{Context, Runner, StdinConfirm};
use crate::JobCommand;

use tracing::info;

pub async fn run(ctx: Context, command: JobCommand) -> anyhow::Result<()> {
    let jobs = ctx.jobs();

    match command {
        JobCommand::Build { name } => {
            jobs.build(&name).await?;
        }
        JobCommand::Push { name, local } => {
            let built = paths(jobs.build(&name).await?);
            jobs.push(&built, local).await?;
        }
        JobCommand::Run {
            name,
            manifests,
            sync,
        } => {
            let manifests = if manifests.is_empty() {
                paths(jobs.build(&name).await?)
            } else {
                manifests
            };
            jobs.run(&manifests, sync).await?;
        }
        JobCommand::Stop { name } => {
            let cancelled = jobs.stop(&name, &StdinConfirm).await?;
            info!(cancelled, "Done");
        }
    }

    Ok(())
}

pub async fn run_manifests(runner: &Runner, manifests: &[String], sync: bool) -> anyhow::Result<()> {
    runner.run_jobs(manifests, sync).await?;
    Ok(())
}

fn paths<T>(built: Vec<(String, T)>) -> Vec<String> {
    built.into_iter().map(|(path, _)| path).collect()
}
