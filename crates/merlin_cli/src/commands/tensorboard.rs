use super::{Context, StdinConfirm};
use crate::TensorboardCommand;

use merlin_core::constants::urls;
use tracing::info;

pub async fn run(ctx: Context, command: TensorboardCommand) -> anyhow::Result<()> {
    let project = ctx.config.gcp_profile.project_id.clone();
    let boards = ctx.tensorboards();

    match command {
        TensorboardCommand::Create { name } => {
            let running = boards.create(&name, &StdinConfirm).await?;
            info!(running = running.len(), "Done");
        }
        TensorboardCommand::Delete { name } => {
            let deleted = boards.delete(&name).await?;
            info!(deleted, "Done");
        }
        TensorboardCommand::List { region, no_url } => {
            for board in boards.list(region.as_deref()).await? {
                if no_url {
                    info!(tensorboard = %board.display_name, resource = %board.name, "Tensorboard");
                    continue;
                }
                let location = board.name.split('/').nth(3).unwrap_or_default();
                info!(
                    tensorboard = %board.display_name,
                    resource = %board.name,
                    url = %urls::tensorboard_dashboard(&project, location, &board.name),
                    "Tensorboard"
                );
            }
        }
    }

    Ok(())
}
