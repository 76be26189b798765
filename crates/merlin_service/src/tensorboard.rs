//! Create, delete and list of the tensorboards declared in `merlin.yaml`.
//!
//! Tensorboards are matched by display name, which is the name they are declared with.

use crate::error::Result;

use merlin_core::constants::urls;
use merlin_core::prelude::*;
use tracing::{info, warn};

pub struct TensorboardService<S: MerlinServices> {
    services: S,
    config: MerlinConfig,
}

impl<S: MerlinServices> TensorboardService<S> {
    pub fn new(services: S, config: MerlinConfig) -> Self {
        Self { services, config }
    }

    async fn find(&self, ctx: &PlatformContext, display_name: &str) -> Result<Option<Tensorboard>> {
        let boards = self.services.platform().list_tensorboards(ctx).await?;
        Ok(boards.into_iter().find(|b| b.display_name == display_name))
    }

    /// Creates every tensorboard selected by `name`.
    ///
    /// An existing instance is only replaced when `confirm` agrees; otherwise it is kept.
    /// Returns the resource names of the instances now running.
    pub async fn create(&self, name: &str, confirm: &dyn Confirm) -> Result<Vec<String>> {
        let platform = self.services.platform();
        let mut running = Vec::new();
        for board in self.config.tensorboards(name)? {
            let ctx = self.config.tensorboard_context(board);

            if let Some(existing) = self.find(&ctx, &board.name).await? {
                let question = format!(
                    "Tensorboard {} already exists at {}. Delete it and create a new one?",
                    board.name, existing.name
                );
                if !confirm.confirm(&question) {
                    info!(tensorboard = %board.name, resource = %existing.name, "Keeping existing tensorboard");
                    running.push(existing.name);
                    continue;
                }
                platform.delete_tensorboard(&existing.name).await?;
            }

            let resource = platform.get_or_create_tensorboard(&ctx, &board.name).await?;
            info!(
                tensorboard = %board.name,
                dashboard = %urls::tensorboard_dashboard(&ctx.project, &ctx.region, &resource),
                "Tensorboard is running"
            );
            running.push(resource);
        }
        Ok(running)
    }

    /// Deletes every tensorboard selected by `name` that exists. Returns how many were deleted.
    pub async fn delete(&self, name: &str) -> Result<usize> {
        let mut deleted = 0;
        for board in self.config.tensorboards(name)? {
            let ctx = self.config.tensorboard_context(board);
            match self.find(&ctx, &board.name).await? {
                Some(existing) => {
                    info!(tensorboard = %board.name, resource = %existing.name, "Deleting tensorboard");
                    self.services
                        .platform()
                        .delete_tensorboard(&existing.name)
                        .await?;
                    deleted += 1;
                }
                None => warn!(tensorboard = %board.name, "Tensorboard does not exist, nothing to delete"),
            }
        }
        Ok(deleted)
    }

    /// Every tensorboard of the project in `region`, the profile's region by default.
    pub async fn list(&self, region: Option<&str>) -> Result<Vec<Tensorboard>> {
        let profile = &self.config.gcp_profile;
        let ctx = PlatformContext::new(
            &profile.project_id,
            region.unwrap_or(&profile.region),
        );
        Ok(self.services.platform().list_tensorboards(&ctx).await?)
    }
}
