use crate::error::Result;

use merlin_core::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Tags of every ref, failing on the first image the registry cannot resolve.
pub(crate) async fn images<R: ImageRegistry>(
    registry: &R,
    refs: &[String],
) -> Result<BTreeMap<String, ImageTags>> {
    let mut images = BTreeMap::new();
    for r in refs {
        let tags = registry.get_image(r).await?;
        debug!(image = %r, uri = %tags.pushed_uri, "Resolved docker image");
        images.insert(r.clone(), tags);
    }
    Ok(images)
}

/// Resource name of the tensorboard declared as `board`, created in its own region when set.
pub(crate) async fn tensorboard<P: MlPlatform>(
    platform: &P,
    config: &MerlinConfig,
    ctx: &PlatformContext,
    board: Option<&str>,
) -> Result<Option<String>> {
    let Some(board) = board else {
        return Ok(None);
    };

    let declared = config
        .tensorboard(board)
        .ok_or_else(|| ConfigError::UnknownInstance {
            kind: "tensorboard".into(),
            name: board.to_string(),
        })?;
    let ctx = match &declared.region {
        Some(region) => PlatformContext::new(&ctx.project, region),
        None => ctx.clone(),
    };

    let name = platform.get_or_create_tensorboard(&ctx, board).await?;
    info!(tensorboard = %name, "Using tensorboard");
    Ok(Some(name))
}

/// Project number needed to address `network`. Only bare network names need one.
pub(crate) async fn project_number<P: MlPlatform>(
    platform: &P,
    project: &str,
    network: Option<&str>,
) -> Result<Option<String>> {
    match network {
        Some(network) if !network.starts_with("projects/") => {
            let number = platform.project_number(project).await?;
            debug!(project, number = %number, "Resolved project number");
            Ok(Some(number))
        }
        _ => Ok(None),
    }
}

/// Asks before cancelling each job. Declined prompts and failed cancellations are skipped.
///
/// Returns how many jobs were cancelled.
pub(crate) async fn cancel_confirmed<P: MlPlatform>(
    platform: &P,
    jobs: Vec<RemoteJob>,
    confirm: &dyn Confirm,
) -> usize {
    let mut cancelled = 0;
    for job in jobs {
        let started = job.create_time.as_deref().unwrap_or("unknown time");
        let question = format!(
            "Do you want to cancel job {} (started at {started})?",
            job.display_name
        );
        if !confirm.confirm(&question) {
            info!(job = %job.name, "Left running");
            continue;
        }

        match platform.cancel_job(job.family, &job.name).await {
            Ok(()) => {
                info!(job = %job.name, "Cancelled");
                cancelled += 1;
            }
            Err(e) => warn!(job = %job.name, error = %e, "Failed to cancel"),
        }
    }
    cancelled
}
