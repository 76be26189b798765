use crate::error::*;
use crate::platform::*;

use bytes::Bytes;

/// Byte storage addressed by local path or object URI (`gs://bucket/key`).
pub trait BlobStore: Send + Sync + 'static + Clone {
    /// Writes `data` to `location`, creating parents and replacing any previous content.
    fn write_file(
        &self,
        location: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Reads the whole content of `location`.
    fn read_file(&self, location: &str)
    -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    /// Checks if something is stored at `location`.
    fn exists(&self, location: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Copies `from` to `to`, possibly across backends of the same store.
    fn copy(&self, from: &str, to: &str) -> impl Future<Output = Result<(), StorageError>> + Send {
        async move {
            let data = self.read_file(from).await?;
            self.write_file(to, data).await
        }
    }
}

/// The managed ML platform: jobs, pipeline jobs and tensorboards.
///
/// Every call takes the [`PlatformContext`] it applies to; implementations keep no
/// per-project state between calls.
pub trait MlPlatform: Send + Sync + 'static + Clone {
    /// Creates the resource and returns as soon as the platform acknowledged it.
    fn submit_job(
        &self,
        ctx: &PlatformContext,
        request: &JobSubmission,
    ) -> impl Future<Output = Result<RemoteJob, PlatformError>> + Send;

    /// Polls until the job reaches a terminal state.
    ///
    /// A terminal state other than success is reported as [`PlatformError::JobFailed`].
    fn wait_job(
        &self,
        family: JobFamily,
        name: &str,
    ) -> impl Future<Output = Result<RemoteJob, PlatformError>> + Send;

    fn cancel_job(
        &self,
        family: JobFamily,
        name: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Lists jobs of `family` matching a [`list_filter`] expression.
    fn list_jobs(
        &self,
        ctx: &PlatformContext,
        family: JobFamily,
        filter: &str,
    ) -> impl Future<Output = Result<Vec<RemoteJob>, PlatformError>> + Send;

    fn submit_pipeline(
        &self,
        ctx: &PlatformContext,
        request: &PipelineJobRequest,
    ) -> impl Future<Output = Result<RemoteJob, PlatformError>> + Send;

    /// Per-task states of a pipeline job.
    fn pipeline_summary(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<TaskSummary>, PlatformError>> + Send;

    /// Returns the resource name of the tensorboard with `display_name`, creating it if needed.
    fn get_or_create_tensorboard(
        &self,
        ctx: &PlatformContext,
        display_name: &str,
    ) -> impl Future<Output = Result<String, PlatformError>> + Send;

    fn list_tensorboards(
        &self,
        ctx: &PlatformContext,
    ) -> impl Future<Output = Result<Vec<Tensorboard>, PlatformError>> + Send;

    /// Deletes the tensorboard with resource name `name` and waits for the deletion.
    fn delete_tensorboard(&self, name: &str)
    -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Numeric identifier of `project`, used to address its networks.
    fn project_number(&self, project: &str)
    -> impl Future<Output = Result<String, PlatformError>> + Send;
}

/// Resolves docker image refs to tags and pushes them.
pub trait ImageRegistry: Send + Sync + 'static + Clone {
    /// `(local_tag, remote_tag, pushed_uri)` of the image declared as `image_ref`.
    fn get_image(
        &self,
        image_ref: &str,
    ) -> impl Future<Output = Result<ImageTags, RegistryError>> + Send;

    /// Makes the image pullable by the platform. Provided images are left untouched.
    fn push_image(&self, image_ref: &str)
    -> impl Future<Output = Result<(), RegistryError>> + Send;
}

/// Serverless functions fronting scheduled pipeline runs.
pub trait FunctionPlatform: Send + Sync + 'static + Clone {
    /// Creates the function or updates it in place.
    fn upsert_function(
        &self,
        ctx: &PlatformContext,
        function: &FunctionResource,
    ) -> impl Future<Output = Result<DeployedFunction, PlatformError>> + Send;
}

/// Cron-like scheduler calling deployed functions.
pub trait SchedulerPlatform: Send + Sync + 'static + Clone {
    /// Creates the scheduler job or updates it in place.
    fn upsert_schedule(
        &self,
        ctx: &PlatformContext,
        schedule: &SchedulerResource,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

/// Interactive yes/no prompt, asked before each cancellation.
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysConfirm(pub bool);

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}

/// The collaborators the orchestration services are generic over.
pub trait MerlinServices: Send + Sync + 'static + Clone {
    type Storage: BlobStore;
    type Platform: MlPlatform;
    type Registry: ImageRegistry;
    type Functions: FunctionPlatform;
    type Scheduler: SchedulerPlatform;

    fn storage(&self) -> &Self::Storage;
    fn platform(&self) -> &Self::Platform;
    fn registry(&self) -> &Self::Registry;
    fn functions(&self) -> &Self::Functions;
    fn scheduler(&self) -> &Self::Scheduler;
}
