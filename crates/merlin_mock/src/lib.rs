//! # Merlin Mock
//!
//! In-memory stand-ins for every remote collaborator of the merlin services.
//!
//! Each double records the calls it receives so tests can assert on what would have been sent.
//! Nothing leaves the process.
//!
//! ## Usage
//!
//! ```rust
//! # use merlin_mock::{MockPlatform, MockRegistry};
//! let registry = MockRegistry::with_images(["trainer"]);
//! let platform = MockPlatform::default();
//! assert!(platform.calls().is_empty());
//! ```

use bytes::Bytes;
use merlin_core::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`BlobStore`] keeping everything in a map, for paths and URIs alike.
#[derive(Clone, Default, Debug)]
pub struct MemoryStorage {
    files: Arc<Mutex<BTreeMap<String, Bytes>>>,
}

impl MemoryStorage {
    /// Every stored location, sorted.
    pub fn locations(&self) -> Vec<String> {
        lock(&self.files).keys().cloned().collect()
    }
}

impl BlobStore for MemoryStorage {
    async fn write_file(&self, location: &str, data: Bytes) -> Result<(), StorageError> {
        lock(&self.files).insert(location.to_string(), data);
        Ok(())
    }

    async fn read_file(&self, location: &str) -> Result<Bytes, StorageError> {
        lock(&self.files)
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(location.to_string()))
    }

    async fn exists(&self, location: &str) -> Result<bool, StorageError> {
        Ok(lock(&self.files).contains_key(location))
    }
}

/// One call received by [`MockPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Submit(PlatformContext, JobSubmission),
    Wait(String),
    Cancel(String),
    List(PlatformContext, JobFamily, String),
    SubmitPipeline(PlatformContext, PipelineJobRequest),
    Summary(String),
    Tensorboard(PlatformContext, String),
    ListTensorboards(PlatformContext),
    DeleteTensorboard(String),
    ProjectNumber(String),
}

/// Project number every project resolves to.
pub const PROJECT_NUMBER: &str = "123456789012";

#[derive(Default, Debug)]
struct PlatformState {
    calls: Vec<PlatformCall>,
    jobs: Vec<RemoteJob>,
    tensorboards: Vec<Tensorboard>,
    failing_cancels: HashSet<String>,
    final_state: Option<String>,
    tasks: Vec<TaskSummary>,
    counter: u64,
}

/// A recording [`MlPlatform`].
///
/// Submitted jobs get sequential ids and finish successfully unless [`MockPlatform::finish_with`]
/// says otherwise. Listing returns the jobs given to [`MockPlatform::with_jobs`] of the asked family.
#[derive(Clone, Default, Debug)]
pub struct MockPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl MockPlatform {
    pub fn with_jobs(jobs: impl IntoIterator<Item = RemoteJob>) -> Self {
        let platform = Self::default();
        lock(&platform.state).jobs = jobs.into_iter().collect();
        platform
    }

    /// Terminal state every waited job ends in.
    pub fn finish_with(self, state: &str) -> Self {
        lock(&self.state).final_state = Some(state.to_string());
        self
    }

    /// Makes cancelling `name` fail.
    pub fn fail_cancel(self, name: &str) -> Self {
        lock(&self.state).failing_cancels.insert(name.to_string());
        self
    }

    pub fn with_tasks(self, tasks: Vec<TaskSummary>) -> Self {
        lock(&self.state).tasks = tasks;
        self
    }

    /// Tensorboards that exist before the test starts.
    pub fn with_tensorboards(self, boards: Vec<Tensorboard>) -> Self {
        lock(&self.state).tensorboards = boards;
        self
    }

    pub fn tensorboards(&self) -> Vec<Tensorboard> {
        lock(&self.state).tensorboards.clone()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.state).calls.clone()
    }

    pub fn submitted(&self) -> Vec<JobSubmission> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Submit(_, s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Cancel(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        lock(&self.state).calls.push(call);
    }

    fn create(&self, ctx: &PlatformContext, family: JobFamily, display_name: &str) -> RemoteJob {
        let mut state = lock(&self.state);
        state.counter += 1;
        let job = RemoteJob {
            family,
            name: format!("{}/{}/{}", ctx.parent(), family.collection(), state.counter),
            display_name: display_name.to_string(),
            state: match family {
                JobFamily::CustomJob | JobFamily::HyperparameterTuningJob => {
                    JobState::Pending.as_str().to_string()
                }
                _ => PipelineState::Pending.as_str().to_string(),
            },
            create_time: None,
            error: None,
        };
        state.jobs.push(job.clone());
        job
    }

    fn find(&self, name: &str) -> Result<RemoteJob, PlatformError> {
        lock(&self.state)
            .jobs
            .iter()
            .find(|j| j.name == name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(name.to_string()))
    }
}

impl MlPlatform for MockPlatform {
    async fn submit_job(
        &self,
        ctx: &PlatformContext,
        request: &JobSubmission,
    ) -> Result<RemoteJob, PlatformError> {
        self.record(PlatformCall::Submit(ctx.clone(), request.clone()));
        Ok(self.create(ctx, request.family(), request.display_name()))
    }

    async fn wait_job(&self, family: JobFamily, name: &str) -> Result<RemoteJob, PlatformError> {
        self.record(PlatformCall::Wait(name.to_string()));
        let mut job = self.find(name)?;
        let final_state = lock(&self.state).final_state.clone();

        job.state = final_state.unwrap_or_else(|| match family {
            JobFamily::CustomJob | JobFamily::HyperparameterTuningJob => {
                JobState::Succeeded.as_str().to_string()
            }
            _ => PipelineState::Succeeded.as_str().to_string(),
        });

        if job.is_succeeded() {
            Ok(job)
        } else {
            Err(PlatformError::JobFailed {
                name: job.name,
                state: job.state,
            })
        }
    }

    async fn cancel_job(&self, _family: JobFamily, name: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::Cancel(name.to_string()));
        if lock(&self.state).failing_cancels.contains(name) {
            return Err(PlatformError::System(format!("cannot cancel {name}")));
        }
        Ok(())
    }

    async fn list_jobs(
        &self,
        ctx: &PlatformContext,
        family: JobFamily,
        filter: &str,
    ) -> Result<Vec<RemoteJob>, PlatformError> {
        self.record(PlatformCall::List(ctx.clone(), family, filter.to_string()));
        Ok(lock(&self.state)
            .jobs
            .iter()
            .filter(|j| j.family == family)
            .cloned()
            .collect())
    }

    async fn submit_pipeline(
        &self,
        ctx: &PlatformContext,
        request: &PipelineJobRequest,
    ) -> Result<RemoteJob, PlatformError> {
        self.record(PlatformCall::SubmitPipeline(ctx.clone(), request.clone()));
        Ok(self.create(ctx, JobFamily::PipelineJob, &request.display_name))
    }

    async fn pipeline_summary(&self, name: &str) -> Result<Vec<TaskSummary>, PlatformError> {
        self.record(PlatformCall::Summary(name.to_string()));
        Ok(lock(&self.state).tasks.clone())
    }

    async fn get_or_create_tensorboard(
        &self,
        ctx: &PlatformContext,
        display_name: &str,
    ) -> Result<String, PlatformError> {
        self.record(PlatformCall::Tensorboard(ctx.clone(), display_name.to_string()));
        let mut state = lock(&self.state);
        let name = format!("{}/tensorboards/{display_name}", ctx.parent());
        if !state.tensorboards.iter().any(|b| b.name == name) {
            state.tensorboards.push(Tensorboard {
                name: name.clone(),
                display_name: display_name.to_string(),
                create_time: None,
            });
        }
        Ok(name)
    }

    async fn list_tensorboards(
        &self,
        ctx: &PlatformContext,
    ) -> Result<Vec<Tensorboard>, PlatformError> {
        self.record(PlatformCall::ListTensorboards(ctx.clone()));
        let parent = format!("{}/", ctx.parent());
        Ok(lock(&self.state)
            .tensorboards
            .iter()
            .filter(|b| b.name.starts_with(&parent))
            .cloned()
            .collect())
    }

    async fn delete_tensorboard(&self, name: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::DeleteTensorboard(name.to_string()));
        let mut state = lock(&self.state);
        let before = state.tensorboards.len();
        state.tensorboards.retain(|b| b.name != name);
        if state.tensorboards.len() == before {
            return Err(PlatformError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn project_number(&self, project: &str) -> Result<String, PlatformError> {
        self.record(PlatformCall::ProjectNumber(project.to_string()));
        Ok(PROJECT_NUMBER.to_string())
    }
}

#[derive(Default, Debug)]
struct RegistryState {
    images: BTreeMap<String, ImageTags>,
    pushed: Vec<String>,
}

/// An [`ImageRegistry`] knowing a fixed set of images.
#[derive(Clone, Default, Debug)]
pub struct MockRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl MockRegistry {
    /// Knows every ref in `refs`, pushed as `mock.registry/{ref}:latest`.
    pub fn with_images<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::default();
        for r in refs {
            let r = r.into();
            let tags = ImageTags {
                local_tag: format!("{r}:latest"),
                remote_tag: format!("mock.registry/{r}:latest"),
                pushed_uri: format!("mock.registry/{r}:latest"),
            };
            lock(&registry.state).images.insert(r, tags);
        }
        registry
    }

    pub fn with_tags(self, image_ref: &str, tags: ImageTags) -> Self {
        lock(&self.state).images.insert(image_ref.to_string(), tags);
        self
    }

    pub fn pushed(&self) -> Vec<String> {
        lock(&self.state).pushed.clone()
    }
}

impl ImageRegistry for MockRegistry {
    async fn get_image(&self, image_ref: &str) -> Result<ImageTags, RegistryError> {
        lock(&self.state)
            .images
            .get(image_ref)
            .cloned()
            .ok_or_else(|| RegistryError::ImageNotFound(image_ref.to_string()))
    }

    async fn push_image(&self, image_ref: &str) -> Result<(), RegistryError> {
        let mut state = lock(&self.state);
        if !state.images.contains_key(image_ref) {
            return Err(RegistryError::ImageNotFound(image_ref.to_string()));
        }
        state.pushed.push(image_ref.to_string());
        Ok(())
    }
}

/// A recording [`FunctionPlatform`].
#[derive(Clone, Default, Debug)]
pub struct MockFunctions {
    deployed: Arc<Mutex<Vec<(PlatformContext, FunctionResource)>>>,
}

impl MockFunctions {
    pub fn deployed(&self) -> Vec<(PlatformContext, FunctionResource)> {
        lock(&self.deployed).clone()
    }
}

impl FunctionPlatform for MockFunctions {
    async fn upsert_function(
        &self,
        ctx: &PlatformContext,
        function: &FunctionResource,
    ) -> Result<DeployedFunction, PlatformError> {
        lock(&self.deployed).push((ctx.clone(), function.clone()));
        Ok(DeployedFunction {
            name: format!("{}/functions/{}", ctx.parent(), function.name),
            url: format!(
                "https://{}-{}.cloudfunctions.net/{}",
                ctx.region, ctx.project, function.name
            ),
        })
    }
}

/// A recording [`SchedulerPlatform`].
#[derive(Clone, Default, Debug)]
pub struct MockScheduler {
    schedules: Arc<Mutex<Vec<(PlatformContext, SchedulerResource)>>>,
}

impl MockScheduler {
    pub fn schedules(&self) -> Vec<(PlatformContext, SchedulerResource)> {
        lock(&self.schedules).clone()
    }
}

impl SchedulerPlatform for MockScheduler {
    async fn upsert_schedule(
        &self,
        ctx: &PlatformContext,
        schedule: &SchedulerResource,
    ) -> Result<(), PlatformError> {
        lock(&self.schedules).push((ctx.clone(), schedule.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submitted_jobs_can_be_waited_on() {
        let platform = MockPlatform::default();
        let ctx = PlatformContext::new("p", "r");
        let request = JobSubmission::TrainingPipeline(TrainingPipelineResource {
            display_name: "t".into(),
            training_task_definition: "def".into(),
            training_task_inputs: CustomJobSpec {
                worker_pool_specs: Vec::new(),
                scheduling: Scheduling::from_seconds(1),
                base_output_directory: GcsDestination {
                    output_uri_prefix: "gs://b".into(),
                },
                service_account: None,
                network: None,
                tensorboard: None,
                enable_web_access: false,
            },
            labels: BTreeMap::new(),
        });

        let job = platform.submit_job(&ctx, &request).await.unwrap();
        assert_eq!(job.name, "projects/p/locations/r/trainingPipelines/1");

        let done = platform.wait_job(job.family, &job.name).await.unwrap();
        assert_eq!(done.state, "PIPELINE_STATE_SUCCEEDED");

        let failing = MockPlatform::default().finish_with("PIPELINE_STATE_FAILED");
        let job = failing.submit_job(&ctx, &request).await.unwrap();
        assert!(failing.wait_job(job.family, &job.name).await.is_err());
    }

    #[tokio::test]
    async fn tensorboards_live_until_deleted() {
        let platform = MockPlatform::default();
        let ctx = PlatformContext::new("p", "r");

        let name = platform.get_or_create_tensorboard(&ctx, "board").await.unwrap();
        platform.get_or_create_tensorboard(&ctx, "board").await.unwrap();
        assert_eq!(platform.list_tensorboards(&ctx).await.unwrap().len(), 1);
        assert!(platform
            .list_tensorboards(&PlatformContext::new("p", "elsewhere"))
            .await
            .unwrap()
            .is_empty());

        platform.delete_tensorboard(&name).await.unwrap();
        assert!(platform.tensorboards().is_empty());
        assert!(matches!(
            platform.delete_tensorboard(&name).await,
            Err(PlatformError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn registry_knows_only_declared_images() {
        let registry = MockRegistry::with_images(["trainer"]);
        assert_eq!(
            registry.get_image("trainer").await.unwrap().pushed_uri,
            "mock.registry/trainer:latest"
        );
        assert!(registry.get_image("ghost").await.is_err());
        registry.push_image("trainer").await.unwrap();
        assert_eq!(registry.pushed(), vec!["trainer"]);
    }

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let storage = MemoryStorage::default();
        storage
            .write_file("gs://b/x.json", Bytes::from_static(b"1"))
            .await
            .unwrap();
        assert!(storage.exists("gs://b/x.json").await.unwrap());
        assert!(matches!(
            storage.read_file("gs://b/y.json").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
