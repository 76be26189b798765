use merlin_core::prelude::*;

#[derive(Clone)]
pub struct CoreServices<S, P, R, F, C> {
    pub storage: S,
    pub platform: P,
    pub registry: R,
    pub functions: F,
    pub scheduler: C,
}

impl<S, P, R, F, C> MerlinServices for CoreServices<S, P, R, F, C>
where
    S: BlobStore,
    P: MlPlatform,
    R: ImageRegistry,
    F: FunctionPlatform,
    C: SchedulerPlatform,
{
    type Storage = S;
    type Platform = P;
    type Registry = R;
    type Functions = F;
    type Scheduler = C;

    fn storage(&self) -> &S {
        &self.storage
    }
    fn platform(&self) -> &P {
        &self.platform
    }
    fn registry(&self) -> &R {
        &self.registry
    }
    fn functions(&self) -> &F {
        &self.functions
    }
    fn scheduler(&self) -> &C {
        &self.scheduler
    }
}
