use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    cleanup::CleanupStack,
    errors::{ContainerError, ModeMismatch, ResolveError},
    resolver::ResolverId,
    types::{DynError, Instance},
};

/// Stamps stored values so teardown can follow the order productions completed in
static PRODUCTION_ORDER: AtomicU64 = AtomicU64::new(0);

/// Memoization and cleanup tracking of one dependency within one container instance
///
/// Whenever `value` is set, `cleanup` is set as well - possibly empty.
pub struct ResolutionSlot {
    resolver: ResolverId,
    state: Mutex<SlotState>,
    /// Serializes first creation, only allocated for asynchronous containers
    creation_lock: Option<futures::lock::Mutex<()>>,
}

#[derive(Default)]
struct SlotState {
    value: Option<Instance>,
    cleanup: Option<CleanupStack>,
    produced: Option<u64>,
}

impl std::fmt::Debug for ResolutionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ResolutionSlot")
            .field("resolver", &self.resolver)
            .field("value", &state.value)
            .field("cleanup", &state.cleanup)
            .field("locked", &self.creation_lock.is_some())
            .finish()
    }
}

impl ResolutionSlot {
    pub(crate) fn new(resolver: ResolverId, with_lock: bool) -> Self {
        ResolutionSlot {
            resolver,
            state: Mutex::new(SlotState::default()),
            creation_lock: with_lock.then(|| futures::lock::Mutex::new(())),
        }
    }

    pub fn resolver(&self) -> &ResolverId {
        &self.resolver
    }

    pub fn has_creation_lock(&self) -> bool {
        self.creation_lock.is_some()
    }

    /// The memoized value, if already produced
    pub fn instance(&self) -> Option<Instance> {
        self.state().value.clone()
    }

    pub fn is_populated(&self) -> bool {
        self.state().value.is_some()
    }

    /// Position of the stored value among all completed productions
    ///
    /// A value produced while producing another one completes first, so it gets
    /// the lower position and is torn down after its dependent.
    pub(crate) fn produced_order(&self) -> Option<u64> {
        self.state().produced
    }

    /// True while an asynchronous production holds the creation lock
    pub(crate) fn is_creating(&self) -> bool {
        self.creation_lock
            .as_ref()
            .is_some_and(|lock| lock.try_lock().is_none())
    }

    /// Returns the memoized value or produces it without suspending
    ///
    /// A held creation lock can't be awaited here and fails with
    /// [ContainerError::CreationInProgress]. A failed production leaves the slot empty.
    pub fn get_or_try_init_sync<F>(&self, produce: F) -> Result<Instance, ResolveError>
    where
        F: FnOnce() -> Result<(Instance, CleanupStack), ResolveError>,
    {
        let _creation = match &self.creation_lock {
            Some(lock) => Some(lock.try_lock().ok_or_else(|| {
                ContainerError::CreationInProgress {
                    resolver: self.resolver.clone(),
                }
            })?),
            None => None,
        };

        if let Some(instance) = self.instance() {
            return Ok(instance);
        }

        let (instance, cleanup) = produce()?;
        match self.store(instance, cleanup) {
            Ok(instance) => Ok(instance),
            Err((existing, rejected)) => {
                match rejected.close_sync() {
                    Ok(errors) => self.log_discard_errors(errors),
                    Err(_) => tracing::warn!(
                        "Dropped async cleanup of a discarded '{}' without running it",
                        self.resolver
                    ),
                }
                Ok(existing)
            }
        }
    }

    /// Returns the memoized value or produces it
    ///
    /// Holds the creation lock, if any, from the check until the value is stored.
    /// The lock is released on every path, including cancellation of the returned future.
    pub async fn get_or_try_init_async<F, Fut>(&self, produce: F) -> Result<Instance, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Instance, CleanupStack), ResolveError>>,
    {
        let _creation = match &self.creation_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        if let Some(instance) = self.instance() {
            return Ok(instance);
        }

        let (instance, cleanup) = produce().await?;
        match self.store(instance, cleanup) {
            Ok(instance) => Ok(instance),
            Err((existing, rejected)) => {
                // Lost an unserialized race, the first stored value wins
                let errors = rejected.close_async().await;
                self.log_discard_errors(errors);
                Ok(existing)
            }
        }
    }

    /// Stores a produced value, or hands it back with the value stored before
    fn store(
        &self,
        instance: Instance,
        cleanup: CleanupStack,
    ) -> Result<Instance, (Instance, CleanupStack)> {
        let mut state = self.state();
        if let Some(existing) = &state.value {
            return Err((existing.clone(), cleanup));
        }

        tracing::debug!("Produced '{}' ({})", self.resolver, instance.info);
        state.value = Some(instance.clone());
        state.cleanup = Some(cleanup);
        state.produced = Some(PRODUCTION_ORDER.fetch_add(1, Ordering::Relaxed));
        Ok(instance)
    }

    pub(crate) fn has_async_cleanup(&self) -> bool {
        self.state()
            .cleanup
            .as_ref()
            .is_some_and(CleanupStack::is_async)
    }

    /// Releases the value with a blocking teardown
    ///
    /// Fails without running anything if the cleanup stack is asynchronous.
    pub(crate) fn teardown_sync(&self) -> Result<Vec<DynError>, ModeMismatch> {
        let mut state = self.state();
        let Some(cleanup) = state.cleanup.take() else {
            state.value = None;
            state.produced = None;
            return Ok(Vec::new());
        };

        match cleanup.close_sync() {
            Ok(errors) => {
                state.value = None;
                state.produced = None;
                Ok(errors)
            }
            Err(cleanup) => {
                state.cleanup = Some(cleanup);
                Err(ModeMismatch::AsyncCleanupInSyncTeardown {
                    resolver: self.resolver.clone(),
                })
            }
        }
    }

    /// Releases the value, awaiting suspendable release actions
    pub(crate) async fn teardown_async(&self) -> Vec<DynError> {
        let cleanup = {
            let mut state = self.state();
            state.value = None;
            state.produced = None;
            state.cleanup.take()
        };

        match cleanup {
            Some(cleanup) => cleanup.close_async().await,
            None => Vec::new(),
        }
    }

    fn log_discard_errors(&self, errors: Vec<DynError>) {
        for error in errors {
            tracing::warn!(
                "Release of a discarded '{}' failed - error: {}",
                self.resolver,
                error
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
