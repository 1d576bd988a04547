use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    cleanup::CleanupStack,
    container::Container,
    errors::ResolveError,
    resolver::{downcast, Resolver, ResolverExt, ResolverId},
    scope::Scope,
    types::{DynError, Injectable, Instance},
};

type AcquireFn<T> = Box<dyn Fn(&Container) -> Result<T, DynError> + Send + Sync>;
type ReleaseFn<T> = Arc<dyn Fn(Arc<T>) -> Result<(), DynError> + Send + Sync>;
type AsyncAcquireFn<T> = Box<dyn Fn(Container) -> BoxFuture<'static, Result<T, DynError>> + Send + Sync>;
type AsyncReleaseFn<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, Result<(), DynError>> + Send + Sync>;

enum Lifecycle<T> {
    Sync {
        acquire: AcquireFn<T>,
        release: ReleaseFn<T>,
    },
    Async {
        acquire: AsyncAcquireFn<T>,
        release: AsyncReleaseFn<T>,
    },
}

/// A value acquired once per container instance and released when the container exits
///
/// First access is always serialized in asynchronous containers. An asynchronous
/// resource can only be resolved from asynchronous containers.
pub struct Resource<T: Injectable> {
    id: ResolverId,
    scope: Scope,
    lifecycle: Lifecycle<T>,
}

impl<T: Injectable> Resource<T> {
    /// A resource acquired and released without suspending
    pub fn new<A, R, E>(scope: Scope, acquire: A, release: R) -> Self
    where
        A: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
        R: Fn(Arc<T>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        Resource {
            id: ResolverId::generate(),
            scope,
            lifecycle: Lifecycle::Sync {
                acquire: Box::new(move |container: &Container| -> Result<T, DynError> {
                    acquire(container).map_err(Into::into)
                }),
                release: Arc::new(move |value: Arc<T>| -> Result<(), DynError> {
                    release(value).map_err(Into::into)
                }),
            },
        }
    }

    /// A resource with suspendable acquisition and release
    pub fn new_async<A, AFut, R, RFut, E>(scope: Scope, acquire: A, release: R) -> Self
    where
        A: Fn(Container) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = Result<T, E>> + Send + 'static,
        R: Fn(Arc<T>) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<DynError>,
    {
        Resource {
            id: ResolverId::generate(),
            scope,
            lifecycle: Lifecycle::Async {
                acquire: Box::new(
                    move |container: Container| -> BoxFuture<'static, Result<T, DynError>> {
                        let acquired = acquire(container);
                        Box::pin(async move { acquired.await.map_err(Into::into) })
                    },
                ),
                release: Arc::new(
                    move |value: Arc<T>| -> BoxFuture<'static, Result<(), DynError>> {
                        let released = release(value);
                        Box::pin(async move { released.await.map_err(Into::into) })
                    },
                ),
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<ResolverId>) -> Self {
        self.id = id.into();
        self
    }

    fn producer_error(&self, error: DynError) -> ResolveError {
        ResolveError::Producer {
            resolver: self.id.clone(),
            error,
        }
    }

    /// Wraps an acquired value with a stack releasing it
    fn track_sync(value: T, release: &ReleaseFn<T>) -> (Instance, CleanupStack) {
        let value = Arc::new(value);
        let release = release.clone();
        let released = value.clone();

        let mut cleanup = CleanupStack::new();
        cleanup.push_sync(move || release(released));
        (Instance::from_arc(value), cleanup)
    }

    fn track_async(value: T, release: &AsyncReleaseFn<T>) -> (Instance, CleanupStack) {
        let value = Arc::new(value);
        let release = release.clone();
        let released = value.clone();

        let mut cleanup = CleanupStack::asynchronous();
        cleanup.push_async(move || release(released));
        (Instance::from_arc(value), cleanup)
    }
}

impl<T: Injectable> Resolver for Resource<T> {
    type Output = T;

    fn id(&self) -> &ResolverId {
        &self.id
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn is_async_only(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Async { .. })
    }

    fn requires_lock(&self) -> bool {
        true
    }

    fn resolve_sync(&self, container: &Container) -> Result<Arc<T>, ResolveError> {
        let owner = self.owning_container(container)?;
        if let Some(overridden) = self.fetch_override(&owner)? {
            return Ok(overridden);
        }

        let Lifecycle::Sync { acquire, release } = &self.lifecycle else {
            return Err(self.blocking_call_error(&owner));
        };

        let slot = owner.get_or_create_slot(&self.id, false, self.requires_lock())?;
        let instance = slot.get_or_try_init_sync(|| {
            let value = acquire(&owner).map_err(|error| self.producer_error(error))?;
            Ok(Self::track_sync(value, release))
        })?;
        downcast(&self.id, &instance)
    }

    async fn resolve_async(&self, container: &Container) -> Result<Arc<T>, ResolveError> {
        let owner = self.owning_container(container)?;
        if let Some(overridden) = self.fetch_override(&owner)? {
            return Ok(overridden);
        }

        let slot = owner.get_or_create_slot(&self.id, self.is_async_only(), self.requires_lock())?;
        let instance = slot
            .get_or_try_init_async(|| async {
                match &self.lifecycle {
                    Lifecycle::Sync { acquire, release } => {
                        let value = acquire(&owner).map_err(|error| self.producer_error(error))?;
                        Ok(Self::track_sync(value, release))
                    }
                    Lifecycle::Async { acquire, release } => {
                        let value = acquire(owner.clone())
                            .await
                            .map_err(|error| self.producer_error(error))?;
                        Ok(Self::track_async(value, release))
                    }
                }
            })
            .await?;
        downcast(&self.id, &instance)
    }
}
