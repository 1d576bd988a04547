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

type SyncProduce<T> = Box<dyn Fn(&Container) -> Result<T, DynError> + Send + Sync>;
type AsyncProduce<T> = Box<dyn Fn(Container) -> BoxFuture<'static, Result<T, DynError>> + Send + Sync>;

enum Produce<T> {
    Sync(SyncProduce<T>),
    Async(AsyncProduce<T>),
}

/// Produces a value from the container owning its scope, without release actions
///
/// Transient by default, producing on every resolution. A [Factory::cached] factory
/// produces once per container instance.
pub struct Factory<T: Injectable> {
    id: ResolverId,
    scope: Scope,
    cached: bool,
    produce: Produce<T>,
}

impl<T: Injectable> Factory<T> {
    pub fn new<F, E>(scope: Scope, produce: F) -> Self
    where
        F: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        Factory {
            id: ResolverId::generate(),
            scope,
            cached: false,
            produce: Produce::Sync(Box::new(
                move |container: &Container| -> Result<T, DynError> {
                    produce(container).map_err(Into::into)
                },
            )),
        }
    }

    /// A factory which can only be resolved in asynchronous containers
    pub fn new_async<F, Fut, E>(scope: Scope, produce: F) -> Self
    where
        F: Fn(Container) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError>,
    {
        Factory {
            id: ResolverId::generate(),
            scope,
            cached: false,
            produce: Produce::Async(Box::new(
                move |container: Container| -> BoxFuture<'static, Result<T, DynError>> {
                    let produced = produce(container);
                    Box::pin(async move { produced.await.map_err(Into::into) })
                },
            )),
        }
    }

    /// Memoizes the produced value in the owning container
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn with_id(mut self, id: impl Into<ResolverId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    fn producer_error(&self, error: DynError) -> ResolveError {
        ResolveError::Producer {
            resolver: self.id.clone(),
            error,
        }
    }

    async fn produce_async(&self, owner: &Container) -> Result<T, ResolveError> {
        let produced = match &self.produce {
            Produce::Sync(produce) => produce(owner),
            Produce::Async(produce) => produce(owner.clone()).await,
        };
        produced.map_err(|error| self.producer_error(error))
    }
}

impl<T: Injectable> Resolver for Factory<T> {
    type Output = T;

    fn id(&self) -> &ResolverId {
        &self.id
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn is_async_only(&self) -> bool {
        matches!(self.produce, Produce::Async(_))
    }

    fn requires_lock(&self) -> bool {
        self.cached
    }

    fn resolve_sync(&self, container: &Container) -> Result<Arc<T>, ResolveError> {
        let owner = self.owning_container(container)?;
        if let Some(overridden) = self.fetch_override(&owner)? {
            return Ok(overridden);
        }

        let Produce::Sync(produce) = &self.produce else {
            return Err(self.blocking_call_error(&owner));
        };

        if !self.cached {
            owner.check_resolvable(&self.id, false)?;
            return produce(&owner)
                .map(Arc::new)
                .map_err(|error| self.producer_error(error));
        }

        let slot = owner.get_or_create_slot(&self.id, false, self.requires_lock())?;
        let instance = slot.get_or_try_init_sync(|| {
            let value = produce(&owner).map_err(|error| self.producer_error(error))?;
            Ok((Instance::new(value), CleanupStack::new()))
        })?;
        downcast(&self.id, &instance)
    }

    async fn resolve_async(&self, container: &Container) -> Result<Arc<T>, ResolveError> {
        let owner = self.owning_container(container)?;
        if let Some(overridden) = self.fetch_override(&owner)? {
            return Ok(overridden);
        }

        if !self.cached {
            owner.check_resolvable(&self.id, self.is_async_only())?;
            return self.produce_async(&owner).await.map(Arc::new);
        }

        let slot = owner.get_or_create_slot(&self.id, self.is_async_only(), self.requires_lock())?;
        let instance = slot
            .get_or_try_init_async(|| async {
                let value = self.produce_async(&owner).await?;
                Ok((Instance::new(value), CleanupStack::new()))
            })
            .await?;
        downcast(&self.id, &instance)
    }
}
