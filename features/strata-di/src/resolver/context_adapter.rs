use std::sync::Arc;

use crate::{
    container::Container,
    context::Context,
    errors::ResolveError,
    resolver::{Resolver, ResolverExt, ResolverId},
    scope::Scope,
    types::{DynError, Injectable},
};

type ContextFn<T> = Box<dyn Fn(&Context) -> Result<T, DynError> + Send + Sync>;

enum Source<T> {
    /// Returns the context entry itself
    Key(String),
    Function(ContextFn<T>),
}

/// Produces a value from the context of the container owning its scope
///
/// Never memoizes and never locks; the context is read on every resolution.
pub struct ContextAdapter<T: Injectable> {
    id: ResolverId,
    scope: Scope,
    source: Source<T>,
}

impl<T: Injectable> ContextAdapter<T> {
    /// Calls `function` with the owning container's context
    pub fn new<F, E>(scope: Scope, function: F) -> Self
    where
        F: Fn(&Context) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        ContextAdapter {
            id: ResolverId::generate(),
            scope,
            source: Source::Function(Box::new(
                move |context: &Context| -> Result<T, DynError> {
                    function(context).map_err(Into::into)
                },
            )),
        }
    }

    /// Returns the context entry under `key`
    pub fn from_key(scope: Scope, key: impl Into<String>) -> Self {
        ContextAdapter {
            id: ResolverId::generate(),
            scope,
            source: Source::Key(key.into()),
        }
    }

    /// Uses a stable, readable identity instead of a generated one
    pub fn with_id(mut self, id: impl Into<ResolverId>) -> Self {
        self.id = id.into();
        self
    }
}

impl<T: Injectable> Resolver for ContextAdapter<T> {
    type Output = T;

    fn id(&self) -> &ResolverId {
        &self.id
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn resolve_sync(&self, container: &Container) -> Result<Arc<T>, ResolveError> {
        let owner = self.owning_container(container)?;
        if let Some(overridden) = self.fetch_override(&owner)? {
            return Ok(overridden);
        }

        let context = owner.context();
        match &self.source {
            Source::Key(key) => Ok(context.require::<T>(key)?),
            Source::Function(function) => function(&context).map(Arc::new).map_err(|error| {
                ResolveError::Producer {
                    resolver: self.id.clone(),
                    error,
                }
            }),
        }
    }

    async fn resolve_async(&self, container: &Container) -> Result<Arc<T>, ResolveError> {
        self.resolve_sync(container)
    }
}
