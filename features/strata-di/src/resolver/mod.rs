use std::{future::Future, sync::Arc};

use crate::{
    container::Container,
    errors::{ContainerError, ModeMismatch, ResolveError},
    scope::Scope,
    types::{Injectable, Instance},
};

pub mod context_adapter;
pub mod factory;
pub mod resource;

/// Stable identity of a resolver, keys slots and overrides
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverId(Arc<str>);

impl ResolverId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        ResolverId(name.into())
    }

    /// A random, globally unique identity
    pub fn generate() -> Self {
        ResolverId(uuid::Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResolverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ResolverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResolverId({})", self.0)
    }
}

impl From<&str> for ResolverId {
    fn from(value: &str) -> Self {
        ResolverId::new(value)
    }
}

/// A producer of one dependency
///
/// Implementations must
/// 1. resolve against `container.find_scope(self.scope())`, never the calling container itself
/// 2. return an override of that container verbatim, without producing
/// 3. otherwise produce at most once per slot and return the memoized value afterwards
/// 4. keep [Resolver::id] stable and unique for the whole dependency graph
///
/// [ResolverExt] provides the shared steps.
pub trait Resolver: Send + Sync {
    type Output: Injectable;

    fn id(&self) -> &ResolverId;

    /// The scope this dependency lives in
    fn scope(&self) -> Scope;

    /// Whether production needs a suspendable container
    fn is_async_only(&self) -> bool {
        false
    }

    /// Whether first access must be serialized in asynchronous containers
    fn requires_lock(&self) -> bool {
        false
    }

    /// Resolves without suspending
    fn resolve_sync(&self, container: &Container) -> Result<Arc<Self::Output>, ResolveError>;

    /// Resolves, suspending where production or locking needs to
    fn resolve_async(
        &self,
        container: &Container,
    ) -> impl Future<Output = Result<Arc<Self::Output>, ResolveError>> + Send;
}

/// Steps every [Resolver] shares
pub trait ResolverExt: Resolver {
    /// The container this resolver's values live in
    fn owning_container(&self, container: &Container) -> Result<Container, ContainerError> {
        container.find_scope(self.scope())
    }

    /// The override set on `owner`, if any
    fn fetch_override(&self, owner: &Container) -> Result<Option<Arc<Self::Output>>, ResolveError> {
        owner
            .get_override(self.id())?
            .map(|instance| downcast(self.id(), &instance))
            .transpose()
    }

    /// Replaces this dependency with `value` in the container owning its scope
    fn override_in(&self, container: &Container, value: Self::Output) -> Result<(), ContainerError> {
        self.override_arc_in(container, Arc::new(value))
    }

    fn override_arc_in(
        &self,
        container: &Container,
        value: Arc<Self::Output>,
    ) -> Result<(), ContainerError> {
        self.owning_container(container)?
            .set_override(self.id().clone(), Instance::from_arc(value))
    }

    fn reset_override_in(&self, container: &Container) -> Result<(), ContainerError> {
        self.owning_container(container)?
            .clear_override(Some(self.id()))
    }

    /// The error for a blocking resolution of an asynchronous-only dependency
    fn blocking_call_error(&self, owner: &Container) -> ResolveError {
        if let Err(error) = owner.check_resolvable(self.id(), true) {
            return error.into();
        }
        ModeMismatch::AsyncResourceInBlockingCall {
            resolver: self.id().clone(),
        }
        .into()
    }
}
impl<R: Resolver + ?Sized> ResolverExt for R {}

pub(crate) fn downcast<T: Injectable>(
    resolver: &ResolverId,
    instance: &Instance,
) -> Result<Arc<T>, ResolveError> {
    instance
        .downcast::<T>()
        .map_err(|actual| ResolveError::DowncastFailed {
            resolver: resolver.clone(),
            required: std::any::type_name::<T>(),
            actual,
        })
}
