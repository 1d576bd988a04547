use std::{ops::Deref, sync::Arc};

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use strata_di::{Container, ResolveError, Resolver};

/// The container opened for the current request by [crate::setup_di]
///
/// Rejects with a 500 if the router was not set up with [crate::setup_di].
#[derive(Clone, Debug)]
pub struct RequestContainer(Container);

impl RequestContainer {
    pub(crate) fn new(container: Container) -> Self {
        RequestContainer(container)
    }

    /// Resolves `resolver` against this request, asynchronously
    pub async fn resolve<R: Resolver>(&self, resolver: &R) -> Result<Arc<R::Output>, ResolveError> {
        resolver.resolve_async(&self.0).await
    }

    pub fn into_inner(self) -> Container {
        self.0
    }
}

impl Deref for RequestContainer {
    type Target = Container;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for RequestContainer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContainer>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "No request container, the router is missing setup_di",
        ))
    }
}
