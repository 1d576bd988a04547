use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use strata_di::{Container, ContainerError, Context, Mode, Scope};

pub mod extract;

pub use extract::RequestContainer;

/// Opens a container for every request handled by `router`
///
/// The request container is a child of `app` at [Scope::REQUEST], entered asynchronously,
/// with the entries `method`, `uri` and `headers` in its context. It is exited once the
/// handler has produced its response. If the request is dropped first, by a disconnect,
/// a timeout or a panic, it is exited from a task spawned on the current runtime.
/// `app` must be entered while the router serves.
pub fn setup_di<S>(router: Router<S>, app: Container) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    setup_di_at(router, app, Scope::REQUEST)
}

/// Like [setup_di], opening the request containers at `scope`
pub fn setup_di_at<S>(router: Router<S>, app: Container, scope: Scope) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(
        RequestScope { app, scope },
        request_scope,
    ))
}

#[derive(Clone)]
struct RequestScope {
    app: Container,
    scope: Scope,
}

impl RequestScope {
    fn open(&self, request: &Request) -> Result<Container, ContainerError> {
        if !self.app.is_entered() {
            return Err(ContainerError::NotEntered {
                scope: self.app.scope_name(),
            });
        }

        let context = Context::new()
            .with("method", request.method().clone())
            .with("uri", request.uri().clone())
            .with("headers", request.headers().clone());
        let container = Container::new(
            self.app.levels().clone(),
            self.scope,
            Some(&self.app),
            context,
        )?;
        container.enter(Mode::Async)?;
        Ok(container)
    }
}

async fn request_scope(
    State(scope): State<RequestScope>,
    mut request: Request,
    next: Next,
) -> Response {
    let container = match scope.open(&request) {
        Ok(container) => container,
        Err(error) => {
            tracing::error!("Failed to open request container - error: {}", error);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::trace!("Opened request container for {}", request.uri());
    request
        .extensions_mut()
        .insert(RequestContainer::new(container.clone()));
    let mut guard = CloseOnDrop {
        container,
        armed: true,
    };
    let response = next.run(request).await;

    let closed = guard.container.exit_async().await;
    guard.armed = false;
    if let Err(error) = closed {
        tracing::error!("Failed to close request container - error: {}", error);
    }
    response
}

/// Closes the request container from a spawned task if the request is dropped early
struct CloseOnDrop {
    container: Container,
    armed: bool,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Request dropped outside of a runtime, its container stays open");
            return;
        };
        tracing::warn!("Request dropped before completion, closing its container");
        let container = self.container.clone();
        runtime.spawn(async move {
            if let Err(error) = container.exit_async().await {
                tracing::error!("Failed to close dropped request container - error: {}", error);
            }
        });
    }
}
