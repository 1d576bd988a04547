use std::sync::Arc;

use thiserror::Error;

use crate::{resolver::ResolverId, types::DynError};

/// Usage errors of the container lifecycle
///
/// All of these signal a contract violation by the caller and are never retried.
#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    /// Resolution or override attempted outside of an entered container
    #[error("Container for scope '{scope}' is not entered - enter it first")]
    NotEntered { scope: &'static str },
    /// The container is already entered
    #[error("Container for scope '{scope}' is already entered")]
    AlreadyEntered { scope: &'static str },
    /// No successor exists for the scope of the spawning container
    #[error("Max scope is reached, '{scope}' has no child scope")]
    ScopeExhausted { scope: &'static str },
    #[error(transparent)]
    ModeMismatch(#[from] ModeMismatch),
    /// Only the root scope can be used without a parent
    #[error("Only the root scope can be used without a parent, got '{scope}'")]
    MissingParent { scope: &'static str },
    /// The parent is not a shallower scope of the same scope levels
    #[error("A container for '{parent}' cannot be the parent of a container for '{scope}'")]
    InvalidParent {
        parent: &'static str,
        scope: &'static str,
    },
    /// The parent container was dropped while a descendant was still looking it up
    #[error("The parent container was released before scope '{scope}' could be reached")]
    ParentReleased { scope: &'static str },
    #[error("Scope levels must contain at least one scope")]
    EmptyScopeLevels,
    #[error("At most 255 scope levels are supported, got {count}")]
    TooManyScopeLevels { count: usize },
    #[error("Scope level {level} is not defined")]
    UnknownScope { level: u8 },
    /// An asynchronous creation of the dependency is in flight
    ///
    /// Returned by blocking resolutions, which cannot wait for it, and by exits,
    /// which would orphan the value it stores.
    #[error("'{resolver}' is being created concurrently")]
    CreationInProgress { resolver: ResolverId },
    #[error(transparent)]
    Teardown(#[from] TeardownErrors),
}

/// The execution mode of a container did not fit the requested operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeMismatch {
    #[error("Resolving async resource '{resolver}' in sync container is not allowed")]
    AsyncResourceInSyncContainer { resolver: ResolverId },
    #[error("Async resource '{resolver}' cannot be resolved with a blocking call")]
    AsyncResourceInBlockingCall { resolver: ResolverId },
    #[error("Cannot tear down async cleanup of '{resolver}' with a blocking teardown")]
    AsyncCleanupInSyncTeardown { resolver: ResolverId },
}

/// A single release action which failed during teardown
#[derive(Error, Debug, Clone)]
#[error("Release of '{resolver}' failed - error: {error}")]
pub struct TeardownError {
    pub resolver: ResolverId,
    pub error: Arc<DynError>,
}

/// All release actions which failed while tearing down a container
///
/// Every other action still ran.
#[derive(Error, Debug, Clone)]
pub struct TeardownErrors {
    pub errors: Vec<TeardownError>,
}
impl std::fmt::Display for TeardownErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("Teardown had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

/// Errors when reading from a container's context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context has no entry '{0}'")]
    Missing(String),
    #[error("Context entry '{key}' is a '{actual}', required '{required}'")]
    WrongType {
        key: String,
        required: &'static str,
        actual: &'static str,
    },
}

/// Errors while resolving a dependency
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("Failed to downcast '{resolver}', required: '{required}' actual: '{actual}'")]
    DowncastFailed {
        resolver: ResolverId,
        required: &'static str,
        actual: &'static str,
    },
    /// The producer itself failed, its error is kept as source
    #[error("Producer for '{resolver}' failed - error: {error}")]
    Producer {
        resolver: ResolverId,
        #[source]
        error: DynError,
    },
}

impl ResolveError {
    /// True for errors caused by calling into a container the wrong way
    pub fn is_usage_error(&self) -> bool {
        matches!(self, ResolveError::Container(_))
    }
}

impl From<ModeMismatch> for ResolveError {
    fn from(value: ModeMismatch) -> Self {
        ResolveError::Container(value.into())
    }
}
