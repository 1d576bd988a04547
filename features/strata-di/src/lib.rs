//! Scoped dependency resolution
//!
//! Containers form a chain of scopes (by default `app < session < request < action < step`).
//! A [Resolver] declares the scope its value lives in and always resolves against the
//! container of that scope, memoizing in a [ResolutionSlot] and registering release
//! actions which run in reverse order when the container exits.
//!
//! ```
//! use strata_di::{Container, Context, Factory, Mode, Resolver, Scope, ScopeLevels};
//!
//! let settings = Factory::new(Scope::APP, |_| Ok::<_, strata_di::DynError>(42_u32)).cached();
//!
//! let app = Container::root(ScopeLevels::default(), Context::new());
//! app.enter(Mode::Sync).unwrap();
//! let request = app.spawn_child(Context::new()).unwrap();
//! request.enter(Mode::Sync).unwrap();
//!
//! assert_eq!(*settings.resolve_sync(&request).unwrap(), 42);
//! assert!(app.is_resolved(settings.id()));
//! ```

pub mod cleanup;
pub mod container;
pub mod context;
pub mod errors;
pub mod resolver;
pub mod scope;
pub mod slot;
pub mod types;

pub use cleanup::CleanupStack;
pub use container::{Container, Mode};
pub use context::Context;
pub use errors::{
    ContainerError, ContextError, ModeMismatch, ResolveError, TeardownError, TeardownErrors,
};
pub use resolver::{
    context_adapter::ContextAdapter, factory::Factory, resource::Resource, Resolver, ResolverExt,
    ResolverId,
};
pub use scope::{Scope, ScopeLevels};
pub use slot::ResolutionSlot;
pub use types::{DynError, Injectable, Instance, TypeInfo};
