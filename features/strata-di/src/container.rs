use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::{
    context::Context,
    errors::{ContainerError, ModeMismatch, TeardownError, TeardownErrors},
    resolver::ResolverId,
    scope::{Scope, ScopeLevels},
    slot::ResolutionSlot,
    types::{DynError, Instance},
};

/// Execution mode a container is entered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Blocking, single call stack
    Sync,
    /// Cooperative, with suspension at production and teardown
    Async,
}

/// A live instance of one scope
///
/// Cloning yields another handle to the same container. A child refers to its
/// parent weakly; the parent never knows its children.
#[derive(Clone)]
pub struct Container(Arc<ContainerInner>);

struct ContainerInner {
    levels: ScopeLevels,
    scope: Scope,
    parent: Option<Weak<ContainerInner>>,
    state: Mutex<ContainerState>,
}

#[derive(Default)]
struct ContainerState {
    context: Arc<Context>,
    /// None while inert
    mode: Option<Mode>,
    /// In creation order
    slots: Vec<Arc<ResolutionSlot>>,
    slot_index: HashMap<ResolverId, usize>,
    overrides: HashMap<ResolverId, Instance>,
}

impl ContainerState {
    /// Back to inert - context is kept
    fn reset(&mut self) {
        self.mode = None;
        self.slots = Vec::new();
        self.slot_index = HashMap::new();
        self.overrides = HashMap::new();
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Container")
            .field("scope", &self.scope_name())
            .field("mode", &state.mode)
            .field("context", &state.context)
            .field("slots", &state.slots.len())
            .field("overrides", &state.overrides.len())
            .finish()
    }
}

impl Container {
    /// Creates an inert container
    ///
    /// Only the root scope may be created without a parent. A parent must be of a
    /// shallower scope of the same levels.
    pub fn new(
        levels: ScopeLevels,
        scope: Scope,
        parent: Option<&Container>,
        context: Context,
    ) -> Result<Self, ContainerError> {
        levels.scope(scope.level())?;
        let scope_name = levels.name(scope);

        let parent = match parent {
            None if !scope.is_root() => {
                return Err(ContainerError::MissingParent { scope: scope_name })
            }
            None => None,
            Some(parent) => {
                if !parent.0.levels.same_as(&levels) || parent.scope() >= scope {
                    return Err(ContainerError::InvalidParent {
                        parent: parent.scope_name(),
                        scope: scope_name,
                    });
                }
                Some(Arc::downgrade(&parent.0))
            }
        };

        Ok(Container(Arc::new(ContainerInner {
            levels,
            scope,
            parent,
            state: Mutex::new(ContainerState {
                context: Arc::new(context),
                ..Default::default()
            }),
        })))
    }

    /// Creates an inert container for the root scope
    pub fn root(levels: ScopeLevels, context: Context) -> Self {
        let scope = levels.root();
        Container(Arc::new(ContainerInner {
            levels,
            scope,
            parent: None,
            state: Mutex::new(ContainerState {
                context: Arc::new(context),
                ..Default::default()
            }),
        }))
    }

    pub fn scope(&self) -> Scope {
        self.0.scope
    }

    pub fn scope_name(&self) -> &'static str {
        self.0.levels.name(self.0.scope)
    }

    pub fn levels(&self) -> &ScopeLevels {
        &self.0.levels
    }

    /// The parent container, None for roots or if it was already dropped
    pub fn parent(&self) -> Option<Container> {
        self.0.parent.as_ref()?.upgrade().map(Container)
    }

    pub fn context(&self) -> Arc<Context> {
        self.state().context.clone()
    }

    /// The mode this container was entered in, None while inert
    pub fn mode(&self) -> Option<Mode> {
        self.state().mode
    }

    pub fn is_entered(&self) -> bool {
        self.mode().is_some()
    }

    /// True if both handles refer to the same container
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Replaces the context of an inert container
    pub fn replace_context(&self, context: Context) -> Result<(), ContainerError> {
        let mut state = self.state();
        if state.mode.is_some() {
            return Err(self.already_entered());
        }
        state.context = Arc::new(context);
        Ok(())
    }

    /// Makes the container usable in the given mode
    pub fn enter(&self, mode: Mode) -> Result<(), ContainerError> {
        let mut state = self.state();
        if state.mode.is_some() {
            return Err(self.already_entered());
        }
        state.mode = Some(mode);

        tracing::debug!("Entered '{}' container ({:?})", self.scope_name(), mode);
        Ok(())
    }

    /// Tears down all slots blocking, newest first, then returns to inert
    ///
    /// Slots are released in the reverse order their values were produced, so a
    /// dependency produced inside another producer outlives its dependent.
    ///
    /// If any slot holds an asynchronous cleanup stack, nothing is torn down and
    /// the container stays entered - use [Container::exit_async] instead.
    pub fn exit(&self) -> Result<(), ContainerError> {
        let slots = {
            let state = self.state();
            self.entered_mode(&state)?;
            self.check_no_creation(&state)?;
            if let Some(slot) = state.slots.iter().find(|slot| slot.has_async_cleanup()) {
                return Err(ModeMismatch::AsyncCleanupInSyncTeardown {
                    resolver: slot.resolver().clone(),
                }
                .into());
            }
            newest_first(&state.slots)
        };

        tracing::debug!(
            "Exiting '{}' container, tearing down {} slots",
            self.scope_name(),
            slots.len()
        );
        let mut errors = Vec::new();
        for slot in &slots {
            tracing::trace!("Tearing down '{}'", slot.resolver());
            match slot.teardown_sync() {
                Ok(failures) => collect_failures(&mut errors, slot, failures),
                Err(mismatch) => {
                    // Became asynchronous while tearing down the newer slots
                    let error: DynError = Box::new(mismatch);
                    collect_failures(&mut errors, slot, vec![error]);
                }
            }
        }

        self.finish_exit(errors)
    }

    /// Tears down all slots, newest first, awaiting asynchronous cleanup, then
    /// returns to inert
    ///
    /// Fails with [ContainerError::CreationInProgress] and keeps the container entered
    /// while another task is still producing a value for it. Productions must not
    /// start once the exit is under way, their values would be dropped without release.
    pub async fn exit_async(&self) -> Result<(), ContainerError> {
        let slots = {
            let state = self.state();
            self.entered_mode(&state)?;
            self.check_no_creation(&state)?;
            newest_first(&state.slots)
        };

        tracing::debug!(
            "Exiting '{}' container, tearing down {} slots",
            self.scope_name(),
            slots.len()
        );
        let mut errors = Vec::new();
        for slot in &slots {
            tracing::trace!("Tearing down '{}'", slot.resolver());
            let failures = slot.teardown_async().await;
            collect_failures(&mut errors, slot, failures);
        }

        self.finish_exit(errors)
    }

    fn check_no_creation(&self, state: &ContainerState) -> Result<(), ContainerError> {
        match state.slots.iter().find(|slot| slot.is_creating()) {
            Some(slot) => Err(ContainerError::CreationInProgress {
                resolver: slot.resolver().clone(),
            }),
            None => Ok(()),
        }
    }

    fn finish_exit(&self, errors: Vec<TeardownError>) -> Result<(), ContainerError> {
        self.state().reset();

        if errors.is_empty() {
            return Ok(());
        }
        for error in &errors {
            tracing::error!("{}", error);
        }
        Err(TeardownErrors { errors }.into())
    }

    /// Enters blocking, runs `body` and exits, also if `body` fails or panics
    ///
    /// A teardown failure is returned only if `body` succeeded.
    pub fn scoped_sync<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&Container) -> Result<T, E>,
        E: From<ContainerError>,
    {
        self.enter(Mode::Sync)?;

        let entry = ExitOnUnwind(self);
        let result = body(self);
        std::mem::forget(entry);

        let exited = self.exit();
        let value = result?;
        exited?;
        Ok(value)
    }

    /// Enters asynchronous, runs `body` and exits, also if `body` fails
    ///
    /// A teardown failure is returned only if `body` succeeded. If the returned
    /// future is dropped early the container stays entered.
    pub async fn scoped<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(Container) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ContainerError>,
    {
        self.enter(Mode::Async)?;

        let result = body(self.clone()).await;

        let exited = self.exit_async().await;
        let value = result?;
        exited?;
        Ok(value)
    }

    /// Creates an inert container for the next scope, with this one as parent
    pub fn spawn_child(&self, context: Context) -> Result<Container, ContainerError> {
        self.entered_mode(&self.state())?;

        let scope = self
            .0
            .levels
            .next(self.scope())
            .ok_or(ContainerError::ScopeExhausted {
                scope: self.scope_name(),
            })?;

        tracing::debug!(
            "Spawning '{}' container from '{}'",
            self.0.levels.name(scope),
            self.scope_name()
        );
        Container::new(self.0.levels.clone(), scope, Some(self), context)
    }

    /// The nearest container, starting with this one, whose scope is at most `target`
    ///
    /// Stops at the root if `target` is shallower than any ancestor.
    pub fn find_scope(&self, target: Scope) -> Result<Container, ContainerError> {
        let mut container = self.clone();
        while container.scope() > target {
            let parent = match &container.0.parent {
                Some(parent) => parent.upgrade(),
                None => break,
            };
            container = parent.map(Container).ok_or(ContainerError::ParentReleased {
                scope: self.0.levels.name(target),
            })?;
        }
        Ok(container)
    }

    /// Checks that a dependency may be resolved in this container right now
    pub fn check_resolvable(
        &self,
        resolver: &ResolverId,
        requires_async: bool,
    ) -> Result<Mode, ContainerError> {
        let mode = self.entered_mode(&self.state())?;
        if requires_async && mode == Mode::Sync {
            return Err(ModeMismatch::AsyncResourceInSyncContainer {
                resolver: resolver.clone(),
            }
            .into());
        }
        Ok(mode)
    }

    /// Returns the slot of `resolver`, creating it on first access
    ///
    /// The slot gets a creation lock only if this container is asynchronous and
    /// `requires_lock` is set.
    pub fn get_or_create_slot(
        &self,
        resolver: &ResolverId,
        requires_async: bool,
        requires_lock: bool,
    ) -> Result<Arc<ResolutionSlot>, ContainerError> {
        let mut state = self.state();
        let mode = self.entered_mode(&state)?;
        if requires_async && mode == Mode::Sync {
            return Err(ModeMismatch::AsyncResourceInSyncContainer {
                resolver: resolver.clone(),
            }
            .into());
        }

        if let Some(&index) = state.slot_index.get(resolver) {
            return Ok(state.slots[index].clone());
        }

        let with_lock = requires_lock && mode == Mode::Async;
        let slot = Arc::new(ResolutionSlot::new(resolver.clone(), with_lock));
        let index = state.slots.len();
        state.slots.push(slot.clone());
        state.slot_index.insert(resolver.clone(), index);

        tracing::trace!(
            "Created slot for '{}' in '{}' container",
            resolver,
            self.scope_name()
        );
        Ok(slot)
    }

    /// True if `resolver` has a produced value memoized in this container
    pub fn is_resolved(&self, resolver: &ResolverId) -> bool {
        let state = self.state();
        state
            .slot_index
            .get(resolver)
            .is_some_and(|&index| state.slots[index].is_populated())
    }

    /// Replaces `resolver` with `value` until cleared or exited
    pub fn set_override(&self, resolver: ResolverId, value: Instance) -> Result<(), ContainerError> {
        let mut state = self.state();
        self.entered_mode(&state)?;

        tracing::debug!(
            "Overriding '{}' in '{}' container with {}",
            resolver,
            self.scope_name(),
            value.info
        );
        state.overrides.insert(resolver, value);
        Ok(())
    }

    pub fn get_override(&self, resolver: &ResolverId) -> Result<Option<Instance>, ContainerError> {
        let state = self.state();
        self.entered_mode(&state)?;
        Ok(state.overrides.get(resolver).cloned())
    }

    /// Removes the override of `resolver`, or all overrides if None
    pub fn clear_override(&self, resolver: Option<&ResolverId>) -> Result<(), ContainerError> {
        let mut state = self.state();
        self.entered_mode(&state)?;

        match resolver {
            Some(resolver) => {
                state.overrides.remove(resolver);
            }
            None => state.overrides.clear(),
        }
        Ok(())
    }

    fn entered_mode(&self, state: &ContainerState) -> Result<Mode, ContainerError> {
        state.mode.ok_or(ContainerError::NotEntered {
            scope: self.scope_name(),
        })
    }

    fn already_entered(&self) -> ContainerError {
        ContainerError::AlreadyEntered {
            scope: self.scope_name(),
        }
    }

    fn state(&self) -> MutexGuard<'_, ContainerState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn collect_failures(errors: &mut Vec<TeardownError>, slot: &ResolutionSlot, failures: Vec<DynError>) {
    errors.extend(failures.into_iter().map(|error| TeardownError {
        resolver: slot.resolver().clone(),
        error: Arc::new(error),
    }));
}

/// Slots by completed production, newest first, with unproduced slots last
fn newest_first(slots: &[Arc<ResolutionSlot>]) -> Vec<Arc<ResolutionSlot>> {
    let mut slots = slots.to_vec();
    slots.sort_by_key(|slot| std::cmp::Reverse(slot.produced_order()));
    slots
}

/// Exits a container if the blocking body of [Container::scoped_sync] panics
struct ExitOnUnwind<'a>(&'a Container);
impl Drop for ExitOnUnwind<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.0.exit() {
            tracing::error!("Failed to exit container while unwinding - error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::{executor::block_on, FutureExt};

    use super::*;
    use crate::{cleanup::CleanupStack, errors::ResolveError};

    fn levels() -> ScopeLevels {
        ScopeLevels::new(["app", "request", "action"]).unwrap()
    }

    fn populate(container: &Container, name: &str, log: &Arc<Mutex<Vec<String>>>) {
        let slot = container
            .get_or_create_slot(&ResolverId::new(name), false, false)
            .unwrap();
        let log = log.clone();
        let name = name.to_string();
        slot.get_or_try_init_sync(move || {
            let mut cleanup = CleanupStack::new();
            let released = name.clone();
            cleanup.push_sync(move || {
                log.lock().unwrap().push(released);
                Ok(())
            });
            Ok((Instance::new(name), cleanup))
        })
        .unwrap();
    }

    #[test]
    fn only_root_scope_can_be_parentless() {
        let levels = levels();

        let error = Container::new(levels.clone(), Scope::SESSION, None, Context::new()).unwrap_err();
        assert!(matches!(error, ContainerError::MissingParent { scope: "request" }));

        let root = Container::new(levels.clone(), Scope::APP, None, Context::new()).unwrap();
        assert!(root.parent().is_none());
        assert!(!root.is_entered());
    }

    #[test]
    fn parent_must_be_shallower() {
        let levels = levels();
        let root = Container::root(levels.clone(), Context::new());
        root.enter(Mode::Sync).unwrap();
        let child = root.spawn_child(Context::new()).unwrap();

        let error = Container::new(levels.clone(), Scope::SESSION, Some(&child), Context::new())
            .unwrap_err();
        assert!(matches!(
            error,
            ContainerError::InvalidParent {
                parent: "request",
                scope: "request"
            }
        ));

        let foreign = Container::root(ScopeLevels::new(["a", "b"]).unwrap(), Context::new());
        assert!(Container::new(levels, Scope::SESSION, Some(&foreign), Context::new()).is_err());
    }

    #[test]
    fn operations_require_entering() {
        let container = Container::root(levels(), Context::new());
        let id = ResolverId::new("x");

        assert!(matches!(
            container.get_or_create_slot(&id, false, false),
            Err(ContainerError::NotEntered { scope: "app" })
        ));
        assert!(matches!(
            container.spawn_child(Context::new()),
            Err(ContainerError::NotEntered { .. })
        ));
        assert!(container.set_override(id.clone(), Instance::new(1_u8)).is_err());
        assert!(container.get_override(&id).is_err());
        assert!(container.clear_override(None).is_err());
        assert!(matches!(container.exit(), Err(ContainerError::NotEntered { .. })));
    }

    #[test]
    fn entering_twice_fails() {
        let container = Container::root(levels(), Context::new());
        container.enter(Mode::Async).unwrap();

        assert!(matches!(
            container.enter(Mode::Sync),
            Err(ContainerError::AlreadyEntered { scope: "app" })
        ));
        assert_eq!(container.mode(), Some(Mode::Async));
    }

    #[test]
    fn spawn_child_stops_at_max_scope() {
        let root = Container::root(levels(), Context::new());
        root.enter(Mode::Sync).unwrap();
        let request = root.spawn_child(Context::new()).unwrap();
        request.enter(Mode::Sync).unwrap();
        let action = request.spawn_child(Context::new()).unwrap();
        action.enter(Mode::Sync).unwrap();

        assert_eq!(action.scope(), Scope::REQUEST);
        assert!(action.parent().unwrap().ptr_eq(&request));
        assert!(matches!(
            action.spawn_child(Context::new()),
            Err(ContainerError::ScopeExhausted { scope: "action" })
        ));
    }

    #[test]
    fn find_scope_walks_towards_the_root() {
        let root = Container::root(levels(), Context::new());
        root.enter(Mode::Sync).unwrap();
        let request = root.spawn_child(Context::new()).unwrap();
        request.enter(Mode::Sync).unwrap();
        let action = request.spawn_child(Context::new()).unwrap();

        assert!(action.find_scope(Scope::APP).unwrap().ptr_eq(&root));
        assert!(action.find_scope(Scope::SESSION).unwrap().ptr_eq(&request));
        assert!(action.find_scope(Scope::REQUEST).unwrap().ptr_eq(&action));
        // Deeper targets resolve against the container itself
        assert!(root.find_scope(Scope::REQUEST).unwrap().ptr_eq(&root));
    }

    #[test]
    fn find_scope_reports_released_parents() {
        let root = Container::root(levels(), Context::new());
        root.enter(Mode::Sync).unwrap();
        let request = root.spawn_child(Context::new()).unwrap();
        drop(root);

        assert!(matches!(
            request.find_scope(Scope::APP),
            Err(ContainerError::ParentReleased { scope: "app" })
        ));
        assert!(request.parent().is_none());
    }

    #[test]
    fn slots_are_reused_per_identity() {
        let container = Container::root(levels(), Context::new());
        container.enter(Mode::Async).unwrap();
        let id = ResolverId::new("db");

        let first = container.get_or_create_slot(&id, false, true).unwrap();
        let second = container.get_or_create_slot(&id, false, true).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.has_creation_lock());
    }

    #[test]
    fn sync_containers_never_allocate_locks() {
        let container = Container::root(levels(), Context::new());
        container.enter(Mode::Sync).unwrap();

        let slot = container
            .get_or_create_slot(&ResolverId::new("db"), false, true)
            .unwrap();

        assert!(!slot.has_creation_lock());
    }

    #[test]
    fn async_only_slot_in_sync_container_leaves_no_state() {
        let container = Container::root(levels(), Context::new());
        container.enter(Mode::Sync).unwrap();
        let id = ResolverId::new("session");

        let error = container.get_or_create_slot(&id, true, true).unwrap_err();

        assert!(matches!(
            error,
            ContainerError::ModeMismatch(ModeMismatch::AsyncResourceInSyncContainer { .. })
        ));
        assert!(container.state().slots.is_empty());
    }

    #[test]
    fn exit_tears_down_in_reverse_creation_order() {
        let container = Container::root(levels(), Context::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        container.enter(Mode::Sync).unwrap();

        for name in ["a", "b", "c"] {
            populate(&container, name, &log);
        }
        container.exit().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(!container.is_entered());
    }

    #[test]
    fn exit_follows_production_order_not_slot_creation() {
        let container = Container::root(levels(), Context::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        container.enter(Mode::Sync).unwrap();

        // "outer" gets its slot first but finishes producing after "inner"
        let outer = container
            .get_or_create_slot(&ResolverId::new("outer"), false, false)
            .unwrap();
        outer
            .get_or_try_init_sync(|| {
                populate(&container, "inner", &log);
                let mut cleanup = CleanupStack::new();
                let log = log.clone();
                cleanup.push_sync(move || {
                    log.lock().unwrap().push("outer".to_string());
                    Ok(())
                });
                Ok((Instance::new(()), cleanup))
            })
            .unwrap();
        container.exit().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn exit_waits_for_creation_in_flight() {
        let container = Container::root(levels(), Context::new());
        container.enter(Mode::Async).unwrap();
        let slot = container
            .get_or_create_slot(&ResolverId::new("slow"), false, true)
            .unwrap();

        let mut in_flight = Box::pin(slot.get_or_try_init_async(|| async {
            futures::future::pending::<()>().await;
            Ok((Instance::new(1_u8), CleanupStack::new()))
        }));
        assert!((&mut in_flight).now_or_never().is_none());

        assert!(matches!(
            block_on(container.exit_async()),
            Err(ContainerError::CreationInProgress { .. })
        ));
        assert!(matches!(
            container.exit(),
            Err(ContainerError::CreationInProgress { .. })
        ));
        assert!(container.is_entered());

        drop(in_flight);
        block_on(container.exit_async()).unwrap();
        assert!(!container.is_entered());
    }

    #[test]
    fn blocking_exit_refuses_async_cleanup_without_side_effects() {
        let container = Container::root(levels(), Context::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        container.enter(Mode::Async).unwrap();

        populate(&container, "a", &log);
        let slot = container
            .get_or_create_slot(&ResolverId::new("conn"), true, true)
            .unwrap();
        block_on(slot.get_or_try_init_async(|| async {
            let mut cleanup = CleanupStack::asynchronous();
            let log = log.clone();
            cleanup.push_async(move || async move {
                log.lock().unwrap().push("conn".to_string());
                Ok(())
            });
            Ok((Instance::new(1_u8), cleanup))
        }))
        .unwrap();

        let error = container.exit().unwrap_err();
        assert!(matches!(
            error,
            ContainerError::ModeMismatch(ModeMismatch::AsyncCleanupInSyncTeardown { .. })
        ));
        assert!(log.lock().unwrap().is_empty());
        assert!(container.is_entered());

        block_on(container.exit_async()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["conn", "a"]);
    }

    #[test]
    fn teardown_failures_are_collected_and_container_is_reset() {
        let container = Container::root(levels(), Context::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        container.enter(Mode::Sync).unwrap();

        populate(&container, "a", &log);
        let slot = container
            .get_or_create_slot(&ResolverId::new("broken"), false, false)
            .unwrap();
        slot.get_or_try_init_sync(|| {
            let mut cleanup = CleanupStack::new();
            cleanup.push_sync(|| Err("disk full".into()));
            Ok((Instance::new(()), cleanup))
        })
        .unwrap();
        populate(&container, "c", &log);

        let ContainerError::Teardown(errors) = container.exit().unwrap_err() else {
            panic!("expected teardown errors");
        };

        assert_eq!(errors.errors.len(), 1);
        assert_eq!(errors.errors[0].resolver, ResolverId::new("broken"));
        assert_eq!(*log.lock().unwrap(), vec!["c", "a"]);
        assert!(!container.is_entered());
    }

    #[test]
    fn overrides_are_per_entry() {
        let container = Container::root(levels(), Context::new());
        let id = ResolverId::new("clock");
        container.enter(Mode::Sync).unwrap();

        container.set_override(id.clone(), Instance::new(5_u32)).unwrap();
        let value = container.get_override(&id).unwrap().unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 5);

        container.clear_override(Some(&id)).unwrap();
        assert!(container.get_override(&id).unwrap().is_none());

        container.set_override(id.clone(), Instance::new(6_u32)).unwrap();
        container.exit().unwrap();
        container.enter(Mode::Sync).unwrap();
        assert!(container.get_override(&id).unwrap().is_none());
    }

    #[test]
    fn clear_without_identity_wipes_all_overrides() {
        let container = Container::root(levels(), Context::new());
        container.enter(Mode::Sync).unwrap();
        container.set_override("a".into(), Instance::new(1_u8)).unwrap();
        container.set_override("b".into(), Instance::new(2_u8)).unwrap();

        container.clear_override(None).unwrap();

        assert!(container.get_override(&"a".into()).unwrap().is_none());
        assert!(container.get_override(&"b".into()).unwrap().is_none());
    }

    #[test]
    fn context_is_replaceable_only_while_inert() {
        let container = Container::root(levels(), Context::new().with("x", 1_i32));
        container.enter(Mode::Sync).unwrap();

        assert!(container.replace_context(Context::new()).is_err());
        container.exit().unwrap();

        container.replace_context(Context::new().with("x", 2_i32)).unwrap();
        assert_eq!(*container.context().require::<i32>("x").unwrap(), 2);
    }

    #[test]
    fn scoped_sync_exits_on_error() {
        let container = Container::root(levels(), Context::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), ContainerError> = container.scoped_sync(|container| {
            populate(container, "a", &log);
            Err(ContainerError::NotEntered { scope: "test" })
        });

        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert!(!container.is_entered());
    }

    #[test]
    fn scoped_sync_exits_on_panic() {
        let container = Container::root(levels(), Context::new());
        let released = Arc::new(AtomicUsize::new(0));

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), ContainerError> = container.scoped_sync(|container| {
                let slot = container
                    .get_or_create_slot(&ResolverId::new("a"), false, false)
                    .unwrap();
                let released = released.clone();
                slot.get_or_try_init_sync(move || {
                    let mut cleanup = CleanupStack::new();
                    cleanup.push_sync(move || {
                        released.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                    Ok((Instance::new(()), cleanup))
                })
                .unwrap();
                panic!("handler failed");
            });
        }));

        assert!(panicked.is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!container.is_entered());
    }

    #[test]
    fn scoped_runs_async_teardown() {
        let container = Container::root(levels(), Context::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mode = block_on(container.scoped(|container| {
            let log = log.clone();
            async move {
                let slot = container.get_or_create_slot(&ResolverId::new("conn"), true, true)?;
                slot.get_or_try_init_async(|| async move {
                    let mut cleanup = CleanupStack::asynchronous();
                    cleanup.push_async(move || async move {
                        log.lock().unwrap().push("conn".to_string());
                        Ok(())
                    });
                    Ok((Instance::new(()), cleanup))
                })
                .await?;
                Ok::<_, ResolveError>(container.mode())
            }
        }))
        .unwrap();

        assert_eq!(mode, Some(Mode::Async));
        assert_eq!(*log.lock().unwrap(), vec!["conn"]);
        assert!(!container.is_entered());
    }
}
