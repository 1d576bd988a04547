use std::future::Future;

use futures::future::BoxFuture;

use crate::types::DynError;

/// A blocking release action
pub type SyncRelease = Box<dyn FnOnce() -> Result<(), DynError> + Send + 'static>;
/// A suspendable release action
pub type AsyncRelease = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), DynError>> + Send + 'static>;

enum ReleaseAction {
    Sync(SyncRelease),
    Async(AsyncRelease),
}

enum StackKind {
    /// Only blocking actions, can be closed anywhere
    Sync(Vec<SyncRelease>),
    /// May hold suspendable actions, must be closed with [CleanupStack::close_async]
    Async(Vec<ReleaseAction>),
}

/// Ordered release actions of one produced value
///
/// Actions run newest first, each exactly once. A failing action does not
/// prevent older ones from running; failures are returned after the stack is empty.
pub struct CleanupStack {
    kind: StackKind,
}

impl Default for CleanupStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("async", &self.is_async())
            .field("actions", &self.len())
            .finish()
    }
}

impl CleanupStack {
    /// An empty blocking stack
    pub fn new() -> Self {
        CleanupStack {
            kind: StackKind::Sync(Vec::new()),
        }
    }

    /// An empty stack which always needs a suspendable teardown, even while empty
    pub fn asynchronous() -> Self {
        CleanupStack {
            kind: StackKind::Async(Vec::new()),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, StackKind::Async(_))
    }

    pub fn len(&self) -> usize {
        match &self.kind {
            StackKind::Sync(actions) => actions.len(),
            StackKind::Async(actions) => actions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a blocking release action
    pub fn push_sync<F>(&mut self, release: F) -> &mut Self
    where
        F: FnOnce() -> Result<(), DynError> + Send + 'static,
    {
        match &mut self.kind {
            StackKind::Sync(actions) => actions.push(Box::new(release)),
            StackKind::Async(actions) => actions.push(ReleaseAction::Sync(Box::new(release))),
        }
        self
    }

    /// Pushes a suspendable release action
    ///
    /// A blocking stack becomes asynchronous, keeping its existing actions in order.
    pub fn push_async<F, Fut>(&mut self, release: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DynError>> + Send + 'static,
    {
        let action = ReleaseAction::Async(Box::new(move || -> BoxFuture<'static, Result<(), DynError>> {
            Box::pin(release())
        }));

        if let StackKind::Sync(actions) = &mut self.kind {
            let promoted = std::mem::take(actions)
                .into_iter()
                .map(ReleaseAction::Sync)
                .collect();
            self.kind = StackKind::Async(promoted);
        }
        if let StackKind::Async(actions) = &mut self.kind {
            actions.push(action);
        }
        self
    }

    /// Runs all actions blocking
    ///
    /// Returns the untouched stack if it is asynchronous. Otherwise returns the
    /// errors of all failed actions.
    pub fn close_sync(self) -> Result<Vec<DynError>, CleanupStack> {
        let actions = match self.kind {
            StackKind::Sync(actions) => actions,
            kind @ StackKind::Async(_) => return Err(CleanupStack { kind }),
        };

        let mut errors = Vec::new();
        for release in actions.into_iter().rev() {
            if let Err(error) = release() {
                errors.push(error);
            }
        }
        Ok(errors)
    }

    /// Runs all actions, awaiting the suspendable ones
    ///
    /// Returns the errors of all failed actions.
    pub async fn close_async(self) -> Vec<DynError> {
        let actions: Vec<ReleaseAction> = match self.kind {
            StackKind::Sync(actions) => actions.into_iter().map(ReleaseAction::Sync).collect(),
            StackKind::Async(actions) => actions,
        };

        let mut errors = Vec::new();
        for action in actions.into_iter().rev() {
            let result = match action {
                ReleaseAction::Sync(release) => release(),
                ReleaseAction::Async(release) => release().await,
            };
            if let Err(error) = result {
                errors.push(error);
            }
        }
        errors
    }
}
