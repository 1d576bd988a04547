use std::sync::Arc;

use crate::errors::ContainerError;

/// A nesting level in the container hierarchy
///
/// Levels are 1-based, level 1 is the root scope. The ordering of two scopes
/// is only meaningful within the same [ScopeLevels].
///
/// The constants name the positions of [ScopeLevels::default]. With custom levels they
/// are plain level numbers: in `["app", "request"]`, [Scope::SESSION] is level 2 and
/// named "request", while [Scope::REQUEST] does not exist.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scope(u8);

impl Scope {
    pub const APP: Scope = Scope(1);
    pub const SESSION: Scope = Scope(2);
    pub const REQUEST: Scope = Scope(3);
    pub const ACTION: Scope = Scope(4);
    pub const STEP: Scope = Scope(5);

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self.0 == 1
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope {}", self.0)
    }
}

/// The ordered set of scopes an application nests its containers in
///
/// Supplied by the embedding application; cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLevels(Arc<[&'static str]>);

impl Default for ScopeLevels {
    /// `app < session < request < action < step`
    fn default() -> Self {
        ScopeLevels(Arc::from(
            &["app", "session", "request", "action", "step"][..],
        ))
    }
}

impl ScopeLevels {
    /// Creates scope levels from their names, shallowest first
    pub fn new<I>(names: I) -> Result<Self, ContainerError>
    where
        I: IntoIterator<Item = &'static str>,
    {
        let names: Vec<&'static str> = names.into_iter().collect();
        if names.is_empty() {
            return Err(ContainerError::EmptyScopeLevels);
        }
        // Levels are stored as u8
        if names.len() > u8::MAX as usize {
            return Err(ContainerError::TooManyScopeLevels { count: names.len() });
        }

        Ok(ScopeLevels(names.into()))
    }

    pub fn root(&self) -> Scope {
        Scope(1)
    }

    pub fn max(&self) -> Scope {
        Scope(self.0.len() as u8)
    }

    /// Looks up the scope for a 1-based level
    pub fn scope(&self, level: u8) -> Result<Scope, ContainerError> {
        if level == 0 || level as usize > self.0.len() {
            return Err(ContainerError::UnknownScope { level });
        }
        Ok(Scope(level))
    }

    /// The immediate successor, None at the deepest scope
    pub fn next(&self, scope: Scope) -> Option<Scope> {
        self.scope(scope.0.checked_add(1)?).ok()
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.scope(scope.0).is_ok()
    }

    /// Name of the scope, `"<unknown>"` for scopes outside these levels
    pub fn name(&self, scope: Scope) -> &'static str {
        match scope.0 {
            0 => "<unknown>",
            level => self.0.get(level as usize - 1).copied().unwrap_or("<unknown>"),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if both handles describe the same shared levels
    pub(crate) fn same_as(&self, other: &ScopeLevels) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self == other
    }
}
