use std::{
    any::{type_name, Any},
    collections::BTreeMap,
    fmt::Debug,
    sync::Arc,
};

use crate::{errors::ContextError, types::Injectable};

type ContextEntry = (&'static str, Arc<dyn Any + Send + Sync + 'static>);

/// Named values a container is constructed with
///
/// Built up front and read-only once handed to a container. Context is not
/// inherited, each scope supplies its own.
#[derive(Clone, Default)]
pub struct Context {
    entries: BTreeMap<String, ContextEntry>,
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, (type_name, _)) in &self.entries {
            map.entry(key, type_name);
        }
        map.finish()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, replacing any previous value under the same key
    pub fn insert<T: Injectable>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        self.insert_arc(key, Arc::new(value))
    }

    /// Adds an already shared entry
    pub fn insert_arc<T: Injectable>(&mut self, key: impl Into<String>, value: Arc<T>) -> &mut Self {
        let value: Arc<dyn Any + Send + Sync + 'static> = value;
        self.entries.insert(key.into(), (type_name::<T>(), value));
        self
    }

    /// Builder style [Context::insert]
    pub fn with<T: Injectable>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Only inserts if the value is `Some`
    pub fn maybe_insert<T: Injectable>(
        &mut self,
        key: impl Into<String>,
        value: Option<T>,
    ) -> &mut Self {
        match value {
            Some(value) => self.insert(key, value),
            None => self,
        }
    }

    /// Returns the entry if it exists and has the requested type
    pub fn get<T: Injectable>(&self, key: &str) -> Option<Arc<T>> {
        self.require(key).ok()
    }

    /// Returns the entry, failing if it is missing or of another type
    pub fn require<T: Injectable>(&self, key: &str) -> Result<Arc<T>, ContextError> {
        let (actual, entry) = self
            .entries
            .get(key)
            .ok_or_else(|| ContextError::Missing(key.to_string()))?;

        entry
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::WrongType {
                key: key.to_string(),
                required: type_name::<T>(),
                actual: *actual,
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
