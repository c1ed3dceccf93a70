//! Middleware value store.
//!
//! Populated once after the probe by `with` middlewares, then shared
//! read-only with transformer factories. Insertion order is preserved so
//! middleware can rely on earlier registrations having run.

use std::any::Any;

type Value = Box<dyn Any + Send + Sync>;

/// Insertion-ordered, string-tagged map of middleware-computed values.
#[derive(Default)]
pub struct Store {
    entries: Vec<(String, Value)>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under `tag`, replacing any previous value for it.
    pub fn insert(&mut self, tag: impl Into<String>, value: Value) {
        let tag = tag.into();
        if let Some(slot) = self.entries.iter_mut().find(|(t, _)| *t == tag) {
            slot.1 = value;
        } else {
            self.entries.push((tag, value));
        }
    }

    /// Typed accessor: the value under `tag`, downcast to `T`.
    pub fn get<T: 'static>(&self, tag: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(t, _)| t == tag)
            .and_then(|(_, v)| v.downcast_ref::<T>())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.iter().any(|(t, _)| t == tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tags()).finish()
    }
}
