//! Attribute storage shared by the tests of a run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A type-erased attribute value.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// A thread-safe key-value store.
///
/// The store belongs to a [`TestContext`](crate::context::TestContext) and
/// outlives individual tests: a value put by one test (or by a setup hook)
/// is visible to the tests that follow. Clones share the same entries.
///
/// # Example
///
/// ```rust
/// use testkit_unit::context::Attributes;
///
/// let attributes = Attributes::new();
/// attributes.put("port", Some(8080u16));
///
/// assert_eq!(attributes.get::<u16>("port").as_deref(), Some(&8080));
/// assert!(attributes.get::<String>("port").is_none());
///
/// attributes.put::<u16>("port", None);
/// assert!(!attributes.contains("port"));
/// ```
#[derive(Clone, Default)]
pub struct Attributes {
    entries: Arc<Mutex<HashMap<String, Attribute>>>,
}

impl Attributes {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value under `key` if it exists and has type `T`.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.entries.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Returns the raw value under `key`.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<Attribute> {
        self.entries.lock().get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value.
    ///
    /// Putting `None` removes the key.
    pub fn put<T>(&self, key: impl Into<String>, value: Option<T>) -> Option<Attribute>
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        let mut entries = self.entries.lock();
        match value {
            Some(value) => entries.insert(key, Arc::new(value)),
            None => entries.remove(&key),
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Attribute> {
        self.entries.lock().remove(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the keys, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("keys", &self.keys())
            .finish()
    }
}
