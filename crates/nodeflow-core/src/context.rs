use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::FlowResult;

/// A ready-made shared context: a key-value store nodes read in `prep` and
/// write in `post`.
///
/// The engine never constructs or locks a context; it only hands `&C` to the
/// lifecycle phases. Any type works as `C`. This one serializes every entry
/// to a [`serde_json::Value`] and guards the map with its own `RwLock`, so
/// parallel batch items can write disjoint keys, or use [`SharedStore::update`]
/// for read-modify-write on the same key.
#[derive(Debug, Default)]
pub struct SharedStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialize the entry stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> FlowResult<Option<T>> {
        self.get_value(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Serialize `value` and store it under `key`, returning the previous entry.
    pub fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> FlowResult<Option<Value>> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.insert(key.into(), value))
    }

    /// Atomically replace the entry under `key` with `f(current)`.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = key.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(entries.get(&key));
        entries.insert(key, next.clone());
        next
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(key)
    }

    /// Copy of all entries at this instant
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.clone()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for SharedStore {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: RwLock::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}
