//! In-memory store.

use crate::error::PrefsError;
use crate::store::{PrefValue, PreferenceStore};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, PrefValue>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PrefValue>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreferenceStore for MemoryStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.lock().get(key).and_then(PrefValue::as_int)
    }

    fn put_int(&self, key: &str, value: i64) -> Result<(), PrefsError> {
        self.lock().insert(key.to_string(), PrefValue::Int(value));
        Ok(())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.lock().get(key).and_then(PrefValue::as_bool)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), PrefsError> {
        self.lock().insert(key.to_string(), PrefValue::Bool(value));
        Ok(())
    }

    fn update_int(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<i64>) -> i64,
    ) -> Result<i64, PrefsError> {
        let mut values = self.lock();
        let current = values.get(key).and_then(PrefValue::as_int);
        let next = f(current);
        values.insert(key.to_string(), PrefValue::Int(next));
        Ok(next)
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.lock().remove(key);
        Ok(())
    }
}
