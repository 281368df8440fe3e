//! Key namespacing over a shared store.

use crate::error::PrefsError;
use crate::store::PreferenceStore;
use std::sync::Arc;

/// View of a store whose keys are prefixed with `"<scope>."`.
///
/// Lets independent subsystems share one backing file without key clashes.
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn PreferenceStore>,
    scope: String,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn PreferenceStore>, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}.{}", self.scope, key)
    }
}

impl std::fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore").field("scope", &self.scope).finish()
    }
}

impl PreferenceStore for ScopedStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.inner.get_int(&self.key(key))
    }

    fn put_int(&self, key: &str, value: i64) -> Result<(), PrefsError> {
        self.inner.put_int(&self.key(key), value)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.inner.get_bool(&self.key(key))
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), PrefsError> {
        self.inner.put_bool(&self.key(key), value)
    }

    fn update_int(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<i64>) -> i64,
    ) -> Result<i64, PrefsError> {
        self.inner.update_int(&self.key(key), f)
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.inner.remove(&self.key(key))
    }
}
