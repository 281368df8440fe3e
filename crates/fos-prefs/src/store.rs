//! Store trait and stored value type.

use crate::error::PrefsError;
use serde::{Deserialize, Serialize};

/// A single stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
}

impl PrefValue {
    /// Integer payload, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PrefValue::Int(v) => Some(*v),
            PrefValue::Bool(_) => None,
        }
    }

    /// Boolean payload, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrefValue::Bool(v) => Some(*v),
            PrefValue::Int(_) => None,
        }
    }
}

/// Durable key-value store with atomic accessors.
///
/// A key holding a value of the other type reads as `None`.
pub trait PreferenceStore: Send + Sync {
    /// Read an integer
    fn get_int(&self, key: &str) -> Option<i64>;

    /// Write an integer
    fn put_int(&self, key: &str, value: i64) -> Result<(), PrefsError>;

    /// Read a boolean
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// Write a boolean
    fn put_bool(&self, key: &str, value: bool) -> Result<(), PrefsError>;

    /// Atomically read, transform and write an integer.
    ///
    /// `f` receives the current value (`None` when absent) and returns the
    /// value to store. Returns the stored value.
    fn update_int(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<i64>) -> i64,
    ) -> Result<i64, PrefsError>;

    /// Remove a key of either type
    fn remove(&self, key: &str) -> Result<(), PrefsError>;
}
