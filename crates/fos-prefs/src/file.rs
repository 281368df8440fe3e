//! File-backed store
//!
//! The whole document is kept in memory and rewritten on every change
//! using the temp-file + rename pattern, so a crash mid-write leaves the
//! previous document intact.

use crate::error::PrefsError;
use crate::store::{PrefValue, PreferenceStore};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type Document = BTreeMap<String, PrefValue>;

/// JSON document store on local disk
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<Document>,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`.
    ///
    /// A missing file is an empty store. A file that cannot be parsed is
    /// logged and replaced on the next write. Individual values that are
    /// not a boolean or an integer are dropped; the rest are kept.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let values = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, Value>>(&content) {
                Ok(raw) => parse_document(&path, raw),
                Err(e) => {
                    warn!("Discarding unreadable preferences at {}: {}", path.display(), e);
                    Document::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Document::new(),
            Err(e) => return Err(e.into()),
        };

        info!("Preferences opened at {} ({} keys)", path.display(), values.len());

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` and persist. The in-memory document is rolled back
    /// if the write fails.
    fn mutate<T>(&self, change: impl FnOnce(&mut Document) -> T) -> Result<T, PrefsError> {
        let mut values = self.lock();
        let previous = values.clone();
        let out = change(&mut values);

        if let Err(e) = self.persist(&values) {
            *values = previous;
            return Err(e);
        }
        Ok(out)
    }

    fn persist(&self, values: &Document) -> Result<(), PrefsError> {
        let temp_path = self.path.with_extension("tmp");

        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, values)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &self.path)?;
        debug!("Preferences written ({} keys)", values.len());
        Ok(())
    }
}

fn parse_document(path: &Path, raw: BTreeMap<String, Value>) -> Document {
    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<PrefValue>(value) {
            Ok(value) => Some((key, value)),
            Err(_) => {
                warn!("Dropping unreadable preference {} in {}", key, path.display());
                None
            }
        })
        .collect()
}

impl PreferenceStore for FileStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.lock().get(key).and_then(PrefValue::as_int)
    }

    fn put_int(&self, key: &str, value: i64) -> Result<(), PrefsError> {
        self.mutate(|values| {
            values.insert(key.to_string(), PrefValue::Int(value));
        })
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.lock().get(key).and_then(PrefValue::as_bool)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), PrefsError> {
        self.mutate(|values| {
            values.insert(key.to_string(), PrefValue::Bool(value));
        })
    }

    fn update_int(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<i64>) -> i64,
    ) -> Result<i64, PrefsError> {
        self.mutate(|values| {
            let next = f(values.get(key).and_then(PrefValue::as_int));
            values.insert(key.to_string(), PrefValue::Int(next));
            next
        })
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.mutate(|values| {
            values.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("prefs.json")).unwrap();

        assert_eq!(store.get_int("anything"), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.put_bool("vpn.registry.apptp", true).unwrap();
            store.put_int("vpn.resilience.apptp.RECONNECT_ATTEMPTS", 2).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_bool("vpn.registry.apptp"), Some(true));
        assert_eq!(reopened.get_int("vpn.resilience.apptp.RECONNECT_ATTEMPTS"), Some(2));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_bool("vpn.registry.apptp"), None);

        store.put_bool("vpn.registry.apptp", false).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_bool("vpn.registry.apptp"), Some(false));
    }

    #[test]
    fn test_bad_value_only_drops_its_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(
            &path,
            r#"{"vpn.registry.apptp": true, "vpn.resilience.apptp.RECONNECT_ATTEMPTS": 1.5}"#,
        )
        .unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_bool("vpn.registry.apptp"), Some(true));
        assert_eq!(store.get_int("vpn.resilience.apptp.RECONNECT_ATTEMPTS"), None);

        store.put_int("other", 1).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_bool("vpn.registry.apptp"), Some(true));
        assert_eq!(reopened.get_int("other"), Some(1));
    }

    #[test]
    fn test_update_int_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.update_int("n", &mut |v| v.unwrap_or(0) + 1).unwrap(), 1);
        assert_eq!(store.update_int("n", &mut |v| v.unwrap_or(0) + 1).unwrap(), 2);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_int("n"), Some(2));
    }
}
