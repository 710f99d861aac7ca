//! A string-keyed map mirrored to a single pretty-printed JSON file.
//!
//! The file is read lazily on first access. A missing file starts an empty
//! map and is written straight away; an unreadable or corrupt file is logged
//! and treated as empty. Every mutation rewrites the whole file through a
//! sibling `.tmp` file and a rename, so readers never see a partial write.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::Result;

pub struct JsonFileStore<V> {
    path: PathBuf,
    label: &'static str,
    /// `None` until the file has been loaded. Held across mutate-then-persist
    /// so writes never interleave.
    state: Mutex<Option<BTreeMap<String, V>>>,
}

impl<V> JsonFileStore<V>
where
    V: Serialize + DeserializeOwned + Send,
{
    /// Create a store backed by `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>, label: &'static str) -> Self {
        Self {
            path: path.into(),
            label,
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the current contents.
    pub async fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, V>) -> R) -> R {
        let mut state = self.state.lock().await;
        let map = self.loaded(&mut state).await;
        f(map)
    }

    /// Mutate the contents with `f`, then persist them.
    pub async fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, V>) -> R) -> R {
        let mut state = self.state.lock().await;
        let map = self.loaded(&mut state).await;
        let result = f(&mut *map);
        self.persist(map).await;
        result
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        self.update(|map| map.clear()).await
    }

    async fn loaded<'a>(
        &self,
        state: &'a mut Option<BTreeMap<String, V>>,
    ) -> &'a mut BTreeMap<String, V> {
        if state.is_none() {
            let map = self.load().await;
            *state = Some(map);
        }
        state.get_or_insert_with(BTreeMap::new)
    }

    async fn load(&self) -> BTreeMap<String, V> {
        match self.try_load().await {
            Ok(Some(map)) => {
                debug!(store = self.label, path = %self.path.display(), entries = map.len(), "Loaded store");
                map
            }
            Ok(None) => {
                let map = BTreeMap::new();
                debug!(store = self.label, path = %self.path.display(), "Store file missing, creating it");
                self.persist(&map).await;
                map
            }
            Err(e) => {
                warn!(store = self.label, path = %self.path.display(), error = %e, "Could not load store, starting empty");
                BTreeMap::new()
            }
        }
    }

    /// `Ok(None)` means the file does not exist yet.
    async fn try_load(&self) -> Result<Option<BTreeMap<String, V>>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(BTreeMap::new()));
        }
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn persist(&self, map: &BTreeMap<String, V>) {
        if let Err(e) = self.try_persist(map).await {
            error!(store = self.label, path = %self.path.display(), error = %e, "Error persisting store");
        }
    }

    async fn try_persist(&self, map: &BTreeMap<String, V>) -> Result<()> {
        let body = serde_json::to_vec_pretty(map)?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tmp_path_is_sibling() {
        assert_eq!(
            tmp_path(Path::new("data/usage.json")),
            PathBuf::from("data/usage.json.tmp")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_created_on_first_use() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("store.json");
        let store: JsonFileStore<u64> = JsonFileStore::new(&path, "test");

        assert!(!path.exists());
        let len = store.read(|map| map.len()).await;

        assert_eq!(len, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store: JsonFileStore<u64> = JsonFileStore::new(&path, "test");
        assert_eq!(store.read(|map| map.len()).await, 0);

        // The next write replaces the corrupt file
        store.update(|map| map.insert("k".to_string(), 1)).await;
        let reloaded: BTreeMap<String, u64> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.get("k"), Some(&1));
    }

    #[tokio::test]
    async fn test_empty_file_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, "").unwrap();

        let store: JsonFileStore<String> = JsonFileStore::new(&path, "test");
        assert_eq!(store.read(|map| map.len()).await, 0);
    }

    #[tokio::test]
    async fn test_updates_survive_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");

        let store: JsonFileStore<String> = JsonFileStore::new(&path, "test");
        store
            .update(|map| map.insert("a".to_string(), "first".to_string()))
            .await;
        store
            .update(|map| map.insert("b".to_string(), "second".to_string()))
            .await;

        let reopened: JsonFileStore<String> = JsonFileStore::new(&path, "test");
        let keys = reopened.read(|map| map.keys().cloned().collect::<Vec<_>>()).await;
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        reopened.clear().await;
        let again: JsonFileStore<String> = JsonFileStore::new(&path, "test");
        assert_eq!(again.read(|map| map.len()).await, 0);
    }

    #[tokio::test]
    async fn test_unwritable_location_keeps_memory_state() {
        let tmp = TempDir::new().unwrap();
        // A directory where the file should be makes every write fail
        let path = tmp.path().join("store.json");
        std::fs::create_dir(&path).unwrap();

        let store: JsonFileStore<u64> = JsonFileStore::new(&path, "test");
        store.update(|map| map.insert("k".to_string(), 7)).await;

        assert_eq!(store.read(|map| map.get("k").copied()).await, Some(7));
    }
}
