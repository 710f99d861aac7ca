//! Generated notes, keyed by the id of the file they were made from.

use std::path::PathBuf;

use super::json_file::JsonFileStore;

pub struct NotesStore {
    inner: JsonFileStore<String>,
}

impl NotesStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: JsonFileStore::new(path, "notes"),
        }
    }

    pub async fn get(&self, file_id: &str) -> Option<String> {
        self.inner.read(|map| map.get(file_id).cloned()).await
    }

    pub async fn set(&self, file_id: &str, notes: String) {
        self.inner
            .update(|map| {
                map.insert(file_id.to_string(), notes);
            })
            .await
    }

    /// Returns whether notes existed for the id.
    pub async fn delete(&self, file_id: &str) -> bool {
        self.inner.update(|map| map.remove(file_id).is_some()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_delete() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.json");
        let store = NotesStore::open(&path);

        assert_eq!(store.get("f1").await, None);
        store.set("f1", "# Lecture 1".to_string()).await;
        assert_eq!(store.get("f1").await.as_deref(), Some("# Lecture 1"));

        let reopened = NotesStore::open(&path);
        assert_eq!(reopened.get("f1").await.as_deref(), Some("# Lecture 1"));

        assert!(reopened.delete("f1").await);
        assert!(!reopened.delete("f1").await);
        assert_eq!(reopened.get("f1").await, None);
    }
}
