//! Durable usage counters keyed by client and bucket.

use std::path::PathBuf;

use super::json_file::JsonFileStore;
use crate::admission::ClientIdentity;

fn usage_key(client: &ClientIdentity, bucket: &str) -> String {
    format!("{}:{}", client, bucket)
}

/// Counters persisted as `{"<client>:<bucket>": count}`.
pub struct UsageStore {
    inner: JsonFileStore<u64>,
}

impl UsageStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: JsonFileStore::new(path, "usage"),
        }
    }

    /// Current count, zero when absent.
    pub async fn get(&self, client: &ClientIdentity, bucket: &str) -> u64 {
        let key = usage_key(client, bucket);
        self.inner.read(|map| map.get(&key).copied().unwrap_or(0)).await
    }

    /// Add one and return the new count.
    pub async fn increment(&self, client: &ClientIdentity, bucket: &str) -> u64 {
        let key = usage_key(client, bucket);
        self.inner
            .update(|map| {
                let count = map.entry(key).or_insert(0);
                *count = count.saturating_add(1);
                *count
            })
            .await
    }

    pub async fn set(&self, client: &ClientIdentity, bucket: &str, value: u64) {
        let key = usage_key(client, bucket);
        self.inner
            .update(|map| {
                map.insert(key, value);
            })
            .await
    }

    pub async fn clear(&self) {
        self.inner.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn client(name: &str) -> ClientIdentity {
        ClientIdentity::from_token(name).unwrap()
    }

    #[tokio::test]
    async fn test_absent_counter_reads_zero() {
        let tmp = TempDir::new().unwrap();
        let store = UsageStore::open(tmp.path().join("usage.json"));

        assert_eq!(store.get(&client("a"), "gemini:2025-01-01").await, 0);
    }

    #[tokio::test]
    async fn test_counts_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("usage.json");
        let store = UsageStore::open(&path);

        assert_eq!(store.increment(&client("a"), "gemini:2025-01-01").await, 1);
        assert_eq!(store.increment(&client("a"), "gemini:2025-01-01").await, 2);
        store.set(&client("b"), "gemini:2025-01-01", 9).await;

        let reopened = UsageStore::open(&path);
        assert_eq!(reopened.get(&client("a"), "gemini:2025-01-01").await, 2);
        assert_eq!(reopened.get(&client("b"), "gemini:2025-01-01").await, 9);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["a:gemini:2025-01-01"], 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(UsageStore::open(tmp.path().join("usage.json")));
        let c = client("a");

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                let c = c.clone();
                tokio::spawn(async move { store.increment(&c, "gemini:2025-01-01").await })
            })
            .collect();
        let mut counts: Vec<u64> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        // Every increment observed a distinct count
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u64>>());

        assert_eq!(store.get(&c, "gemini:2025-01-01").await, 20);
        let reopened = UsageStore::open(store.inner.path());
        assert_eq!(reopened.get(&c, "gemini:2025-01-01").await, 20);
    }

    #[tokio::test]
    async fn test_clear_resets_every_counter() {
        let tmp = TempDir::new().unwrap();
        let store = UsageStore::open(tmp.path().join("usage.json"));

        store.increment(&client("a"), "x").await;
        store.increment(&client("b"), "y").await;
        store.clear().await;

        assert_eq!(store.get(&client("a"), "x").await, 0);
        assert_eq!(store.get(&client("b"), "y").await, 0);
    }
}
