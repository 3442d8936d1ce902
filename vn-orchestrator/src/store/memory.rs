//! In-process `Store` with real consumer-group bookkeeping: a per-group
//! delivery cursor, a pending (delivered, unacknowledged) set, and an ack
//! log. Backs the test suites and local dry-runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;

use super::Store;
use super::StoreError;
use super::StreamEntry;

#[derive(Default)]
struct GroupCursor {
    next_index: usize,
    pending: Vec<String>,
    acked: Vec<String>,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    streams: HashMap<String, Vec<StreamEntry>>,
    groups: HashMap<(String, String), GroupCursor>,
    next_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a stream's entries, in append order.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.lock().streams.get(stream).cloned().unwrap_or_default()
    }

    /// Entry ids delivered to `group` but not acknowledged.
    pub fn pending(&self, stream: &str, group: &str) -> Vec<String> {
        self.lock()
            .groups
            .get(&(stream.to_string(), group.to_string()))
            .map(|cursor| cursor.pending.clone())
            .unwrap_or_default()
    }

    /// Entry ids acknowledged by `group`, in ack order.
    pub fn acked(&self, stream: &str, group: &str) -> Vec<String> {
        self.lock()
            .groups
            .get(&(stream.to_string(), group.to_string()))
            .map(|cursor| cursor.acked.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a hash key.
    pub fn hash(&self, key: &str) -> HashMap<String, String> {
        self.lock().hashes.get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self.lock();
        Ok(inner.kv.contains_key(key) || inner.hashes.contains_key(key))
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("{}-0", inner.next_id);
        inner
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(StreamEntry {
                id: id.clone(),
                fields: fields.to_vec(),
            });
        Ok(id)
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        offset: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let length = {
            let entries = inner.streams.entry(stream.to_string()).or_default();
            entries.len()
        };
        inner
            .groups
            .entry((stream.to_string(), group.to_string()))
            .or_insert_with(|| GroupCursor {
                // "$" means new entries only; any explicit id replays from
                // the beginning, which is all the worker loop needs.
                next_index: if offset == "$" { length } else { 0 },
                pending: Vec::new(),
                acked: Vec::new(),
            });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let _ = consumer;
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            {
                let mut inner = self.lock();
                let entries = inner
                    .streams
                    .get(stream)
                    .cloned()
                    .unwrap_or_default();
                let cursor = inner
                    .groups
                    .get_mut(&(stream.to_string(), group.to_string()))
                    .ok_or_else(|| {
                        StoreError::backend(format!(
                            "NOGROUP no such consumer group '{group}' for stream '{stream}'"
                        ))
                    })?;
                if cursor.next_index < entries.len() {
                    let available = &entries[cursor.next_index..];
                    let delivered: Vec<StreamEntry> =
                        available.iter().take(count.max(1)).cloned().collect();
                    cursor.next_index += delivered.len();
                    cursor
                        .pending
                        .extend(delivered.iter().map(|entry| entry.id.clone()));
                    return Ok(delivered);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(cursor) = inner
            .groups
            .get_mut(&(stream.to_string(), group.to_string()))
        {
            cursor.pending.retain(|pending| pending != id);
            cursor.acked.push(id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_at_dollar_sees_only_new_entries() {
        let store = MemoryStore::new();
        store
            .xadd("s", &[("k".into(), "old".into())])
            .await
            .unwrap();
        store.ensure_group("s", "g", "$").await.unwrap();
        store
            .xadd("s", &[("k".into(), "new".into())])
            .await
            .unwrap();

        let entries = store.read_group("s", "g", "c", 10, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields[0].1, "new");

        // Delivered but not acked.
        assert_eq!(store.pending("s", "g").len(), 1);
        store.ack("s", "g", &entries[0].id).await.unwrap();
        assert!(store.pending("s", "g").is_empty());
        assert_eq!(store.acked("s", "g"), vec![entries[0].id.clone()]);
    }

    #[tokio::test]
    async fn read_group_times_out_empty() {
        let store = MemoryStore::new();
        store.ensure_group("s", "g", "$").await.unwrap();
        let entries = store.read_group("s", "g", "c", 10, 20).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn missing_group_reports_nogroup() {
        let store = MemoryStore::new();
        let error = store.read_group("s", "missing", "c", 1, 10).await.unwrap_err();
        assert!(error.is_missing_group());
    }
}
