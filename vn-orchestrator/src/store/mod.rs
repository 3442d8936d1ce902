//! The key-value + stream surface the orchestrator assumes: ordered
//! append-only streams with consumer groups, and a string/hash KV surface
//! with atomic `HSET`.

mod memory;
mod redis;

use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Redis(#[from] fred::error::Error),

    #[error("{message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether this error reports a missing consumer group.
    pub fn is_missing_group(&self) -> bool {
        match self {
            StoreError::Redis(error) => error.details().contains("NOGROUP"),
            StoreError::Backend { message } => message.contains("NOGROUP"),
        }
    }
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomic multi-field hash update.
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Append an entry; the stream is created when missing.
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StoreError>;

    /// Create a consumer group at `offset` with stream auto-creation.
    /// Idempotent: an already-existing group (`BUSYGROUP`) is not an error.
    async fn ensure_group(&self, stream: &str, group: &str, offset: &str)
    -> Result<(), StoreError>;

    /// Block-read up to `count` new entries for `consumer` in `group`,
    /// waiting at most `block_ms`. An empty result means the poll timed out.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Acknowledge one entry for the group.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError>;
}
