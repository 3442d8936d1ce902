//! `Store` implementation over a Redis/Valkey server via `fred`.

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::streams::XReadResponse;

use super::Store;
use super::StoreError;
use super::StreamEntry;

pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    /// Connect to the server at `url` and wait for the connection to be
    /// usable. One multiplexed client serves both the KV and stream surfaces.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)?;
        let client = Builder::from_config(config).build()?;
        client.init().await?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.client.set(key, value, None, None, false).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let count: i64 = self.client.exists(key).await?;
        Ok(count > 0)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let fields: std::collections::HashMap<String, String> = fields.iter().cloned().collect();
        let _: () = self.client.hset(key, fields).await?;
        Ok(())
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StoreError> {
        let id: String = self
            .client
            .xadd(stream, false, None, "*", fields.to_vec())
            .await?;
        Ok(id)
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        offset: &str,
    ) -> Result<(), StoreError> {
        match self.client.xgroup_create(stream, group, offset, true).await {
            Ok(()) => Ok(()),
            Err(error) if error.details().contains("BUSYGROUP") => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut response: XReadResponse<String, String, String, String> = self
            .client
            .xreadgroup_map(
                group,
                consumer,
                Some(count as u64),
                Some(block_ms),
                false,
                stream,
                ">",
            )
            .await?;
        let entries = response.remove(stream).unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|(id, fields)| StreamEntry {
                id,
                fields: fields.into_iter().collect(),
            })
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError> {
        let _: i64 = self.client.xack(stream, group, id).await?;
        Ok(())
    }
}
