//! Shared key-value cache port

use crate::domain::shared::Result;
use async_trait::async_trait;

/// Byte-oriented cache. Values are JSON snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
