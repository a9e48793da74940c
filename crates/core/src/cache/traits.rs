//! Fast cache trait definition.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be interpreted.
    #[error("Invalid cached value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Expiring string key/value store.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Fetch a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Remove keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), CacheError>;
}
