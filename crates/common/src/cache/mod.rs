//! Redis-backed result cache
//!
//! Values are stored as JSON under `{prefix}:{key}`. Callers treat every
//! error from this module as a miss.

use crate::errors::{AppError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// redis://host:port
    pub url: String,
    pub key_prefix: String,
}

fn cache_error(action: &str, e: impl std::fmt::Display) -> AppError {
    AppError::CacheError {
        message: format!("{}: {}", action, e),
    }
}

pub struct Cache {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl Cache {
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| cache_error("invalid redis url", e))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| cache_error("redis connect", e))?;

        Ok(Self {
            connection,
            key_prefix: config.key_prefix,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let key = self.namespaced(key);
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| cache_error("redis get", e))?;
        debug!(key = %key, hit = raw.is_some(), "Cache lookup");

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| cache_error("corrupt cache entry", e))
        })
        .transpose()
    }

    /// Store `value` for `ttl_secs`; a zero TTL stores nothing
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        if ttl_secs == 0 {
            return Ok(());
        }
        let key = self.namespaced(key);
        let json = serde_json::to_string(value).map_err(|e| cache_error("serialize", e))?;

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&key, json, ttl_secs)
            .await
            .map_err(|e| cache_error("redis set", e))?;

        debug!(key = %key, ttl_secs, "Cache stored");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| cache_error("redis ping", e))?;
        Ok(())
    }
}

pub mod keys {
    use sha2::{Digest, Sha256};

    /// Build a retrieval result cache key.
    ///
    /// Document names are sorted so filter order does not split the cache.
    pub fn retrieval(query: &str, document_names: &[String], config_fingerprint: &str) -> String {
        let mut names: Vec<&str> = document_names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();

        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        for name in names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(config_fingerprint.as_bytes());
        let hash = hex::encode(hasher.finalize());
        format!("retrieval:{}", &hash[..32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_key_is_stable() {
        let a = keys::retrieval("who founded acme", &["b.pdf".into(), "a.pdf".into()], "cfg");
        let b = keys::retrieval("who founded acme", &["a.pdf".into(), "b.pdf".into()], "cfg");
        assert_eq!(a, b);
        assert!(a.starts_with("retrieval:"));
    }

    #[test]
    fn test_retrieval_key_separates_inputs() {
        let base = keys::retrieval("q", &[], "cfg");
        assert_ne!(base, keys::retrieval("q2", &[], "cfg"));
        assert_ne!(base, keys::retrieval("q", &["a.pdf".into()], "cfg"));
        assert_ne!(base, keys::retrieval("q", &[], "cfg2"));
    }
}
