//! Key/value cache seam with list-trim semantics.
//!
//! The stream broker's reconnection buffer needs a redis-shaped contract:
//! push-front onto a per-key list, trim to a bound, TTL the key. The trait
//! keeps that contract narrow so a real redis client and the in-memory
//! implementation are interchangeable.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns `None` when the key is missing, expired, or holds a list.
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Pushes onto the front of the list at `key` (newest first). Returns the
    /// new length.
    async fn push_front(&self, key: &str, value: String) -> Result<usize, CacheError>;

    /// Keeps the first `max_len` list entries, dropping the rest.
    async fn trim(&self, key: &str, max_len: usize) -> Result<(), CacheError>;

    /// Full list contents, newest first. Missing key yields an empty list.
    async fn range(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Resets the key's time to live.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

enum Slot {
    Value(String),
    List(VecDeque<String>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local cache. Expiry is lazy: reads drop expired entries.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_if_expired(&self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.expired()) {
            self.entries.remove(key);
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.drop_if_expired(key);
        match &self.entries.get(key)?.slot {
            Slot::Value(v) => Some(v.clone()),
            Slot::List(_) => None,
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn push_front(&self, key: &str, value: String) -> Result<usize, CacheError> {
        self.drop_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(list) => {
                list.push_front(value);
                Ok(list.len())
            }
            Slot::Value(_) => Err(CacheError::Backend(format!(
                "key {key} holds a plain value, not a list"
            ))),
        }
    }

    async fn trim(&self, key: &str, max_len: usize) -> Result<(), CacheError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Slot::List(list) = &mut entry.slot {
                list.truncate(max_len);
            }
        }
        Ok(())
    }

    async fn range(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.drop_if_expired(key);
        Ok(match self.entries.get(key) {
            Some(entry) => match &entry.slot {
                Slot::List(list) => list.iter().cloned().collect(),
                Slot::Value(_) => Vec::new(),
            },
            None => Vec::new(),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), None).await.unwrap();
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn expired_value_disappears() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v".into(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_trims() {
        let cache = InMemoryCache::new();
        for i in 0..5 {
            cache.push_front("list", format!("e{i}")).await.unwrap();
        }
        cache.trim("list", 3).await.unwrap();
        let items = cache.range("list").await.unwrap();
        assert_eq!(items, vec!["e4", "e3", "e2"]);
    }

    #[tokio::test]
    async fn trim_invariant_holds_under_many_pushes() {
        let cache = InMemoryCache::new();
        for i in 0..500 {
            cache.push_front("list", format!("e{i}")).await.unwrap();
            cache.trim("list", 100).await.unwrap();
        }
        assert_eq!(cache.range("list").await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn pushing_onto_plain_value_is_an_error() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), None).await.unwrap();
        assert!(cache.push_front("k", "x".into()).await.is_err());
    }
}
