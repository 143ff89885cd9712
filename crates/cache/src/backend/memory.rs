//! In-memory cache backend.

use crate::CacheBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory cache backend.
///
/// Entries are stored in a `HashMap` behind a [`RwLock`], so all trait
/// methods operate on `&self` without external synchronisation.
///
/// # Examples
///
/// ```
/// use versa_cache::{CacheBackend, MemoryCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = MemoryCache::with_entries([("users:1", "{}"), ("teams:1", "{}")]);
/// assert_eq!(cache.delete_all("users").await?, 1);
/// assert!(cache.get("teams:1").await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    /// Create a cache pre-populated with entries.
    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let entries = entries.into_iter().map(|(key, value)| (key.into(), value.into())).collect();
        Self { name: "memory".to_string(), entries: RwLock::new(entries) }
    }

    /// Change the name of the backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self { name: "memory".to_string(), entries: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_all(&self, namespace: &str) -> Result<u64> {
        let prefix = format!("{namespace}:");
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        Ok((before - entries.len()) as u64)
    }
}
