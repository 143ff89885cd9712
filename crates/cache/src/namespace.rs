//! Per-collection view over a cache backend.

use crate::CacheHandle;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A cache backend scoped to one namespace, storing values as JSON.
///
/// Keys are `namespace:id`. A cached value that no longer decodes (for
/// example after the model changed shape) is treated as a miss and evicted.
#[derive(Clone)]
pub struct CacheNamespace {
    cache: CacheHandle,
    namespace: String,
}

impl CacheNamespace {
    pub fn new(cache: CacheHandle, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.contains(':') {
            exn::bail!(ErrorKind::InvalidKey(namespace));
        }
        Ok(Self { cache, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.namespace)
    }

    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let key = self.key(id);
        let Some(raw) = self.cache.get(&key).await? else {
            tracing::trace!(cache = self.cache.name(), %key, "Cache miss");
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::trace!(cache = self.cache.name(), %key, "Cache hit");
                Ok(Some(value))
            },
            Err(err) => {
                tracing::warn!(cache = self.cache.name(), %key, error = %err, "Evicting undecodable cache entry");
                self.cache.delete(&key).await?;
                Ok(None)
            },
        }
    }

    pub async fn put<T: Serialize>(&self, id: &str, value: &T) -> Result<()> {
        let key = self.key(id);
        let raw = serde_json::to_string(value).or_raise(|| ErrorKind::InvalidData)?;
        self.cache.set(&key, raw).await?;
        tracing::trace!(cache = self.cache.name(), %key, "Cache populated");
        Ok(())
    }

    /// Remove the entry for `id`.
    pub async fn invalidate(&self, id: &str) -> Result<bool> {
        let key = self.key(id);
        let removed = self.cache.delete(&key).await?;
        tracing::debug!(cache = self.cache.name(), %key, removed, "Cache entry invalidated");
        Ok(removed)
    }

    /// Remove every entry in the namespace.
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.cache.delete_all(&self.namespace).await?;
        tracing::debug!(cache = self.cache.name(), namespace = %self.namespace, removed, "Cache namespace cleared");
        Ok(removed)
    }
}

impl std::fmt::Debug for CacheNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNamespace")
            .field("cache", &self.cache.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheBackend, MemoryCache};
    use rstest::rstest;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    fn namespace(cache: &Arc<MemoryCache>) -> CacheNamespace {
        CacheNamespace::new(cache.clone(), "users").unwrap()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let cache = Arc::new(MemoryCache::default());
        let users = namespace(&cache);
        users.put("1", &User { name: "Ann".into() }).await.unwrap();
        assert_eq!(cache.get("users:1").await.unwrap().as_deref(), Some(r#"{"name":"Ann"}"#));
        assert_eq!(users.get::<User>("1").await.unwrap(), Some(User { name: "Ann".into() }));
        assert!(users.invalidate("1").await.unwrap());
        assert_eq!(users.get::<User>("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_evicted() {
        let cache = Arc::new(MemoryCache::with_entries([("users:1", r#"{"nom":"Ann"}"#)]));
        let users = namespace(&cache);
        assert_eq!(users.get::<User>("1").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = Arc::new(MemoryCache::with_entries([("users:1", "{}"), ("users:2", "{}"), ("teams:1", "{}")]));
        assert_eq!(namespace(&cache).clear().await.unwrap(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[rstest]
    #[case("")]
    #[case("users:archive")]
    fn test_invalid_namespace(#[case] name: &str) {
        let err = CacheNamespace::new(Arc::new(MemoryCache::default()), name).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }
}
