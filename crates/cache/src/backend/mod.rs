//! Cache backend trait and implementations.

mod memory;

pub use self::memory::MemoryCache;
use crate::error::Result;
use async_trait::async_trait;

/// Unified interface for key-value cache backends.
///
/// Values are opaque strings; encoding is the caller's concern (see
/// [`CacheNamespace`](crate::CacheNamespace)). Entries do not expire.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove a single entry. Returns `false` if there was nothing to remove.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry whose key starts with `namespace:`. Returns the
    /// number of entries removed.
    async fn delete_all(&self, namespace: &str) -> Result<u64>;
}
