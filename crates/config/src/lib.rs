//! Layered configuration for versa.
//!
//! Values are resolved from three layers, later layers overriding earlier
//! ones field by field:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file in TOML, YAML or JSON, chosen by extension.
//! 3. `VERSA_*` environment variables, with `__` separating nested keys
//!    (`VERSA_STORE__BACKEND=sqlite`, `VERSA_COLLECTIONS__USERS__SOFT_DELETE=true`).
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "/var/lib/versa/versa.db"
//!
//! [cache]
//! enabled = true
//!
//! [collections.users]
//! soft_delete = true
//! validate_add = true
//! ```

pub mod error;
mod paths;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use versa_cache::{CacheHandle, MemoryCache};
use versa_store::{MemoryBackend, StoreHandle};

pub use crate::paths::{default_config_path, default_database_path};

const ENV_PREFIX: &str = "VERSA_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    /// Per-collection repository settings, keyed by collection name.
    pub collections: BTreeMap<String, CollectionConfig>,
}

/// Which document store backs the repositories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local store; everything is lost on exit.
    #[default]
    Memory,
    /// SQLite database file. Without a `path` the platform data directory is
    /// used.
    Sqlite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_connections: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Wrap repositories in the cache-aside layer.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Repository settings for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub validate_add: bool,
    pub validate_update: bool,
    pub validate_replace: bool,
    pub validate_get: bool,
    pub soft_delete: bool,
    /// Whether this collection uses the cache when caching is enabled.
    pub cache: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            validate_add: false,
            validate_update: false,
            validate_replace: false,
            validate_get: false,
            soft_delete: false,
            cache: true,
        }
    }
}

impl CollectionConfig {
    /// Returns `true` if repositories over this collection should be wrapped
    /// in the cache-aside layer.
    pub fn uses_cache(&self, cache: &CacheConfig) -> bool {
        cache.enabled && self.cache
    }
}

impl Config {
    /// Load the configuration from defaults, a file and the environment.
    ///
    /// With an explicit `path` the file must exist. Without one the default
    /// location is used if a file is present there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.is_file()),
        };
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            figment = Self::merge_file(figment, file)?;
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default().to_ascii_lowercase();
        Ok(match extension.as_str() {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "json" => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.display().to_string())),
        })
    }

    /// Reject values that would only fail later, when a backend or
    /// repository is built from them.
    pub fn validate(&self) -> Result<()> {
        if let StoreConfig::Sqlite { path, max_connections } = &self.store {
            if path.as_ref().is_some_and(|path| path.as_os_str().is_empty()) {
                exn::bail!(ErrorKind::Invalid("store.path must not be empty".to_string()));
            }
            if *max_connections == Some(0) {
                exn::bail!(ErrorKind::Invalid("store.max_connections must be at least 1".to_string()));
            }
        }
        for name in self.collections.keys() {
            if name.is_empty() || name.contains(':') || name.chars().any(char::is_whitespace) {
                exn::bail!(ErrorKind::Invalid(format!("invalid collection name {name:?}")));
            }
        }
        Ok(())
    }

    /// Settings for `collection`, falling back to defaults when the
    /// collection has no section of its own.
    pub fn collection(&self, collection: &str) -> CollectionConfig {
        self.collections.get(collection).cloned().unwrap_or_default()
    }
}

impl StoreConfig {
    /// Open the configured store backend.
    pub async fn open(&self) -> Result<StoreHandle> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryBackend::default())),
            Self::Sqlite { path, max_connections } => {
                let path = match path {
                    Some(path) => path.clone(),
                    None => default_database_path()
                        .ok_or_else(|| exn::Exn::from(ErrorKind::Invalid("no default data directory".to_string())))?,
                };
                if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Backend("store"))?;
                }
                tracing::info!(path = %path.display(), "Opening SQLite store");
                let store = versa_store::SqliteBackend::connect(&path, *max_connections)
                    .await
                    .or_raise(|| ErrorKind::Backend("store"))?;
                Ok(Arc::new(store))
            },
        }
    }
}

impl CacheConfig {
    /// Open the cache backend, or `None` when caching is disabled.
    pub fn open(&self) -> Option<CacheHandle> {
        self.enabled.then(|| Arc::new(MemoryCache::default()) as CacheHandle)
    }
}
