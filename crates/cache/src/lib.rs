//! Key-value cache used by versa's cache-aside repositories.
//!
//! The cache is never the source of truth: every entry can be dropped at any
//! time and is rebuilt from the store on the next read. Entries are grouped
//! into namespaces (one per collection) with keys of the form
//! `namespace:id`, so a whole collection can be invalidated at once.

mod backend;
pub mod error;
mod namespace;

pub use crate::backend::{CacheBackend, MemoryCache};
pub use crate::namespace::CacheNamespace;
use std::sync::Arc;

pub type CacheHandle = Arc<dyn CacheBackend + Send + Sync>;
