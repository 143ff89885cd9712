//! Document store abstraction for versa.
//!
//! A store holds named collections of JSON [`Document`]s. Backends implement
//! [`StoreBackend`]; the repository engine is written only against that trait.

pub mod backend;
mod collection;
pub mod document;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod options;
mod session;

pub use crate::backend::{MemoryBackend, StoreBackend};
#[cfg(feature = "sqlite")]
pub use crate::backend::SqliteBackend;
pub use crate::collection::Collection;
pub use crate::document::{Document, Id};
pub use crate::filter::{Field, Filter};
pub use crate::mutation::Mutation;
pub use crate::options::{Direction, FindOptions, IndexSpec, Sort};
pub use crate::session::Session;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn StoreBackend + Send + Sync>;
