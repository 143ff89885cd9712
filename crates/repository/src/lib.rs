//! Versioned document repositories.
//!
//! A [`Repository`] wraps one collection of a document store and owns the
//! lifecycle fields of every record in it: the identifier, a `version` bumped
//! by each write, `createdAt`/`lastUpdatedAt` timestamps and, with soft delete
//! on, an `isDeleted` marker. Payloads are plain serde types; validation is
//! opt-in per operation through a [`Validator`](validation::Validator).
//!
//! [`CachedRepository`] adds a cache-aside layer that keeps a
//! [`versa_cache`] namespace coherent with the store.

mod cached;
mod command;
pub mod error;
pub mod model;
mod repository;
pub mod settings;
pub mod specification;
pub mod validation;

pub use crate::cached::CachedRepository;
pub use crate::model::{Entity, Record};
pub use crate::repository::{Presenter, Repository, RepositoryBuilder};
pub use crate::specification::{FilterSpecification, IdSpecification, MatchAll, Specification};
pub use versa_store::{Direction, Document, Field, Filter, FindOptions, Id, IndexSpec, Mutation, Session, Sort};
