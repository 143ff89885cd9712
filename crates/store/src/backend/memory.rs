//! In-memory store backend.

use crate::StoreBackend;
use crate::document::{Document, ID_FIELD, Id, equals};
use crate::error::{ErrorKind, Result};
use crate::filter::Filter;
use crate::mutation::Mutation;
use crate::options::{FindOptions, IndexSpec};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    fn position(&self, filter: &Filter) -> Option<usize> {
        self.documents.iter().position(|document| filter.matches(document))
    }

    fn contains_id(&self, id: &Value) -> bool {
        self.documents.iter().any(|document| document.get(ID_FIELD) == Some(id))
    }

    /// Reject `candidate` if it collides with another document (`skip` is the
    /// candidate's own position when it replaces an existing document) on any
    /// unique index.
    fn check_unique(&self, name: &str, documents: &[Document], candidate: &Document, skip: Option<usize>) -> Result<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index.key_of(candidate) else {
                continue;
            };
            let collides = documents.iter().enumerate().filter(|(position, _)| Some(*position) != skip).any(
                |(_, other)| match index.key_of(other) {
                    Some(other) => other.iter().zip(key.iter()).all(|(a, b)| equals(a, b)),
                    None => false,
                },
            );
            if collides {
                exn::bail!(ErrorKind::DuplicateKey(index.name.clone(), name.to_string()));
            }
        }
        Ok(())
    }
}

struct Staged {
    collections: HashMap<String, Collection>,
    base: HashMap<String, u64>,
    touched: HashSet<String>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Collection>,
    // Bumped on every committed change to a collection's documents or
    // indexes; sessions compare against the value they started with to
    // detect conflicts.
    generations: HashMap<String, u64>,
    sessions: HashMap<u64, Staged>,
}

/// In-memory store backend.
///
/// Collections live in a `HashMap` behind a [`RwLock`], so all trait methods
/// operate on `&self` without external synchronisation. Every single-document
/// operation runs under the write lock, which makes the conditional
/// primitives trivially atomic.
///
/// Sessions take a snapshot of all collections when they start. Reads inside
/// the session see the snapshot plus the session's own writes; the first
/// write to a collection that was modified outside the session since the
/// snapshot fails with [`WriteConflict`](ErrorKind::WriteConflict), as does a
/// commit racing with such a modification.
///
/// # Examples
///
/// ```
/// use versa_store::{Filter, MemoryBackend, StoreBackend};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryBackend::default();
/// let document = json!({"name": "Ann"}).as_object().cloned().unwrap_or_default();
/// let id = store.insert("users", document, None).await?;
/// assert!(store.find_one("users", &Filter::id(&id), None).await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct MemoryBackend {
    name: String,
    state: RwLock<State>,
}

impl MemoryBackend {
    /// Create a backend pre-populated with documents in one collection.
    ///
    /// Documents without an `id` are given a generated one.
    pub fn with_documents(collection: impl Into<String>, documents: impl IntoIterator<Item = Document>) -> Self {
        let documents = documents
            .into_iter()
            .map(|mut document| {
                if !document.contains_key(ID_FIELD) {
                    document.insert(ID_FIELD.to_string(), Value::from(Id::generate()));
                }
                document
            })
            .collect();
        let mut state = State::default();
        state.collections.insert(collection.into(), Collection { documents, indexes: Vec::new() });
        Self { name: "memory".to_string(), state: RwLock::new(state) }
    }

    /// Change the name of the backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn read<T>(
        &self,
        collection: &str,
        session: Option<&Session>,
        op: impl FnOnce(Option<&Collection>) -> T,
    ) -> Result<T> {
        let state = self.state.read().await;
        let collections = match session {
            None => &state.collections,
            Some(session) => {
                &state
                    .sessions
                    .get(&session.id())
                    .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSession(session.id())))?
                    .collections
            },
        };
        Ok(op(collections.get(collection)))
    }

    /// Run a write against the live collection or the session's staged copy.
    ///
    /// `op` returns its result plus whether it changed any document. A
    /// collection created only to run a no-op write is discarded again.
    async fn write<T>(
        &self,
        collection: &str,
        session: Option<&Session>,
        op: impl FnOnce(&str, &mut Collection) -> Result<(T, bool)>,
    ) -> Result<T> {
        let mut guard = self.state.write().await;
        let State { collections, generations, sessions } = &mut *guard;
        let live_generation = generations.get(collection).copied().unwrap_or_default();
        let (target, staged_touched) = match session {
            None => (collections, None),
            Some(session) => {
                let staged = sessions
                    .get_mut(&session.id())
                    .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSession(session.id())))?;
                if staged.base.get(collection).copied().unwrap_or_default() != live_generation {
                    exn::bail!(ErrorKind::WriteConflict(collection.to_string()));
                }
                (&mut staged.collections, Some(&mut staged.touched))
            },
        };
        let existed = target.contains_key(collection);
        let entry = target.entry(collection.to_string()).or_default();
        let outcome = op(collection, entry);
        let changed = matches!(outcome, Ok((_, true)));
        if !changed && !existed {
            target.remove(collection);
        }
        if changed {
            match staged_touched {
                Some(touched) => {
                    touched.insert(collection.to_string());
                },
                None => *generations.entry(collection.to_string()).or_default() += 1,
            }
        }
        outcome.map(|(value, _)| value)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self { name: "memory".to_string(), state: RwLock::new(State::default()) }
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, collection: &str, mut document: Document, session: Option<&Session>) -> Result<Id> {
        let id = match Id::of(&document) {
            Some(id) => id,
            None => {
                let id = Id::generate();
                document.insert(ID_FIELD.to_string(), Value::from(id.clone()));
                id
            },
        };
        self.write(collection, session, |name, target| {
            if target.contains_id(&Value::from(id.clone())) {
                exn::bail!(ErrorKind::DuplicateKey("id_".to_string(), name.to_string()));
            }
            target.check_unique(name, &target.documents, &document, None)?;
            target.documents.push(document);
            Ok((id, true))
        })
        .await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        self.read(collection, session, |target| {
            target.and_then(|target| target.documents.iter().find(|document| filter.matches(document)).cloned())
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> Result<Vec<Document>> {
        let matched = self
            .read(collection, session, |target| {
                target
                    .map(|target| target.documents.iter().filter(|document| filter.matches(document)).cloned().collect())
                    .unwrap_or_default()
            })
            .await?;
        Ok(options.arrange(matched))
    }

    async fn delete_one(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        self.write(collection, session, |_, target| match target.position(filter) {
            Some(position) => {
                target.documents.remove(position);
                Ok((1, true))
            },
            None => Ok((0, false)),
        })
        .await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        self.write(collection, session, |_, target| {
            let before = target.documents.len();
            target.documents.retain(|document| !filter.matches(document));
            let removed = (before - target.documents.len()) as u64;
            Ok((removed, removed > 0))
        })
        .await
    }

    async fn find_one_and_mutate(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        self.write(collection, session, |name, target| {
            let Some(position) = target.position(filter) else {
                return Ok((None, false));
            };
            let next = mutation.apply(&target.documents[position])?;
            target.check_unique(name, &target.documents, &next, Some(position))?;
            target.documents[position] = next.clone();
            Ok((Some(next), true))
        })
        .await
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        self.write(collection, session, |_, target| match target.position(filter) {
            Some(position) => Ok((Some(target.documents.remove(position)), true)),
            None => Ok((None, false)),
        })
        .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<u64> {
        self.write(collection, session, |name, target| {
            // Build every post-image first so a failure leaves the collection
            // untouched.
            let mut next = target.documents.clone();
            let mut modified = 0;
            for position in 0..next.len() {
                if !filter.matches(&next[position]) {
                    continue;
                }
                let updated = mutation.apply(&next[position])?;
                target.check_unique(name, &next, &updated, Some(position))?;
                next[position] = updated;
                modified += 1;
            }
            if modified > 0 {
                target.documents = next;
            }
            Ok((modified, modified > 0))
        })
        .await
    }

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        let mut state = self.state.write().await;
        let State { collections, generations, .. } = &mut *state;
        let target = collections.entry(collection.to_string()).or_default();
        let mut added = false;
        for index in indexes {
            if target.indexes.iter().any(|existing| existing.name == index.name) {
                tracing::debug!(collection, index = %index.name, "Index already exists; skipping");
                continue;
            }
            if index.unique {
                let single = Collection { documents: Vec::new(), indexes: vec![index.clone()] };
                for (position, document) in target.documents.iter().enumerate() {
                    single.check_unique(collection, &target.documents, document, Some(position))?;
                }
            }
            target.indexes.push(index.clone());
            added = true;
        }
        // Sessions staged against the old index set must not commit.
        if added {
            *generations.entry(collection.to_string()).or_default() += 1;
        }
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.collections.remove(collection).is_some();
        if existed {
            *state.generations.entry(collection.to_string()).or_default() += 1;
        }
        Ok(existed)
    }

    async fn start_session(&self) -> Result<Session> {
        let mut state = self.state.write().await;
        let session = Session::allocate();
        let staged = Staged {
            collections: state.collections.clone(),
            base: state.generations.clone(),
            touched: HashSet::new(),
        };
        state.sessions.insert(session.id(), staged);
        tracing::trace!(%session, "Started in-memory session");
        Ok(session)
    }

    async fn commit(&self, session: &Session) -> Result<()> {
        let mut guard = self.state.write().await;
        let State { collections, generations, sessions } = &mut *guard;
        let staged =
            sessions.remove(&session.id()).ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSession(session.id())))?;
        for name in &staged.touched {
            let live = generations.get(name).copied().unwrap_or_default();
            if staged.base.get(name).copied().unwrap_or_default() != live {
                exn::bail!(ErrorKind::WriteConflict(name.clone()));
            }
        }
        let Staged { collections: mut staged_collections, touched, .. } = staged;
        for name in touched {
            let documents = staged_collections.remove(&name).map(|c| c.documents).unwrap_or_default();
            collections.entry(name.clone()).or_default().documents = documents;
            *generations.entry(name).or_default() += 1;
        }
        tracing::trace!(%session, "Committed in-memory session");
        Ok(())
    }

    async fn abort(&self, session: &Session) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sessions
            .remove(&session.id())
            .map(|_| ())
            .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSession(session.id())))?;
        tracing::trace!(%session, "Aborted in-memory session");
        Ok(())
    }
}
