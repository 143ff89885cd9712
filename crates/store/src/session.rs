//! Transaction sessions.

use derive_more::Display;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Handle to a backend transaction.
///
/// Sessions are cheap to copy; the transaction state itself lives inside the
/// backend that issued the handle. Passing a session to an operation makes the
/// operation part of that transaction.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("session#{_0}")]
pub struct Session(u64);

impl Session {
    /// Allocate a process-unique session handle. Intended for backend
    /// implementations.
    pub fn allocate() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}
