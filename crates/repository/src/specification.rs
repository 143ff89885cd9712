//! Query objects translating a domain question into a store filter.

use versa_store::{Filter, Id};

/// A side-effect-free predicate over records.
///
/// Implement this for domain queries (`ActiveUsersInTeam { team }`) so call
/// sites never build raw filters.
pub trait Specification: Send + Sync {
    fn filter(&self) -> Filter;
}

/// Matches every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl Specification for MatchAll {
    fn filter(&self) -> Filter {
        Filter::All
    }
}

/// Matches the record with the given identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdSpecification(pub Id);

impl Specification for IdSpecification {
    fn filter(&self) -> Filter {
        Filter::id(&self.0)
    }
}

/// Wraps a ready-made filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpecification(pub Filter);

impl Specification for FilterSpecification {
    fn filter(&self) -> Filter {
        self.0.clone()
    }
}

impl Specification for Filter {
    fn filter(&self) -> Filter {
        self.clone()
    }
}
