//! Per-repository settings, fixed at construction.

use crate::validation::{ValidationOptions, Validator};
use std::fmt;
use std::sync::Arc;

/// Settings shared by every command a repository runs.
///
/// Built and checked once by [`RepositoryBuilder`](crate::RepositoryBuilder).
#[derive(Clone)]
pub struct Settings {
    pub(crate) collection: String,
    pub(crate) validate_add: bool,
    pub(crate) validate_update: bool,
    pub(crate) validate_replace: bool,
    pub(crate) validate_get: bool,
    pub(crate) soft_delete: bool,
    pub(crate) validation_options: ValidationOptions,
    pub(crate) validator: Option<Arc<dyn Validator>>,
}

impl Settings {
    pub(crate) fn new(collection: String) -> Self {
        Self {
            collection,
            validate_add: false,
            validate_update: false,
            validate_replace: false,
            validate_get: false,
            soft_delete: false,
            validation_options: ValidationOptions::default(),
            validator: None,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn soft_delete(&self) -> bool {
        self.soft_delete
    }

    pub fn validation_options(&self) -> &ValidationOptions {
        &self.validation_options
    }

    /// Returns `true` if any validation toggle is on.
    pub fn validates(&self) -> bool {
        self.validate_add || self.validate_update || self.validate_replace || self.validate_get
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("collection", &self.collection)
            .field("validate_add", &self.validate_add)
            .field("validate_update", &self.validate_update)
            .field("validate_replace", &self.validate_replace)
            .field("validate_get", &self.validate_get)
            .field("soft_delete", &self.soft_delete)
            .field("validation_options", &self.validation_options)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
