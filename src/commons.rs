//! Definitions shared by the front and middle ends.

// use ordered sets and maps to allow for deterministic outputs.
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// A value that passed validation.  Only `validate` functions create these, so
/// analyses can assume the invariants checked there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Valid<T>(pub T);

impl<T> Valid<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }
}
