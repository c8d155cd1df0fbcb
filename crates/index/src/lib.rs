//! Content index for Silo
//!
//! Manifest registry keyed by id with:
//! - ManifestStore: pluggable persistence seam (atomic upsert + ordered scan)
//! - ContentIndex: point lookups, O(1) access touch, container/pool/layer
//!   placement labels
//! - ManifestCursor: restartable, finite async enumeration
//! - Predicate / FieldFilter: the two query forms

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod index;
pub mod query;
pub mod store;

pub use index::{ContainerLocation, ContentIndex, ManifestCursor};
pub use query::{FieldFilter, FilterField, FilterOp, Predicate};
pub use store::{InMemoryStore, ManifestStore};
