//! Manifest store seam
//!
//! The content index assumes only atomic upsert and ordered enumeration from
//! its backing store, so it can be re-pointed at an embedded database without
//! touching the query layer. The in-memory implementation is the default
//! backend and the reference for the trait's contract.

use async_trait::async_trait;
use dashmap::DashMap;
use silo_core::{Manifest, ManifestId, Result};

/// Pluggable manifest persistence.
///
/// Implementations must provide atomic upsert and enumeration ordered by
/// manifest id; everything else the index needs is derived from those two.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Insert or replace the record for `manifest.id`.
    async fn upsert(&self, manifest: Manifest) -> Result<()>;

    /// Fetch one manifest by id.
    async fn get(&self, id: ManifestId) -> Result<Option<Manifest>>;

    /// Remove one manifest; returns the removed record if it existed.
    async fn remove(&self, id: ManifestId) -> Result<Option<Manifest>>;

    /// Enumerate manifests with `id > after`, ordered by id, at most `limit`.
    ///
    /// Passing `None` starts from the beginning; a returned page shorter than
    /// `limit` ends the enumeration. This makes cursors restartable and
    /// finite.
    async fn scan(&self, after: Option<ManifestId>, limit: usize) -> Result<Vec<Manifest>>;

    /// Number of stored manifests.
    async fn len(&self) -> Result<usize>;
}

/// DashMap-backed store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    manifests: DashMap<ManifestId, Manifest>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for InMemoryStore {
    async fn upsert(&self, manifest: Manifest) -> Result<()> {
        self.manifests.insert(manifest.id, manifest);
        Ok(())
    }

    async fn get(&self, id: ManifestId) -> Result<Option<Manifest>> {
        Ok(self.manifests.get(&id).map(|m| m.clone()))
    }

    async fn remove(&self, id: ManifestId) -> Result<Option<Manifest>> {
        Ok(self.manifests.remove(&id).map(|(_, m)| m))
    }

    async fn scan(&self, after: Option<ManifestId>, limit: usize) -> Result<Vec<Manifest>> {
        let mut page: Vec<Manifest> = self
            .manifests
            .iter()
            .filter(|e| after.map_or(true, |a| *e.key() > a))
            .map(|e| e.value().clone())
            .collect();
        page.sort_by_key(|m| m.id);
        page.truncate(limit);
        Ok(page)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.manifests.len())
    }
}
