//! Content index
//!
//! Maps manifest ids to manifests over a pluggable store, with secondary
//! lookups by container, pool and storage layer. The invariant the rest of
//! the system leans on: for every manifest present here, the redundancy
//! engine holds a blob addressed by the manifest's content hash.
//!
//! `touch` records last access as an O(1) map write; no scan is involved.

use dashmap::DashMap;
use silo_core::{ContainerId, Error, Manifest, ManifestId, Result};
use std::sync::Arc;

use crate::query::{FieldFilter, Predicate};
use crate::store::{InMemoryStore, ManifestStore};

/// Pool/layer placement labels for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLocation {
    /// Storage pool the container's blobs live in
    pub pool: Option<String>,
    /// Storage layer within the pool
    pub layer: Option<String>,
}

/// Manifest registry with query support.
pub struct ContentIndex {
    store: Arc<dyn ManifestStore>,
    last_access: DashMap<ManifestId, chrono::DateTime<chrono::Utc>>,
    locations: DashMap<ContainerId, ContainerLocation>,
}

impl ContentIndex {
    /// Create an index over the in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    /// Create an index over a custom backing store.
    pub fn with_store(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            store,
            last_access: DashMap::new(),
            locations: DashMap::new(),
        }
    }

    /// Insert or replace a manifest.
    pub async fn insert(&self, manifest: Manifest) -> Result<()> {
        self.store.upsert(manifest).await
    }

    /// Point lookup.
    pub async fn get(&self, id: ManifestId) -> Result<Manifest> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("manifest {id}")))
    }

    /// Point lookup returning `None` for missing ids.
    pub async fn try_get(&self, id: ManifestId) -> Result<Option<Manifest>> {
        self.store.get(id).await
    }

    /// Remove a manifest. Missing ids are not an error.
    pub async fn remove(&self, id: ManifestId) -> Result<Option<Manifest>> {
        self.last_access.remove(&id);
        self.store.remove(id).await
    }

    /// Record an access to `id`. O(1); does not touch the backing store.
    pub fn touch(&self, id: ManifestId) {
        self.last_access.insert(id, chrono::Utc::now());
    }

    /// Last recorded access for `id`, if any.
    pub fn last_access(&self, id: ManifestId) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_access.get(&id).map(|t| *t)
    }

    /// Number of manifests.
    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    /// Whether the index holds no manifests.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Assign pool/layer placement labels to a container.
    pub fn set_location(&self, container: ContainerId, location: ContainerLocation) {
        self.locations.insert(container, location);
    }

    /// Placement labels of a container.
    pub fn location(&self, container: ContainerId) -> ContainerLocation {
        self.locations
            .get(&container)
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Restartable, finite enumeration cursor over all manifests, ordered by
    /// id.
    pub fn cursor(&self) -> ManifestCursor {
        ManifestCursor {
            store: self.store.clone(),
            after: None,
            page: Vec::new(),
            done: false,
        }
    }

    /// Evaluate a predicate, string or parsed.
    pub async fn query(&self, predicate: &Predicate) -> Result<Vec<Manifest>> {
        if let Predicate::Manifest(id) = predicate {
            return Ok(self.store.get(*id).await?.into_iter().collect());
        }

        let mut out = Vec::new();
        let mut cursor = self.cursor();
        while let Some(manifest) = cursor.next().await? {
            if self.predicate_matches(predicate, &manifest) {
                out.push(manifest);
            }
        }
        Ok(out)
    }

    /// Evaluate a predicate given in string form.
    pub async fn query_str(&self, predicate: &str) -> Result<Vec<Manifest>> {
        self.query(&Predicate::parse(predicate)?).await
    }

    /// Evaluate a conjunction of composite filters.
    pub async fn filter(&self, filters: &[FieldFilter]) -> Result<Vec<Manifest>> {
        let mut out = Vec::new();
        let mut cursor = self.cursor();
        while let Some(manifest) = cursor.next().await? {
            if filters.iter().all(|f| f.matches(&manifest)) {
                out.push(manifest);
            }
        }
        Ok(out)
    }

    fn predicate_matches(&self, predicate: &Predicate, manifest: &Manifest) -> bool {
        match predicate {
            Predicate::All => true,
            Predicate::Manifest(id) => manifest.id == *id,
            Predicate::Container(id) => manifest.container == *id,
            Predicate::PathPrefix(prefix) => manifest.relative_path.starts_with(prefix.as_str()),
            Predicate::Pool(pool) => {
                self.location(manifest.container).pool.as_deref() == Some(pool.as_str())
            }
            Predicate::Pools(pools) => {
                let location = self.location(manifest.container);
                location
                    .pool
                    .as_deref()
                    .is_some_and(|p| pools.iter().any(|q| q.as_str() == p))
            }
            Predicate::Layer(layer) => {
                self.location(manifest.container).layer.as_deref() == Some(layer.as_str())
            }
        }
    }
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Paging cursor over the manifest store.
///
/// Finite: ends when a page comes back short. Restartable via [`Self::reset`].
pub struct ManifestCursor {
    store: Arc<dyn ManifestStore>,
    after: Option<ManifestId>,
    page: Vec<Manifest>,
    done: bool,
}

/// Page size used by the cursor.
const CURSOR_PAGE: usize = 256;

impl ManifestCursor {
    /// Next manifest in id order, or `None` at the end.
    pub async fn next(&mut self) -> Result<Option<Manifest>> {
        if self.page.is_empty() {
            if self.done {
                return Ok(None);
            }
            let mut page = self.store.scan(self.after, CURSOR_PAGE).await?;
            if page.len() < CURSOR_PAGE {
                self.done = true;
            }
            if page.is_empty() {
                return Ok(None);
            }
            self.after = Some(page.last().expect("nonempty page").id);
            page.reverse();
            self.page = page;
        }
        Ok(self.page.pop())
    }

    /// Restart the enumeration from the beginning.
    pub fn reset(&mut self) {
        self.after = None;
        self.page.clear();
        self.done = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterField, FilterOp};

    #[tokio::test]
    async fn test_insert_get_remove_touch() {
        let index = ContentIndex::new();
        let m = Manifest::new(ContainerId::new(), "a.txt", b"data");
        index.insert(m.clone()).await.unwrap();
        assert_eq!(index.get(m.id).await.unwrap(), m);

        assert!(index.last_access(m.id).is_none());
        index.touch(m.id);
        assert!(index.last_access(m.id).is_some());

        index.remove(m.id).await.unwrap();
        let err = index.get(m.id).await.unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::NotFound);
        assert!(index.last_access(m.id).is_none());
    }

    #[tokio::test]
    async fn test_cursor_restartable() {
        let index = ContentIndex::new();
        let container = ContainerId::new();
        for i in 0..5 {
            index
                .insert(Manifest::new(container, format!("f{i}"), b"x"))
                .await
                .unwrap();
        }

        let mut cursor = index.cursor();
        let mut first_pass = 0;
        while cursor.next().await.unwrap().is_some() {
            first_pass += 1;
        }
        assert_eq!(first_pass, 5);
        // Exhausted cursors stay exhausted until reset
        assert!(cursor.next().await.unwrap().is_none());
        cursor.reset();
        assert!(cursor.next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_query_by_container_and_pool() {
        let index = ContentIndex::new();
        let hot = ContainerId::new();
        let cold = ContainerId::new();
        index.set_location(
            hot,
            ContainerLocation {
                pool: Some("hot".into()),
                layer: Some("ssd".into()),
            },
        );
        index.set_location(
            cold,
            ContainerLocation {
                pool: Some("cold".into()),
                layer: None,
            },
        );
        index.insert(Manifest::new(hot, "a", b"1")).await.unwrap();
        index.insert(Manifest::new(hot, "b", b"2")).await.unwrap();
        index.insert(Manifest::new(cold, "c", b"3")).await.unwrap();

        assert_eq!(index.query_str("*").await.unwrap().len(), 3);
        assert_eq!(
            index
                .query_str(&format!("container:{hot}"))
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(index.query_str("pool:hot").await.unwrap().len(), 2);
        assert_eq!(index.query_str("pools:hot,cold").await.unwrap().len(), 3);
        assert_eq!(index.query_str("layer:ssd").await.unwrap().len(), 2);
        assert_eq!(index.query_str("pool:missing").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_composite_filters_and_together() {
        let index = ContentIndex::new();
        let c = ContainerId::new();
        index
            .insert(Manifest::new(c, "docs/a.txt", b"0123456789"))
            .await
            .unwrap();
        index
            .insert(Manifest::new(c, "docs/b.txt", b"01"))
            .await
            .unwrap();
        index
            .insert(Manifest::new(c, "img/c.png", b"0123456789"))
            .await
            .unwrap();

        let hits = index
            .filter(&[
                FieldFilter::new(FilterField::Path, FilterOp::StartsWith, "docs/"),
                FieldFilter::new(FilterField::Size, FilterOp::GreaterThan, "5"),
            ])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relative_path, "docs/a.txt");
    }
}
