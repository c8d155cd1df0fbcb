//! Device pools
//!
//! A pool groups equal-capability devices; the redundancy engine addresses
//! members by small integer index. Device calls made through the pool carry a
//! per-call deadline; exceeding it is reported as `DeviceUnavailable`, the
//! same as a dead device, so the caller's recovery path is uniform.

use silo_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::device::StorageDevice;

/// Default per-call device deadline.
pub const DEFAULT_DEVICE_DEADLINE: Duration = Duration::from_secs(120);

/// Indexed group of backing devices.
#[derive(Clone)]
pub struct DevicePool {
    members: Vec<Arc<dyn StorageDevice>>,
    deadline: Duration,
}

impl std::fmt::Debug for DevicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePool")
            .field("members", &self.members.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl DevicePool {
    /// Create a pool from its members.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` when the pool is empty.
    pub fn new(members: Vec<Arc<dyn StorageDevice>>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::InvalidConfiguration("device pool is empty".into()));
        }
        Ok(Self {
            members,
            deadline: DEFAULT_DEVICE_DEADLINE,
        })
    }

    /// Override the per-call deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the pool has no members (never true for a constructed pool).
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member at `index`.
    pub fn member(&self, index: usize) -> Result<&Arc<dyn StorageDevice>> {
        self.members
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("no pool member {index}")))
    }

    /// Scheme of member 0; pools are equal-capability so all members share it.
    pub fn scheme(&self) -> &str {
        self.members[0].scheme()
    }

    /// Save with the pool deadline applied.
    pub async fn save(&self, index: usize, uri: &str, bytes: &[u8]) -> Result<()> {
        let dev = self.member(index)?.clone();
        match timeout(self.deadline, dev.save(uri, bytes)).await {
            Ok(res) => res,
            Err(_) => Err(Error::DeviceUnavailable(format!(
                "save deadline exceeded on device {index}"
            ))),
        }
    }

    /// Load with the pool deadline applied.
    pub async fn load(&self, index: usize, uri: &str) -> Result<Vec<u8>> {
        let dev = self.member(index)?.clone();
        match timeout(self.deadline, dev.load(uri)).await {
            Ok(res) => res,
            Err(_) => Err(Error::DeviceUnavailable(format!(
                "load deadline exceeded on device {index}"
            ))),
        }
    }

    /// Delete with the pool deadline applied.
    pub async fn delete(&self, index: usize, uri: &str) -> Result<()> {
        let dev = self.member(index)?.clone();
        match timeout(self.deadline, dev.delete(uri)).await {
            Ok(res) => res,
            Err(_) => Err(Error::DeviceUnavailable(format!(
                "delete deadline exceeded on device {index}"
            ))),
        }
    }

    /// Exists with the pool deadline applied.
    pub async fn exists(&self, index: usize, uri: &str) -> Result<bool> {
        let dev = self.member(index)?.clone();
        match timeout(self.deadline, dev.exists(uri)).await {
            Ok(res) => res,
            Err(_) => Err(Error::DeviceUnavailable(format!(
                "exists deadline exceeded on device {index}"
            ))),
        }
    }
}

/// Validate `target` as an external-backup destination for a pool.
///
/// External targets must be non-volatile and must not share the source pool's
/// scheme. Backing up onto the same device family defeats the purpose.
pub fn validate_external_target(pool: &DevicePool, target: &dyn StorageDevice) -> Result<()> {
    if target.is_volatile() {
        return Err(Error::InvalidConfiguration(
            "external backup target must be non-volatile".into(),
        ));
    }
    if target.scheme() == pool.scheme() {
        return Err(Error::InvalidConfiguration(format!(
            "external backup target scheme '{}' matches the source pool",
            target.scheme()
        )));
    }
    Ok(())
}
