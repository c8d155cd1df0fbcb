//! In-memory device
//!
//! DashMap-backed volatile device used for RAM-backed pool members and as the
//! workhorse of the test suites. Supports fault injection: a device can be
//! taken offline (every operation reports `DeviceUnavailable`) or set to
//! corrupt reads, which the redundancy engine must then repair from parity.

use async_trait::async_trait;
use dashmap::DashMap;
use silo_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::{strip_scheme, StorageDevice};

/// Volatile in-memory device.
#[derive(Debug, Default)]
pub struct MemoryDevice {
    entries: DashMap<String, Vec<u8>>,
    offline: AtomicBool,
    corrupt_reads: AtomicBool,
}

impl MemoryDevice {
    /// Create an empty device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the device offline (or bring it back).
    ///
    /// While offline every operation returns `DeviceUnavailable`, which is
    /// how tests exercise the reconstruction and rebuild paths.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Make every subsequent load report `Corruption`.
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        self.corrupt_reads.store(corrupt, Ordering::Release);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the device holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Acquire) {
            Err(Error::DeviceUnavailable("memory device offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageDevice for MemoryDevice {
    fn scheme(&self) -> &str {
        "mem"
    }

    fn is_volatile(&self) -> bool {
        true
    }

    async fn save(&self, uri: &str, bytes: &[u8]) -> Result<()> {
        self.check_online()?;
        let key = strip_scheme(uri, "mem").to_string();
        self.entries.insert(key, bytes.to_vec());
        Ok(())
    }

    async fn load(&self, uri: &str) -> Result<Vec<u8>> {
        self.check_online()?;
        if self.corrupt_reads.load(Ordering::Acquire) {
            return Err(Error::Corruption(format!("injected corruption at {uri}")));
        }
        let key = strip_scheme(uri, "mem");
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found(uri))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        self.check_online()?;
        let key = strip_scheme(uri, "mem");
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        self.check_online()?;
        let key = strip_scheme(uri, "mem");
        Ok(self.entries.contains_key(key))
    }
}
