//! Redundancy engine: striped/mirrored/parity blob storage
//!
//! The engine splits a blob into `stripe_size` chunks, lays them out across
//! the pool per the configured level, computes parity, and issues the
//! per-device writes concurrently. A per-key [`RaidMetadata`] record is
//! persisted on every device once all required writes have completed, so a
//! reader that can see the metadata is guaranteed a recoverable chunk set.
//!
//! Reads reconstruct transparently: a chunk whose device reports
//! `DeviceUnavailable` or `Corruption` is treated as an erasure and solved
//! from the surviving chunks and parity. Only when the erasure count exceeds
//! the level's tolerance does the caller see `UnrecoverableRead`.

use dashmap::DashMap;
use futures::future::join_all;
use silo_core::{CancelToken, Error, ErrorKind, Result};
use silo_device::{DevicePool, StorageDevice};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Layout, ParityAlgorithm, RaidConfig, RaidLevel};
use crate::gf256;
use crate::health::HealthTable;
use crate::layout::{
    dedicated_data_disk, dedicated_parity_disk, mirrored_stripe_devices, striped_mirror_devices,
    striped_placement, RaidMetadata,
};

const UNRAID_PARITY_URI: &str = "unraid/parity";

fn chunk_uri(key: &str, idx: u32) -> String {
    format!("chunks/{key}/{idx}")
}

fn parity_uri(key: &str, stripe: usize, which: usize) -> String {
    let tag = ["p", "q", "r"][which];
    format!("parity/{key}/{stripe}/{tag}")
}

fn meta_uri(key: &str) -> String {
    format!("meta/{key}")
}

fn file_uri(key: &str) -> String {
    format!("files/{key}")
}

/// One planned device write.
pub(crate) struct WriteOp {
    pub(crate) device: usize,
    pub(crate) uri: String,
    pub(crate) bytes: Vec<u8>,
}

/// Striped/mirrored/parity blob store over a device pool.
pub struct RaidEngine {
    config: RaidConfig,
    pool: parking_lot::RwLock<DevicePool>,
    metadata: DashMap<String, RaidMetadata>,
    health: Arc<HealthTable>,
    rebuild_lock: Arc<tokio::sync::Mutex<()>>,
    unraid_lock: tokio::sync::Mutex<()>,
}

impl RaidEngine {
    /// Create an engine over `pool` with the given configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` when the config fails validation or the pool
    /// size does not match `device_count`.
    pub fn new(config: RaidConfig, pool: DevicePool) -> Result<Self> {
        config.validate()?;
        if pool.len() != config.device_count {
            return Err(Error::InvalidConfiguration(format!(
                "pool has {} members, config expects {}",
                pool.len(),
                config.device_count
            )));
        }
        Ok(Self {
            config,
            pool: parking_lot::RwLock::new(pool),
            metadata: DashMap::new(),
            health: Arc::new(HealthTable::new()),
            rebuild_lock: Arc::new(tokio::sync::Mutex::new(())),
            unraid_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &RaidConfig {
        &self.config
    }

    /// Shared device-health table.
    pub fn health(&self) -> &Arc<HealthTable> {
        &self.health
    }

    /// Mutex serializing rebuilds; at most one rebuild runs at a time.
    pub(crate) fn rebuild_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.rebuild_lock.clone()
    }

    /// Snapshot of the pool handle for one operation.
    pub(crate) fn pool(&self) -> DevicePool {
        self.pool.read().clone()
    }

    /// Swap in a replacement device at `index` and reset its health.
    pub fn replace_device(&self, index: usize, device: Arc<dyn StorageDevice>) -> Result<()> {
        let mut pool = self.pool.write();
        let mut members: Vec<Arc<dyn StorageDevice>> = (0..pool.len())
            .map(|i| pool.member(i).expect("index within pool length").clone())
            .collect();
        if index >= members.len() {
            return Err(Error::InvalidArgument(format!("no pool member {index}")));
        }
        members[index] = device;
        *pool = DevicePool::new(members)?;
        drop(pool);
        self.health.reset(index);
        Ok(())
    }

    /// Spawn the periodic health monitor for this engine's pool.
    ///
    /// Returns `None` when `health_check_interval` is zero. When a device
    /// transitions into `Failed` and `auto_rebuild` is set, a background
    /// rebuild is started; the engine's rebuild mutex keeps it single-flight.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> Option<crate::health::HealthMonitor> {
        let interval = self.config.health_check_interval;
        if interval.is_zero() {
            return None;
        }
        let probe_engine = self.clone();
        let fail_engine = self.clone();
        Some(crate::health::HealthMonitor::spawn(
            self.config.device_count,
            interval,
            self.health.clone(),
            move |device| {
                let engine = probe_engine.clone();
                async move { engine.pool().exists(device, "probe").await.is_ok() }
            },
            move |device| {
                if fail_engine.config().auto_rebuild {
                    let engine = fail_engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            crate::rebuild::rebuild_device(engine, device, CancelToken::new()).await
                        {
                            warn!(device, error = %e, "automatic rebuild failed");
                        }
                    });
                }
            },
        ))
    }

    /// Keys of all blobs known to this engine.
    pub fn keys(&self) -> Vec<String> {
        self.metadata.iter().map(|e| e.key().clone()).collect()
    }

    /// Metadata for `key`, from the in-memory registry.
    pub fn metadata_of(&self, key: &str) -> Option<RaidMetadata> {
        self.metadata.get(key).map(|m| m.clone())
    }

    /// Whether a blob is stored under `key`.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        if self.metadata.contains_key(key) {
            return Ok(true);
        }
        Ok(self.read_metadata_from_devices(key).await?.is_some())
    }

    /// Store `bytes` under `key`.
    ///
    /// Storing a key that already exists is a no-op: keys are content
    /// addresses, so identical keys imply identical bytes.
    pub async fn store(&self, key: &str, bytes: &[u8], cancel: &CancelToken) -> Result<()> {
        cancel.check("raid store")?;
        if self.contains(key).await? {
            debug!(key, "blob already stored, deduplicated");
            return Ok(());
        }

        if let Layout::DedicatedParity = self.config.layout() {
            return self.store_unraid(key, bytes, cancel).await;
        }

        let (ops, meta) = self.plan_writes(key, bytes);
        cancel.check("raid store")?;
        self.execute_writes(key, ops).await?;
        self.persist_metadata(key, &meta).await?;
        self.metadata.insert(key.to_string(), meta);
        Ok(())
    }

    /// Load the blob stored under `key`, reconstructing from parity or
    /// mirrors when devices have failed.
    pub async fn load(&self, key: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        cancel.check("raid load")?;
        let meta = self
            .load_metadata(key)
            .await?
            .ok_or_else(|| Error::not_found(format!("blob {key}")))?;
        if meta.chunk_count == 0 {
            return Ok(Vec::new());
        }

        match layout_of(meta.level, meta.mirror_count as usize) {
            Layout::Striped { groups, parity } => {
                self.load_striped(key, &meta, groups, parity, cancel).await
            }
            Layout::Mirror { copies } => self.load_mirrored(key, &meta, copies, cancel).await,
            Layout::MirroredStripes => {
                self.load_paired(key, &meta, cancel, |c, n| mirrored_stripe_devices(c, n))
                    .await
            }
            Layout::StripedMirrors => {
                self.load_paired(key, &meta, cancel, |c, n| striped_mirror_devices(c, n))
                    .await
            }
            Layout::DedicatedParity => self.load_unraid(key, &meta, cancel).await,
        }
    }

    /// Remove the blob stored under `key`. Missing keys are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let Some(meta) = self.load_metadata(key).await? else {
            return Ok(());
        };
        if meta.level == RaidLevel::Unraid {
            return self.delete_unraid(key, &meta).await;
        }

        let pool = self.pool();
        let n = pool.len();
        let mut deletions = Vec::new();
        for device in 0..n {
            for chunk in meta.device_chunks.get(device).into_iter().flatten() {
                deletions.push((device, chunk_uri(key, *chunk)));
            }
            deletions.push((device, meta_uri(key)));
        }
        if let Layout::Striped { groups, parity } =
            layout_of(meta.level, meta.mirror_count as usize)
        {
            let d = n / groups - parity;
            for s in 0..meta.stripe_count(d) {
                let placement = striped_placement(s, groups, parity, n);
                for (which, dev) in placement.parity.iter().enumerate() {
                    deletions.push((*dev, parity_uri(key, s, which)));
                }
            }
        }

        let futs = deletions
            .iter()
            .map(|(device, uri)| pool.delete(*device, uri));
        for res in join_all(futs).await {
            if let Err(e) = res {
                // Deletion is best-effort; an unreachable device's chunks are
                // orphaned, not fatal
                warn!(key, error = %e, "chunk deletion failed");
            }
        }
        self.metadata.remove(key);
        Ok(())
    }

    // ---- write path -----------------------------------------------------

    pub(crate) fn plan_writes(&self, key: &str, bytes: &[u8]) -> (Vec<WriteOp>, RaidMetadata) {
        let n = self.config.device_count;
        let stripe_size = self.config.stripe_size;
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            Vec::new()
        } else {
            bytes.chunks(stripe_size).collect()
        };
        let chunk_count = chunks.len() as u32;
        let mut device_chunks = vec![Vec::new(); n];
        let mut ops = Vec::new();

        match self.config.layout() {
            Layout::Striped { groups, parity } => {
                let d = n / groups - parity;
                let stripes = chunks.len().div_ceil(d.max(1));
                for s in 0..stripes {
                    let placement = striped_placement(s, groups, parity, n);
                    let stripe_chunks = &chunks[s * d..((s + 1) * d).min(chunks.len())];
                    let plen = stripe_chunks.iter().map(|c| c.len()).max().unwrap_or(0);

                    for (j, chunk) in stripe_chunks.iter().enumerate() {
                        let idx = (s * d + j) as u32;
                        let device = placement.data[j];
                        device_chunks[device].push(idx);
                        ops.push(WriteOp {
                            device,
                            uri: chunk_uri(key, idx),
                            bytes: chunk.to_vec(),
                        });
                    }

                    for which in 0..parity {
                        let mut buf = vec![0u8; plen];
                        for (j, chunk) in stripe_chunks.iter().enumerate() {
                            let coeff = coeff_for(j, which);
                            gf256::mul_xor_into(&mut buf, chunk, coeff);
                        }
                        ops.push(WriteOp {
                            device: placement.parity[which],
                            uri: parity_uri(key, s, which),
                            bytes: buf,
                        });
                    }
                }
            }
            Layout::Mirror { copies } => {
                for (c, chunk) in chunks.iter().enumerate() {
                    for device in 0..copies {
                        device_chunks[device].push(c as u32);
                        ops.push(WriteOp {
                            device,
                            uri: chunk_uri(key, c as u32),
                            bytes: chunk.to_vec(),
                        });
                    }
                }
            }
            Layout::MirroredStripes | Layout::StripedMirrors => {
                let paired = matches!(self.config.layout(), Layout::MirroredStripes);
                for (c, chunk) in chunks.iter().enumerate() {
                    let devices = if paired {
                        mirrored_stripe_devices(c, n)
                    } else {
                        striped_mirror_devices(c, n)
                    };
                    for device in devices {
                        device_chunks[device].push(c as u32);
                        ops.push(WriteOp {
                            device,
                            uri: chunk_uri(key, c as u32),
                            bytes: chunk.to_vec(),
                        });
                    }
                }
            }
            Layout::DedicatedParity => unreachable!("unraid has a dedicated store path"),
        }

        let meta = RaidMetadata {
            level: self.config.level,
            total_size: bytes.len() as u64,
            chunk_count,
            stripe_size: stripe_size as u32,
            mirror_count: self.config.mirror_count as u32,
            parity_algorithm: self.config.parity_algorithm,
            device_chunks,
        };
        (ops, meta)
    }

    /// Issue all planned writes concurrently; roll back on partial failure.
    async fn execute_writes(&self, key: &str, ops: Vec<WriteOp>) -> Result<()> {
        let pool = self.pool();
        let futs = ops.iter().map(|op| pool.save(op.device, &op.uri, &op.bytes));
        let results = join_all(futs).await;

        let mut failed_devices: Vec<usize> = Vec::new();
        let mut written: Vec<&WriteOp> = Vec::new();
        for (op, res) in ops.iter().zip(results) {
            match res {
                Ok(()) => written.push(op),
                Err(e) => {
                    warn!(key, device = op.device, error = %e, "device write failed");
                    if !failed_devices.contains(&op.device) {
                        failed_devices.push(op.device);
                    }
                }
            }
        }

        if failed_devices.is_empty() {
            return Ok(());
        }

        // Best-effort rollback of the writes that did land
        let rollbacks = written.iter().map(|op| pool.delete(op.device, &op.uri));
        for res in join_all(rollbacks).await {
            if let Err(e) = res {
                warn!(key, error = %e, "rollback delete failed");
            }
        }
        failed_devices.sort_unstable();
        Err(Error::WriteFailed {
            key: key.to_string(),
            failed_devices,
        })
    }

    /// Persist the metadata record on every device; at least one copy must
    /// land for the write to count as registered.
    async fn persist_metadata(&self, key: &str, meta: &RaidMetadata) -> Result<()> {
        let encoded = bincode::serialize(meta)?;
        let pool = self.pool();
        let uri = meta_uri(key);
        let futs = (0..pool.len()).map(|device| pool.save(device, &uri, &encoded));
        let results = join_all(futs).await;
        if results.iter().any(|r| r.is_ok()) {
            Ok(())
        } else {
            Err(Error::WriteFailed {
                key: key.to_string(),
                failed_devices: (0..pool.len()).collect(),
            })
        }
    }

    async fn load_metadata(&self, key: &str) -> Result<Option<RaidMetadata>> {
        if let Some(meta) = self.metadata.get(key) {
            return Ok(Some(meta.clone()));
        }
        let loaded = self.read_metadata_from_devices(key).await?;
        if let Some(meta) = &loaded {
            self.metadata.insert(key.to_string(), meta.clone());
        }
        Ok(loaded)
    }

    async fn read_metadata_from_devices(&self, key: &str) -> Result<Option<RaidMetadata>> {
        let pool = self.pool();
        let uri = meta_uri(key);
        for device in 0..pool.len() {
            match pool.load(device, &uri).await {
                Ok(bytes) => match bincode::deserialize::<RaidMetadata>(&bytes) {
                    Ok(meta) => return Ok(Some(meta)),
                    Err(e) => {
                        warn!(key, device, error = %e, "undecodable metadata record");
                    }
                },
                Err(e) if matches!(e.kind(), ErrorKind::NotFound) => {}
                Err(e) => {
                    debug!(key, device, error = %e, "metadata read failed, trying next device");
                }
            }
        }
        Ok(None)
    }

    // ---- striped read path ----------------------------------------------

    async fn load_striped(
        &self,
        key: &str,
        meta: &RaidMetadata,
        groups: usize,
        parity: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let pool = self.pool();
        let n = pool.len();
        let d = n / groups - parity;
        let total = meta.total_size as usize;
        let stripe_size = meta.stripe_size as usize;
        let chunk_count = meta.chunk_count as usize;
        let mut out = Vec::with_capacity(total);

        for s in 0..meta.stripe_count(d) {
            cancel.check("raid load")?;
            let placement = striped_placement(s, groups, parity, n);
            let first = s * d;
            let last = ((s + 1) * d).min(chunk_count);
            let in_stripe = last - first;

            // Read the stripe's data chunks concurrently, skipping devices
            // already marked failed
            let reads = (0..in_stripe).map(|j| {
                let device = placement.data[j];
                let uri = chunk_uri(key, (first + j) as u32);
                let pool = &pool;
                async move {
                    if self.health.is_failed(device) {
                        return Err(Error::DeviceUnavailable(format!(
                            "device {device} marked failed"
                        )));
                    }
                    pool.load(device, &uri).await
                }
            });
            let results = join_all(reads).await;

            let mut stripe_chunks: Vec<Option<Vec<u8>>> = Vec::with_capacity(in_stripe);
            let mut erased: Vec<usize> = Vec::new();
            for (j, res) in results.into_iter().enumerate() {
                match res {
                    Ok(bytes) => stripe_chunks.push(Some(bytes)),
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::DeviceUnavailable
                                | ErrorKind::Corruption
                                | ErrorKind::NotFound
                        ) =>
                    {
                        debug!(key, stripe = s, slot = j, error = %e, "chunk read failed, will reconstruct");
                        erased.push(j);
                        stripe_chunks.push(None);
                    }
                    Err(e) => return Err(e),
                }
            }

            if !erased.is_empty() {
                self.reconstruct_stripe(
                    key,
                    s,
                    &placement.parity,
                    &mut stripe_chunks,
                    &erased,
                    parity,
                    &pool,
                )
                .await?;
            }

            for (j, chunk) in stripe_chunks.into_iter().enumerate() {
                let idx = first + j;
                let expected = expected_chunk_len(idx, stripe_size, total);
                let mut chunk = chunk.expect("all erasures reconstructed");
                chunk.truncate(expected);
                if chunk.len() < expected {
                    // A reconstructed short chunk comes back zero-padded only
                    // up to parity length; restore the original length
                    chunk.resize(expected, 0);
                }
                out.extend_from_slice(&chunk);
            }
        }

        Ok(out)
    }

    /// Solve one stripe's erasures from its surviving chunks and parity.
    #[allow(clippy::too_many_arguments)]
    async fn reconstruct_stripe(
        &self,
        key: &str,
        stripe: usize,
        parity_devices: &[usize],
        stripe_chunks: &mut [Option<Vec<u8>>],
        erased: &[usize],
        parity: usize,
        pool: &DevicePool,
    ) -> Result<()> {
        let tolerance = parity;
        // Fetch whichever parity chunks survive
        let parity_reads = (0..parity).map(|which| {
            let device = parity_devices[which];
            let uri = parity_uri(key, stripe, which);
            async move {
                if self.health.is_failed(device) {
                    return None;
                }
                pool.load(device, &uri).await.ok()
            }
        });
        let parities: Vec<Option<Vec<u8>>> = join_all(parity_reads).await;
        let alive: Vec<(usize, &Vec<u8>)> = parities
            .iter()
            .enumerate()
            .filter_map(|(which, p)| p.as_ref().map(|bytes| (which, bytes)))
            .collect();
        let failed_parities = parity - alive.len();

        if erased.len() > alive.len() {
            return Err(Error::UnrecoverableRead {
                key: key.to_string(),
                failed: erased.len() + failed_parities,
                tolerance,
            });
        }

        let plen = alive
            .iter()
            .map(|(_, p)| p.len())
            .max()
            .unwrap_or(0);

        // Syndromes: parity with every surviving chunk folded back out
        let k = erased.len();
        let rows: Vec<(usize, Vec<u8>)> = alive
            .iter()
            .take(k)
            .map(|(which, pbytes)| {
                let mut syndrome = vec![0u8; plen];
                gf256::xor_into(&mut syndrome, pbytes);
                for (j, chunk) in stripe_chunks.iter().enumerate() {
                    if let Some(chunk) = chunk {
                        gf256::mul_xor_into(&mut syndrome, chunk, coeff_for(j, *which));
                    }
                }
                (*which, syndrome)
            })
            .collect();

        if k == 1 {
            let (which, syndrome) = &rows[0];
            let c = coeff_for(erased[0], *which);
            let recovered: Vec<u8> = syndrome.iter().map(|&b| gf256::div(b, c)).collect();
            stripe_chunks[erased[0]] = Some(recovered);
            return Ok(());
        }

        // Invert the k×k coefficient matrix once, then apply it per byte
        let matrix: Vec<Vec<u8>> = rows
            .iter()
            .map(|(which, _)| erased.iter().map(|&e| coeff_for(e, *which)).collect())
            .collect();
        let inverse = invert_matrix(&matrix).ok_or_else(|| Error::UnrecoverableRead {
            key: key.to_string(),
            failed: erased.len() + failed_parities,
            tolerance,
        })?;

        let mut recovered: Vec<Vec<u8>> = vec![vec![0u8; plen]; k];
        for b in 0..plen {
            for (e, rec) in recovered.iter_mut().enumerate() {
                let mut v = 0u8;
                for (r, (_, syndrome)) in rows.iter().enumerate() {
                    v ^= gf256::mul(inverse[e][r], syndrome[b]);
                }
                rec[b] = v;
            }
        }
        for (e, bytes) in erased.iter().zip(recovered) {
            stripe_chunks[*e] = Some(bytes);
        }
        Ok(())
    }

    // ---- mirrored read paths --------------------------------------------

    async fn load_mirrored(
        &self,
        key: &str,
        meta: &RaidMetadata,
        copies: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let pool = self.pool();
        let total = meta.total_size as usize;
        let stripe_size = meta.stripe_size as usize;
        let mut out = Vec::with_capacity(total);
        for c in 0..meta.chunk_count {
            cancel.check("raid load")?;
            let devices: Vec<usize> = (0..copies).collect();
            let chunk = self.read_any_mirror(key, c, &devices, &pool).await?;
            let expected = expected_chunk_len(c as usize, stripe_size, total);
            debug_assert_eq!(chunk.len(), expected);
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    async fn load_paired<F>(
        &self,
        key: &str,
        meta: &RaidMetadata,
        cancel: &CancelToken,
        devices_for: F,
    ) -> Result<Vec<u8>>
    where
        F: Fn(usize, usize) -> [usize; 2],
    {
        let pool = self.pool();
        let n = pool.len();
        let total = meta.total_size as usize;
        let stripe_size = meta.stripe_size as usize;
        let mut out = Vec::with_capacity(total);
        for c in 0..meta.chunk_count {
            cancel.check("raid load")?;
            let devices = devices_for(c as usize, n).to_vec();
            let chunk = self.read_any_mirror(key, c, &devices, &pool).await?;
            let expected = expected_chunk_len(c as usize, stripe_size, total);
            debug_assert_eq!(chunk.len(), expected);
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Read chunk `c` from the first responding mirror.
    async fn read_any_mirror(
        &self,
        key: &str,
        c: u32,
        devices: &[usize],
        pool: &DevicePool,
    ) -> Result<Vec<u8>> {
        let uri = chunk_uri(key, c);
        for &device in devices {
            if self.health.is_failed(device) {
                continue;
            }
            match pool.load(device, &uri).await {
                Ok(bytes) => return Ok(bytes),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::DeviceUnavailable | ErrorKind::Corruption | ErrorKind::NotFound
                    ) =>
                {
                    debug!(key, chunk = c, device, error = %e, "mirror read failed");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::UnrecoverableRead {
            key: key.to_string(),
            failed: devices.len(),
            tolerance: devices.len() - 1,
        })
    }

    // ---- dedicated-parity (unraid) paths --------------------------------

    async fn store_unraid(&self, key: &str, bytes: &[u8], cancel: &CancelToken) -> Result<()> {
        let pool = self.pool();
        let n = pool.len();
        let target = dedicated_data_disk(key, n);
        let parity_disk = dedicated_parity_disk(n);

        // Global parity updates must not interleave
        let _guard = self.unraid_lock.lock().await;
        cancel.check("raid store")?;
        // Re-check under the lock: a racing duplicate store must not fold
        // the same bytes into the parity twice
        if self.metadata.contains_key(key) {
            return Ok(());
        }

        if let Err(e) = pool.save(target, &file_uri(key), bytes).await {
            warn!(key, device = target, error = %e, "unraid file write failed");
            return Err(Error::WriteFailed {
                key: key.to_string(),
                failed_devices: vec![target],
            });
        }

        let mut parity = match pool.load(parity_disk, UNRAID_PARITY_URI).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        gf256::xor_into(&mut parity, bytes);
        pool.save(parity_disk, UNRAID_PARITY_URI, &parity).await?;

        let mut device_chunks = vec![Vec::new(); n];
        if !bytes.is_empty() {
            device_chunks[target].push(0);
        }
        let meta = RaidMetadata {
            level: RaidLevel::Unraid,
            total_size: bytes.len() as u64,
            chunk_count: u32::from(!bytes.is_empty()),
            stripe_size: self.config.stripe_size as u32,
            mirror_count: 1,
            parity_algorithm: ParityAlgorithm::Xor,
            device_chunks,
        };
        self.persist_metadata(key, &meta).await?;
        self.metadata.insert(key.to_string(), meta);
        Ok(())
    }

    async fn load_unraid(
        &self,
        key: &str,
        meta: &RaidMetadata,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let pool = self.pool();
        let n = pool.len();
        let target = dedicated_data_disk(key, n);

        if !self.health.is_failed(target) {
            match pool.load(target, &file_uri(key)).await {
                Ok(bytes) => return Ok(bytes),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::DeviceUnavailable | ErrorKind::Corruption | ErrorKind::NotFound
                    ) =>
                {
                    debug!(key, device = target, error = %e, "unraid read failed, reconstructing");
                }
                Err(e) => return Err(e),
            }
        }

        // Parity is the XOR of every stored file's aligned bytes; fold all
        // surviving files back out to recover this one
        let parity_disk = dedicated_parity_disk(n);
        let mut acc = pool
            .load(parity_disk, UNRAID_PARITY_URI)
            .await
            .map_err(|_| Error::UnrecoverableRead {
                key: key.to_string(),
                failed: 2,
                tolerance: 1,
            })?;

        for entry in self.metadata.iter() {
            cancel.check("raid load")?;
            if entry.key() == key || entry.value().level != RaidLevel::Unraid {
                continue;
            }
            let other_target = dedicated_data_disk(entry.key(), n);
            let bytes = pool
                .load(other_target, &file_uri(entry.key()))
                .await
                .map_err(|_| Error::UnrecoverableRead {
                    key: key.to_string(),
                    failed: 2,
                    tolerance: 1,
                })?;
            gf256::xor_into(&mut acc, &bytes);
        }

        acc.truncate(meta.total_size as usize);
        acc.resize(meta.total_size as usize, 0);
        Ok(acc)
    }

    async fn delete_unraid(&self, key: &str, meta: &RaidMetadata) -> Result<()> {
        let pool = self.pool();
        let n = pool.len();
        let target = dedicated_data_disk(key, n);
        let parity_disk = dedicated_parity_disk(n);

        let _guard = self.unraid_lock.lock().await;
        // Fold the file back out of the global parity before dropping it
        let bytes = self.load_unraid(key, meta, &CancelToken::new()).await?;
        let mut parity = match pool.load(parity_disk, UNRAID_PARITY_URI).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        gf256::xor_into(&mut parity, &bytes);
        pool.save(parity_disk, UNRAID_PARITY_URI, &parity).await?;

        if let Err(e) = pool.delete(target, &file_uri(key)).await {
            warn!(key, error = %e, "unraid file deletion failed");
        }
        for device in 0..n {
            let _ = pool.delete(device, &meta_uri(key)).await;
        }
        self.metadata.remove(key);
        Ok(())
    }
}

/// Q-parity coefficient of data chunk `j` (within its stripe) for parity row
/// `which` (0 = P, 1 = Q, 2 = R): `(j + 1)` raised to the row's power.
fn coeff_for(j: usize, which: usize) -> u8 {
    let c = (j + 1) as u8;
    match which {
        0 => 1,
        1 => c,
        2 => gf256::mul(c, c),
        _ => unreachable!("at most triple parity"),
    }
}

fn expected_chunk_len(idx: usize, stripe_size: usize, total: usize) -> usize {
    let start = idx * stripe_size;
    stripe_size.min(total.saturating_sub(start))
}

fn layout_of(level: RaidLevel, mirror_count: usize) -> Layout {
    match level {
        RaidLevel::L0 => Layout::Striped { groups: 1, parity: 0 },
        RaidLevel::L5 | RaidLevel::Z1 => Layout::Striped { groups: 1, parity: 1 },
        RaidLevel::L6 | RaidLevel::Z2 => Layout::Striped { groups: 1, parity: 2 },
        RaidLevel::Z3 => Layout::Striped { groups: 1, parity: 3 },
        RaidLevel::L50 => Layout::Striped { groups: 2, parity: 1 },
        RaidLevel::L60 => Layout::Striped { groups: 2, parity: 2 },
        RaidLevel::L1 => Layout::Mirror { copies: mirror_count },
        RaidLevel::L10 => Layout::MirroredStripes,
        RaidLevel::L01 => Layout::StripedMirrors,
        RaidLevel::Unraid => Layout::DedicatedParity,
    }
}

/// Invert a k×k GF(2⁸) matrix by solving against unit columns.
fn invert_matrix(m: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
    let k = m.len();
    let mut columns: Vec<Vec<u8>> = Vec::with_capacity(k);
    for col in 0..k {
        let mut unit = vec![0u8; k];
        unit[col] = 1;
        columns.push(gf256::solve_linear(m.to_vec(), unit)?);
    }
    // columns[c][r] is the inverse's entry (r, c); transpose into rows
    let mut rows = vec![vec![0u8; k]; k];
    for (c, col) in columns.iter().enumerate() {
        for (r, v) in col.iter().enumerate() {
            rows[r][c] = *v;
        }
    }
    Some(rows)
}
