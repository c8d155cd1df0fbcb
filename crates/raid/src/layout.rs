//! Stripe layout and per-blob redundancy metadata
//!
//! Placement rules, normative:
//! - Rotating parity: stripe `s` places parity P on device `s mod N`, Q on
//!   `(s+1) mod N`, R on `(s+2) mod N`. Data chunks occupy the remaining
//!   devices in ascending order, skipping parity slots.
//! - Nested levels (L50/L60) partition the pool into equal groups; stripe `s`
//!   lives entirely in group `s mod G` and rotates with the within-group
//!   stripe index `s / G`.
//! - Mirrored stripes (L10) pair adjacent devices; chunk `c` lands on pair
//!   `c mod (N/2)`, both members. Striped mirrors (L01) stripe the first
//!   half and duplicate onto the second half.
//! - Dedicated parity (Unraid) places a whole file on data disk
//!   `hash(key) mod data_disk_count`; the last device holds parity.

use serde::{Deserialize, Serialize};

use crate::config::{ParityAlgorithm, RaidLevel};

/// Where one stripe's chunks live: absolute device indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripePlacement {
    /// Parity devices in P, Q, R order
    pub parity: Vec<usize>,
    /// Data devices in chunk order; length = data slots per stripe
    pub data: Vec<usize>,
}

/// Compute placement for rotating-parity striping.
///
/// `groups` partitions `device_count` into equal groups; `parity` is the
/// parity count per stripe within a group.
pub fn striped_placement(
    stripe: usize,
    groups: usize,
    parity: usize,
    device_count: usize,
) -> StripePlacement {
    debug_assert!(device_count % groups == 0);
    let n = device_count / groups;
    debug_assert!(parity < n);

    let group = stripe % groups;
    let base = group * n;
    let sg = stripe / groups;

    let parity_slots: Vec<usize> = (0..parity).map(|j| (sg + j) % n).collect();
    let data = (0..n)
        .filter(|slot| !parity_slots.contains(slot))
        .map(|slot| base + slot)
        .collect();
    let parity = parity_slots.into_iter().map(|slot| base + slot).collect();

    StripePlacement { parity, data }
}

/// Devices holding chunk `c` under mirrored stripes (L10): both members of
/// the pair `c mod (N/2)`.
pub fn mirrored_stripe_devices(chunk: usize, device_count: usize) -> [usize; 2] {
    let pair = chunk % (device_count / 2);
    [2 * pair, 2 * pair + 1]
}

/// Devices holding chunk `c` under striped mirrors (L01): the half-stripe
/// slot and its mirror in the second half.
pub fn striped_mirror_devices(chunk: usize, device_count: usize) -> [usize; 2] {
    let half = device_count / 2;
    let slot = chunk % half;
    [slot, slot + half]
}

/// Data disk for a whole file under dedicated-parity placement.
///
/// FNV-1a over the key, mod the data-disk count; the final device is the
/// parity disk and never receives files.
pub fn dedicated_data_disk(key: &str, device_count: usize) -> usize {
    let data_disks = device_count - 1;
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in key.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % data_disks as u64) as usize
}

/// Index of the dedicated parity disk.
pub fn dedicated_parity_disk(device_count: usize) -> usize {
    device_count - 1
}

/// Per-blob redundancy descriptor.
///
/// Created atomically with the blob; together with the surviving devices it
/// is sufficient to reconstruct the blob under the level's fault tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidMetadata {
    /// Level the blob was written at
    pub level: RaidLevel,
    /// Original byte length
    pub total_size: u64,
    /// Number of data chunks
    pub chunk_count: u32,
    /// Stripe size used at write time
    pub stripe_size: u32,
    /// Mirror copies (mirrored levels)
    pub mirror_count: u32,
    /// Parity arithmetic used at write time
    pub parity_algorithm: ParityAlgorithm,
    /// For each device index, the data-chunk indices it holds
    pub device_chunks: Vec<Vec<u32>>,
}

impl RaidMetadata {
    /// Whether any chunk of this blob lives on `device`.
    ///
    /// Parity placement is derivable from the stripe rotation, so this checks
    /// data chunks only for striped levels; rebuild recomputes parity anyway.
    pub fn touches_device(&self, device: usize) -> bool {
        self.device_chunks
            .get(device)
            .is_some_and(|chunks| !chunks.is_empty())
    }

    /// Number of stripes for a given data-slot width.
    pub fn stripe_count(&self, data_slots: usize) -> usize {
        (self.chunk_count as usize).div_ceil(data_slots.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l5_rotation_three_devices() {
        // Stripe 0: P on device 0, data on 1 and 2
        let p = striped_placement(0, 1, 1, 3);
        assert_eq!(p.parity, vec![0]);
        assert_eq!(p.data, vec![1, 2]);

        // Stripe 1 rotates: P on device 1
        let p = striped_placement(1, 1, 1, 3);
        assert_eq!(p.parity, vec![1]);
        assert_eq!(p.data, vec![0, 2]);

        // Stripe 3 wraps around
        let p = striped_placement(3, 1, 1, 3);
        assert_eq!(p.parity, vec![0]);
    }

    #[test]
    fn test_l6_dual_parity_rotation() {
        let p = striped_placement(0, 1, 2, 4);
        assert_eq!(p.parity, vec![0, 1]);
        assert_eq!(p.data, vec![2, 3]);

        // Q wraps past the end of the pool
        let p = striped_placement(3, 1, 2, 4);
        assert_eq!(p.parity, vec![3, 0]);
        assert_eq!(p.data, vec![1, 2]);
    }

    #[test]
    fn test_nested_l50_groups() {
        // Six devices, two L5 groups of three. Even stripes in group 0.
        let p = striped_placement(0, 2, 1, 6);
        assert_eq!(p.parity, vec![0]);
        assert_eq!(p.data, vec![1, 2]);

        // Odd stripes in group 1 (devices 3..6), same rotation phase
        let p = striped_placement(1, 2, 1, 6);
        assert_eq!(p.parity, vec![3]);
        assert_eq!(p.data, vec![4, 5]);

        // Stripe 2 is the second stripe of group 0 and rotates within it
        let p = striped_placement(2, 2, 1, 6);
        assert_eq!(p.parity, vec![1]);
        assert_eq!(p.data, vec![0, 2]);
    }

    #[test]
    fn test_mirrored_pairs() {
        assert_eq!(mirrored_stripe_devices(0, 4), [0, 1]);
        assert_eq!(mirrored_stripe_devices(1, 4), [2, 3]);
        assert_eq!(mirrored_stripe_devices(2, 4), [0, 1]);

        assert_eq!(striped_mirror_devices(0, 4), [0, 2]);
        assert_eq!(striped_mirror_devices(1, 4), [1, 3]);
        assert_eq!(striped_mirror_devices(2, 4), [0, 2]);
    }

    #[test]
    fn test_dedicated_parity_placement() {
        // Deterministic, stays off the parity disk
        let n = 4;
        for key in ["a", "b", "some/longer/path.bin"] {
            let disk = dedicated_data_disk(key, n);
            assert!(disk < n - 1);
            assert_eq!(disk, dedicated_data_disk(key, n));
        }
        assert_eq!(dedicated_parity_disk(4), 3);
    }

    #[test]
    fn test_metadata_touches_device() {
        let meta = RaidMetadata {
            level: RaidLevel::L5,
            total_size: 8,
            chunk_count: 2,
            stripe_size: 4,
            mirror_count: 2,
            parity_algorithm: ParityAlgorithm::ReedSolomon,
            device_chunks: vec![vec![], vec![0], vec![1]],
        };
        assert!(!meta.touches_device(0));
        assert!(meta.touches_device(1));
        assert!(meta.touches_device(2));
        assert!(!meta.touches_device(9));
        assert_eq!(meta.stripe_count(2), 1);
    }
}
