//! Redundancy engine configuration
//!
//! Levels are accepted only when they reduce to the implemented primitives:
//! striping with 0–3 rotating parity chunks (optionally nested in groups),
//! N-way mirroring, mirrored/striped pairs, or dedicated-parity placement.
//! Validation runs at construction and rejects insufficient device counts
//! with `InvalidConfiguration`.

use serde::{Deserialize, Serialize};
use silo_core::{Error, Result};
use std::time::Duration;

/// Default stripe size (64 KiB).
pub const DEFAULT_STRIPE_SIZE: usize = 64 * 1024;

/// Supported RAID levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaidLevel {
    /// Striping, no redundancy (≥2 devices)
    L0,
    /// N-way mirror (≥2 devices)
    L1,
    /// Rotating single parity (≥3 devices)
    L5,
    /// Rotating dual parity P+Q (≥4 devices)
    L6,
    /// Mirrored stripes: adjacent device pairs (≥4, even)
    L10,
    /// Striped mirrors: two mirrored halves (≥4, even)
    L01,
    /// Two nested L5 groups (≥6, even, each half ≥3)
    L50,
    /// Two nested L6 groups (≥8, even, each half ≥4)
    L60,
    /// Z-family single parity; reduces to the L5 rotation (≥3)
    Z1,
    /// Z-family dual parity; reduces to the L6 rotation (≥4)
    Z2,
    /// Z-family triple parity rotation (≥4)
    Z3,
    /// One file lands on one device; dedicated parity disk (≥2)
    Unraid,
}

/// The primitive a level reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Rotating-parity striping, possibly nested in equal groups.
    Striped {
        /// Number of independent parity groups (1 = flat)
        groups: usize,
        /// Parity chunks per stripe within a group
        parity: usize,
    },
    /// Every chunk written to `copies` devices.
    Mirror {
        /// Number of copies
        copies: usize,
    },
    /// Stripe across adjacent device pairs, each pair mirrored.
    MirroredStripes,
    /// Stripe across the first half, mirrored onto the second half.
    StripedMirrors,
    /// Whole files on one data disk, XOR parity on the last disk.
    DedicatedParity,
}

/// Parity arithmetic selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParityAlgorithm {
    /// XOR-only; sufficient for single parity
    Xor,
    /// GF(2⁸) Reed-Solomon; required for dual and triple parity
    #[default]
    ReedSolomon,
}

/// Priority of background rebuilds relative to foreground I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum RebuildPriority {
    /// Yield frequently to foreground reads
    Low,
    /// Balanced
    #[default]
    Normal,
    /// Rebuild as fast as the devices allow
    High,
}

/// Redundancy engine configuration.
#[derive(Debug, Clone)]
pub struct RaidConfig {
    /// Configured level
    pub level: RaidLevel,
    /// Number of pool members the engine addresses
    pub device_count: usize,
    /// Chunk size used for striping
    pub stripe_size: usize,
    /// Copies for mirrored levels (defaults to `device_count` for L1)
    pub mirror_count: usize,
    /// Parity arithmetic
    pub parity_algorithm: ParityAlgorithm,
    /// Rebuild scheduling priority
    pub rebuild_priority: RebuildPriority,
    /// Health probe interval; zero disables the monitor
    pub health_check_interval: Duration,
    /// Start a rebuild automatically when a device is marked failed
    pub auto_rebuild: bool,
}

impl RaidConfig {
    /// Create a configuration with defaults for the given level and pool size.
    pub fn new(level: RaidLevel, device_count: usize) -> Self {
        let mirror_count = match level {
            RaidLevel::L1 => device_count,
            _ => 2,
        };
        Self {
            level,
            device_count,
            stripe_size: DEFAULT_STRIPE_SIZE,
            mirror_count,
            parity_algorithm: ParityAlgorithm::default(),
            rebuild_priority: RebuildPriority::default(),
            health_check_interval: Duration::from_secs(30),
            auto_rebuild: true,
        }
    }

    /// Set the stripe size.
    pub fn stripe_size(mut self, size: usize) -> Self {
        self.stripe_size = size;
        self
    }

    /// Set the mirror count (L1 only).
    pub fn mirror_count(mut self, count: usize) -> Self {
        self.mirror_count = count;
        self
    }

    /// Set the parity algorithm.
    pub fn parity_algorithm(mut self, alg: ParityAlgorithm) -> Self {
        self.parity_algorithm = alg;
        self
    }

    /// Set the health probe interval; zero disables the monitor.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Enable or disable automatic rebuild.
    pub fn auto_rebuild(mut self, enabled: bool) -> Self {
        self.auto_rebuild = enabled;
        self
    }

    /// Reduce the level to its primitive layout.
    pub fn layout(&self) -> Layout {
        match self.level {
            RaidLevel::L0 => Layout::Striped {
                groups: 1,
                parity: 0,
            },
            RaidLevel::L5 | RaidLevel::Z1 => Layout::Striped {
                groups: 1,
                parity: 1,
            },
            RaidLevel::L6 | RaidLevel::Z2 => Layout::Striped {
                groups: 1,
                parity: 2,
            },
            RaidLevel::Z3 => Layout::Striped {
                groups: 1,
                parity: 3,
            },
            RaidLevel::L50 => Layout::Striped {
                groups: 2,
                parity: 1,
            },
            RaidLevel::L60 => Layout::Striped {
                groups: 2,
                parity: 2,
            },
            RaidLevel::L1 => Layout::Mirror {
                copies: self.mirror_count,
            },
            RaidLevel::L10 => Layout::MirroredStripes,
            RaidLevel::L01 => Layout::StripedMirrors,
            RaidLevel::Unraid => Layout::DedicatedParity,
        }
    }

    /// Per-read fault tolerance of the configured level.
    ///
    /// For nested and paired levels this is the tolerance within one parity
    /// group or mirror pair, which is how failures are counted on the read
    /// path.
    pub fn fault_tolerance(&self) -> usize {
        match self.layout() {
            Layout::Striped { parity, .. } => parity,
            Layout::Mirror { copies } => copies - 1,
            Layout::MirroredStripes | Layout::StripedMirrors => 1,
            Layout::DedicatedParity => 1,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` when the device count is below the level's
    /// minimum, nesting does not divide evenly, or the parity algorithm
    /// cannot express the level's parity count.
    pub fn validate(&self) -> Result<()> {
        let n = self.device_count;
        let fail = |msg: String| Err(Error::InvalidConfiguration(msg));

        match self.level {
            RaidLevel::L0 | RaidLevel::L1 if n < 2 => {
                return fail(format!("{:?} requires at least 2 devices, got {n}", self.level));
            }
            RaidLevel::L5 | RaidLevel::Z1 if n < 3 => {
                return fail(format!("{:?} requires at least 3 devices, got {n}", self.level));
            }
            RaidLevel::L6 | RaidLevel::Z2 | RaidLevel::Z3 if n < 4 => {
                return fail(format!("{:?} requires at least 4 devices, got {n}", self.level));
            }
            RaidLevel::L10 | RaidLevel::L01 => {
                if n < 4 || n % 2 != 0 {
                    return fail(format!(
                        "{:?} requires an even device count of at least 4, got {n}",
                        self.level
                    ));
                }
            }
            RaidLevel::L50 => {
                if n < 6 || n % 2 != 0 {
                    return fail(format!("L50 requires an even device count of at least 6, got {n}"));
                }
            }
            RaidLevel::L60 => {
                if n < 8 || n % 2 != 0 {
                    return fail(format!("L60 requires an even device count of at least 8, got {n}"));
                }
            }
            RaidLevel::Unraid if n < 2 => {
                return fail(format!("Unraid requires at least 2 devices, got {n}"));
            }
            _ => {}
        }

        if self.stripe_size == 0 {
            return fail("stripe_size must be nonzero".into());
        }

        if let Layout::Mirror { copies } = self.layout() {
            if copies < 2 || copies > n {
                return fail(format!(
                    "mirror_count must be between 2 and device_count, got {copies}"
                ));
            }
        }

        if let Layout::Striped { parity, .. } = self.layout() {
            if parity >= 2 && self.parity_algorithm == ParityAlgorithm::Xor {
                return fail(format!(
                    "{:?} needs Reed-Solomon parity; XOR can express only single parity",
                    self.level
                ));
            }
        }

        Ok(())
    }
}
