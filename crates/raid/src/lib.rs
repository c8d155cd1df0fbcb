//! Redundancy engine for Silo
//!
//! This crate implements the striping/parity RAID core:
//! - RaidConfig / RaidLevel: level selection and validation
//! - gf256: GF(2⁸) arithmetic for Reed-Solomon parity (polynomial 0x11B)
//! - layout: stripe rotation, mirror pairing, dedicated-parity placement
//! - RaidEngine: store/load/delete with transparent erasure recovery
//! - HealthTable / HealthMonitor: probe-driven device state machine
//! - rebuild: cancellable single-flight reconstruction of a lost device
//!
//! Supported levels: L0, L1, L5, L6, L10, L01, L50, L60, Z1/Z2/Z3 (as parity
//! rotations) and Unraid-style dedicated parity. Anything else must reduce to
//! these primitives or is rejected at configuration time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod gf256;
pub mod health;
pub mod layout;
pub mod rebuild;

pub use config::{
    Layout, ParityAlgorithm, RaidConfig, RaidLevel, RebuildPriority, DEFAULT_STRIPE_SIZE,
};
pub use engine::RaidEngine;
pub use health::{DeviceHealth, HealthMonitor, HealthTable};
pub use layout::RaidMetadata;
pub use rebuild::{rebuild_device, RebuildReport};
