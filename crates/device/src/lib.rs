//! Storage device abstraction for Silo
//!
//! This crate implements the opaque backing-device seam:
//! - StorageDevice: the five-operation trait every backend implements
//! - MemoryDevice: volatile DashMap-backed device with fault injection
//! - FileDevice: local-filesystem device with xxh3 checksum verification
//! - DevicePool: indexed device group with per-call deadlines
//!
//! The redundancy engine addresses pool members by small integer index and
//! never sees a concrete device type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod file;
pub mod memory;
pub mod pool;

pub use device::StorageDevice;
pub use file::FileDevice;
pub use memory::MemoryDevice;
pub use pool::{validate_external_target, DevicePool, DEFAULT_DEVICE_DEADLINE};
