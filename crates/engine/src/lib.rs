//! Warehouse engine for Silo
//!
//! This crate orchestrates all lower layers:
//! - Warehouse: the authenticated store/fetch/delete pipeline, container
//!   management, snapshot/restore/backup entry points, composite health
//! - WarehouseConfig: one configuration record for the whole instance
//! - Supervisor: owns background tasks, shuts down in reverse start order
//!
//! The engine is the only component that knows about cross-layer
//! coordination: auth → ACL → redundancy → index → audit → metrics.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod supervisor;
pub mod warehouse;

pub use config::WarehouseConfig;
pub use supervisor::Supervisor;
pub use warehouse::Warehouse;
