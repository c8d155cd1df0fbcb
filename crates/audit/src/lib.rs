//! Audit logging for Silo
//!
//! Append-only event queue with batched durable flush:
//! - AuditEvent: immutable records with category, actor, resource, outcome
//! - AuditLogger: bounded queue, interval + high-water flush, NDJSON files
//!   per UTC date, malformed-line-tolerant queries, statistics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event;
pub mod logger;

pub use event::{AuditCategory, AuditEvent, AuditSeverity};
pub use logger::{
    AuditFlusher, AuditLogger, AuditQuery, AuditStatistics, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_MAX_QUEUE,
};
