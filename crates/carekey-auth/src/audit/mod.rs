//! Tamper-evident audit chain.
//!
//! Each event's digest covers its own PHI-free fields plus the previous
//! event's digest, starting from the `GENESIS` sentinel. Recomputing the
//! digests in order detects any edit, removal or reordering.

pub mod chain;
pub mod event;

pub use chain::{AuditChain, ChainReport};
pub use event::{AuditAction, AuditEvent, AuditEventBuilder, GENESIS, resource_from_path};
