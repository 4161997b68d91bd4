//! Append-only audit trail.
//!
//! Every accepted command, approval resolution and processed callback is
//! written here. An append that fails is fatal to the action that caused
//! it: callers propagate [`ControlError::Audit`](crate::ControlError::Audit)
//! rather than reporting success.

mod memory;
mod postgres;

pub use memory::MemoryAuditLog;
pub use postgres::PostgresAuditLog;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::AuditEntry;

/// Backend for the audit trail.
///
/// Implementations must accept concurrent appends. Entries are never
/// updated or deleted.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry.
    ///
    /// Failures are reported as `ControlError::Audit`.
    async fn append(&self, entry: AuditEntry) -> ControlResult<()>;

    /// Entries for an app, newest first, at most `limit` of them.
    async fn history(&self, app: &str, limit: usize) -> ControlResult<Vec<AuditEntry>>;
}
