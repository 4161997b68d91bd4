//! In-memory audit log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::AuditEntry;

use super::AuditLog;

/// In-memory audit log for tests and local development.
///
/// Entries are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl MemoryAuditLog {
    /// Create a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All entries in append order.
    pub fn entries(&self) -> ControlResult<Vec<AuditEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::audit("lock poisoned"))?;
        Ok(entries.clone())
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> ControlResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlError::audit("audit log unavailable"));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| ControlError::audit("lock poisoned"))?;
        entries.push(entry);
        Ok(())
    }

    async fn history(&self, app: &str, limit: usize) -> ControlResult<Vec<AuditEntry>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlError::audit("audit log unavailable"));
        }

        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::audit("lock poisoned"))?;

        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.app == app)
            .take(limit)
            .cloned()
            .collect())
    }
}
