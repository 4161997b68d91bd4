//! Test fixtures for gantry-control integration tests.

use gantry_command::BuildNumber;
use gantry_control::{AuditEntry, AuditOutcome, DeploymentRecord, Reply};

/// A build number that is known to be valid.
pub fn build(n: u64) -> BuildNumber {
    BuildNumber::new(n).unwrap()
}

/// Entries with the given action, oldest first.
pub fn entries_for<'a>(entries: &'a [AuditEntry], action: &str) -> Vec<&'a AuditEntry> {
    entries.iter().filter(|e| e.action == action).collect()
}

/// Outcomes of every entry, oldest first.
pub fn outcomes(entries: &[AuditEntry]) -> Vec<(String, AuditOutcome)> {
    entries
        .iter()
        .map(|e| (e.action.clone(), e.outcome))
        .collect()
}

/// The record of a dispatched deployment, panicking on any other reply.
pub fn triggered(reply: Reply) -> DeploymentRecord {
    match reply {
        Reply::DeploymentTriggered { deployment } => deployment,
        other => panic!("expected a dispatched deployment, got {other:?}"),
    }
}
