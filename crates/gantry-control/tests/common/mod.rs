//! Common test utilities for gantry-control integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use gantry_command::Environment;
use gantry_control::{
    api::AppState, ApprovalGate, AuditEntry, ControlResult, MemoryAuditLog, MemoryStore,
    MockBuildClient, MockReleaseClient, Orchestrator, Reply,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// First build number handed out by the mock build system.
pub const FIRST_BUILD: u64 = 42;

/// Approval timeout used by every harness.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Complete engine setup with in-memory backends and mock clients.
pub struct TestControl {
    pub audit: Arc<MemoryAuditLog>,
    pub store: Arc<MemoryStore>,
    pub builds: Arc<MockBuildClient>,
    pub releases: Arc<MockReleaseClient>,
    pub gate: Arc<ApprovalGate>,
    pub orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl TestControl {
    /// Creates a harness gating UAT and production.
    pub fn new() -> Self {
        Self::with_gated(vec![Environment::Uat, Environment::Production])
    }

    /// Creates a harness gating the given environments.
    pub fn with_gated(gated: Vec<Environment>) -> Self {
        let audit = Arc::new(MemoryAuditLog::new());
        let store = Arc::new(MemoryStore::default());
        let builds = Arc::new(MockBuildClient::starting_at(FIRST_BUILD));
        let releases = Arc::new(MockReleaseClient::new());

        let (gate, events) = ApprovalGate::new(APPROVAL_TIMEOUT, gated, audit.clone());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::clone(&gate),
            audit.clone(),
            builds.clone(),
            releases.clone(),
            10,
        ));

        let cancel = CancellationToken::new();
        let listener = tokio::spawn(
            Arc::clone(&orchestrator).run_gate_listener(events, cancel.clone()),
        );

        Self {
            audit,
            store,
            builds,
            releases,
            gate,
            orchestrator,
            cancel,
            listener: Some(listener),
        }
    }

    /// HTTP state sharing this harness's engine.
    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: Arc::clone(&self.orchestrator),
            audit: self.audit.clone(),
            history_limit: 10,
        }
    }

    /// Send a chat line as `actor`.
    pub async fn say(&self, actor: &str, text: &str) -> ControlResult<Reply> {
        self.orchestrator.handle_message(text, actor).await
    }

    /// Every audit entry so far, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.entries().unwrap()
    }

    /// Stop the expiry listener and wait for it.
    pub async fn stop(mut self) {
        self.gate.shutdown();
        self.cancel.cancel();
        if let Some(listener) = self.listener.take() {
            listener.await.unwrap();
        }
    }
}

impl Drop for TestControl {
    fn drop(&mut self) {
        self.gate.shutdown();
        self.cancel.cancel();
    }
}
