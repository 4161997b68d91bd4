//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api;
use crate::approval::ApprovalGate;
use crate::audit::{AuditLog, MemoryAuditLog, PostgresAuditLog};
use crate::clients::{create_build_client, create_release_client};
use crate::config::{AuditBackend, ControlConfig};
use crate::error::{ControlError, ControlResult};
use crate::orchestrator::Orchestrator;
use crate::store::MemoryStore;

/// The control service.
///
/// Manages the lifecycle of the orchestration engine, including:
/// - The audit log connection
/// - Build and release clients
/// - The approval gate and its expiry listener
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service.
    ///
    /// This will:
    /// 1. Open the audit log (falling back to memory if PostgreSQL is unreachable)
    /// 2. Create the build and release clients
    /// 3. Create the approval gate and start listening for expiries
    /// 4. Start the HTTP API server
    /// 5. Wait for shutdown signal
    pub async fn run(&self) -> ControlResult<()> {
        let audit = self.create_audit_log().await;

        let builds = create_build_client(&self.config.build)?;
        info!(client = ?self.config.build.client, "build client configured");
        let releases = create_release_client(&self.config.release)?;
        info!(client = ?self.config.release.client, "release client configured");

        let (gate, gate_events) = ApprovalGate::with_retention(
            self.config.approval.timeout(),
            self.config.approval.gated_environments.clone(),
            Arc::clone(&audit),
            self.config.approval.retain_resolved,
        );
        info!(
            timeout_secs = self.config.approval.timeout_secs,
            gated = ?self.config.approval.gated_environments,
            "approval gate initialised"
        );

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(MemoryStore::new(self.config.history.page_size)),
            Arc::clone(&gate),
            Arc::clone(&audit),
            builds,
            releases,
            self.config.history.page_size,
        ));

        let listener_cancel = self.cancel.child_token();
        let gate_listener = tokio::spawn(
            Arc::clone(&orchestrator).run_gate_listener(gate_events, listener_cancel.clone()),
        );

        let state = api::AppState {
            orchestrator,
            audit,
            history_limit: self.config.history.page_size,
        };
        let app = api::router(state);

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
        info!(addr = %self.config.server.listen_addr, "control service listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::Config(format!("server error: {e}")));

        gate.shutdown();
        listener_cancel.cancel();
        if let Err(e) = gate_listener.await {
            error!(error = %e, "gate listener task failed");
        }

        served?;
        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn create_audit_log(&self) -> Arc<dyn AuditLog> {
        match self.config.audit.backend {
            AuditBackend::Memory => {
                info!("using in-memory audit log");
                Arc::new(MemoryAuditLog::new())
            }
            AuditBackend::Postgres => {
                let db = &self.config.database;
                match PostgresAuditLog::new(&db.url, db.max_connections).await {
                    Ok(log) => {
                        info!(url = %db.url, "connected to PostgreSQL");
                        Arc::new(log)
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            "failed to connect to PostgreSQL, using in-memory audit log"
                        );
                        Arc::new(MemoryAuditLog::new())
                    }
                }
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn memory_config() -> ControlConfig {
        let mut config = ControlConfig::default();
        config.audit.backend = AuditBackend::Memory;
        config.server.listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        config
    }

    #[test]
    fn service_shutdown() {
        let service = ControlService::new(ControlConfig::default());
        assert!(!service.cancel.is_cancelled());
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn memory_backend_skips_database() {
        let service = ControlService::new(memory_config());
        let audit = service.create_audit_log().await;
        assert!(audit.history("myapp", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let service = Arc::new(ControlService::new(memory_config()));
        let runner = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run().await })
        };

        service.shutdown();
        runner.await.unwrap().unwrap();
    }
}
