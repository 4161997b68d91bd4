//! Gantry orchestration engine
//!
//! This crate turns chat commands, build system callbacks and approver
//! decisions into build submissions and deployments, and records every
//! action in an audit log.
//!
//! # Architecture
//!
//! - **Orchestrator**: the single entry point for every [`ControlEvent`]
//!   and the only caller of the external build and release clients
//! - **Approval gate**: at most one pending request per gated
//!   app/environment, expired by a timer
//! - **Correlation store**: matches callbacks to the builds and
//!   deployments that caused them
//! - **Audit log**: append-only record of every command, callback and
//!   decision
//! - **API surface**: HTTP endpoints for the chat adapter, callbacks and
//!   approvers
//!
//! # Approval lifecycle
//!
//! Approval requests follow a state machine enforced at compile time using
//! the typestate pattern:
//!
//! ```text
//! Pending ──▶ Approved
//!    │
//!    ├──────▶ Rejected
//!    │
//!    └──────▶ Expired
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use gantry_command::Environment;
//! use gantry_control::{
//!     ApprovalGate, MemoryAuditLog, MemoryStore, MockBuildClient, MockReleaseClient,
//!     Orchestrator,
//! };
//!
//! let audit = Arc::new(MemoryAuditLog::new());
//! let (gate, _expiries) = ApprovalGate::new(
//!     Duration::from_secs(1800),
//!     vec![Environment::Uat, Environment::Production],
//!     audit.clone(),
//! );
//! let orchestrator = Orchestrator::new(
//!     Arc::new(MemoryStore::default()),
//!     gate,
//!     audit,
//!     Arc::new(MockBuildClient::default()),
//!     Arc::new(MockReleaseClient::new()),
//!     10,
//! );
//!
//! let reply = orchestrator.handle_message("deploy myapp 42 prod", "alice").await?;
//! println!("{reply}");
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod api;
pub mod approval;
pub mod audit;
pub mod clients;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use approval::state::{Approval, ApprovalPhase, Approved, Expired, Pending, Rejected};
pub use approval::{ApprovalGate, GateEvent};
pub use audit::{AuditLog, MemoryAuditLog, PostgresAuditLog};
pub use clients::{
    BuildClient, JenkinsClient, MockBuildClient, MockReleaseClient, OctopusClient, ReleaseClient,
    ReleaseStatus,
};
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use orchestrator::{ControlEvent, EventOutcome, Orchestrator, Reply};
pub use service::ControlService;
pub use store::{CorrelationStore, MemoryStore, Transition};
pub use types::{
    ApprovalAction, ApprovalId, ApprovalRequest, ApprovalState, AuditEntry, AuditOutcome,
    BuildRequest, BuildStatus, Decision, DeploymentRecord, DeploymentStatus, ExternalBuildId,
    ExternalDeploymentId,
};
