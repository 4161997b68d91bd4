//! Gantry control service binary.
//!
//! Runs the orchestration engine and its HTTP API.

use tracing::info;
use tracing_subscriber::EnvFilter;

use gantry_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("gantry_control=info".parse()?),
        )
        .init();

    info!("gantry control service starting");

    let config = ControlConfig::load()?;

    info!(
        listen_addr = %config.server.listen_addr,
        audit = ?config.audit.backend,
        build_client = ?config.build.client,
        release_client = ?config.release.client,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
