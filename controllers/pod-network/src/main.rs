//! Pod Network Controller
//!
//! Runs the two reconcile loops of the multi-network core:
//! - PodNetwork: computes and persists the `Ready` condition
//! - ResourceClaim: projects the network each bound device resolves to into
//!   the claim status
//!
//! Both read cross-object state from a watch-fed in-memory index.

mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod metrics;
mod server;
mod watcher;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube is built with rustls; pick the provider before the first client
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting Pod Network Controller");

    let config = Config::from_env()?;
    info!(
        metrics_addr = %config.metrics_addr,
        concurrency = config.concurrency,
        backoff_min = ?config.backoff_min,
        backoff_max = ?config.backoff_max,
        "Configuration loaded"
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
