//! kubewatch
//!
//! Watches Kubernetes resources and forwards every add, update and delete to
//! a notification handler (a webhook, or the log):
//! - Pods, Services, ReplicationControllers, Deployments, Jobs and
//!   PersistentVolumes, each selectable in the config file
//! - A startup list reports every existing object as added, then changes are
//!   streamed and periodically reconciled against a full re-list
//!
//! Liveness, readiness and Prometheus metrics are served on `healthPort`.

mod config;
mod controller;
mod error;
mod handlers;
mod health;

#[cfg(test)]
mod controller_test;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("kubewatch failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ControllerError> {
    // kube and reqwest both link rustls; pick one crypto provider for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting kubewatch");

    let config = Config::load()?;
    let kinds: Vec<String> = config.enabled_kinds().iter().map(ToString::to_string).collect();
    info!("Configuration:");
    info!("  Resources: {}", kinds.join(", "));
    info!("  Handler: {}", config.webhook_url().unwrap_or("log"));
    info!("  Resync period: {}s", config.resync_seconds);
    info!("  Health port: {}", config.health_port);

    let controller = Controller::new(config).await?;
    controller.run().await
}
