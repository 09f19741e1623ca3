//! canopyd — Canopy mesh topology daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};

use canopy_core::clock::{Clock, MonotonicClock};
use canopy_core::config::CanopyConfig;
use canopy_services::{DiscoveryEngine, DiscoverySettings};

mod link;
mod node;
mod status;

use link::{LinkSettings, UdpLinkTransport};
use node::{NodeLoop, NodeStatus};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CanopyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CanopyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CanopyConfig::default()
    });

    let interface = match config.network.interface.as_str() {
        "" => std::env::args().nth(1).unwrap_or_else(|| "eth0".to_string()),
        name => name.to_string(),
    };
    tracing::info!(
        interface,
        role = ?config.mesh.role,
        address = %config.mesh.address,
        "canopyd starting"
    );

    let interface_index = link::socket::if_index(&interface)?;
    let settings = DiscoverySettings::from(&config.discovery);
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    // ── Link ─────────────────────────────────────────────────────────────────
    let mut transport = UdpLinkTransport::new(
        LinkSettings::from_config(&config.mesh, settings.timeout_threshold),
        clock.clone(),
    );
    let receiver = transport
        .bind(config.network.port, interface_index)
        .context("failed to bind link transport")?;

    // ── Engine ───────────────────────────────────────────────────────────────
    let mut engine = DiscoveryEngine::new(transport, clock.clone(), settings.timeout_threshold);
    engine
        .start(settings.interval)
        .context("invalid discovery interval")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(NodeStatus::default());

    let receiver_task = tokio::spawn(receiver.run(inbound_tx, shutdown_tx.subscribe()));

    let mut node_task = tokio::spawn(
        NodeLoop::new(engine, inbound_rx, status_tx, shutdown_tx.subscribe()).run(),
    );

    let status_port = config.network.api_port;
    let status_task = {
        let state = status::StatusState {
            role: config.mesh.role,
            address: config.mesh.address,
            status: status_rx,
            clock,
        };
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, status_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            // Let the node loop release the registry.
            let _ = (&mut node_task).await;
        }
        r = receiver_task       => tracing::error!("link receiver exited: {:?}", r),
        r = &mut node_task      => tracing::error!("node loop exited: {:?}", r),
        r = status_task         => tracing::error!("status server exited: {:?}", r),
    }

    Ok(())
}
