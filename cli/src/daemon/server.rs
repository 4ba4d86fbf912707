// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service wiring: repositories, bus, publisher, facades and the inbound
//! identity consumer, kept alive until a shutdown signal arrives.
//!
//! Events travel over [`InMemoryMessageBus`]; nothing outside this process
//! can publish to or read from its topics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aegis_identity_core::application::context::OperationSettings;
use aegis_identity_core::application::identity_subscriber::{IdentityEventHandler, IDENTITY_CREATED_EVENT};
use aegis_identity_core::application::publisher::{EventPublisher, PublisherSettings};
use aegis_identity_core::application::repository_factory::create_repositories;
use aegis_identity_core::application::services::IdentityServices;
use aegis_identity_core::domain::identity_config::IdentityConfigManifest;
use aegis_identity_core::infrastructure::event_bus::InMemoryMessageBus;
use aegis_identity_core::infrastructure::event_consumer::EventConsumer;

/// Outbound events still queued get this long to flush on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn start_daemon(config_path: Option<PathBuf>) -> Result<()> {
    let config = IdentityConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    let spec = &config.spec;

    if spec.metrics.enabled {
        install_metrics_exporter(spec.metrics.port)?;
    }

    let repos = create_repositories(&config.storage_backend()).await?;

    let bus = Arc::new(InMemoryMessageBus::new(spec.events.bus_capacity));
    let (publisher, publisher_worker) =
        EventPublisher::start(bus.clone(), PublisherSettings::from(&spec.events));
    let services = IdentityServices::new(
        &repos,
        publisher,
        OperationSettings::from(&spec.operations),
    );

    let mut consumer = EventConsumer::new(bus.clone());
    consumer.register(
        spec.events.auth_topic.clone(),
        IDENTITY_CREATED_EVENT,
        Arc::new(IdentityEventHandler::new(
            repos.users.clone(),
            services.users.clone(),
        )),
    );

    let cancel = CancellationToken::new();
    let consumers = consumer
        .start(cancel.clone())
        .await
        .context("Failed to subscribe to inbound topics")?;

    info!(
        instance = %config.metadata.name,
        auth_topic = %spec.events.auth_topic,
        "AEGIS identity service started"
    );
    warn!(
        auth_topic = %spec.events.auth_topic,
        user_topic = %spec.events.user_topic,
        team_topic = %spec.events.team_topic,
        "Events use the in-process bus only; no external broker is connected"
    );

    shutdown_signal().await;

    info!("Shutting down");
    cancel.cancel();
    for handle in consumers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Consumer task ended abnormally");
        }
    }

    // The worker exits once the last publisher handle is gone and the
    // queue is empty.
    drop(services);
    match tokio::time::timeout(DRAIN_TIMEOUT, publisher_worker).await {
        Ok(_) => info!("Event publisher drained"),
        Err(_) => warn!("Event publisher did not drain in time; queued events were dropped"),
    }

    Ok(())
}

fn install_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
