/**
 * PRINTHUB KERNEL - Entry point of the ingestion daemon
 *
 * ROLE : Bootstraps config, the telemetry normalizer, one MQTT session per
 * printer, the event forwarder and the health publisher.
 *
 * ARCHITECTURE : Printer MQTT reports -> TelemetryNormalizer -> status events
 * -> log + optional forward broker.
 */

mod config;
mod forward;
mod health;
mod mqtt;

use crate::config::load_config;
use crate::health::HealthTracker;
use anyhow::Context;
use printhub_telemetry::TelemetryNormalizer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("printhub=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = load_config().await;
    let normalizer = Arc::new(
        TelemetryNormalizer::new(cfg.normalizer.clone()).context("invalid normalizer configuration")?,
    );

    let health = HealthTracker::new(cfg.printers.iter().map(|p| p.printer_id()));

    let (_subscription, events) = normalizer.events().channel();
    forward::spawn_event_forwarder(events, cfg.forward.clone(), health.clone());
    health.spawn_health_publisher(cfg.forward.clone(), Duration::from_secs(cfg.health_interval_secs));

    if cfg.printers.is_empty() {
        warn!("no printers configured, nothing to ingest");
    }
    for printer in cfg.printers {
        let printer_id = printer.printer_id().to_string();
        match mqtt::spawn_printer_session(printer, Arc::clone(&normalizer), health.clone()) {
            Ok(_) => info!(%printer_id, "printer session started"),
            Err(e) => error!(%printer_id, "failed to start printer session: {e:#}"),
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!(printers = ?normalizer.printers(), "shutting down");
    Ok(())
}
