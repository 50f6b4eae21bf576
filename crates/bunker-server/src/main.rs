//! Bunker multiplayer game server.

use anyhow::Context;
use bunker_core::CardCatalog;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod protocol;
mod room;
mod server;
mod timers;

use server::ServerState;

/// Load the card catalog named by `BUNKER_CATALOG`, if any
fn load_catalog() -> anyhow::Result<CardCatalog> {
    let Ok(path) = std::env::var("BUNKER_CATALOG") else {
        warn!("BUNKER_CATALOG not set, sessions will deal placeholder cards");
        return Ok(CardCatalog::new());
    };
    let json = std::fs::read_to_string(&path).with_context(|| format!("reading catalog {path}"))?;
    let catalog = CardCatalog::from_json(&json).with_context(|| format!("parsing catalog {path}"))?;
    info!(path = %path, cards = catalog.total_cards(), "catalog loaded");
    Ok(catalog)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse address from env or use default
    let addr: SocketAddr = std::env::var("SERVER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    info!("Starting Bunker server...");

    let state = Arc::new(ServerState::new(load_catalog()?));

    server::run_server(addr, state).await
}
