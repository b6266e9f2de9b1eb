//! Luciole : serveur de partage musical DAAP pour le réseau local.
//!
//! Assemble les briques : configuration, catalogue persistant, répondeur
//! mDNS et surface HTTP/DAAP, puis sert jusqu'à Ctrl+C.

use anyhow::Context;
use lucconfig::get_config;
use lucdaap::{DaapConfig, DaapState};
use lucmdns::Responder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ========== Phase 1 : configuration et catalogue ==========
    let config = get_config();
    let port = config.get_http_port();
    let server_name = config.get_server_name();

    info!("🎵 Opening catalog...");
    let catalog = luccatalog::Catalog::open(config.get_db_path(), false)
        .context("Failed to open catalog")?;

    let daap_config = DaapConfig {
        server_name: server_name.clone(),
        password: config.get_password(),
        transcode_codecs: config.get_transcode_codecs().into_iter().collect(),
        transcode_command: config.get_transcode_command(),
        art_filename: config.get_art_filename(),
    };
    let state = Arc::new(DaapState::new(catalog, daap_config));

    // ========== Phase 2 : annonce mDNS ==========
    info!("📡 Starting mDNS responder...");
    let responder = Responder::start(&config.get_mdns_hostname(), None)
        .context("Failed to start mDNS responder")?;
    responder.register_service(&server_name, "_daap._tcp.local", port, &[])?;
    responder.register_service(&server_name, "_http._tcp.local", port, &[])?;

    // ========== Phase 3 : surface HTTP/DAAP ==========
    let app = lucdaap::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, ip = %lucutils::guess_local_ip(), "✅ Luciole serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    responder.shutdown();
    Ok(())
}
