//! view_config server
//!
//! Serves the REST API over a Sled database.
//!
//! Usage:
//!   cargo run --bin load_data     # seed a default environment and sample views
//!   cargo run --bin view_config   # start the server (see .env for settings)

use tokio::net::TcpListener;
use tracing::info;

use view_config::config::ServerConfig;
use view_config::rest::{create_router, AppState};
use view_config::storage::Storage;
use view_config::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env();
    // Dropping the guard stops the file writer; keep it for the whole run
    let _log_guard = telemetry::init(&config);

    info!("Starting view_config v{}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.http_addr,
        data_dir = %config.data_dir.display(),
        source_configured = config.source_api_url.is_some(),
        "Loaded configuration"
    );

    let storage = Storage::open(&config.data_dir_str())?;
    let http_addr = config.http_addr;
    let app = create_router(AppState::new(storage.clone(), config));

    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP API listening (Swagger UI at /swagger-ui)");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    storage.flush().await?;
    info!("Storage flushed, bye");
    Ok(())
}
