use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver_media::{HttpBucket, MediaBucket, MemoryBucket};
use palaver_server::api::{self, AppState};
use palaver_server::config::ServerConfig;
use palaver_server::presence::PresenceRegistry;
use palaver_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting Palaver server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let mut db = Database::open_at(&config.db_path)?;
    db.set_edit_window(config.edit_window);

    let bucket: Arc<dyn MediaBucket> = match &config.bucket_url {
        Some(url) => Arc::new(HttpBucket::new(url.clone())),
        None => {
            info!("No BUCKET_URL configured, storing media in process memory");
            Arc::new(MemoryBucket::new())
        }
    };

    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        presence: PresenceRegistry::new(),
        bucket,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
