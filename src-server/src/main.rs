mod events;

use std::error::Error;
use std::sync::Arc;

use filevert::config::{self, Config};
use filevert::{
    sweep_interrupted, ApiState, CloudConvertClient, ConversionService, Database,
    JobEventBroadcaster, JobStore,
};
use log::{info, warn};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Config file location when no path is passed on the command line.
const ENV_CONFIG: &str = "FILEVERT_CONFIG";
const ENV_LOG_FORMAT: &str = "FILEVERT_LOG_FORMAT";

fn init_logging() -> Result<(), Box<dyn Error>> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn load_config() -> Result<Config, Box<dyn Error>> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG).ok().filter(|p| !p.trim().is_empty()));

    let config = match path {
        Some(path) => config::load_config(path)?,
        None => {
            info!("No config file given, using defaults and environment");
            config::load_config_from_env()?
        }
    };
    Ok(config)
}

/// Opens storage, recovers interrupted jobs and wires the service.
fn build_service(config: &Config) -> filevert::Result<(ConversionService, JobEventBroadcaster)> {
    let db = Database::open(&config::database_path(config)?)?;
    let events = JobEventBroadcaster::default();
    let jobs = JobStore::with_broadcaster(db.clone(), events.clone());

    if config.recovery.sweep_on_startup {
        let swept = sweep_interrupted(&jobs)?;
        if swept > 0 {
            warn!("Marked {} interrupted conversion job(s) as failed", swept);
        }
    }

    let blobs = config::blob_store(config)?;
    let provider = Arc::new(CloudConvertClient::new(config::provider_config(config)?)?);

    let service = ConversionService::new(db, jobs, blobs, provider, config.orchestrator.to_runtime())
        .with_max_upload_bytes(config.files.max_upload_bytes);
    Ok((service, events))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_logging()?;

    info!("Starting filevert server v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let (service, events) = build_service(&config)?;

    let bridge = events::start_event_bridge(&events);

    let app = filevert::router(ApiState::new(service, &config.api.owner_header));
    let listener = TcpListener::bind(&config.server.bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bridge.abort();
    info!("filevert server stopped");
    Ok(())
}
