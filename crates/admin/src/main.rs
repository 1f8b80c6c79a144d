mod api;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use api::{admin_router, AdminState};
use axum::Router;
use channel::{EventSink, RemoteSender};
use common::{config_path_from_env, resolve_path};
use library::{Library, LoftyReader};
use parking_lot::RwLock;
use serde::Deserialize;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The admin's view of the controller's `config.yaml`; other keys are ignored.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct AdminConfig {
    audio_root: String,
    broker_addr: String,
    broker_key: String,
    admin_addr: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            audio_root: "audio".to_string(),
            broker_addr: "127.0.0.1:50000".to_string(),
            broker_key: "tagbox".to_string(),
            admin_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

fn load_config(path: &Path) -> Result<AdminConfig, Box<dyn std::error::Error>> {
    if !path.exists() {
        warn!("No config at {:?}, using defaults", path);
        return Ok(AdminConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let config = load_config(&config_path)?;
    info!("Loaded config from {:?}", config_path);

    let audio_root = resolve_path(&config_path, &config.audio_root);
    let library = Library::load(audio_root, Arc::new(LoftyReader))?;

    let events: Option<Arc<dyn EventSink>> =
        match RemoteSender::connect(config.broker_addr.as_str(), &config.broker_key).await {
            Ok(remote) => {
                info!("Connected to controller at {}", config.broker_addr);
                Some(Arc::new(remote))
            }
            Err(err) => {
                warn!(
                    "Controller at {} not reachable, commands disabled: {}",
                    config.broker_addr, err
                );
                None
            }
        };

    let state = AdminState {
        library: Arc::new(RwLock::new(library)),
        events,
    };
    let app = Router::new()
        .merge(admin_router(state))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.admin_addr).await?;
    info!("Listening on {}", config.admin_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", err);
    }
    info!("Shutdown signal received.");
}
