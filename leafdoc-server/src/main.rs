use std::path::PathBuf;

use app::AppState;
use clap::Parser;
use config::Config;
use leafdoc_core::{classifier::ModelHandle, model::ModelBundle};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

pub mod app;
pub mod config;
pub mod error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        tracing::warn!("Logger already initialized: {err}");
    };

    let model = ModelHandle::empty();
    load_model(model.clone(), config.model_path.clone());

    let recommender = config.recommender();
    if recommender.is_none() {
        tracing::info!("GEMINI_API_KEY not set, recommendations disabled");
    }

    let app = app::router(AppState {
        model,
        recommender,
        settings: config.settings(),
    });
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Application shutting down...");

    Ok(())
}

/// Loads the model off the async runtime. Until it is installed the API
/// answers model-dependent routes with 503; a failed load is recorded on the
/// handle so those answers and `/health` say why.
fn load_model(handle: ModelHandle, path: PathBuf) {
    tokio::task::spawn_blocking(move || {
        tracing::info!("Loading model from {}...", path.display());
        match ModelBundle::from_pretrained().path(path).call() {
            Ok(bundle) => {
                handle.install(bundle);
            }
            Err(err) => {
                tracing::error!("Failed to load model: {err:#}");
                handle.fail(err.to_string());
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
