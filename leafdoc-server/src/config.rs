use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use leafdoc_core::recommend::{GeminiRecommender, Recommender, DEFAULT_GEMINI_MODEL};

use crate::app::Settings;

/// Plant disease detection API
#[derive(Parser, Debug, Clone)]
#[command(name = "leafdoc-server", version, about)]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Path to the bincode model bundle
    #[arg(long = "model", env = "MODEL_PATH", default_value = "./train-data/model.bin")]
    pub model_path: PathBuf,

    /// Number of predictions returned per image
    #[arg(long, env = "TOP_K", default_value_t = 3)]
    pub top_k: usize,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Enables generated treatment advice when set
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    /// Seconds to wait for advice before answering without it
    #[arg(long, env = "RECOMMENDATION_TIMEOUT_SECS", default_value_t = 10)]
    pub recommendation_timeout_secs: u64,
}

impl Config {
    pub fn settings(&self) -> Settings {
        Settings {
            top_k: self.top_k.max(1),
            max_upload_bytes: self.max_upload_bytes,
            recommendation_timeout: Duration::from_secs(self.recommendation_timeout_secs),
        }
    }

    pub fn recommender(&self) -> Option<Arc<dyn Recommender>> {
        let api_key = self.gemini_api_key.clone().filter(|key| !key.trim().is_empty())?;
        let recommender = GeminiRecommender::builder()
            .api_key(api_key)
            .model(self.gemini_model.clone())
            .build();
        Some(Arc::new(recommender))
    }
}
