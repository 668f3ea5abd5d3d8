mod config;
mod error;
mod fetcher;
mod identifier;
mod media_api;
mod pipeline;
mod routes;
mod selector;
mod storage;
mod transcoder;

use std::sync::Arc;

use tokio::{net::TcpListener, time::Duration};
use tracing::{info, warn};

use crate::{
    config::{Config, OutputFormat},
    error::ApiError,
    pipeline::Pipeline,
    routes::{AppState, build_router},
    transcoder::FfmpegTranscoder,
};

const CONNECT_TIMEOUT_SECONDS: u64 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "audio_fetch_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env().map_err(|error| ApiError::internal(error.to_string()))?;

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
        .build()
        .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))?;

    let transcoder = Arc::new(FfmpegTranscoder::default());
    if config.output_format == OutputFormat::Mp3
        && let Err(error) = transcoder.locate().await
    {
        warn!("{error}: conversions of non-MP3 sources will fail until ffmpeg is installed");
    }

    let pipeline = Pipeline::new(&config, http_client, transcoder)
        .map_err(|error| ApiError::internal(error.to_string()))?;
    pipeline
        .storage()
        .ensure_dirs()
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    info!(
        "Storing audio in {:?} (scratch area {:?}, output {:?})",
        config.download_dir, config.scratch_dir, config.output_format
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let app = build_router(state, &config.allowed_origins);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Backend ready on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
