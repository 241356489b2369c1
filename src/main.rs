//! wyoming-gigaam: Wyoming protocol speech-to-text server for GigaAM
//!
//! Accepts audio streamed over a Unix domain socket or TCP using the Wyoming
//! event protocol and answers with a transcript:
//! - `describe` returns the static capability description
//! - `audio-chunk` events accumulate one utterance per connection
//! - `audio-stop` runs one transcription through the shared model
//!
//! The model runs in a worker process and is not reentrant, so all
//! transcriptions are serialized through a single inference gate.

mod config;
mod info;
mod lifecycle;
mod model;
mod protocol;
mod server;
mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::lifecycle::ShutdownSignal;
use crate::model::InferenceGate;
use crate::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("invalid configuration")?;

    // Initialize logging
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "wyoming-gigaam starting"
    );
    debug!(?config, "configuration loaded");

    let description = info::build_info(&config.model);
    let installed: Vec<_> = description.installed_models().collect();
    if installed.len() != 1 {
        warn!(?installed, selector = %config.model, "expected exactly one installed model");
    }
    let info_event = description
        .to_event()
        .context("failed to encode capability description")?;

    // Load the model before binding so clients never see a half-started server
    let model_config = config.model_config();
    let model = tokio::task::spawn_blocking(move || model::load_model(&model_config))
        .await
        .context("model loader task failed")?
        .context("failed to load model")?;
    info!(model = model.name(), "model loaded");

    let gate = InferenceGate::new(model);
    let server = Server::bind(&config.endpoint, gate, Arc::new(info_event)).await?;

    let shutdown = ShutdownSignal::new();

    info!(endpoint = %config.endpoint, local_addr = ?server.local_addr(), "ready");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "server error");
            }
        }

        result = shutdown.wait() => {
            if let Err(e) = result {
                error!(?e, "failed to install signal handlers");
            }
        }
    }

    info!("shutting down...");
    server.shutdown().await;
    info!("wyoming-gigaam stopped");

    Ok(())
}
