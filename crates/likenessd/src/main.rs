use anyhow::{Context, Result};
use likeness_core::VerificationEngine;
use likeness_extract::{CommandExtractor, DescriptorExtractor, OnnxExtractor};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;

use config::{Config, ExtractorConfig};

/// Pending extractions allowed to queue in front of the engine thread.
const ENGINE_QUEUE_DEPTH: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "likenessd starting");

    let config = Config::from_env().context("invalid configuration")?;
    let strategy = config.strategy;
    tracing::info!(
        strategy = %strategy.kind,
        metric = strategy.metric.as_str(),
        verify_threshold = strategy.verify_threshold,
        liveness_threshold = strategy.liveness_threshold,
        min_movement = strategy.band.min_exclusive,
        max_movement = ?strategy.band.max_exclusive,
        "decision policy"
    );

    let extractor = build_extractor(&config)?;
    let engine = engine::spawn_engine(extractor, ENGINE_QUEUE_DEPTH)?;

    let state = Arc::new(api::AppState {
        engine,
        decision: VerificationEngine::new(strategy),
        no_face: config.no_face,
        request_timeout: config.request_timeout,
    });
    let app = api::router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "likenessd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("likenessd shutting down");
    Ok(())
}

/// Construct the extractor once, failing fast on missing or corrupt models.
fn build_extractor(config: &Config) -> Result<Box<dyn DescriptorExtractor>> {
    match &config.extractor {
        ExtractorConfig::Onnx {
            model_dir,
            verify_models,
        } => {
            if *verify_models {
                likeness_models::verify_models_dir(model_dir).with_context(|| {
                    format!(
                        "model verification failed in {} (run `likeness setup`)",
                        model_dir.display()
                    )
                })?;
                tracing::info!(dir = %model_dir.display(), "model checksums verified");
            } else {
                tracing::warn!("model checksum verification disabled");
            }
            let extractor = OnnxExtractor::load(model_dir)
                .with_context(|| format!("failed to load models from {}", model_dir.display()))?;
            Ok(Box::new(extractor))
        }
        ExtractorConfig::Command {
            program,
            args,
            box_format,
        } => {
            tracing::info!(%program, ?args, ?box_format, "using external extractor");
            Ok(Box::new(
                CommandExtractor::new(
                    program.clone(),
                    args.clone(),
                    *box_format,
                    config.strategy.kind,
                )
                .with_timeout(config.request_timeout),
            ))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
