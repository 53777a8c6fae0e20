use likeness_core::{DetectionResult, StrategyKind};
use likeness_extract::{DescriptorExtractor, ExtractError};
use likeness_ingress::IngressError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Extract {
        /// Base64 image, optionally a data URL.
        payload: String,
        reply: oneshot::Sender<Result<DetectionResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    strategy: StrategyKind,
}

impl EngineHandle {
    /// Decode the image and run detection + description on the engine thread.
    pub async fn extract(&self, payload: String) -> Result<DetectionResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Strategy tag of every descriptor the engine produces.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }
}

/// Spawn the engine on a dedicated OS thread that owns `extractor` until
/// every handle is dropped.
pub fn spawn_engine(
    mut extractor: Box<dyn DescriptorExtractor>,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    let strategy = extractor.strategy();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!(strategy = %strategy, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { payload, reply } => {
                        // Caller gave up (timeout or disconnect); skip the work.
                        if reply.is_closed() {
                            tracing::debug!("dropping extraction for abandoned request");
                            continue;
                        }
                        let result = run_extract(extractor.as_mut(), &payload);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, strategy })
}

fn run_extract(
    extractor: &mut dyn DescriptorExtractor,
    payload: &str,
) -> Result<DetectionResult, EngineError> {
    let image = likeness_ingress::decode_base64(payload)?;
    let started = std::time::Instant::now();
    let result = extractor.extract(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = result.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extraction complete"
    );
    Ok(result)
}
