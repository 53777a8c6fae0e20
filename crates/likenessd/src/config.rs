use anyhow::{bail, Context, Result};
use likeness_core::{LivenessBand, MetricStrategy, StrategyKind};
use likeness_extract::BoxFormat;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// What `/detect` answers when the image contains no face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoFacePolicy {
    /// 400 with `{success: false, error: "No face detected"}`.
    Reject,
    /// 200 with `{success: true, faceDetected: false}`.
    Empty,
}

/// Which descriptor extractor the engine thread owns.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorConfig {
    Onnx {
        model_dir: PathBuf,
        /// SHA-256 check of the model files before loading them.
        verify_models: bool,
    },
    Command {
        program: String,
        args: Vec<String>,
        box_format: BoxFormat,
    },
}

/// Service configuration, loaded from `LIKENESS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Metric, thresholds and liveness band; preset per strategy, then overridden.
    pub strategy: MetricStrategy,
    pub extractor: ExtractorConfig,
    pub no_face: NoFacePolicy,
    /// Deadline for the extraction work of one request (both images for
    /// two-image routes); also the kill deadline of a command extractor.
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = match get("LIKENESS_BIND") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("invalid LIKENESS_BIND '{addr}'"))?,
            None => {
                let port: u16 = parse_or(&get, "PORT", 5000)?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let kind: StrategyKind = get("LIKENESS_STRATEGY")
            .as_deref()
            .unwrap_or("arcface")
            .parse()?;
        let mut strategy = MetricStrategy::preset(kind);
        strategy.verify_threshold =
            parse_finite(&get, "LIKENESS_VERIFY_THRESHOLD", strategy.verify_threshold)?;
        strategy.liveness_threshold =
            parse_finite(&get, "LIKENESS_LIVENESS_THRESHOLD", strategy.liveness_threshold)?;
        strategy.band = LivenessBand {
            min_exclusive: parse_finite(
                &get,
                "LIKENESS_LIVENESS_MIN_MOVEMENT",
                strategy.band.min_exclusive,
            )?,
            max_exclusive: match get("LIKENESS_LIVENESS_MAX_MOVEMENT") {
                None => strategy.band.max_exclusive,
                Some(v) if matches!(v.trim(), "" | "none" | "off") => None,
                Some(_) => Some(parse_finite(&get, "LIKENESS_LIVENESS_MAX_MOVEMENT", 0.0)?),
            },
        };
        if let Some(max) = strategy.band.max_exclusive {
            if max <= strategy.band.min_exclusive {
                bail!(
                    "liveness band is empty: max movement {max} <= min movement {}",
                    strategy.band.min_exclusive
                );
            }
        }

        let extractor = match get("LIKENESS_EXTRACTOR").as_deref().unwrap_or("onnx") {
            "onnx" => {
                if kind != StrategyKind::ArcFace {
                    bail!(
                        "the onnx extractor produces arcface descriptors, \
                         but LIKENESS_STRATEGY is '{kind}'"
                    );
                }
                ExtractorConfig::Onnx {
                    model_dir: get("LIKENESS_MODEL_DIR")
                        .map(PathBuf::from)
                        .unwrap_or_else(likeness_models::default_model_dir),
                    verify_models: get("LIKENESS_VERIFY_MODELS").map_or(true, |v| v != "0"),
                }
            }
            "command" => ExtractorConfig::Command {
                program: get("LIKENESS_EXTRACTOR_PROGRAM")
                    .context("LIKENESS_EXTRACTOR_PROGRAM is required for the command extractor")?,
                args: get("LIKENESS_EXTRACTOR_ARGS")
                    .map(|a| a.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                box_format: get("LIKENESS_BOX_FORMAT")
                    .as_deref()
                    .unwrap_or("xywh")
                    .parse()
                    .map_err(anyhow::Error::msg)?,
            },
            other => bail!("unknown LIKENESS_EXTRACTOR '{other}' (expected onnx or command)"),
        };

        let no_face = match get("LIKENESS_NO_FACE").as_deref().unwrap_or("reject") {
            "reject" => NoFacePolicy::Reject,
            "empty" => NoFacePolicy::Empty,
            other => bail!("unknown LIKENESS_NO_FACE '{other}' (expected reject or empty)"),
        };

        let timeout_secs: u64 = parse_or(&get, "LIKENESS_REQUEST_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            bail!("LIKENESS_REQUEST_TIMEOUT_SECS must be at least 1");
        }

        Ok(Self {
            bind_addr,
            strategy,
            extractor,
            no_face,
            request_timeout: Duration::from_secs(timeout_secs),
            max_body_bytes: parse_or(&get, "LIKENESS_MAX_BODY_BYTES", 16 * 1024 * 1024)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid {key} '{v}'")),
        None => Ok(default),
    }
}

/// `parse_or` for thresholds and movement bounds, where NaN or infinity would
/// make every comparison false.
fn parse_finite(get: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> Result<f32> {
    let v: f32 = parse_or(get, key, default)?;
    if !v.is_finite() {
        bail!("{key} must be a finite number, got {v}");
    }
    Ok(v)
}
