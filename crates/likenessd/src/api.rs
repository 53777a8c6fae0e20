//! HTTP facade: JSON routes over the engine thread and the decision core.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use likeness_core::{
    DecisionError, DetectionResult, DistanceError, FaceBox, FaceDescriptor, LivenessVerdict,
    MatchVerdict, VerificationEngine,
};
use likeness_extract::ExtractError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::NoFacePolicy;
use crate::engine::{EngineError, EngineHandle};

pub struct AppState {
    pub engine: EngineHandle,
    pub decision: VerificationEngine,
    pub no_face: NoFacePolicy,
    pub request_timeout: Duration,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        tracing::info_span!(
            "request",
            id = %uuid::Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        )
    });

    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .route("/verify", post(verify))
        .route("/liveness", post(liveness))
        .route("/compare", post(compare))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    /// Missing field, undecodable image, no face, invalid descriptor.
    BadRequest(String),
    /// The extractor ran and failed.
    Extraction(String),
    Timeout,
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Extraction(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "Face processing timed out".into()),
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Face engine unavailable".into(),
            ),
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Ingress(e) => Self::BadRequest(format!("Invalid image: {e}")),
            EngineError::Extract(ExtractError::Timeout { .. }) => Self::Timeout,
            EngineError::Extract(e) => {
                tracing::warn!(error = %e, "extraction failed");
                Self::Extraction(format!("Face detection failed: {e}"))
            }
            EngineError::Spawn(_) | EngineError::ChannelClosed => Self::Unavailable,
        }
    }
}

impl From<DecisionError> for ApiError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::NoDescriptor(frame) => {
                Self::BadRequest(format!("No face detected in the {frame} image"))
            }
            DecisionError::Distance(e) => e.into(),
        }
    }
}

impl From<DistanceError> for ApiError {
    fn from(err: DistanceError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::BadRequest(err.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let strategy = state.decision.strategy();
    Json(json!({
        "status": "ok",
        "service": "face-verification",
        "version": env!("CARGO_PKG_VERSION"),
        "strategy": strategy.kind.as_str(),
        "metric": strategy.metric.as_str(),
    }))
}

#[derive(Deserialize)]
struct DetectRequest {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectResponse {
    success: bool,
    face_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    face_descriptor: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    face_box: Option<FaceBox>,
}

async fn detect(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> ApiResult<DetectResponse> {
    let Json(req) = body?;
    let image = required(req.image, "No image provided")?;

    let result = bounded(&state, state.engine.extract(image)).await?;
    match result.into_primary() {
        Some(face) => {
            tracing::info!(bbox = ?face.bbox, "face detected");
            Ok(Json(DetectResponse {
                success: true,
                face_detected: true,
                face_descriptor: Some(face.descriptor.into_values()),
                face_box: Some(face.bbox),
            }))
        }
        None => match state.no_face {
            NoFacePolicy::Reject => Err(ApiError::BadRequest("No face detected".into())),
            NoFacePolicy::Empty => Ok(Json(DetectResponse {
                success: true,
                face_detected: false,
                face_descriptor: None,
                face_box: None,
            })),
        },
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    #[serde(default)]
    registered_image: Option<String>,
    #[serde(default)]
    captured_image: Option<String>,
}

#[derive(Serialize)]
struct VerdictResponse<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    verdict: T,
}

impl<T: Serialize> VerdictResponse<T> {
    fn ok(verdict: T) -> Json<Self> {
        Json(Self {
            success: true,
            verdict,
        })
    }
}

async fn verify(
    State(state): State<Arc<AppState>>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<VerdictResponse<MatchVerdict>> {
    let Json(req) = body?;
    let (Some(registered), Some(captured)) = (req.registered_image, req.captured_image) else {
        return Err(ApiError::BadRequest("Missing images".into()));
    };

    let (first, second) = extract_pair(&state, registered, captured).await?;
    let verdict = state.decision.verify_detections(&first, &second)?;
    tracing::info!(
        matched = verdict.matched,
        distance = verdict.distance,
        "verification complete"
    );
    Ok(VerdictResponse::ok(verdict))
}

#[derive(Deserialize)]
struct LivenessRequest {
    #[serde(default)]
    image1: Option<String>,
    #[serde(default)]
    image2: Option<String>,
}

async fn liveness(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LivenessRequest>, JsonRejection>,
) -> ApiResult<VerdictResponse<LivenessVerdict>> {
    let Json(req) = body?;
    let (Some(image1), Some(image2)) = (req.image1, req.image2) else {
        return Err(ApiError::BadRequest("Need two images".into()));
    };

    let (first, second) = extract_pair(&state, image1, image2).await?;
    let verdict = state.decision.check_liveness_detections(&first, &second)?;
    tracing::info!(
        is_live = verdict.is_live,
        movement = verdict.movement,
        same_person = verdict.same_person,
        "liveness check complete"
    );
    Ok(VerdictResponse::ok(verdict))
}

#[derive(Deserialize)]
struct CompareRequest {
    #[serde(default)]
    descriptor1: Option<Vec<f32>>,
    #[serde(default)]
    descriptor2: Option<Vec<f32>>,
}

async fn compare(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CompareRequest>, JsonRejection>,
) -> ApiResult<VerdictResponse<MatchVerdict>> {
    let Json(req) = body?;
    let (Some(d1), Some(d2)) = (req.descriptor1, req.descriptor2) else {
        return Err(ApiError::BadRequest("Missing descriptors".into()));
    };

    // Stored descriptors are trusted to come from the deployed strategy.
    let kind = state.engine.strategy();
    let verdict = state.decision.verify(
        &FaceDescriptor::new(d1, kind),
        &FaceDescriptor::new(d2, kind),
    )?;
    Ok(VerdictResponse::ok(verdict))
}

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(message.to_string())),
    }
}

/// Both images go through the engine in order; the timeout covers the pair.
async fn extract_pair(
    state: &AppState,
    first: String,
    second: String,
) -> Result<(DetectionResult, DetectionResult), ApiError> {
    bounded(state, async {
        let a = state.engine.extract(first).await?;
        let b = state.engine.extract(second).await?;
        Ok::<_, EngineError>((a, b))
    })
    .await
}

async fn bounded<T>(
    state: &AppState,
    work: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(state.request_timeout, work).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            tracing::warn!(
                timeout_secs = state.request_timeout.as_secs_f32(),
                "face processing timed out"
            );
            Err(ApiError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use image::{ImageFormat, Rgb, RgbImage};
    use likeness_core::{FaceDetection, MetricStrategy, StrategyKind};
    use likeness_extract::{BoxFormat, CommandExtractor, DescriptorExtractor};
    use likeness_ingress::DecodedImage;
    use serde_json::Value;
    use std::io::Cursor;
    use tokio::net::TcpListener;

    /// Scripted stand-in for a real backend. The top-left pixel drives it:
    /// red channel is the descriptor's first component, green shifts the box,
    /// blue 0 means "no face", blue 255 means "extractor crashed", blue 200
    /// means "hang".
    struct PixelExtractor;

    impl DescriptorExtractor for PixelExtractor {
        fn strategy(&self) -> StrategyKind {
            StrategyKind::Dlib
        }

        fn extract(&mut self, image: &DecodedImage) -> Result<DetectionResult, ExtractError> {
            let Rgb([r, g, b]) = *image.rgb().get_pixel(0, 0);
            match b {
                0 => return Ok(DetectionResult::empty()),
                255 => {
                    return Err(ExtractError::Command {
                        status: 1,
                        stderr: "crashed".into(),
                    })
                }
                200 => std::thread::sleep(Duration::from_millis(1500)),
                _ => {}
            }
            let shift = u32::from(g);
            Ok(DetectionResult::new(vec![FaceDetection {
                bbox: FaceBox::new(100 + shift, 100, 80, 80),
                descriptor: FaceDescriptor::new(
                    vec![f32::from(r) / 100.0, 0.0, 0.0],
                    StrategyKind::Dlib,
                ),
                score: Some(0.99),
            }]))
        }
    }

    fn png(r: u8, g: u8, b: u8) -> String {
        let img = RgbImage::from_pixel(4, 4, Rgb([r, g, b]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner()))
    }

    async fn serve(no_face: NoFacePolicy, timeout: Duration) -> String {
        serve_with(Box::new(PixelExtractor), no_face, timeout).await
    }

    async fn serve_with(
        extractor: Box<dyn DescriptorExtractor>,
        no_face: NoFacePolicy,
        timeout: Duration,
    ) -> String {
        let state = Arc::new(AppState {
            engine: spawn_engine(extractor, 8).unwrap(),
            decision: VerificationEngine::new(MetricStrategy::preset(StrategyKind::Dlib)),
            no_face,
            request_timeout: timeout,
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state, 1024 * 1024)).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn default_server() -> String {
        serve(NoFacePolicy::Reject, Duration::from_secs(5)).await
    }

    async fn post(base: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{base}{path}"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn health_reports_strategy() {
        let base = default_server().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "face-verification");
        assert_eq!(body["strategy"], "dlib");
        assert_eq!(body["metric"], "l2");
    }

    #[tokio::test]
    async fn detect_returns_descriptor_and_box() {
        let base = default_server().await;
        let (status, body) = post(&base, "/detect", json!({ "image": png(50, 10, 1) })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["faceDetected"], true);
        assert_eq!(body["faceDescriptor"], json!([0.5, 0.0, 0.0]));
        assert_eq!(body["faceBox"], json!({ "x": 110, "y": 100, "w": 80, "h": 80 }));
    }

    #[tokio::test]
    async fn detect_without_face_follows_policy() {
        let base = default_server().await;
        let (status, body) = post(&base, "/detect", json!({ "image": png(0, 0, 0) })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "No face detected" }));

        let base = serve(NoFacePolicy::Empty, Duration::from_secs(5)).await;
        let (status, body) = post(&base, "/detect", json!({ "image": png(0, 0, 0) })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "faceDetected": false }));
    }

    #[tokio::test]
    async fn detect_rejects_missing_and_garbage_images() {
        let base = default_server().await;
        let (status, body) = post(&base, "/detect", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");

        let (status, body) = post(&base, "/detect", json!({ "image": "@@@@" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let base = default_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/verify"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn verify_same_and_different_people() {
        let base = default_server().await;
        let (status, body) = post(
            &base,
            "/verify",
            json!({ "registeredImage": png(50, 0, 1), "capturedImage": png(60, 5, 1) }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["match"], true);
        assert!((body["distance"].as_f64().unwrap() - 0.1).abs() < 1e-4);
        assert!((body["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-4);

        // distance 1.0 >= 0.6: negative verdict, still 200
        let (status, body) = post(
            &base,
            "/verify",
            json!({ "registeredImage": png(0, 0, 1), "capturedImage": png(100, 0, 1) }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match"], false);
    }

    #[tokio::test]
    async fn verify_needs_both_images_and_faces() {
        let base = default_server().await;
        let (status, body) =
            post(&base, "/verify", json!({ "registeredImage": png(1, 1, 1) })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing images");

        let (status, body) = post(
            &base,
            "/verify",
            json!({ "registeredImage": png(1, 1, 1), "capturedImage": png(0, 0, 0) }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No face detected in the second image");
    }

    #[tokio::test]
    async fn liveness_live_and_static() {
        let base = default_server().await;
        let (status, body) = post(
            &base,
            "/liveness",
            json!({ "image1": png(50, 0, 1), "image2": png(50, 20, 1) }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isLive"], true);
        assert_eq!(body["samePerson"], true);
        assert_eq!(body["movement"], 20.0);
        assert_eq!(body["faceDescriptor"], json!([0.5, 0.0, 0.0]));

        // identical frames: a photo held still
        let (status, body) = post(
            &base,
            "/liveness",
            json!({ "image1": png(50, 0, 1), "image2": png(50, 0, 1) }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isLive"], false);
        assert_eq!(body["movement"], 0.0);
    }

    #[tokio::test]
    async fn liveness_needs_two_images() {
        let base = default_server().await;
        let (status, body) = post(&base, "/liveness", json!({ "image1": png(1, 1, 1) })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Need two images");
    }

    #[tokio::test]
    async fn compare_uses_caller_descriptors() {
        let base = default_server().await;
        let (status, body) = post(
            &base,
            "/compare",
            json!({ "descriptor1": [0.0, 0.0, 0.0], "descriptor2": [0.0, 0.0, 0.0] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match"], true);
        assert_eq!(body["distance"], 0.0);

        let (status, body) = post(
            &base,
            "/compare",
            json!({ "descriptor1": [1.0, 2.0], "descriptor2": [1.0, 2.0, 3.0] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn extractor_failure_is_unprocessable() {
        let base = default_server().await;
        let (status, body) = post(&base, "/detect", json!({ "image": png(1, 1, 255) })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn slow_extraction_times_out() {
        let base = serve(NoFacePolicy::Reject, Duration::from_millis(200)).await;
        let (status, body) = post(&base, "/detect", json!({ "image": png(1, 1, 200) })).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["success"], false);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tool_does_not_block_later_requests() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("hang-once");
        std::fs::write(&flag, b"").unwrap();

        // $1 is the flag file, $2 the scratch image.
        let script = r#"if [ -e "$1" ]; then rm "$1"; sleep 30; fi; printf '%s' '{"faces":[]}'"#;
        let extractor = CommandExtractor::new(
            "sh",
            vec![
                "-c".into(),
                script.into(),
                "likeness-test".into(),
                flag.to_string_lossy().into_owned(),
            ],
            BoxFormat::Xywh,
            StrategyKind::Dlib,
        )
        .with_timeout(Duration::from_millis(500));
        let base = serve_with(
            Box::new(extractor),
            NoFacePolicy::Empty,
            Duration::from_secs(5),
        )
        .await;

        let (status, body) = post(&base, "/detect", json!({ "image": png(1, 1, 1) })).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["success"], false);

        for _ in 0..2 {
            let started = std::time::Instant::now();
            let (status, body) = post(&base, "/detect", json!({ "image": png(1, 1, 1) })).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["faceDetected"], false);
            assert!(started.elapsed() < Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn compare_rejects_overflowing_distance() {
        let base = default_server().await;
        let (status, body) = post(
            &base,
            "/compare",
            json!({ "descriptor1": [3e38], "descriptor2": [-3e38] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
