//! Local HTTP API for the dashboard UI.
//!
//! Exposes the speech coordinator (play/stop/status) and the referral service
//! (links, decode, capture, sponsor notices) to browser-side call sites.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::referral::{ReferralContext, ReferralPair, ReferralService};
use crate::speech::SpeechCoordinator;

#[derive(Clone)]
pub struct ApiState {
    /// `None` when no speech backend is configured.
    pub speech: Option<Arc<SpeechCoordinator>>,
    pub referral: Arc<ReferralService>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    key: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct StatusQuery {
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    speaking: bool,
    state: String,
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reading: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkRequest {
    referrer_id: String,
    shop_slug: String,
}

#[derive(Debug, Serialize)]
struct LinkResponse {
    url: String,
    token: String,
}

#[derive(Deserialize)]
struct CaptureRequest {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureResponse {
    context: Option<ReferralContext>,
    clean_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest {
    lead_name: String,
    focus: String,
}

#[derive(Debug, Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

type ApiError = (StatusCode, Json<SimpleResponse>);

fn unprocessable(message: impl Into<String>) -> ApiError {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(SimpleResponse::err(message)))
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/speak", post(handle_speak))
        .route("/stop", post(handle_stop))
        .route("/link", post(handle_link))
        .route("/decode/{token}", get(handle_decode))
        .route("/capture", post(handle_capture))
        .route("/referral", get(handle_referral))
        .route("/notify", post(handle_notify))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    state: ApiState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// --- Handlers ---

async fn handle_status(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusResponse> {
    let Some(speech) = &state.speech else {
        return Json(StatusResponse {
            speaking: false,
            state: "DISABLED".into(),
            key: None,
            reading: query.key.map(|_| false),
        });
    };

    Json(StatusResponse {
        speaking: speech.is_speaking(),
        state: speech.state().to_string(),
        key: speech.current_session().map(|s| s.key),
        reading: query.key.map(|k| speech.is_currently_reading(&k)),
    })
}

async fn handle_speak(
    State(state): State<ApiState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let Some(speech) = &state.speech else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SimpleResponse::err("speech backend not configured")),
        ));
    };

    let preview: String = req.text.chars().take(80).collect();
    info!(
        "HTTP /speak [{}]: \"{}{}\" ({} chars)",
        req.key,
        preview.replace('\n', " "),
        if req.text.chars().count() > 80 { "..." } else { "" },
        req.text.len(),
    );

    // Fire-and-forget: the coordinator owns the session from here on.
    // Blank text still stops whatever was playing.
    match speech.play(&req.text, &req.key, req.language.as_deref()) {
        Some(_) => Ok(Json(SimpleResponse::ok("speaking"))),
        None => Ok(Json(SimpleResponse::ok("stopped"))),
    }
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    if let Some(speech) = &state.speech {
        speech.stop();
    }
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_link(
    State(state): State<ApiState>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<LinkResponse>, ApiError> {
    let token = state
        .referral
        .encode(&req.referrer_id, &req.shop_slug)
        .map_err(|e| unprocessable(e.to_string()))?;
    let url = state
        .referral
        .generate_stealth_link(&req.referrer_id, &req.shop_slug)
        .map_err(|e| unprocessable(e.to_string()))?;
    Ok(Json(LinkResponse { url, token }))
}

async fn handle_decode(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> Result<Json<ReferralPair>, ApiError> {
    state.referral.decode(&token).map(Json).map_err(|e| {
        warn!("HTTP /decode rejected token: {e}");
        unprocessable(e.to_string())
    })
}

async fn handle_capture(
    State(state): State<ApiState>,
    Json(req): Json<CaptureRequest>,
) -> Json<CaptureResponse> {
    let capture = state.referral.capture(&req.url);
    Json(CaptureResponse {
        context: capture.context,
        clean_url: capture.clean_url,
    })
}

async fn handle_referral(State(state): State<ApiState>) -> Json<Option<ReferralContext>> {
    Json(state.referral.stored_referral())
}

async fn handle_notify(
    State(state): State<ApiState>,
    Json(req): Json<NotifyRequest>,
) -> Json<SimpleResponse> {
    state.referral.notify_sponsor(&req.lead_name, &req.focus);
    Json(SimpleResponse::ok("queued"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferralConfig;
    use crate::referral::notify::TracingNotifier;
    use crate::referral::store::MemorySessionStore;
    use crate::speech::output::{AudioOutput, PlaybackError};
    use crate::speech::pcm::AudioClip;
    use crate::speech::synth::{SpeechSynthesizer, SynthError};
    use crate::speech::PlaybackSettings;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    /// One silent sample per chunk.
    struct SilentSynth;

    #[async_trait]
    impl SpeechSynthesizer for SilentSynth {
        async fn synthesize(&self, _text: &str, _language: &str) -> Result<Option<String>, SynthError> {
            Ok(Some("AAA=".into()))
        }
    }

    /// Keeps "playing" until halted.
    #[derive(Default)]
    struct HoldingOutput {
        playing: AtomicBool,
    }

    impl AudioOutput for HoldingOutput {
        fn start(&self, _clip: AudioClip) -> Result<(), PlaybackError> {
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_idle(&self) -> bool {
            !self.playing.load(Ordering::SeqCst)
        }

        fn halt(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }
    }

    fn state() -> ApiState {
        ApiState {
            speech: None,
            referral: Arc::new(ReferralService::new(
                ReferralConfig::default(),
                Arc::new(MemorySessionStore::new()),
                Arc::new(TracingNotifier),
            )),
        }
    }

    fn state_with_speech() -> (ApiState, Arc<SpeechCoordinator>) {
        let speech = SpeechCoordinator::new(
            Arc::new(SilentSynth),
            Arc::new(HoldingOutput::default()),
            PlaybackSettings {
                paragraph_pause: Duration::from_millis(5),
                chunk_timeout: Duration::from_secs(1),
                poll_interval: Duration::from_millis(2),
                sample_rate: 24000,
                default_language: "es".into(),
            },
        );
        let state = ApiState {
            speech: Some(speech.clone()),
            ..state()
        };
        (state, speech)
    }

    async fn send(state: &ApiState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes)
            .unwrap_or_else(|e| panic!("Expected JSON body from {uri}: {e}"));
        (status, json)
    }

    #[tokio::test]
    async fn link_then_decode() {
        let state = state();
        let (status, link) = send(
            &state,
            "POST",
            "/link",
            Some(json!({"referrerId": "067-2922111", "shopSlug": "startupforworld"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = link["token"].as_str().unwrap();
        assert!(link["url"].as_str().unwrap().ends_with(&format!("?sync={token}")));

        let (status, pair) = send(&state, "GET", &format!("/decode/{token}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pair["referrerId"], "067-2922111");
        assert_eq!(pair["shopSlug"], "startupforworld");
    }

    #[tokio::test]
    async fn bad_link_and_token_are_422() {
        let state = state();
        let (status, body) = send(
            &state,
            "POST",
            "/link",
            Some(json!({"referrerId": "a|b", "shopSlug": "s"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "error");

        let (status, _) = send(&state, "GET", "/decode/***", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn capture_then_referral() {
        let state = state();
        let (status, capture) = send(
            &state,
            "POST",
            "/capture",
            Some(json!({"url": "https://partners.example.com/?ref=R5&lang=es"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(capture["context"]["referrerId"], "R5");
        assert_eq!(capture["cleanUrl"], "https://partners.example.com/?lang=es");

        let (_, stored) = send(&state, "GET", "/referral", None).await;
        assert_eq!(stored, capture["context"]);
    }

    #[tokio::test]
    async fn referral_is_null_before_capture() {
        let (status, stored) = send(&state(), "GET", "/referral", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored, Value::Null);
    }

    #[tokio::test]
    async fn notify_accepts_camel_case_body() {
        let (status, body) = send(
            &state(),
            "POST",
            "/notify",
            Some(json!({"leadName": "Ana", "focus": "energy"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
    }

    #[tokio::test]
    async fn speech_disabled_is_reported() {
        let state = state();
        let (status, body) = send(&state, "GET", "/status?key=m", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "DISABLED");
        assert_eq!(body["reading"], false);

        let (status, _) = send(&state, "POST", "/speak", Some(json!({"text": "hola", "key": "m"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn speak_then_status_then_stop() {
        let (state, speech) = state_with_speech();
        let (status, body) = send(&state, "POST", "/speak", Some(json!({"text": "hola", "key": "a"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "speaking");

        let (_, status_body) = send(&state, "GET", "/status?key=a", None).await;
        assert_eq!(status_body["speaking"], true);
        assert_eq!(status_body["key"], "a");
        assert_eq!(status_body["reading"], true);

        let (_, body) = send(&state, "POST", "/stop", None).await;
        assert_eq!(body["status"], "stopped");
        assert!(!speech.is_currently_reading("a"));
    }

    #[tokio::test]
    async fn blank_speak_still_stops_running_session() {
        let (state, speech) = state_with_speech();
        send(&state, "POST", "/speak", Some(json!({"text": "hola", "key": "a"}))).await;
        assert!(speech.is_currently_reading("a"));

        let (status, body) = send(&state, "POST", "/speak", Some(json!({"text": "  \n ", "key": "b"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");
        assert!(!speech.is_currently_reading("a"));
        assert!(!speech.is_currently_reading("b"));

        let (_, status_body) = send(&state, "GET", "/status?key=a", None).await;
        assert_eq!(status_body["speaking"], false);
        assert_eq!(status_body["reading"], false);
    }
}
