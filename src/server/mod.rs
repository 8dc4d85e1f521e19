//! HTTP control surface: trigger captures, poll status, browse, like,
//! delete and reprint photos. In kiosk mode it also serves the display.

pub mod auth;
pub mod mjpeg;

use crate::errors::BoothError;
use crate::kiosk::KioskFeed;
use crate::types::CaptureKind;
use crate::workflow::{Booth, TriggerError};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use self::auth::Sessions;

const INDEX_HTML: &str = include_str!("assets/index.html");
const KIOSK_HTML: &str = include_str!("assets/kiosk.html");

#[derive(Clone)]
pub struct AppState {
    pub booth: Arc<Booth>,
    pub sessions: Arc<Sessions>,
    pub kiosk: Option<Arc<KioskFeed>>,
}

impl AppState {
    pub fn new(booth: Arc<Booth>) -> Self {
        let sessions = Arc::new(Sessions::new(booth.config().server.password.clone()));
        Self {
            booth,
            sessions,
            kiosk: None,
        }
    }

    pub fn with_kiosk(mut self, feed: Arc<KioskFeed>) -> Self {
        self.kiosk = Some(feed);
        self
    }
}

/// Error body shared by every endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"status": "error", "message": self.message})),
        )
            .into_response()
    }
}

impl From<BoothError> for ApiError {
    fn from(error: BoothError) -> Self {
        let status = match &error {
            BoothError::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<TriggerError> for ApiError {
    fn from(error: TriggerError) -> Self {
        match error {
            TriggerError::Busy => Self::new(StatusCode::BAD_REQUEST, error.to_string()),
            TriggerError::Photo(inner) => inner.into(),
            TriggerError::CameraUnavailable | TriggerError::Spawn(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/photos/:name", get(serve_photo))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/api/status", get(status))
        .route("/api/photos", get(list_photos))
        .route("/api/photo", post(take_photo))
        .route("/api/strip", post(take_strip))
        .route("/api/like/:name", post(toggle_like))
        .route("/api/delete/:name", post(delete_photo))
        .route("/api/reprint/:name", post(reprint_photo));

    if state.kiosk.is_some() {
        app = app
            .route("/kiosk", get(kiosk_page))
            .route("/kiosk/stream", get(kiosk_stream))
            .route("/kiosk/state", get(kiosk_state))
            .route("/kiosk/trigger/:kind", post(kiosk_trigger));
    }

    app.layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_session,
    ))
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, bind: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("Photobooth listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let booth = &state.booth;
    let mut body = serde_json::to_value(booth.gate().status()).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut body {
        map.insert("in_progress".into(), booth.gate().is_busy().into());
        map.insert("joystick_connected".into(), booth.joystick_connected().into());
        map.insert("camera_available".into(), booth.camera_available().into());
        map.insert("auth_required".into(), state.sessions.enabled().into());
    }
    Json(body)
}

async fn list_photos(State(state): State<AppState>) -> ApiResult {
    let photos = state.booth.library().list(state.booth.metadata())?;
    Ok(Json(json!(photos)))
}

fn start(state: &AppState, kind: CaptureKind) -> ApiResult {
    let handle = state.booth.start_capture(kind)?;
    let message = match kind {
        CaptureKind::Single => "Taking photo...",
        CaptureKind::Strip => "Taking photo strip...",
    };
    Ok(Json(json!({
        "status": "started",
        "message": message,
        "run_id": handle.run_id(),
    })))
}

async fn take_photo(State(state): State<AppState>) -> ApiResult {
    start(&state, CaptureKind::Single)
}

async fn take_strip(State(state): State<AppState>) -> ApiResult {
    start(&state, CaptureKind::Strip)
}

/// Run filesystem work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, BoothError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn toggle_like(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let booth = state.booth.clone();
    let liked = blocking({
        let name = name.clone();
        move || {
            booth.library().resolve_listed(&name)?;
            booth.metadata().toggle_like(&name)
        }
    })
    .await?;
    Ok(Json(json!({"status": "ok", "name": name, "liked": liked})))
}

async fn delete_photo(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let booth = state.booth.clone();
    blocking({
        let name = name.clone();
        move || booth.library().delete(&name, booth.metadata())
    })
    .await?;
    Ok(Json(json!({"status": "ok", "name": name})))
}

async fn reprint_photo(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let handle = state.booth.start_reprint(&name)?;
    Ok(Json(json!({
        "status": "started",
        "message": "Reprinting...",
        "run_id": handle.run_id(),
    })))
}

async fn serve_photo(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.booth.library().resolve(&name)?;
    let bytes = tokio::fs::read(&path).await.map_err(BoothError::from)?;
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn kiosk_feed(state: &AppState) -> Result<&Arc<KioskFeed>, ApiError> {
    state
        .kiosk
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Kiosk is not running"))
}

async fn kiosk_page() -> Html<&'static str> {
    Html(KIOSK_HTML)
}

async fn kiosk_stream(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(kiosk_feed(&state)?.video.subscribe().into_response())
}

async fn kiosk_state(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let overlay = kiosk_feed(&state)?.overlay();
    Ok(Json(json!(overlay)))
}

async fn kiosk_trigger(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let feed = kiosk_feed(&state)?;
    let kind: CaptureKind = kind
        .parse()
        .map_err(|e: String| ApiError::new(StatusCode::BAD_REQUEST, e))?;
    feed.trigger(kind);
    Ok(Json(json!({"status": "queued", "kind": kind})))
}
