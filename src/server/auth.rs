//! Password login for the control surface.
//!
//! With no password configured every request passes. Otherwise `/api/*`
//! requires a session cookie, except the endpoints in `OPEN_PATHS`.

use super::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "booth_session";

const OPEN_PATHS: &[&str] = &["/api/login", "/api/logout", "/api/status"];

#[derive(Debug, Default)]
pub struct Sessions {
    password: Option<String>,
    tokens: Mutex<HashSet<Uuid>>,
}

impl Sessions {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
            tokens: Mutex::new(HashSet::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.password.is_some()
    }

    /// Issue a token when `password` matches.
    pub fn login(&self, password: &str) -> Option<Uuid> {
        if self.password.as_deref() != Some(password) {
            return None;
        }
        let token = Uuid::new_v4();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token);
        Some(token)
    }

    pub fn logout(&self, token: Uuid) -> bool {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
    }

    pub fn is_valid(&self, token: Uuid) -> bool {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&token)
    }
}

/// Session token from the `Cookie` header, if any.
pub fn session_token(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

pub fn requires_session(path: &str) -> bool {
    path.starts_with("/api/") && !OPEN_PATHS.contains(&path)
}

pub async fn require_session(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let sessions = &state.sessions;
    if !sessions.enabled() || !requires_session(request.uri().path()) {
        return next.run(request).await;
    }

    match session_token(request.headers()) {
        Some(token) if sessions.is_valid(token) => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "message": "Login required"})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    if !state.sessions.enabled() {
        return Json(json!({"status": "ok", "message": "No password set"})).into_response();
    }

    match state.sessions.login(&body.password) {
        Some(token) => {
            log::info!("Control session opened");
            (
                [(
                    header::SET_COOKIE,
                    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax"),
                )],
                Json(json!({"status": "ok"})),
            )
                .into_response()
        }
        None => {
            log::warn!("Rejected login attempt");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"status": "error", "message": "Wrong password"})),
            )
                .into_response()
        }
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.logout(token);
    }
    (
        [(
            header::SET_COOKIE,
            format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0"),
        )],
        Json(json!({"status": "ok"})),
    )
        .into_response()
}
