//! REST surface: state/settings/ownership, the external generation pipeline's
//! queue hand-off, and the live audio stream endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::common::{ApiError, ListenerId, now_ms};
use crate::protocol::models::{GenParams, RadioSong};
use crate::session::settings::SettingsPatch;
use crate::stream::Broadcaster;
use crate::transport::{AppState, websocket};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/radio/ws", get(websocket::websocket_handler))
        .route("/api/radio/state", get(get_state))
        .route("/api/radio/settings", get(get_settings).post(post_settings))
        .route("/api/radio/claim-owner", axum::routing::post(claim_owner))
        .route("/api/radio/queue", axum::routing::post(post_queue))
        .route("/api/radio/stream", get(stream))
        .route("/api/radio/stream.m3u", get(stream_m3u))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "aceradio" }))
}

async fn get_state(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.manager.get_public_state()))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "settings": state.manager.settings().sanitized() }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsBody {
    listener_id: Option<ListenerId>,
    settings: SettingsPatch,
}

async fn post_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<Value>, ApiError> {
    let authorized = body
        .listener_id
        .as_ref()
        .is_some_and(|id| state.manager.is_owner(id));
    if !authorized {
        return Err(ApiError::forbidden(
            "Only the owner can update settings",
            "/api/radio/settings",
        ));
    }
    state.manager.update_settings(body.settings);
    Ok(Json(json!({
        "success": true,
        "settings": state.manager.settings().sanitized(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimOwnerBody {
    listener_id: ListenerId,
    secret: String,
}

async fn claim_owner(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClaimOwnerBody>,
) -> Result<Json<Value>, ApiError> {
    if state.manager.claim_owner(&body.listener_id, &body.secret) {
        Ok(Json(json!({ "success": true, "isOwner": true })))
    } else {
        Err(ApiError::forbidden(
            "Invalid secret or listener not found",
            "/api/radio/claim-owner",
        ))
    }
}

/// The external generation pipeline hands a finished song back. Accepts both
/// a bare song object and `{song, genParams}`.
async fn post_queue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (song_value, gen_params) = match body.get("song") {
        Some(song) if song.is_object() => {
            let params = body
                .get("genParams")
                .cloned()
                .and_then(|v| serde_json::from_value::<GenParams>(v).ok());
            (song.clone(), params)
        }
        _ => (body, None),
    };

    let song: RadioSong = serde_json::from_value(song_value)
        .map_err(|e| ApiError::bad_request(format!("Invalid song data: {e}"), "/api/radio/queue"))?;
    if song.id.is_empty() || song.audio_url.is_empty() {
        return Err(ApiError::bad_request(
            "Invalid song data",
            "/api/radio/queue",
        ));
    }

    let position = state.manager.add_to_queue(song, gen_params, true);
    Ok(Json(json!({ "success": true, "queuePosition": position })))
}

fn stream_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("stream_{}_{}", now_ms(), suffix.to_lowercase())
}

/// Live MP3 stream: one fan-out sink per connection, ICY metadata headers.
async fn stream(State(state): State<Arc<AppState>>) -> Response {
    let client_id = stream_client_id();
    info!("Stream client connecting: id={}", client_id);
    let rx = state.broadcaster.add_client(client_id.clone());

    // Dropping the response body unregisters the sink.
    let guard = RemoveOnDrop {
        broadcaster: state.broadcaster.clone(),
        id: client_id,
    };
    let body = Body::from_stream(rx.into_stream().map(move |chunk| {
        let _ = &guard;
        Ok::<_, std::convert::Infallible>(chunk)
    }));

    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("icy-name"), "ACERADIO"),
            (
                header::HeaderName::from_static("icy-description"),
                "AI-Generated Music Radio",
            ),
            (header::HeaderName::from_static("icy-genre"), "AI Music"),
            (header::HeaderName::from_static("icy-br"), "128"),
        ],
        body,
    )
        .into_response()
}

struct RemoveOnDrop {
    broadcaster: Arc<Broadcaster>,
    id: String,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.broadcaster.remove_client(&self.id);
    }
}

async fn stream_m3u(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let base_url = format!("http://{host}");
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/x-mpegurl"),
            (
                header::CONTENT_DISPOSITION,
                "inline; filename=\"aceradio.m3u\"",
            ),
        ],
        state.broadcaster.extended_playlist(&base_url),
    )
        .into_response()
}
