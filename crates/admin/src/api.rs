use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use channel::EventSink;
use common::{Event, Tag};
use library::{Library, LibraryError, PlaylistSummary};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AdminState {
    pub library: Arc<RwLock<Library>>,
    /// Connection to the controller's broker, if it could be reached.
    pub events: Option<Arc<dyn EventSink>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub tag: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AssignResponse {
    pub id: String,
    pub tag: Tag,
}

#[derive(Deserialize)]
pub struct PlayRequest {
    pub playlist_id: String,
    #[serde(default)]
    pub album_index: usize,
    #[serde(default)]
    pub track_index: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/music/playlist/all", get(list_playlists))
        .route("/music/playlist/:tag_or_id", get(get_playlist))
        .route("/music/playlist/assign/:id", post(assign_tag))
        .route("/music/play", post(play))
        .route("/power", post(power))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_playlists(State(state): State<AdminState>) -> Json<Vec<PlaylistSummary>> {
    let mut library = state.library.write();
    library.refresh_states();
    Json(library.summaries())
}

async fn get_playlist(
    State(state): State<AdminState>,
    Path(tag_or_id): Path<String>,
) -> Result<Json<PlaylistSummary>, ApiError> {
    let mut library = state.library.write();
    library.refresh_states();
    library
        .summary(&tag_or_id)
        .map(Json)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "playlist not found"))
}

async fn assign_tag(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<AssignResponse>, ApiError> {
    let tag = payload
        .tag
        .parse::<Tag>()
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    let new_id = {
        let mut library = state.library.write();
        library.assign_tag(&id, &tag).map_err(|err| match err {
            LibraryError::UnknownPlaylist(_) => json_error(StatusCode::NOT_FOUND, err.to_string()),
            LibraryError::DuplicateTag { .. } => json_error(StatusCode::CONFLICT, err.to_string()),
            other => json_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?
    };
    info!("Assigned tag {} to playlist {}", tag, new_id);

    // The controller's catalog still has the old directory name.
    if let Some(events) = &state.events {
        if let Err(err) = events.send(Event::LibraryChanged) {
            warn!("Failed to notify controller: {}", err);
        }
    }
    Ok(Json(AssignResponse { id: new_id, tag }))
}

async fn play(
    State(state): State<AdminState>,
    Json(payload): Json<PlayRequest>,
) -> Result<(StatusCode, Json<HealthResponse>), ApiError> {
    let known = state
        .library
        .read()
        .lookup_by_id(&payload.playlist_id)
        .and_then(|playlist| playlist.albums().get(payload.album_index))
        .map(|album| payload.track_index < album.songs().len())
        .unwrap_or(false);
    if !known {
        return Err(json_error(StatusCode::NOT_FOUND, "no such track"));
    }
    send(
        &state,
        Event::Play {
            playlist_id: payload.playlist_id,
            album_index: payload.album_index,
            track_index: payload.track_index,
        },
    )
}

async fn power(
    State(state): State<AdminState>,
) -> Result<(StatusCode, Json<HealthResponse>), ApiError> {
    send(&state, Event::Power)
}

fn send(state: &AdminState, event: Event) -> Result<(StatusCode, Json<HealthResponse>), ApiError> {
    let events = state
        .events
        .as_ref()
        .ok_or_else(|| json_error(StatusCode::SERVICE_UNAVAILABLE, "controller not connected"))?;
    events
        .send(event)
        .map_err(|err| json_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;
    Ok((StatusCode::ACCEPTED, Json(HealthResponse { status: "ok" })))
}
