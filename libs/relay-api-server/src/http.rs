use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use relay_api::{Attributes, ErrorKind, Event, RelayError};

use super::AppState;

fn error_response(e: RelayError) -> Response {
    let status = match e.kind {
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Permanent | ErrorKind::Config => StatusCode::BAD_REQUEST,
        ErrorKind::Exhausted => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("error: {}", e.message)).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  POST /api/events: one event or an array
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum EventsBody {
    Many(Vec<Event>),
    One(Event),
}

pub(crate) async fn handle_post_events(State(state): State<AppState>, Json(body): Json<EventsBody>) -> Response {
    match body {
        EventsBody::One(event) => (StatusCode::ACCEPTED, Json(state.engine.accept(event))).into_response(),
        EventsBody::Many(events) => {
            tracing::debug!(count = events.len(), "event batch received");
            (StatusCode::ACCEPTED, Json(state.engine.accept_batch(events))).into_response()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PUT /api/records/{id}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_put_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(attributes): Json<Attributes>,
) -> Response {
    match state.engine.put_record(&id, attributes).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::warn!(correlation_id = %id, error = %e, "record write failed");
            error_response(e)
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/dead-letters, GET /api/status
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_dead_letters(State(state): State<AppState>) -> Response {
    match state.engine.dead_letters().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.status())
}
