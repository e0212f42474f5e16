use super::base_url;
use crate::app::AppState;
use crate::store::reservations::{summarize, Reservation};
use crate::version::BuildInfo;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reservations", get(list_reservations))
        .route("/execute-callback/{id}", post(execute_callback))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{code}", get(room_detail))
        .route("/voicemails", get(list_voicemails))
        .route("/health", get(health))
}

/// A stored reservation plus the forms an operator reads out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationView<'a> {
    #[serde(flatten)]
    reservation: &'a Reservation,
    readable_number: String,
    reservation_code: String,
}

async fn list_reservations(State(state): State<AppState>) -> Response {
    let reservations = state.callback.reservations().list().await;
    let summary = summarize(&reservations);
    let views: Vec<ReservationView> = reservations
        .iter()
        .map(|reservation| ReservationView {
            reservation,
            readable_number: state
                .callback
                .readable_number(&reservation.callback_number),
            reservation_code: reservation.code(),
        })
        .collect();
    Json(json!({
        "reservations": views,
        "summary": summary,
    }))
    .into_response()
}

async fn execute_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let base = base_url(&state, &headers);
    match state.callback.execute_callback(&id, &base).await {
        Ok(reservation) => {
            info!(reservation = %id, call_sid = ?reservation.call_sid, "callback executed");
            Json(json!({
                "success": true,
                "callSid": reservation.call_sid,
                "reservation": reservation,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(reservation = %id, "execute callback failed: {}", e);
            e.into_response()
        }
    }
}

async fn list_rooms(State(state): State<AppState>) -> Response {
    let rooms = state.conference.rooms().overview().await;
    Json(json!({ "rooms": rooms })).into_response()
}

async fn room_detail(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match state.conference.rooms().detail(&code).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_voicemails(State(state): State<AppState>) -> Response {
    let voicemails = state.voicemail.voicemails().list().await;
    Json(json!({ "voicemails": voicemails })).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "version": BuildInfo::current(),
        "rooms": state.conference.rooms().definitions().len(),
        "reservations": state.callback.reservations().summary().await,
    }))
    .into_response()
}
