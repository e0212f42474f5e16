use super::base_url;
use crate::app::AppState;
use crate::error::FlowError;
use crate::flow::conference::{path, ConferenceStep};
use crate::flow::directive::VoiceResponse;
use crate::flow::session::{CallSession, CallbackForm, StepParams};
use axum::{
    extract::{Form, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tracing::info;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(path::VOICE, post(voice))
        .route(path::JOIN, post(join))
        .route(path::VERIFY_PIN, post(verify_pin))
        .route(path::ENTER, post(enter))
        .route(path::STATUS, post(status))
        .route(path::RECORDING_STATUS, post(recording_status))
}

async fn voice(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    let session = CallSession::from_form(&form);
    info!(call_id = %session.call_id, from = %session.caller, "incoming conference call");
    state
        .conference
        .respond(ConferenceStep::RoomCodeEntry, &session, "")
        .await
}

async fn join(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    let session = CallSession::from_form(&form);
    state
        .conference
        .respond(ConferenceStep::RoomLookup, &session, "")
        .await
}

async fn verify_pin(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    let session = CallSession::from_form(&form);
    let step = ConferenceStep::PinVerify {
        room: params.room,
        attempt: params.attempt.unwrap_or(1),
    };
    state.conference.respond(step, &session, "").await
}

async fn enter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    let session = CallSession::from_form(&form);
    let base = base_url(&state, &headers);
    state
        .conference
        .respond(ConferenceStep::Join { room: params.room }, &session, &base)
        .await
}

fn required_room(params: StepParams) -> Result<String, FlowError> {
    params
        .room
        .filter(|room| !room.is_empty())
        .ok_or_else(|| FlowError::InvalidInput("room is required".to_string()))
}

async fn status(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> Response {
    let room = match required_room(params) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    let event = form.status_callback_event.unwrap_or_default();
    match state
        .conference
        .on_status(&room, &event, form.call_sid.as_deref())
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn recording_status(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> Response {
    let room = match required_room(params) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match state
        .conference
        .on_recording(
            &room,
            form.recording_sid.as_deref(),
            form.recording_url.as_deref(),
            form.recording_duration.as_deref(),
        )
        .await
    {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;
    use crate::carrier::{MockCallPlacer, MockMessenger};
    use crate::flow::directive::{DialTarget, Verb};

    fn form(call_sid: &str, digits: Option<&str>) -> CallbackForm {
        CallbackForm {
            call_sid: Some(call_sid.to_string()),
            from: Some("+819011112222".to_string()),
            digits: digits.map(str::to_string),
            ..Default::default()
        }
    }

    fn room(code: &str) -> StepParams {
        StepParams {
            room: Some(code.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_enter_uses_public_url_for_callbacks() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let response = enter(
            State(state.clone()),
            HeaderMap::new(),
            Query(room("1000")),
            Form(form("CA1", None)),
        )
        .await;
        let bridge = response
            .verbs()
            .iter()
            .find_map(|verb| match verb {
                Verb::Dial(DialTarget::Conference(bridge)) => Some(bridge.clone()),
                _ => None,
            })
            .expect("conference dial");
        assert_eq!(bridge.name, "room-1000");
        assert_eq!(
            bridge.status_callback,
            "https://ivr.example.com/conference/status?room=1000"
        );
        assert_eq!(state.conference.rooms().occupancy("1000").await, 1);
    }

    #[tokio::test]
    async fn test_status_leave_frees_slot() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        enter(
            State(state.clone()),
            HeaderMap::new(),
            Query(room("1001")),
            Form(form("CA1", None)),
        )
        .await;

        let leave = CallbackForm {
            call_sid: Some("CA1".to_string()),
            status_callback_event: Some("participant-leave".to_string()),
            ..Default::default()
        };
        let response = status(State(state.clone()), Query(room("1001")), Form(leave)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.conference.rooms().occupancy("1001").await, 0);
    }

    #[tokio::test]
    async fn test_status_without_room_is_bad_request() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let response = status(
            State(state),
            Query(StepParams::default()),
            Form(CallbackForm::default()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_recording_status_requires_sid() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let response = recording_status(
            State(state),
            Query(room("1000")),
            Form(CallbackForm::default()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
