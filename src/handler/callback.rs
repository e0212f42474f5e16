use crate::app::AppState;
use crate::error::FlowError;
use crate::flow::callback::{path, CallbackStep};
use crate::flow::directive::VoiceResponse;
use crate::flow::session::{CallSession, CallbackForm, StepParams};
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tracing::info;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(path::VOICE, post(voice))
        .route(path::MENU, post(menu))
        .route(path::START, post(start))
        .route(path::NUMBER_CHOICE, post(number_choice))
        .route(path::NUMBER_INPUT, post(number_input))
        .route(path::NUMBER_CONFIRM, post(number_confirm))
        .route(path::CONFIRM, post(confirm))
        .route(path::OUTBOUND, post(outbound))
        .route(path::OUTBOUND_STATUS, post(outbound_status))
}

async fn step(state: &AppState, step: CallbackStep, form: &CallbackForm) -> VoiceResponse {
    let session = CallSession::from_form(form);
    state.callback.respond(step, &session).await
}

async fn voice(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    info!(
        call_id = form.call_sid.as_deref().unwrap_or("-"),
        from = form.from.as_deref().unwrap_or("-"),
        "incoming callback call"
    );
    step(&state, CallbackStep::Greeting, &form).await
}

async fn menu(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    step(&state, CallbackStep::MenuChoice, &form).await
}

async fn start(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    step(&state, CallbackStep::ReservationStart, &form).await
}

async fn number_choice(
    State(state): State<AppState>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    step(&state, CallbackStep::NumberSourceChoice, &form).await
}

async fn number_input(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    let attempt = params.attempt.unwrap_or(1);
    step(&state, CallbackStep::NumberEntry { attempt }, &form).await
}

async fn number_confirm(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    let number = params.number;
    step(&state, CallbackStep::NumberConfirm { number }, &form).await
}

async fn confirm(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    let number = params.number;
    step(&state, CallbackStep::Confirmed { number }, &form).await
}

/// The answered leg of a callback placed through `/execute-callback`.
async fn outbound(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> VoiceResponse {
    let reservation_id = params.reservation_id;
    step(&state, CallbackStep::Resume { reservation_id }, &form).await
}

async fn outbound_status(
    State(state): State<AppState>,
    Query(params): Query<StepParams>,
    Form(form): Form<CallbackForm>,
) -> Response {
    let Some(reservation_id) = params.reservation_id.filter(|id| !id.is_empty()) else {
        return FlowError::InvalidInput("reservationId is required".to_string()).into_response();
    };
    let call_status = form.call_status.unwrap_or_default();
    match state
        .callback
        .on_outbound_status(&reservation_id, &call_status)
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
    use crate::store::reservations::{Reservation, ReservationStatus};
    use chrono::Utc;

    fn form(call_sid: &str, from: &str, digits: Option<&str>) -> CallbackForm {
        CallbackForm {
            call_sid: Some(call_sid.to_string()),
            from: Some(from.to_string()),
            digits: digits.map(str::to_string),
            ..Default::default()
        }
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_voice_renders_menu_gather() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let response = voice(State(state), Form(form("CA1", "+819011112222", None)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/xml");
        let xml = body(response).await;
        assert!(xml.contains("action=\"/callback/menu\""));
        assert!(xml.ends_with("<Redirect method=\"POST\">/callback/menu</Redirect></Response>"));
    }

    #[tokio::test]
    async fn test_number_input_uses_attempt_param() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let params = StepParams {
            attempt: Some(1),
            ..Default::default()
        };
        let response = number_input(
            State(state),
            Query(params),
            Form(form("CA1", "+819011112222", Some("12#"))),
        )
        .await;
        // one attempt by default: invalid entry falls back to the caller's number
        assert_eq!(
            response.redirect_target(),
            Some("/callback/confirm?number=%2B819011112222")
        );
    }

    #[tokio::test]
    async fn test_outbound_status_requires_reservation_id() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let response = outbound_status(
            State(state),
            Query(StepParams::default()),
            Form(CallbackForm::default()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_outbound_status_marks_completed() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let mut reservation = Reservation::new("CA7", "+819011112222", "+819011112222", Utc::now(), 30);
        reservation.status = ReservationStatus::Calling;
        state
            .callback
            .reservations()
            .create_if_absent(reservation)
            .await
            .unwrap();

        let params = StepParams {
            reservation_id: Some("CA7".to_string()),
            ..Default::default()
        };
        let status_form = CallbackForm {
            call_sid: Some("CAout".to_string()),
            call_status: Some("completed".to_string()),
            ..Default::default()
        };
        let response = outbound_status(State(state.clone()), Query(params), Form(status_form)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let stored = state.callback.reservations().get("CA7").await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Completed);
    }

    #[tokio::test]
    async fn test_outbound_status_unknown_reservation() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let params = StepParams {
            reservation_id: Some("missing".to_string()),
            ..Default::default()
        };
        let status_form = CallbackForm {
            call_status: Some("completed".to_string()),
            ..Default::default()
        };
        let response = outbound_status(State(state), Query(params), Form(status_form)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
