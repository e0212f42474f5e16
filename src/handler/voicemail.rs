use crate::app::AppState;
use crate::flow::directive::VoiceResponse;
use crate::flow::session::{CallSession, CallbackForm};
use crate::flow::voicemail::{path, RecordedMessage};
use axum::{
    extract::{Form, State},
    routing::post,
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(path::VOICE, post(voice))
        .route(path::COMPLETE, post(complete))
}

async fn voice(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    state.voicemail.prompt(&CallSession::from_form(&form))
}

async fn complete(State(state): State<AppState>, Form(form): Form<CallbackForm>) -> VoiceResponse {
    let session = CallSession::from_form(&form);
    let message = RecordedMessage {
        recording_id: form.recording_sid.as_deref(),
        url: form.recording_url.as_deref(),
        duration: form.recording_duration.as_deref(),
    };
    state.voicemail.complete(&session, message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;
    use crate::carrier::{MockCallPlacer, MockMessenger};
    use axum::{http::StatusCode, response::IntoResponse};

    #[tokio::test]
    async fn test_voice_renders_record() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let form = CallbackForm {
            call_sid: Some("CAvm".to_string()),
            from: Some("+819011112222".to_string()),
            ..Default::default()
        };
        let response = voice(State(state), Form(form)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let xml = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(xml.contains(
            "<Record maxLength=\"60\" finishOnKey=\"#\" playBeep=\"true\" action=\"/voicemail/complete\" method=\"POST\"/>"
        ));
    }

    #[tokio::test]
    async fn test_complete_stores_voicemail() {
        let state = testing::state(MockMessenger::new(), MockCallPlacer::new()).await;
        let form = CallbackForm {
            call_sid: Some("CAvm".to_string()),
            from: Some("+819011112222".to_string()),
            recording_sid: Some("RE9".to_string()),
            recording_url: Some("https://recordings.example.com/RE9".to_string()),
            recording_duration: Some("8".to_string()),
            ..Default::default()
        };
        let response = complete(State(state.clone()), Form(form)).await;
        assert!(response.ends_with_hangup());
        let stored = state.voicemail.voicemails().list().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].recording_url, "https://recordings.example.com/RE9");
        assert_eq!(stored[0].duration_seconds, 8);
    }
}
