use serde::Deserialize;

/// Form fields posted by the carrier on every callback. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CallbackForm {
    pub call_sid: Option<String>,
    pub from: Option<String>,
    pub digits: Option<String>,
    pub status_callback_event: Option<String>,
    pub recording_sid: Option<String>,
    pub recording_url: Option<String>,
    pub recording_duration: Option<String>,
    pub call_status: Option<String>,
}

/// Step parameters threaded through callback URLs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepParams {
    pub number: Option<String>,
    pub room: Option<String>,
    pub attempt: Option<u32>,
    pub reservation_id: Option<String>,
}

/// What the caller did in the step that triggered this callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowInput {
    Digits(String),
    /// The gather ended without digits.
    Timeout,
}

impl FlowInput {
    pub fn from_digits(digits: Option<&str>) -> Self {
        match digits.map(str::trim) {
            Some(d) if !d.is_empty() => FlowInput::Digits(d.to_string()),
            _ => FlowInput::Timeout,
        }
    }

    pub fn digits(&self) -> Option<&str> {
        match self {
            FlowInput::Digits(d) => Some(d),
            FlowInput::Timeout => None,
        }
    }

    pub fn is(&self, key: &str) -> bool {
        self.digits() == Some(key)
    }
}

/// A call as seen by one callback. Rebuilt per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub call_id: String,
    pub caller: String,
    pub input: FlowInput,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, caller: impl Into<String>, input: FlowInput) -> Self {
        Self {
            call_id: call_id.into(),
            caller: caller.into(),
            input,
        }
    }

    /// A callback without `CallSid` gets a locally generated id so that keyed
    /// state never lands under an empty key.
    pub fn from_form(form: &CallbackForm) -> Self {
        let call_id = form
            .call_sid
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4().simple()));
        Self {
            call_id,
            caller: form.from.clone().unwrap_or_default(),
            input: FlowInput::from_digits(form.digits.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_field_names() {
        let form: CallbackForm = serde_urlencoded::from_str(
            "CallSid=CA123&From=%2B819011112222&Digits=1&AccountSid=AC1&CallStatus=in-progress",
        )
        .unwrap();
        assert_eq!(form.call_sid.as_deref(), Some("CA123"));
        assert_eq!(form.from.as_deref(), Some("+819011112222"));
        assert_eq!(form.call_status.as_deref(), Some("in-progress"));

        let session = CallSession::from_form(&form);
        assert_eq!(session.call_id, "CA123");
        assert!(session.input.is("1"));
    }

    #[test]
    fn test_missing_digits_is_timeout() {
        assert_eq!(FlowInput::from_digits(None), FlowInput::Timeout);
        assert_eq!(FlowInput::from_digits(Some("")), FlowInput::Timeout);
        assert_eq!(FlowInput::from_digits(Some("  ")), FlowInput::Timeout);
        assert_eq!(
            FlowInput::from_digits(Some("09012345678#")),
            FlowInput::Digits("09012345678#".to_string())
        );
    }

    #[test]
    fn test_missing_call_sid_gets_local_id() {
        let session = CallSession::from_form(&CallbackForm::default());
        assert!(session.call_id.starts_with("local-"));
        assert_eq!(session.caller, "");
    }

    #[test]
    fn test_step_params() {
        let params: StepParams =
            serde_urlencoded::from_str("room=2000&attempt=2&reservationId=CA9").unwrap();
        assert_eq!(params.room.as_deref(), Some("2000"));
        assert_eq!(params.attempt, Some(2));
        assert_eq!(params.reservation_id.as_deref(), Some("CA9"));
        assert!(params.number.is_none());
    }
}
