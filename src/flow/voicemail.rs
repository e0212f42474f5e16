//! Voicemail line: a prompt, one recording, then a completion callback
//! that stores where the carrier put the audio.

use super::directive::VoiceResponse;
use super::prompts;
use super::session::CallSession;
use crate::config::{Config, VoiceConfig};
use crate::store::voicemails::{Voicemail, VoicemailStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod path {
    pub const VOICE: &str = "/voicemail";
    pub const COMPLETE: &str = "/voicemail/complete";
}

/// Fields of the carrier's record-completion callback.
#[derive(Debug, Clone, Default)]
pub struct RecordedMessage<'a> {
    pub recording_id: Option<&'a str>,
    pub url: Option<&'a str>,
    pub duration: Option<&'a str>,
}

pub struct VoicemailFlow {
    voice: VoiceConfig,
    max_secs: u32,
    voicemails: Arc<VoicemailStore>,
}

impl VoicemailFlow {
    pub fn new(config: &Config, voicemails: Arc<VoicemailStore>) -> Self {
        Self {
            voice: config.voice.clone(),
            max_secs: config.policy.voicemail_max_secs,
            voicemails,
        }
    }

    pub fn voicemails(&self) -> &Arc<VoicemailStore> {
        &self.voicemails
    }

    fn response(&self) -> VoiceResponse {
        VoiceResponse::new(&self.voice)
    }

    pub fn prompt(&self, session: &CallSession) -> VoiceResponse {
        info!(call_id = %session.call_id, caller = %session.caller, "voicemail call");
        self.response()
            .say(prompts::voicemail_prompt(self.max_secs))
            .record(self.max_secs, '#', true, path::COMPLETE)
    }

    pub async fn complete(&self, session: &CallSession, message: RecordedMessage<'_>) -> VoiceResponse {
        let Some(url) = message.url.filter(|u| !u.is_empty()) else {
            warn!(call_id = %session.call_id, "record finished without a recording");
            return self.response().say(prompts::VOICEMAIL_EMPTY).hangup();
        };
        let voicemail = Voicemail {
            id: message
                .recording_id
                .filter(|id| !id.is_empty())
                .unwrap_or(&session.call_id)
                .to_string(),
            call_id: session.call_id.clone(),
            caller: session.caller.clone(),
            recording_url: url.to_string(),
            duration_seconds: message.duration.and_then(|d| d.parse().ok()).unwrap_or(0),
            created_at: Utc::now(),
        };
        match self.voicemails.save(voicemail).await {
            Ok(_) => self.response().say(prompts::VOICEMAIL_SAVED).hangup(),
            Err(e) => {
                error!(call_id = %session.call_id, "failed to store voicemail: {}", e);
                self.response().say(prompts::SYSTEM_ERROR).hangup()
            }
        }
    }
}
