//! Conference room flow.
//!
//! ```text
//! RoomCodeEntry → RoomLookup ──unknown──→ RoomCodeEntry
//!                     │ ├─ full ─────→ hangup
//!                     │ └─ pin room ─→ PinVerify ──wrong, attempts left──┐
//!                     │ open              │ correct      ↑              │
//!                     ↓                   ↓              └──────────────┘
//!                    Join ←───────────────┘        wrong, no attempts → hangup
//! ```
//!
//! The room code and PIN attempt travel as `room` and `attempt` query
//! parameters. Occupancy is tracked from the carrier's conference events.

use super::directive::{target, Collect, ConferenceBridge, VoiceResponse};
use super::prompts;
use super::session::{CallSession, FlowInput};
use crate::config::{Config, FlowPolicy, VoiceConfig};
use crate::error::{FlowError, FlowResult};
use crate::store::rooms::{Recording, RoomDefinition, RoomRegistry};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod path {
    pub const VOICE: &str = "/conference/voice";
    pub const JOIN: &str = "/conference/join";
    pub const VERIFY_PIN: &str = "/conference/verify-pin";
    pub const ENTER: &str = "/conference/enter";
    pub const STATUS: &str = "/conference/status";
    pub const RECORDING_STATUS: &str = "/conference/recording-status";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConferenceStep {
    RoomCodeEntry,
    /// The caller typed a room code, or the code gather timed out.
    RoomLookup,
    PinVerify {
        room: Option<String>,
        attempt: u32,
    },
    Join {
        room: Option<String>,
    },
}

/// A carrier conference event, from `StatusCallbackEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConferenceEvent {
    ConferenceStart,
    ConferenceEnd,
    ParticipantJoin,
    ParticipantLeave,
    Other(String),
}

impl From<&str> for ConferenceEvent {
    fn from(value: &str) -> Self {
        match value {
            "conference-start" => ConferenceEvent::ConferenceStart,
            "conference-end" => ConferenceEvent::ConferenceEnd,
            "participant-join" => ConferenceEvent::ParticipantJoin,
            "participant-leave" => ConferenceEvent::ParticipantLeave,
            other => ConferenceEvent::Other(other.to_string()),
        }
    }
}

pub struct ConferenceFlow {
    voice: VoiceConfig,
    policy: FlowPolicy,
    rooms: Arc<RoomRegistry>,
}

impl ConferenceFlow {
    pub fn new(config: &Config, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            voice: config.voice.clone(),
            policy: config.policy.clone(),
            rooms,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    fn response(&self) -> VoiceResponse {
        VoiceResponse::new(&self.voice)
    }

    /// `base_url` makes the conference event callbacks absolute.
    pub async fn respond(
        &self,
        step: ConferenceStep,
        session: &CallSession,
        base_url: &str,
    ) -> VoiceResponse {
        debug!(call_id = %session.call_id, step = ?step, input = ?session.input, "conference step");
        match step {
            ConferenceStep::RoomCodeEntry => self.room_code_entry(session),
            ConferenceStep::RoomLookup => self.room_lookup(session).await,
            ConferenceStep::PinVerify { room, attempt } => {
                self.pin_verify(session, room.as_deref(), attempt.max(1))
            }
            ConferenceStep::Join { room } => self.join(session, room.as_deref(), base_url).await,
        }
    }

    fn room_code_prompt(&self, response: VoiceResponse) -> VoiceResponse {
        response
            .gather(
                Collect::Digits(self.policy.room_code_length),
                path::JOIN,
                self.policy.room_code_timeout_secs,
                prompts::room_code_prompt(self.policy.room_code_length),
            )
            .redirect(path::JOIN)
    }

    fn room_code_entry(&self, session: &CallSession) -> VoiceResponse {
        info!(call_id = %session.call_id, caller = %session.caller, "conference line call");
        self.room_code_prompt(self.response().say(prompts::CONFERENCE_WELCOME))
    }

    fn invalid_room(&self) -> VoiceResponse {
        self.response()
            .say(prompts::ROOM_INVALID)
            .redirect(path::VOICE)
    }

    fn pin_prompt(&self, response: VoiceResponse, room: &RoomDefinition, attempt: u32) -> VoiceResponse {
        let action = target(
            path::VERIFY_PIN,
            &[("room", room.code.as_str()), ("attempt", attempt.to_string().as_str())],
        );
        response
            .gather(
                Collect::Digits(self.policy.pin_length),
                action.clone(),
                self.policy.pin_timeout_secs,
                prompts::pin_prompt(&room.name, self.policy.pin_length),
            )
            .redirect(action)
    }

    fn enter_target(room: &RoomDefinition) -> String {
        target(path::ENTER, &[("room", room.code.as_str())])
    }

    async fn room_lookup(&self, session: &CallSession) -> VoiceResponse {
        let code = match &session.input {
            FlowInput::Timeout => {
                return self
                    .response()
                    .say(prompts::ROOM_CODE_TIMEOUT)
                    .redirect(path::VOICE);
            }
            FlowInput::Digits(d) => d.trim_end_matches('#'),
        };
        let room = match self.rooms.lookup(code) {
            Ok(room) => room,
            Err(e) => {
                info!(call_id = %session.call_id, "{}", e);
                return self.invalid_room();
            }
        };
        let occupancy = self.rooms.occupancy(&room.code).await;
        if occupancy >= room.max_participants {
            info!(
                call_id = %session.call_id,
                room = %room.code,
                occupancy,
                "room full at lookup"
            );
            return self.response().say(prompts::room_full(&room.name)).hangup();
        }
        if room.requires_pin() {
            self.pin_prompt(self.response(), room, 1)
        } else {
            self.response().redirect(Self::enter_target(room))
        }
    }

    fn pin_verify(&self, session: &CallSession, room: Option<&str>, attempt: u32) -> VoiceResponse {
        let Some(room) = room.and_then(|code| self.rooms.definition(code)) else {
            return self.invalid_room();
        };
        let entered = match &session.input {
            FlowInput::Timeout => {
                info!(call_id = %session.call_id, room = %room.code, "PIN entry timed out");
                return self.response().say(prompts::PIN_TIMEOUT).hangup();
            }
            FlowInput::Digits(d) => d.trim_end_matches('#'),
        };
        if room.check_pin(entered) {
            debug!(call_id = %session.call_id, room = %room.code, attempt, "PIN accepted");
            return self.response().redirect(Self::enter_target(room));
        }
        if attempt < self.policy.pin_max_attempts {
            debug!(call_id = %session.call_id, room = %room.code, attempt, "wrong PIN");
            return self.pin_prompt(self.response().say(prompts::PIN_RETRY), room, attempt + 1);
        }
        let denied = FlowError::AccessDenied(room.code.clone());
        warn!(call_id = %session.call_id, attempt, "{}", denied);
        self.response().say(prompts::ACCESS_DENIED).hangup()
    }

    fn bridge(&self, room: &RoomDefinition, base_url: &str) -> ConferenceBridge {
        let base_url = base_url.trim_end_matches('/');
        ConferenceBridge {
            name: room.conference_name(),
            max_participants: room.max_participants,
            record: true,
            wait_url: Some(self.voice.hold_music_url.clone()),
            status_callback: format!(
                "{}{}",
                base_url,
                target(path::STATUS, &[("room", room.code.as_str())])
            ),
            recording_status_callback: format!(
                "{}{}",
                base_url,
                target(path::RECORDING_STATUS, &[("room", room.code.as_str())])
            ),
        }
    }

    async fn join(&self, session: &CallSession, room: Option<&str>, base_url: &str) -> VoiceResponse {
        let Some(room) = room.and_then(|code| self.rooms.definition(code)) else {
            return self.invalid_room();
        };
        match self
            .rooms
            .store()
            .try_join(room, &session.call_id, &session.caller)
            .await
        {
            Ok(outcome) => {
                if outcome.rejoined {
                    info!(
                        call_id = %session.call_id,
                        room = %room.code,
                        "call re-entered the room, seat kept"
                    );
                }
                let count = if outcome.participants <= 1 {
                    prompts::FIRST_PARTICIPANT.to_string()
                } else {
                    prompts::participant_count(outcome.participants)
                };
                self.response()
                    .say(prompts::connecting_room(&room.name))
                    .say(count)
                    .join_conference(self.bridge(room, base_url))
            }
            Err(FlowError::CapacityExceeded { .. }) => {
                info!(call_id = %session.call_id, room = %room.code, "room filled before join");
                self.response().say(prompts::room_full(&room.name)).hangup()
            }
            Err(e) => {
                error!(call_id = %session.call_id, room = %room.code, "join failed: {}", e);
                self.response().say(prompts::SYSTEM_ERROR).hangup()
            }
        }
    }

    pub async fn on_status(&self, room: &str, event: &str, call_id: Option<&str>) -> FlowResult<()> {
        let event = ConferenceEvent::from(event);
        match &event {
            ConferenceEvent::ParticipantLeave => {
                let call_id = call_id.ok_or_else(|| {
                    FlowError::InvalidInput("participant-leave without CallSid".to_string())
                })?;
                if !self.rooms.store().leave(room, call_id).await? {
                    debug!(room, call_id, "leave for call not in room");
                }
            }
            ConferenceEvent::ConferenceEnd => {
                self.rooms.store().end_conference(room).await?;
            }
            ConferenceEvent::ConferenceStart | ConferenceEvent::ParticipantJoin => {
                info!(room, call_id = ?call_id, event = ?event, "conference event");
            }
            ConferenceEvent::Other(name) => {
                debug!(room, event = %name, "ignoring conference event");
            }
        }
        Ok(())
    }

    pub async fn on_recording(
        &self,
        room: &str,
        recording_id: Option<&str>,
        url: Option<&str>,
        duration: Option<&str>,
    ) -> FlowResult<bool> {
        let id = recording_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FlowError::InvalidInput("recording callback without RecordingSid".to_string()))?;
        let recording = Recording {
            id: id.to_string(),
            url: url.unwrap_or_default().to_string(),
            duration_seconds: duration.and_then(|d| d.parse().ok()).unwrap_or(0),
            created_at: Utc::now(),
        };
        self.rooms.store().add_recording(room, recording).await
    }
}
