//! Callback reservation flow.
//!
//! A caller who does not want to wait on hold leaves a number to be called
//! back on. Every step is one carrier callback; the step is named by the
//! route, the chosen number travels in the `number` query parameter.
//!
//! ```text
//! Greeting → MenuChoice ──"2"/timeout──→ queue wait
//!                │ "1"/other
//!                ↓
//!        ReservationStart → NumberSourceChoice ──"1"/timeout/other──┐
//!                                  │ "2"                             │
//!                                  ↓                                 │
//!                             NumberEntry ──invalid/timeout──────────┤
//!                                  │ valid                           │
//!                                  ↓                                 ↓
//!                            NumberConfirm ──────────────────────→ Confirmed
//! ```
//!
//! Later an operator triggers [`CallbackFlow::execute_callback`], which
//! places the outbound call that resumes at [`CallbackStep::Resume`].

use super::directive::{target, Collect, VoiceResponse};
use super::phone::{PhoneNormalizer, PhoneNumber};
use super::prompts;
use super::session::{CallSession, FlowInput};
use crate::carrier::{CallPlacer, Messenger, OutboundCall};
use crate::config::{Config, FlowPolicy, VoiceConfig};
use crate::error::{FlowError, FlowResult};
use crate::store::reservations::{Reservation, ReservationStatus, ReservationStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod path {
    pub const VOICE: &str = "/callback/voice";
    pub const MENU: &str = "/callback/menu";
    pub const START: &str = "/callback/start";
    pub const NUMBER_CHOICE: &str = "/callback/number-choice";
    pub const NUMBER_INPUT: &str = "/callback/number-input";
    pub const NUMBER_CONFIRM: &str = "/callback/number-confirm";
    pub const CONFIRM: &str = "/callback/confirm";
    pub const OUTBOUND: &str = "/callback/outbound";
    pub const OUTBOUND_STATUS: &str = "/callback/outbound-status";
}

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStep {
    /// Inbound call arrives.
    Greeting,
    /// Caller picked between a callback and waiting.
    MenuChoice,
    ReservationStart,
    /// Caller picked their own number or a different one.
    NumberSourceChoice,
    /// Caller typed a number; `attempt` counts from 1.
    NumberEntry { attempt: u32 },
    /// Caller answered the read-back of `number`.
    NumberConfirm { number: Option<String> },
    /// Terminal: persist the reservation for `number`.
    Confirmed { number: Option<String> },
    /// The outbound callback call was answered.
    Resume { reservation_id: Option<String> },
}

impl CallbackStep {
    pub fn name(&self) -> &'static str {
        match self {
            CallbackStep::Greeting => "greeting",
            CallbackStep::MenuChoice => "menu_choice",
            CallbackStep::ReservationStart => "reservation_start",
            CallbackStep::NumberSourceChoice => "number_source_choice",
            CallbackStep::NumberEntry { .. } => "number_entry",
            CallbackStep::NumberConfirm { .. } => "number_confirm",
            CallbackStep::Confirmed { .. } => "confirmed",
            CallbackStep::Resume { .. } => "resume",
        }
    }
}

pub struct CallbackFlow {
    voice: VoiceConfig,
    policy: FlowPolicy,
    phone: PhoneNormalizer,
    reservations: Arc<ReservationStore>,
    messenger: Arc<dyn Messenger>,
    placer: Arc<dyn CallPlacer>,
}

impl CallbackFlow {
    pub fn new(
        config: &Config,
        reservations: Arc<ReservationStore>,
        messenger: Arc<dyn Messenger>,
        placer: Arc<dyn CallPlacer>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            voice: config.voice.clone(),
            policy: config.policy.clone(),
            phone: PhoneNormalizer::new(&config.phone)?,
            reservations,
            messenger,
            placer,
        })
    }

    pub fn reservations(&self) -> &Arc<ReservationStore> {
        &self.reservations
    }

    fn response(&self) -> VoiceResponse {
        VoiceResponse::new(&self.voice)
    }

    pub async fn respond(&self, step: CallbackStep, session: &CallSession) -> VoiceResponse {
        debug!(
            call_id = %session.call_id,
            step = step.name(),
            input = ?session.input,
            "callback step"
        );
        match step {
            CallbackStep::Greeting => self.greeting(session),
            CallbackStep::MenuChoice => self.menu_choice(session),
            CallbackStep::ReservationStart => self.reservation_start(),
            CallbackStep::NumberSourceChoice => self.number_source_choice(session),
            CallbackStep::NumberEntry { attempt } => self.number_entry(session, attempt.max(1)),
            CallbackStep::NumberConfirm { number } => {
                self.number_confirm(session, number.as_deref())
            }
            CallbackStep::Confirmed { number } => self.confirmed(session, number.as_deref()).await,
            CallbackStep::Resume { reservation_id } => self.resume(reservation_id.as_deref()).await,
        }
    }

    fn greeting(&self, session: &CallSession) -> VoiceResponse {
        info!(call_id = %session.call_id, caller = %session.caller, "callback line call");
        self.response()
            .say(prompts::WELCOME)
            .pause(1)
            .say(prompts::LINES_BUSY)
            .pause(1)
            .gather(
                Collect::Digits(1),
                path::MENU,
                self.policy.menu_timeout_secs,
                prompts::MENU,
            )
            .redirect(path::MENU)
    }

    fn queue_wait(&self) -> VoiceResponse {
        self.response()
            .say(prompts::QUEUE_WAIT)
            .play_looped(&self.voice.hold_music_url, 0)
    }

    fn menu_choice(&self, session: &CallSession) -> VoiceResponse {
        match session.input.digits() {
            Some("1") => self.response().redirect(path::START),
            Some("2") | None => self.queue_wait(),
            Some(d) => {
                debug!(call_id = %session.call_id, digits = %d, "invalid menu choice");
                self.response()
                    .say(prompts::MENU_INVALID)
                    .redirect(path::START)
            }
        }
    }

    fn reservation_start(&self) -> VoiceResponse {
        self.response()
            .say(prompts::RESERVATION_START)
            .pause(1)
            .gather(
                Collect::Digits(1),
                path::NUMBER_CHOICE,
                self.policy.menu_timeout_secs,
                prompts::NUMBER_SOURCE,
            )
            .redirect(path::NUMBER_CHOICE)
    }

    fn confirm_target(number: &str) -> String {
        target(path::CONFIRM, &[("number", number)])
    }

    fn number_entry_prompt(&self, response: VoiceResponse, attempt: u32) -> VoiceResponse {
        let action = target(path::NUMBER_INPUT, &[("attempt", attempt.to_string().as_str())]);
        response
            .gather(
                Collect::UntilKey('#'),
                action.clone(),
                self.policy.number_entry_timeout_secs,
                prompts::NUMBER_ENTRY,
            )
            .redirect(action)
    }

    fn number_source_choice(&self, session: &CallSession) -> VoiceResponse {
        match session.input.digits() {
            Some("2") => self.number_entry_prompt(self.response(), 1),
            Some("1") | None => self
                .response()
                .say(prompts::USE_CALLER_NUMBER)
                .redirect(Self::confirm_target(&session.caller)),
            Some(_) => self
                .response()
                .say(prompts::NUMBER_SOURCE_INVALID)
                .redirect(Self::confirm_target(&session.caller)),
        }
    }

    fn number_entry(&self, session: &CallSession, attempt: u32) -> VoiceResponse {
        let raw = match &session.input {
            FlowInput::Timeout => {
                return self
                    .response()
                    .say(prompts::NUMBER_ENTRY_TIMEOUT)
                    .redirect(Self::confirm_target(&session.caller));
            }
            FlowInput::Digits(d) => d,
        };
        match self.phone.parse(raw) {
            Ok(number) => {
                let readable = self.phone.readable(number.as_str());
                let action = target(path::NUMBER_CONFIRM, &[("number", number.as_str())]);
                debug!(call_id = %session.call_id, number = %number, "number entered");
                self.response()
                    .gather(
                        Collect::Digits(1),
                        action.clone(),
                        self.policy.menu_timeout_secs,
                        prompts::number_readback(&readable),
                    )
                    .redirect(action)
            }
            Err(e) if attempt < self.policy.number_entry_attempts => {
                debug!(call_id = %session.call_id, attempt, "re-prompting number entry: {}", e);
                self.number_entry_prompt(
                    self.response().say(prompts::NUMBER_INVALID_RETRY),
                    attempt + 1,
                )
            }
            Err(e) => {
                info!(call_id = %session.call_id, attempt, "falling back to caller number: {}", e);
                self.response()
                    .say(prompts::NUMBER_INVALID_FALLBACK)
                    .redirect(Self::confirm_target(&session.caller))
            }
        }
    }

    fn number_confirm(&self, session: &CallSession, number: Option<&str>) -> VoiceResponse {
        match number {
            Some(number) if session.input.is("1") => {
                self.response().redirect(Self::confirm_target(number))
            }
            _ => self
                .response()
                .say(prompts::USE_CALLER_NUMBER)
                .redirect(Self::confirm_target(&session.caller)),
        }
    }

    /// The requested number if it validates, else the caller's own.
    fn resolve_number(&self, requested: Option<&str>, caller: &str) -> Option<PhoneNumber> {
        if let Some(number) = requested.and_then(|n| self.phone.parse(n).ok()) {
            return Some(number);
        }
        self.phone.parse(caller).ok()
    }

    async fn confirmed(&self, session: &CallSession, number: Option<&str>) -> VoiceResponse {
        let Some(number) = self.resolve_number(number, &session.caller) else {
            warn!(
                call_id = %session.call_id,
                caller = %session.caller,
                "no valid callback number, reservation not created"
            );
            return self.response().say(prompts::RESERVATION_FAILED).hangup();
        };

        let reservation = Reservation::new(
            &session.call_id,
            &session.caller,
            number.as_str(),
            Utc::now(),
            self.policy.callback_eta_minutes,
        );
        let (reservation, created) = match self.reservations.create_if_absent(reservation).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(call_id = %session.call_id, "failed to store reservation: {}", e);
                return self.response().say(prompts::SYSTEM_ERROR).hangup();
            }
        };

        let readable = self.phone.readable(&reservation.callback_number);
        let code = reservation.code();
        if created {
            self.send_confirmation(&reservation, &readable, &code);
        } else {
            debug!(reservation = %reservation.id, "reservation already confirmed");
        }

        self.response()
            .say(prompts::reservation_confirmed(&readable))
            .pause(1)
            .say(prompts::callback_eta(self.policy.callback_eta_minutes))
            .say(prompts::reservation_code(&code))
            .pause(1)
            .say(prompts::GOODBYE)
            .hangup()
    }

    /// Sends the confirmation text in the background; the reservation is
    /// already stored and the caller's response does not wait for it.
    fn send_confirmation(&self, reservation: &Reservation, readable: &str, code: &str) {
        let body =
            prompts::confirmation_message(readable, code, self.policy.callback_eta_minutes);
        let messenger = self.messenger.clone();
        let id = reservation.id.clone();
        let to = reservation.callback_number.clone();
        tokio::spawn(async move {
            deliver_confirmation(messenger.as_ref(), &id, &to, &body, MESSAGE_TIMEOUT).await
        });
    }

    async fn resume(&self, reservation_id: Option<&str>) -> VoiceResponse {
        let reservation = match reservation_id {
            Some(id) => self.reservations.get(id).await,
            None => None,
        };
        let Some(reservation) = reservation else {
            warn!(reservation = ?reservation_id, "resumed call without a known reservation");
            return self.response().say(prompts::GENERIC_GREETING).hangup();
        };
        info!(reservation = %reservation.id, "callback answered");
        let response = self
            .response()
            .say(prompts::resume_greeting(&reservation.code()))
            .pause(1)
            .say(prompts::CONNECTING_OPERATOR);
        match &self.policy.operator_number {
            Some(operator) => response.dial_number(operator),
            None => response.play_looped(&self.voice.hold_music_url, 0),
        }
    }

    /// Places the callback call for a pending reservation and marks it calling.
    ///
    /// The reservation stays locked from the status check until the new
    /// status is stored, so concurrent requests for the same id place at
    /// most one call.
    pub async fn execute_callback(&self, id: &str, base_url: &str) -> FlowResult<Reservation> {
        let mut entry = self.reservations.lock_existing(id).await?;
        let current = entry
            .get()
            .cloned()
            .ok_or_else(|| FlowError::not_found("reservation", id))?;
        if current.status != ReservationStatus::Pending {
            return Err(FlowError::InvalidState {
                id: id.to_string(),
                status: current.status.to_string(),
            });
        }

        let base_url = base_url.trim_end_matches('/');
        let call = OutboundCall {
            to: current.callback_number.clone(),
            url: format!(
                "{}{}",
                base_url,
                target(path::OUTBOUND, &[("reservationId", id)])
            ),
            status_callback: format!(
                "{}{}",
                base_url,
                target(path::OUTBOUND_STATUS, &[("reservationId", id)])
            ),
        };
        let call_sid = self.placer.place_call(&call).await.map_err(|e| {
            warn!(reservation = %id, to = %call.to, "failed to place callback: {}", e);
            FlowError::DownstreamFailure(e.to_string())
        })?;

        let updated = Reservation {
            status: ReservationStatus::Calling,
            call_sid: Some(call_sid),
            callback_started_at: Some(Utc::now()),
            ..current
        };
        entry.put(updated.clone()).await?;
        info!(
            reservation = %id,
            call_sid = ?updated.call_sid,
            to = %updated.callback_number,
            "callback executing"
        );
        Ok(updated)
    }

    /// Final carrier status of the outbound callback call.
    pub async fn on_outbound_status(
        &self,
        reservation_id: &str,
        call_status: &str,
    ) -> FlowResult<Option<Reservation>> {
        let next = match call_status {
            "completed" => ReservationStatus::Completed,
            "busy" | "no-answer" | "failed" | "canceled" => ReservationStatus::Failed,
            other => {
                debug!(reservation = %reservation_id, status = other, "ignoring call status");
                return Ok(None);
            }
        };
        self.reservations.advance(reservation_id, next).await
    }

    /// Caller-facing form of a stored number, e.g. `090-1234-5678`.
    pub fn readable_number(&self, number: &str) -> String {
        self.phone.readable(number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Failed,
    TimedOut,
}

async fn deliver_confirmation(
    messenger: &dyn Messenger,
    reservation: &str,
    to: &str,
    body: &str,
    limit: Duration,
) -> Delivery {
    match tokio::time::timeout(limit, messenger.send_message(to, body)).await {
        Ok(Ok(())) => {
            info!(reservation, to, "confirmation sent");
            Delivery::Sent
        }
        Ok(Err(e)) => {
            warn!(reservation, to, "confirmation failed: {}", e);
            Delivery::Failed
        }
        Err(_) => {
            warn!(reservation, to, ?limit, "confirmation timed out");
            Delivery::TimedOut
        }
    }
}
