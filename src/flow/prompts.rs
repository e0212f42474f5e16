//! Caller-facing wording.

pub const WELCOME: &str = "Thank you for calling customer support.";
pub const LINES_BUSY: &str =
    "All of our agents are currently busy. We can call you back instead of keeping you on hold.";
pub const MENU: &str =
    "To reserve a callback, press 1. To keep waiting on the line, press 2.";
pub const QUEUE_WAIT: &str =
    "Thank you for waiting. Your call will be answered in the order it was received.";
pub const MENU_INVALID: &str = "That is not a valid choice. Let's set up your callback reservation.";

pub const RESERVATION_START: &str = "Let's set up your callback reservation.";
pub const NUMBER_SOURCE: &str = "To be called back at the number you are calling from, press 1. To enter a different number, press 2.";
pub const USE_CALLER_NUMBER: &str = "We will call you back at the number you are calling from.";
pub const NUMBER_SOURCE_INVALID: &str =
    "That is not a valid choice. We will call you back at the number you are calling from.";

pub const NUMBER_ENTRY: &str = "Please enter the number you would like us to call, starting with the area code, followed by the pound key.";
pub const NUMBER_ENTRY_TIMEOUT: &str =
    "We did not receive a number. We will call you back at the number you are calling from.";
pub const NUMBER_INVALID_RETRY: &str = "That number is not valid. Please try again.";
pub const NUMBER_INVALID_FALLBACK: &str =
    "That number is not valid. We will call you back at the number you are calling from.";

pub fn number_readback(readable: &str) -> String {
    format!(
        "You entered {}. To confirm, press 1. To use the number you are calling from instead, press 2.",
        readable
    )
}

pub fn reservation_confirmed(readable: &str) -> String {
    format!("Your callback to {} has been reserved.", readable)
}

pub fn callback_eta(minutes: i64) -> String {
    format!(
        "We will call you within {} minutes. Here is your reservation code.",
        minutes
    )
}

pub fn reservation_code(code: &str) -> String {
    format!(
        "Your reservation code is {}. Please mention it if you contact us.",
        spell_out(code)
    )
}

pub const GOODBYE: &str = "Thank you for calling. Goodbye.";
pub const RESERVATION_FAILED: &str =
    "We are sorry, we could not complete your reservation. Please call again later.";

pub fn confirmation_message(readable: &str, code: &str, minutes: i64) -> String {
    format!(
        "Callback reserved\nNumber: {}\nReservation code: {}\nWe will call you within {} minutes.",
        readable, code, minutes
    )
}

pub fn resume_greeting(code: &str) -> String {
    format!(
        "Thank you for waiting. This is your callback for reservation {}.",
        spell_out(code)
    )
}

pub const CONNECTING_OPERATOR: &str = "Connecting you to an operator. Please hold.";
pub const GENERIC_GREETING: &str = "Thank you for calling customer support.";

pub const CONFERENCE_WELCOME: &str = "Welcome to the conference service.";

pub fn room_code_prompt(length: usize) -> String {
    format!("Please enter the {} digit room code.", length)
}

pub const ROOM_CODE_TIMEOUT: &str = "We did not receive a room code.";
pub const ROOM_INVALID: &str = "That room code is not valid. Please try again.";

pub fn room_full(name: &str) -> String {
    format!("{} is full. Please try again later.", name)
}

pub fn pin_prompt(name: &str, length: usize) -> String {
    format!("{} requires a PIN. Please enter the {} digit PIN.", name, length)
}

pub const PIN_RETRY: &str = "That PIN is incorrect. Please try again.";
pub const PIN_TIMEOUT: &str = "We did not receive a PIN. Goodbye.";
pub const ACCESS_DENIED: &str = "Access denied. Goodbye.";

pub fn connecting_room(name: &str) -> String {
    format!("Connecting you to {}.", name)
}

pub const FIRST_PARTICIPANT: &str =
    "You are the first participant. Please wait for the others to join.";

pub fn participant_count(count: usize) -> String {
    format!("There are {} participants in the room.", count)
}

pub fn voicemail_prompt(max_secs: u32) -> String {
    format!(
        "Please leave a message after the beep. You have up to {} seconds. Press the pound key when you are finished.",
        max_secs
    )
}

pub const VOICEMAIL_SAVED: &str =
    "Your message has been saved. We will call you back during business hours. Thank you.";
pub const VOICEMAIL_EMPTY: &str = "We did not receive a message. Goodbye.";

pub const SYSTEM_ERROR: &str = "We are sorry, a system error occurred. Please call again later.";

/// Separate characters so text-to-speech reads a code one symbol at a time.
pub fn spell_out(code: &str) -> String {
    code.chars()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
