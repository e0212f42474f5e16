//! Caller-facing flows. Each callback is answered from the step named by the
//! route, the carrier's form fields and whatever the stores hold; nothing
//! about a call lives in memory between requests.

pub mod callback;
pub mod conference;
pub mod directive;
pub mod phone;
pub mod prompts;
pub mod session;
pub mod voicemail;
