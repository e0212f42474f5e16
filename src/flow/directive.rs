//! Callback responses in the carrier's XML voice-markup vocabulary.
//!
//! ```text
//! <Response>
//!   <Say voice=".." language="..">..</Say>
//!   <Gather numDigits="1" action="/callback/menu" method="POST" timeout="10">..</Gather>
//!   <Redirect method="POST">/callback/menu</Redirect>
//! </Response>
//! ```

use crate::config::VoiceConfig;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use tracing::error;

/// How a gather decides it is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collect {
    /// Exactly this many digits.
    Digits(usize),
    /// Until the caller presses this key.
    UntilKey(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceBridge {
    pub name: String,
    pub max_participants: usize,
    pub record: bool,
    pub wait_url: Option<String>,
    pub status_callback: String,
    pub recording_status_callback: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Number(String),
    Conference(ConferenceBridge),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say {
        text: String,
        voice: String,
        language: String,
    },
    Pause {
        seconds: u32,
    },
    Gather {
        collect: Collect,
        action: String,
        timeout_secs: u32,
        prompt: Vec<Verb>,
    },
    Play {
        url: String,
        loops: Option<u32>,
    },
    Record {
        max_length_secs: u32,
        finish_on_key: char,
        play_beep: bool,
        action: String,
    },
    Redirect {
        target: String,
    },
    Dial(DialTarget),
    Hangup,
}

/// Builder for one callback response.
#[derive(Debug, Clone)]
pub struct VoiceResponse {
    voice: String,
    language: String,
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new(voice: &VoiceConfig) -> Self {
        Self {
            voice: voice.voice.clone(),
            language: voice.language.clone(),
            verbs: Vec::new(),
        }
    }

    fn speak(&self, text: &str) -> Verb {
        Verb::Say {
            text: text.to_string(),
            voice: self.voice.clone(),
            language: self.language.clone(),
        }
    }

    pub fn say(mut self, text: impl AsRef<str>) -> Self {
        let verb = self.speak(text.as_ref());
        self.verbs.push(verb);
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.verbs.push(Verb::Pause { seconds });
        self
    }

    /// Collect digits while `prompt` is spoken, posting them to `action`.
    pub fn gather(
        mut self,
        collect: Collect,
        action: impl Into<String>,
        timeout_secs: u32,
        prompt: impl AsRef<str>,
    ) -> Self {
        let prompt = vec![self.speak(prompt.as_ref())];
        self.verbs.push(Verb::Gather {
            collect,
            action: action.into(),
            timeout_secs,
            prompt,
        });
        self
    }

    pub fn play_looped(mut self, url: impl Into<String>, loops: u32) -> Self {
        self.verbs.push(Verb::Play {
            url: url.into(),
            loops: Some(loops),
        });
        self
    }

    pub fn record(
        mut self,
        max_length_secs: u32,
        finish_on_key: char,
        play_beep: bool,
        action: impl Into<String>,
    ) -> Self {
        self.verbs.push(Verb::Record {
            max_length_secs,
            finish_on_key,
            play_beep,
            action: action.into(),
        });
        self
    }

    pub fn redirect(mut self, target: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect {
            target: target.into(),
        });
        self
    }

    pub fn dial_number(mut self, number: impl Into<String>) -> Self {
        self.verbs.push(Verb::Dial(DialTarget::Number(number.into())));
        self
    }

    pub fn join_conference(mut self, bridge: ConferenceBridge) -> Self {
        self.verbs.push(Verb::Dial(DialTarget::Conference(bridge)));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    /// Everything that will be spoken, gather prompts included, joined by spaces.
    pub fn spoken_text(&self) -> String {
        fn collect<'a>(verbs: &'a [Verb], out: &mut Vec<&'a str>) {
            for verb in verbs {
                match verb {
                    Verb::Say { text, .. } => out.push(text),
                    Verb::Gather { prompt, .. } => collect(prompt, out),
                    _ => {}
                }
            }
        }
        let mut parts = Vec::new();
        collect(&self.verbs, &mut parts);
        parts.join(" ")
    }

    pub fn ends_with_hangup(&self) -> bool {
        matches!(self.verbs.last(), Some(Verb::Hangup))
    }

    pub fn redirect_target(&self) -> Option<&str> {
        self.verbs.iter().rev().find_map(|v| match v {
            Verb::Redirect { target } => Some(target.as_str()),
            _ => None,
        })
    }

    pub fn gather_action(&self) -> Option<&str> {
        self.verbs.iter().find_map(|v| match v {
            Verb::Gather { action, .. } => Some(action.as_str()),
            _ => None,
        })
    }

    pub fn to_xml(&self) -> anyhow::Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("Response")))?;
        for verb in &self.verbs {
            write_verb(&mut writer, verb)?;
        }
        writer.write_event(Event::End(BytesStart::new("Response").to_end()))?;
        let xml = writer.into_inner().into_inner();
        Ok(String::from_utf8(xml)?)
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn write_text_element(
    writer: &mut XmlWriter,
    elem: BytesStart<'_>,
    text: &str,
) -> anyhow::Result<()> {
    let end = elem.to_end().into_owned();
    writer.write_event(Event::Start(elem))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn write_verb(writer: &mut XmlWriter, verb: &Verb) -> anyhow::Result<()> {
    match verb {
        Verb::Say {
            text,
            voice,
            language,
        } => {
            let mut elem = BytesStart::new("Say");
            elem.push_attribute(("voice", voice.as_str()));
            elem.push_attribute(("language", language.as_str()));
            write_text_element(writer, elem, text)?;
        }
        Verb::Pause { seconds } => {
            let mut elem = BytesStart::new("Pause");
            elem.push_attribute(("length", seconds.to_string().as_str()));
            writer.write_event(Event::Empty(elem))?;
        }
        Verb::Gather {
            collect,
            action,
            timeout_secs,
            prompt,
        } => {
            let mut elem = BytesStart::new("Gather");
            match collect {
                Collect::Digits(n) => elem.push_attribute(("numDigits", n.to_string().as_str())),
                Collect::UntilKey(key) => {
                    elem.push_attribute(("finishOnKey", key.to_string().as_str()))
                }
            }
            elem.push_attribute(("action", action.as_str()));
            elem.push_attribute(("method", "POST"));
            elem.push_attribute(("timeout", timeout_secs.to_string().as_str()));
            writer.write_event(Event::Start(elem))?;
            for nested in prompt {
                write_verb(writer, nested)?;
            }
            writer.write_event(Event::End(BytesStart::new("Gather").to_end()))?;
        }
        Verb::Play { url, loops } => {
            let mut elem = BytesStart::new("Play");
            if let Some(loops) = loops {
                elem.push_attribute(("loop", loops.to_string().as_str()));
            }
            write_text_element(writer, elem, url)?;
        }
        Verb::Record {
            max_length_secs,
            finish_on_key,
            play_beep,
            action,
        } => {
            let mut elem = BytesStart::new("Record");
            elem.push_attribute(("maxLength", max_length_secs.to_string().as_str()));
            elem.push_attribute(("finishOnKey", finish_on_key.to_string().as_str()));
            elem.push_attribute(("playBeep", if *play_beep { "true" } else { "false" }));
            elem.push_attribute(("action", action.as_str()));
            elem.push_attribute(("method", "POST"));
            writer.write_event(Event::Empty(elem))?;
        }
        Verb::Redirect { target } => {
            let mut elem = BytesStart::new("Redirect");
            elem.push_attribute(("method", "POST"));
            write_text_element(writer, elem, target)?;
        }
        Verb::Dial(DialTarget::Number(number)) => {
            writer.write_event(Event::Start(BytesStart::new("Dial")))?;
            write_text_element(writer, BytesStart::new("Number"), number)?;
            writer.write_event(Event::End(BytesStart::new("Dial").to_end()))?;
        }
        Verb::Dial(DialTarget::Conference(bridge)) => {
            writer.write_event(Event::Start(BytesStart::new("Dial")))?;
            let mut elem = BytesStart::new("Conference");
            elem.push_attribute(("startConferenceOnEnter", "true"));
            elem.push_attribute(("endConferenceOnExit", "false"));
            elem.push_attribute((
                "maxParticipants",
                bridge.max_participants.to_string().as_str(),
            ));
            if let Some(wait_url) = &bridge.wait_url {
                elem.push_attribute(("waitUrl", wait_url.as_str()));
            }
            if bridge.record {
                elem.push_attribute(("record", "record-from-start"));
            }
            elem.push_attribute(("statusCallback", bridge.status_callback.as_str()));
            elem.push_attribute(("statusCallbackEvent", "start end join leave"));
            elem.push_attribute(("statusCallbackMethod", "POST"));
            elem.push_attribute((
                "recordingStatusCallback",
                bridge.recording_status_callback.as_str(),
            ));
            write_text_element(writer, elem, &bridge.name)?;
            writer.write_event(Event::End(BytesStart::new("Dial").to_end()))?;
        }
        Verb::Hangup => {
            writer.write_event(Event::Empty(BytesStart::new("Hangup")))?;
        }
    }
    Ok(())
}

impl IntoResponse for VoiceResponse {
    fn into_response(self) -> Response {
        match self.to_xml() {
            Ok(xml) => ([(header::CONTENT_TYPE, "text/xml")], xml).into_response(),
            Err(e) => {
                error!("failed to render voice response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// A callback path with its step parameters, e.g. `/conference/verify-pin?room=2000&attempt=1`.
pub fn target(path: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{}?{}", path, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice() -> VoiceConfig {
        VoiceConfig::default()
    }

    #[test]
    fn test_target_encoding() {
        assert_eq!(target("/callback/start", &[]), "/callback/start");
        assert_eq!(
            target("/callback/confirm", &[("number", "+819012345678")]),
            "/callback/confirm?number=%2B819012345678"
        );
        assert_eq!(
            target("/conference/verify-pin", &[("room", "2000"), ("attempt", "2")]),
            "/conference/verify-pin?room=2000&attempt=2"
        );
    }

    #[test]
    fn test_gather_then_redirect_xml() {
        let xml = VoiceResponse::new(&voice())
            .say("Welcome")
            .pause(1)
            .gather(Collect::Digits(1), "/callback/menu", 10, "Press 1 or 2")
            .redirect("/callback/menu")
            .to_xml()
            .unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        assert!(xml.contains(
            "<Say voice=\"Polly.Joanna\" language=\"en-US\">Welcome</Say><Pause length=\"1\"/>"
        ));
        assert!(xml.contains(
            "<Gather numDigits=\"1\" action=\"/callback/menu\" method=\"POST\" timeout=\"10\"><Say"
        ));
        assert!(xml.contains("<Redirect method=\"POST\">/callback/menu</Redirect></Response>"));
    }

    #[test]
    fn test_escaping_and_terminator() {
        let xml = VoiceResponse::new(&voice())
            .gather(
                Collect::UntilKey('#'),
                target("/callback/confirm", &[("number", "+81"), ("a", "b")]),
                30,
                "Q&A <now>",
            )
            .to_xml()
            .unwrap();
        assert!(xml.contains("finishOnKey=\"#\""));
        assert!(xml.contains("action=\"/callback/confirm?number=%2B81&amp;a=b\""));
        assert!(xml.contains("Q&amp;A &lt;now&gt;"));
    }

    #[test]
    fn test_conference_and_number_dial() {
        let xml = VoiceResponse::new(&voice())
            .join_conference(ConferenceBridge {
                name: "room-1000".to_string(),
                max_participants: 10,
                record: true,
                wait_url: Some("https://hold.example.com/music.mp3".to_string()),
                status_callback: "https://ivr.example.com/conference/status?room=1000".to_string(),
                recording_status_callback:
                    "https://ivr.example.com/conference/recording-status?room=1000".to_string(),
            })
            .dial_number("+81312345678")
            .hangup()
            .to_xml()
            .unwrap();
        assert!(xml.contains("maxParticipants=\"10\""));
        assert!(xml.contains("record=\"record-from-start\""));
        assert!(xml.contains(">room-1000</Conference></Dial>"));
        assert!(xml.contains("<Dial><Number>+81312345678</Number></Dial><Hangup/>"));
    }

    #[test]
    fn test_record_and_play() {
        let xml = VoiceResponse::new(&voice())
            .play_looped("https://hold.example.com/music.mp3", 0)
            .record(60, '#', true, "/voicemail/done")
            .to_xml()
            .unwrap();
        assert!(xml.contains("<Play loop=\"0\">https://hold.example.com/music.mp3</Play>"));
        assert!(xml.contains(
            "<Record maxLength=\"60\" finishOnKey=\"#\" playBeep=\"true\" action=\"/voicemail/done\" method=\"POST\"/>"
        ));
    }

    #[test]
    fn test_inspection_helpers() {
        let response = VoiceResponse::new(&voice())
            .say("Hello")
            .gather(Collect::Digits(4), "/conference/join", 15, "Enter the room code")
            .redirect("/conference/voice")
            .hangup();
        assert_eq!(response.spoken_text(), "Hello Enter the room code");
        assert_eq!(response.gather_action(), Some("/conference/join"));
        assert_eq!(response.redirect_target(), Some("/conference/voice"));
        assert!(response.ends_with_hangup());
        assert_eq!(response.verbs().len(), 4);
    }
}
