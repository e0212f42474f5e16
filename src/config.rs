use crate::storage::StorageConfig;
use crate::store::rooms::{RoomAccess, RoomDefinition};
use anyhow::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Absolute base URL the carrier can reach us on, e.g. `https://ivr.example.com`.
    /// Derived from the `Host` header of the triggering request when unset.
    pub public_url: Option<String>,
    pub storage: StorageConfig,
    pub voice: VoiceConfig,
    pub phone: PhoneConfig,
    pub policy: FlowPolicy,
    pub carrier: Option<CarrierConfig>,
    pub rooms: Vec<RoomDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice: String,
    pub language: String,
    pub hold_music_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PhoneConfig {
    pub country_code: String,
    pub trunk_prefix: String,
}

/// Retry counts, timeouts and lengths used by the call flows.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowPolicy {
    pub callback_eta_minutes: i64,
    pub menu_timeout_secs: u32,
    pub number_entry_timeout_secs: u32,
    /// How many times a caller may type a number before we fall back to
    /// the caller's own number. `1` means no re-prompt.
    pub number_entry_attempts: u32,
    pub room_code_length: usize,
    pub room_code_timeout_secs: u32,
    pub pin_length: usize,
    pub pin_timeout_secs: u32,
    pub pin_max_attempts: u32,
    /// Resumed callback calls are dialled through to this number when set.
    pub operator_number: Option<String>,
    pub voicemail_max_secs: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CarrierConfig {
    #[serde(default = "default_carrier_api_base")]
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

fn default_carrier_api_base() -> String {
    "https://api.twilio.com/2010-04-01".to_string()
}

impl CarrierConfig {
    /// Reads `CARRIER_ACCOUNT_SID`, `CARRIER_AUTH_TOKEN` and `CARRIER_FROM_NUMBER`.
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("CARRIER_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("CARRIER_AUTH_TOKEN").ok()?;
        let from_number = std::env::var("CARRIER_FROM_NUMBER").ok()?;
        Some(Self {
            api_base: std::env::var("CARRIER_API_BASE")
                .unwrap_or_else(|_| default_carrier_api_base()),
            account_sid,
            auth_token,
            from_number,
        })
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "Polly.Joanna".to_string(),
            language: "en-US".to_string(),
            hold_music_url: "https://demo.twilio.com/docs/classic.mp3".to_string(),
        }
    }
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            country_code: "81".to_string(),
            trunk_prefix: "0".to_string(),
        }
    }
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            callback_eta_minutes: 30,
            menu_timeout_secs: 10,
            number_entry_timeout_secs: 30,
            number_entry_attempts: 1,
            room_code_length: 4,
            room_code_timeout_secs: 15,
            pin_length: 4,
            pin_timeout_secs: 10,
            pin_max_attempts: 2,
            operator_number: None,
            voicemail_max_secs: 60,
        }
    }
}

pub fn default_rooms() -> Vec<RoomDefinition> {
    let open = |code: &str, name: &str, max: usize| RoomDefinition {
        code: code.to_string(),
        name: name.to_string(),
        max_participants: max,
        access: RoomAccess::Open,
    };
    let pin = |code: &str, name: &str, max: usize, pin: &str| RoomDefinition {
        code: code.to_string(),
        name: name.to_string(),
        max_participants: max,
        access: RoomAccess::Pin {
            pin: pin.to_string(),
        },
    };
    vec![
        open("1000", "General Room A", 10),
        open("1001", "General Room B", 5),
        open("1002", "Open Discussion", 20),
        pin("2000", "Executive Room", 8, "1234"),
        pin("2001", "Project Room", 6, "5678"),
        pin("2002", "Secure Room", 4, "9999"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:3100".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            public_url: None,
            storage: StorageConfig::default(),
            voice: VoiceConfig::default(),
            phone: PhoneConfig::default(),
            policy: FlowPolicy::default(),
            carrier: None,
            rooms: default_rooms(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    /// Carrier credentials from the file, falling back to the environment.
    pub fn carrier(&self) -> Option<CarrierConfig> {
        self.carrier.clone().or_else(CarrierConfig::from_env)
    }
}
