use crate::config::Config;
use crate::flow::phone::PhoneNormalizer;
use crate::store::rooms::RoomAccess;
use serde::Serialize;
use std::{collections::HashSet, fmt, net::SocketAddr};
use tokio::net::TcpListener;

#[derive(Debug, Serialize)]
pub struct PreflightIssue {
    pub field: String,
    pub message: String,
}

impl PreflightIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct PreflightError {
    pub issues: Vec<PreflightIssue>,
}

impl PreflightError {
    pub fn new(issues: Vec<PreflightIssue>) -> Self {
        Self { issues }
    }
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {}: {}", issue.field, issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PreflightError {}

/// Checks a configuration before the server starts. Every problem found is
/// reported, not just the first.
pub async fn validate_start(config: &Config) -> Result<(), PreflightError> {
    let mut issues = check_config(config);

    if let Ok(addr) = value_as_socket_addr("http_addr", &config.http_addr) {
        if let Err(err) = TcpListener::bind(addr).await {
            issues.push(PreflightIssue::new(
                "http_addr",
                format!("Address {} is unavailable ({})", addr, err),
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(PreflightError::new(issues))
    }
}

/// The checks that need no sockets; `AppStateBuilder::build` runs them too.
pub(crate) fn check_config(config: &Config) -> Vec<PreflightIssue> {
    let mut issues = Vec::new();

    if let Err(issue) = value_as_socket_addr("http_addr", &config.http_addr) {
        issues.push(issue);
    }
    if let Some(public_url) = &config.public_url {
        if let Err(err) = url::Url::parse(public_url) {
            issues.push(PreflightIssue::new(
                "public_url",
                format!("Invalid public_url `{}` ({})", public_url, err),
            ));
        }
    }
    if let Err(err) = PhoneNormalizer::new(&config.phone) {
        issues.push(PreflightIssue::new("phone", err.to_string()));
    }

    let policy = &config.policy;
    if policy.number_entry_attempts == 0 {
        issues.push(PreflightIssue::new(
            "policy.number_entry_attempts",
            "must allow at least one attempt",
        ));
    }
    if policy.pin_max_attempts == 0 {
        issues.push(PreflightIssue::new(
            "policy.pin_max_attempts",
            "must allow at least one attempt",
        ));
    }
    if policy.voicemail_max_secs == 0 {
        issues.push(PreflightIssue::new(
            "policy.voicemail_max_secs",
            "voicemail needs a positive recording length",
        ));
    }

    if config.rooms.is_empty() {
        issues.push(PreflightIssue::new("rooms", "no rooms configured"));
    }
    let mut seen = HashSet::new();
    for (i, room) in config.rooms.iter().enumerate() {
        let field = format!("rooms[{}]", i);
        if !is_digits(&room.code, policy.room_code_length) {
            issues.push(PreflightIssue::new(
                format!("{}.code", field),
                format!(
                    "room code `{}` must be {} digits",
                    room.code, policy.room_code_length
                ),
            ));
        }
        if !seen.insert(room.code.as_str()) {
            issues.push(PreflightIssue::new(
                format!("{}.code", field),
                format!("duplicate room code `{}`", room.code),
            ));
        }
        if room.max_participants == 0 {
            issues.push(PreflightIssue::new(
                format!("{}.max_participants", field),
                "capacity must be positive",
            ));
        }
        if let RoomAccess::Pin { pin } = &room.access {
            if !is_digits(pin, policy.pin_length) {
                // never echo the pin itself
                issues.push(PreflightIssue::new(
                    format!("{}.access.pin", field),
                    format!("pin must be {} digits", policy.pin_length),
                ));
            }
        }
    }

    issues
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_digit())
}

fn value_as_socket_addr(field: &str, value: &str) -> Result<SocketAddr, PreflightIssue> {
    value.parse::<SocketAddr>().map_err(|err| {
        PreflightIssue::new(field, format!("Invalid {} `{}` ({})", field, value, err))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::rooms::RoomDefinition;

    fn fields(issues: &[PreflightIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.field.as_str()).collect()
    }

    #[test]
    fn test_default_config_is_clean() {
        assert!(check_config(&Config::default()).is_empty());
    }

    #[test]
    fn test_room_issues() {
        let mut config = Config::default();
        config.rooms.push(RoomDefinition {
            code: "1000".to_string(),
            name: "Copy".to_string(),
            max_participants: 0,
            access: RoomAccess::Pin {
                pin: "12".to_string(),
            },
        });
        config.rooms.push(RoomDefinition {
            code: "12a".to_string(),
            name: "Odd".to_string(),
            max_participants: 3,
            access: RoomAccess::Open,
        });
        let issues = check_config(&config);
        assert_eq!(
            fields(&issues),
            vec![
                "rooms[6].code",
                "rooms[6].max_participants",
                "rooms[6].access.pin",
                "rooms[7].code",
            ]
        );
    }

    #[test]
    fn test_bad_addresses_and_policy() {
        let mut config = Config::default();
        config.http_addr = "not-an-addr".to_string();
        config.public_url = Some("ivr.example.com".to_string());
        config.policy.pin_max_attempts = 0;
        config.policy.voicemail_max_secs = 0;
        config.phone.country_code = String::new();
        let issues = check_config(&config);
        assert_eq!(
            fields(&issues),
            vec![
                "http_addr",
                "public_url",
                "phone",
                "policy.pin_max_attempts",
                "policy.voicemail_max_secs"
            ]
        );
    }

    #[tokio::test]
    async fn test_validate_start_detects_port_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.http_addr = listener.local_addr().unwrap().to_string();
        let err = validate_start(&config).await.unwrap_err();
        assert_eq!(fields(&err.issues), vec!["http_addr"]);
        assert!(err.to_string().contains("unavailable"));
    }
}
