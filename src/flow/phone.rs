//! Canonical phone numbers for callback reservations.
//!
//! Callers type digits on the keypad in domestic form (`09012345678`) or
//! with the country code (`819012345678`). Everything is stored as
//! `+<country code><subscriber digits>`.

use crate::config::PhoneConfig;
use crate::error::{FlowError, FlowResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static NON_DIALABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9+]").unwrap());

/// A number that passed validation, in `+<cc>...` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
    trunk_prefix: String,
    international: Regex,
    domestic: Regex,
}

impl PhoneNormalizer {
    pub fn new(config: &PhoneConfig) -> anyhow::Result<Self> {
        let country_code: String = config
            .country_code
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if country_code.is_empty() {
            anyhow::bail!("phone.country_code must contain digits");
        }
        let trunk_prefix = config.trunk_prefix.clone();
        let international = Regex::new(&format!(r"^\+{}[0-9]{{9,10}}$", regex::escape(&country_code)))?;
        let domestic = Regex::new(&format!(r"^{}[0-9]{{9,10}}$", regex::escape(&trunk_prefix)))?;
        Ok(Self {
            country_code,
            trunk_prefix,
            international,
            domestic,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if !self.trunk_prefix.is_empty() && digits.starts_with(&self.trunk_prefix) {
            format!("+{}{}", self.country_code, &digits[self.trunk_prefix.len()..])
        } else if digits.starts_with(&self.country_code) {
            format!("+{}", digits)
        } else {
            format!("+{}{}", self.country_code, digits)
        }
    }

    pub fn is_valid(&self, number: &str) -> bool {
        let cleaned = NON_DIALABLE.replace_all(number, "");
        self.international.is_match(&cleaned) || self.domestic.is_match(&cleaned)
    }

    pub fn parse(&self, raw: &str) -> FlowResult<PhoneNumber> {
        let normalized = self.normalize(raw);
        if self.is_valid(&normalized) {
            Ok(PhoneNumber(normalized))
        } else {
            Err(FlowError::InvalidInput(format!(
                "'{}' is not a valid phone number",
                raw
            )))
        }
    }

    /// Domestic, hyphenated form for reading a number back, e.g. `090-1234-5678`.
    pub fn readable(&self, number: &str) -> String {
        let prefix = format!("+{}", self.country_code);
        let domestic = match number.strip_prefix(&prefix) {
            Some(rest) => format!("{}{}", self.trunk_prefix, rest),
            None => number.to_string(),
        };
        if domestic.len() == 11 && domestic.chars().all(|c| c.is_ascii_digit()) {
            format!("{}-{}-{}", &domestic[..3], &domestic[3..7], &domestic[7..])
        } else {
            domestic
        }
    }
}
