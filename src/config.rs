use crate::consts::{
    DEFAULT_DOWNSTREAM_TIMEOUT_MILLIS, DEFAULT_RING_TIMEOUT_SECS, DEFAULT_VOICEMAIL_MAX_SECS,
};
use crate::error::AppError;

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings read from the environment (and `.env` when present)
#[derive(Clone, Debug)]
pub struct Settings {
    pub port: u16,
    /// Absolute base for provider callbacks; derived from the Host header when unset
    pub base_url: Option<String>,
    pub database_url: Option<String>,
    pub tradies_file: Option<String>,
    pub enquiries_api_url: Option<String>,
    pub enquiries_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub policy: FlowPolicy,
}

/// Call-handling policy knobs used by the flow engine
#[derive(Clone, Debug)]
pub struct FlowPolicy {
    pub ring_timeout_secs: u16,
    pub voicemail_max_secs: u16,
    pub downstream_timeout: Duration,
    /// Digit 2 in the IVR forwards to the tradie's mobile instead of the dialed number
    pub ivr_forward_to_tradie: bool,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            voicemail_max_secs: DEFAULT_VOICEMAIL_MAX_SECS,
            downstream_timeout: Duration::from_millis(DEFAULT_DOWNSTREAM_TIMEOUT_MILLIS),
            ivr_forward_to_tradie: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3000,
            base_url: None,
            database_url: None,
            tradies_file: None,
            enquiries_api_url: None,
            enquiries_api_key: None,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            twilio_account_sid: None,
            twilio_auth_token: None,
            policy: FlowPolicy::default(),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let policy = FlowPolicy {
            ring_timeout_secs: parsed("RING_TIMEOUT_SECS", DEFAULT_RING_TIMEOUT_SECS)?,
            voicemail_max_secs: parsed("VOICEMAIL_MAX_SECS", DEFAULT_VOICEMAIL_MAX_SECS)?,
            downstream_timeout: Duration::from_millis(parsed(
                "DOWNSTREAM_TIMEOUT_MILLIS",
                DEFAULT_DOWNSTREAM_TIMEOUT_MILLIS,
            )?),
            ivr_forward_to_tradie: parsed("IVR_FORWARD_TO_TRADIE", false)?,
        };
        let defaults = Self::default();
        Ok(Self {
            port: parsed("PORT", defaults.port)?,
            base_url: optional("BASE_URL"),
            database_url: optional("DATABASE_URL"),
            tradies_file: optional("TRADIES_FILE"),
            enquiries_api_url: optional("ENQUIRIES_API_URL"),
            enquiries_api_key: optional("ENQUIRIES_API_KEY"),
            openai_api_key: optional("OPENAI_API_KEY"),
            openai_model: optional("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            twilio_account_sid: optional("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: optional("TWILIO_AUTH_TOKEN"),
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = FlowPolicy::default();
        assert_eq!(policy.ring_timeout_secs, 20);
        assert_eq!(policy.voicemail_max_secs, 120);
        assert!(!policy.ivr_forward_to_tradie);
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        env::set_var("TRADIE_CALLS_TEST_BAD_PORT", "eighty");
        let err = parsed::<u16>("TRADIE_CALLS_TEST_BAD_PORT", 3000).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(parsed::<u16>("TRADIE_CALLS_TEST_UNSET", 3000).unwrap(), 3000);
    }
}
