use crate::error::AppError;
use crate::flow::FlowToken;

use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, warn};

pub const CALL_SID: &str = "callsid";
pub const FROM: &str = "from";
pub const TO: &str = "to";
pub const DIGITS: &str = "digits";
pub const SPEECH_RESULT: &str = "speechresult";
pub const TRANSCRIPTION_TEXT: &str = "transcriptiontext";
pub const RECORDING_URL: &str = "recordingurl";
pub const RECORDING_STATUS: &str = "recordingstatus";
pub const DIAL_CALL_STATUS: &str = "dialcallstatus";
/// Carries the flow token; a query parameter for the XML provider
pub const FLOW_TOKEN: &str = "step";

/// Webhook field bag with lowercased keys.  Providers don't keep field-name casing stable across
/// integrations, so every lookup goes through here.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct WebhookPayload {
    fields: HashMap<String, String>,
}

impl WebhookPayload {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
            .collect();
        Self { fields }
    }

    pub fn from_form(body: &str) -> Result<Self, AppError> {
        let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(body).map_err(|e| {
            error!(error=%e, "failed to deserialize form payload");
            AppError::Payload(e.to_string())
        })?;
        Ok(Self::from_pairs(pairs))
    }

    /// Top-level scalars of a JSON object; nested values are kept as their JSON text
    pub fn from_json(body: &str) -> Result<Self, AppError> {
        let value = serde_json::from_str::<Value>(body).map_err(|e| {
            error!(error=%e, "failed to deserialize json payload");
            AppError::Payload(e.to_string())
        })?;
        match value {
            Value::Object(map) => Ok(Self::from_pairs(map.into_iter().filter_map(|(k, v)| {
                let v = match v {
                    Value::Null => return None,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((k, v))
            }))),
            _ => Err(AppError::Payload("expected a json object".to_string())),
        }
    }

    /// Parse a webhook body by content type, falling back to an empty payload so that the flow
    /// can still answer the call.
    pub fn parse(content_type: Option<&str>, body: &str) -> Self {
        if body.trim().is_empty() {
            return Self::default();
        }
        let is_json = content_type
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let parsed = if is_json {
            Self::from_json(body)
        } else {
            Self::from_form(body)
        };
        parsed.unwrap_or_else(|e| {
            warn!(error=%e, "continuing with empty webhook payload");
            Self::default()
        })
    }

    /// Merge query parameters in; body fields win on collision
    pub fn with_query(mut self, query: &HashMap<String, String>) -> Self {
        for (k, v) in query {
            self.fields
                .entry(k.to_lowercase())
                .or_insert_with(|| v.clone());
        }
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.fields.insert(key.to_lowercase(), value.into());
    }

    /// Non-blank value for a key, trimmed
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(&key.to_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &'static str) -> Result<&str, AppError> {
        self.get(key)
            .ok_or_else(|| AppError::Payload(format!("missing field '{key}'")))
    }

    pub fn flow_token(&self) -> Option<FlowToken> {
        self.get(FLOW_TOKEN).and_then(FlowToken::decode)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Recursively lowercase object keys so typed deserialization is casing-agnostic
pub fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::VaStep;

    #[test]
    fn form_keys_are_case_insensitive() {
        let payload =
            WebhookPayload::from_form("CallSid=CA123&From=%2B61411111111&SpeechResult=Hi+there")
                .unwrap();
        assert_eq!(payload.get("callsid"), Some("CA123"));
        assert_eq!(payload.get("CALLSID"), Some("CA123"));
        assert_eq!(payload.get(FROM), Some("+61411111111"));
        assert_eq!(payload.get(SPEECH_RESULT), Some("Hi there"));
    }

    #[test]
    fn blank_values_read_as_missing() {
        let payload = WebhookPayload::from_form("SpeechResult=++&Digits=").unwrap();
        assert_eq!(payload.get(SPEECH_RESULT), None);
        assert_eq!(payload.get(DIGITS), None);
        assert!(payload.require(CALL_SID).is_err());
    }

    #[test]
    fn json_scalars_are_stringified() {
        let payload =
            WebhookPayload::from_json(r#"{"CallSid":"CA1","Digits":1,"Extra":null}"#).unwrap();
        assert_eq!(payload.get(CALL_SID), Some("CA1"));
        assert_eq!(payload.get(DIGITS), Some("1"));
        assert_eq!(payload.get("extra"), None);
    }

    #[test]
    fn unparseable_body_falls_back_to_empty() {
        let payload = WebhookPayload::parse(Some("application/json"), "{not json");
        assert!(payload.is_empty());
    }

    #[test]
    fn query_token_is_merged() {
        let token = crate::flow::FlowToken::new(VaStep::FinalNotes).encode();
        let query = HashMap::from([("Step".to_string(), token)]);
        let payload = WebhookPayload::from_form("CallSid=CA1")
            .unwrap()
            .with_query(&query);
        assert_eq!(
            payload.flow_token().map(|t| t.step()),
            Some(VaStep::FinalNotes)
        );
    }

    #[test]
    fn nested_json_keys_are_lowercased() {
        let value = serde_json::json!({"CallId": "x", "MenuResult": {"Value": "hello"}});
        let lowered = lowercase_keys(value);
        assert_eq!(lowered["menuresult"]["value"], "hello");
        assert_eq!(lowered["callid"], "x");
    }
}
