//! Sinch voice callbacks and SVAML responses

use crate::consts::LANGUAGE;
use crate::directive::{Instruction, OutboundInstructions};
use crate::error::AppError;
use crate::flow::{EventKind, FlowToken};
use crate::payload::{
    lowercase_keys, WebhookPayload, CALL_SID, FLOW_TOKEN, FROM, SPEECH_RESULT, TO,
};
use crate::response_builder::{ProviderPayload, ResponseBuilder};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, trace};

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum SvamlInstruction {
    Answer,
    Say {
        text: String,
        locale: String,
    },
    StartRecording {
        options: RecordingOptions,
    },
    StopRecording,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct RecordingOptions {
    pub stereo: bool,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum SvamlAction {
    Hangup,
    Continue,
    #[serde(rename_all = "camelCase")]
    RunMenu {
        barge: bool,
        enable_voice: bool,
        locale: String,
        menus: Vec<Menu>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectPstn {
        number: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dial_timeout: Option<u16>,
    },
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Menu {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_prompt: Option<String>,
    pub max_digits: u16,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct Svaml {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<SvamlInstruction>,
    pub action: SvamlAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

fn tts(text: &str) -> String {
    format!("#tts[{text}]")
}

fn menu(prompt: Option<&str>, max_digits: u16) -> SvamlAction {
    SvamlAction::RunMenu {
        barge: true,
        enable_voice: max_digits == 0,
        locale: LANGUAGE.to_string(),
        menus: vec![Menu {
            id: "main".to_string(),
            main_prompt: prompt.map(tts),
            max_digits,
        }],
    }
}

/// Renders instructions as SVAML.  Callback routing is fixed per application in Sinch, so only
/// the flow token travels, in `custom`.
pub struct SvamlBuilder;

impl SvamlBuilder {
    pub fn svaml(&self, outbound: &OutboundInstructions) -> Svaml {
        let mut svaml = Svaml {
            instructions: vec![],
            action: SvamlAction::Continue,
            custom: None,
        };
        for instruction in outbound.instructions() {
            match instruction {
                Instruction::Answer => svaml.instructions.push(SvamlInstruction::Answer),
                Instruction::Say(text) => svaml.instructions.push(SvamlInstruction::Say {
                    text: text.clone(),
                    locale: LANGUAGE.to_string(),
                }),
                Instruction::StartRecording { .. } | Instruction::Record(_) => svaml
                    .instructions
                    .push(SvamlInstruction::StartRecording {
                        options: RecordingOptions { stereo: true },
                    }),
                Instruction::GatherDigits(gather) => {
                    svaml.action = menu(Some(&gather.prompt), gather.num_digits);
                    svaml.custom = gather.callback.token.map(|t| t.encode());
                }
                // no recognition hints in SVAML
                Instruction::GatherSpeech(gather) => {
                    svaml.action = menu(gather.prompt.as_deref(), 0);
                    svaml.custom = gather.callback.token.map(|t| t.encode());
                }
                Instruction::Forward(forward) => {
                    svaml.action = SvamlAction::ConnectPstn {
                        number: forward.number.clone(),
                        dial_timeout: forward.timeout_secs,
                    };
                }
                Instruction::Redirect(_) => svaml.action = SvamlAction::Continue,
                Instruction::Hangup => {
                    svaml.instructions.push(SvamlInstruction::StopRecording);
                    svaml.action = SvamlAction::Hangup;
                }
            }
        }
        svaml
    }
}

impl ResponseBuilder for SvamlBuilder {
    fn build(&self, outbound: &OutboundInstructions) -> ProviderPayload {
        let body = serde_json::to_string(&self.svaml(outbound)).unwrap_or_else(|e| {
            error!(error=%e, "failed to serialize svaml");
            r#"{"action":{"name":"hangup"}}"#.to_string()
        });
        trace!("svaml: '{}'", body);
        ProviderPayload {
            content_type: "application/json",
            body,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SinchIdentity {
    Plain(String),
    Structured { identity: String },
}

impl SinchIdentity {
    fn number(&self) -> &str {
        match self {
            Self::Plain(number) => number,
            Self::Structured { identity } => identity,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SinchEndpoint {
    pub endpoint: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MenuResult {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub value: Option<String>,
}

/// Callback body, deserialized after its keys are lowercased
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SinchEvent {
    pub event: String,
    pub callid: Option<String>,
    pub cli: Option<SinchIdentity>,
    pub to: Option<SinchEndpoint>,
    pub destination: Option<String>,
    pub menuresult: Option<MenuResult>,
    pub custom: Option<Value>,
}

impl SinchEvent {
    pub fn from_json(body: &str) -> Result<Self, AppError> {
        let value = serde_json::from_str::<Value>(body).map_err(|e| {
            error!(error=%e, "failed to deserialize sinch callback");
            AppError::Payload(e.to_string())
        })?;
        serde_json::from_value(lowercase_keys(value)).map_err(|e| {
            error!(error=%e, "unexpected sinch callback shape");
            AppError::Payload(e.to_string())
        })
    }

    fn token(&self) -> Option<String> {
        match self.custom.as_ref()? {
            Value::String(token) => Some(token.clone()),
            Value::Object(map) => map.get(FLOW_TOKEN)?.as_str().map(str::to_string),
            _ => None,
        }
    }

    fn dialed(&self) -> Option<&str> {
        self.to
            .as_ref()
            .and_then(|to| to.endpoint.as_deref())
            .or(self.destination.as_deref())
    }

    /// The virtual-assistant event this callback drives, with its fields in webhook form.
    /// `None` for callbacks that only need acknowledging.
    pub fn flow_event(&self) -> Option<(EventKind, WebhookPayload)> {
        let kind = match self.event.to_lowercase().as_str() {
            "ice" => EventKind::Incoming,
            "pie" => EventKind::SpeechResult,
            _ => return None,
        };
        let mut payload = WebhookPayload::default();
        if let Some(call_id) = &self.callid {
            payload.insert(CALL_SID, call_id.as_str());
        }
        if let Some(cli) = &self.cli {
            payload.insert(FROM, cli.number());
        }
        if let Some(to) = self.dialed() {
            payload.insert(TO, to);
        }
        if let Some(value) = self.menuresult.as_ref().and_then(|m| m.value.as_deref()) {
            payload.insert(SPEECH_RESULT, value);
        }
        if let Some(token) = self.token().filter(|t| FlowToken::decode(t).is_some()) {
            payload.insert(FLOW_TOKEN, token);
        }
        Some((kind, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Callback, SpeechGather};
    use crate::flow::{FlowKind, VaStep};

    #[test]
    fn speech_gather_becomes_barge_in_menu() {
        let token = FlowToken::new(VaStep::AddressDetails);
        let outbound = OutboundInstructions::Script(vec![Instruction::GatherSpeech(
            SpeechGather {
                prompt: Some("Your address please".to_string()),
                hints: vec!["electrician".to_string()],
                callback: Callback::with_token(FlowKind::Va, EventKind::SpeechResult, token),
            },
        )]);
        let body: Value = serde_json::from_str(&SvamlBuilder.build(&outbound).body).unwrap();
        assert_eq!(body["action"]["name"], "runMenu");
        assert_eq!(body["action"]["barge"], true);
        assert_eq!(body["action"]["locale"], "en-AU");
        assert_eq!(
            body["action"]["menus"][0]["mainPrompt"],
            "#tts[Your address please]"
        );
        assert_eq!(body["custom"], token.encode());
        assert!(body.get("instructions").is_none());
        assert!(!body.to_string().contains("electrician"));
    }

    #[test]
    fn hangup_stops_recording() {
        let svaml = SvamlBuilder.svaml(&OutboundInstructions::farewell("Bye"));
        assert_eq!(svaml.action, SvamlAction::Hangup);
        assert_eq!(
            svaml.instructions,
            vec![
                SvamlInstruction::Say {
                    text: "Bye".to_string(),
                    locale: "en-AU".to_string()
                },
                SvamlInstruction::StopRecording
            ]
        );
    }

    #[test]
    fn acknowledgment_continues() {
        let body = SvamlBuilder.build(&OutboundInstructions::Acknowledge).body;
        assert_eq!(body, r#"{"action":{"name":"continue"}}"#);
    }

    #[test]
    fn incoming_call_event_maps_to_va_incoming() {
        let event = SinchEvent::from_json(
            r#"{"Event":"ice","CallId":"sinch-1","Cli":"61411111111","To":{"Type":"number","Endpoint":"+61400555666"}}"#,
        )
        .unwrap();
        let (kind, payload) = event.flow_event().unwrap();
        assert_eq!(kind, EventKind::Incoming);
        assert_eq!(payload.get(CALL_SID), Some("sinch-1"));
        assert_eq!(payload.get(FROM), Some("61411111111"));
        assert_eq!(payload.get(TO), Some("+61400555666"));
    }

    #[test]
    fn prompt_input_carries_speech_and_token() {
        let token = FlowToken::new(VaStep::FinalNotes).encode();
        let raw = format!(
            r#"{{"event":"pie","callId":"sinch-2","menuResult":{{"type":"speech","value":"nothing else"}},"custom":"{token}"}}"#
        );
        let (kind, payload) = SinchEvent::from_json(&raw).unwrap().flow_event().unwrap();
        assert_eq!(kind, EventKind::SpeechResult);
        assert_eq!(payload.get(SPEECH_RESULT), Some("nothing else"));
        assert_eq!(payload.flow_token().map(|t| t.step()), Some(VaStep::FinalNotes));
    }

    #[test]
    fn disconnect_and_notify_are_acknowledged() {
        for event in ["ace", "dice", "notify"] {
            let raw = format!(r#"{{"event":"{event}","callid":"sinch-3"}}"#);
            assert!(SinchEvent::from_json(&raw).unwrap().flow_event().is_none());
        }
    }
}
