pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde::xml_serde_enum;
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Gather")]
        Gather(GatherAction),
        #[xmlserde(name = b"Record")]
        Record(RecordAction),
        #[xmlserde(name = b"Start")]
        Start(StartAction),
        #[xmlserde(name = b"Dial")]
        Dial(DialAction),
        #[xmlserde(name = b"Redirect")]
        Redirect(RedirectAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum GatherPrompt {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct GatherAction {
        #[xmlserde(name = b"input", ty = "attr")]
        pub input: Option<String>,
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<HttpMethod>,
        #[xmlserde(name = b"numDigits", ty = "attr")]
        pub num_digits: Option<u16>,
        #[xmlserde(name = b"actionOnEmptyResult", ty = "attr")]
        pub action_on_empty_result: Option<TwimlBool>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
        #[xmlserde(name = b"speechModel", ty = "attr")]
        pub speech_model: Option<String>,
        #[xmlserde(name = b"enhanced", ty = "attr")]
        pub enhanced: Option<TwimlBool>,
        #[xmlserde(name = b"hints", ty = "attr")]
        pub hints: Option<String>,
        #[xmlserde(name = b"speechTimeout", ty = "attr")]
        pub speech_timeout: Option<String>,
        #[xmlserde(ty = "untag")]
        pub prompts: Vec<GatherPrompt>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct RecordAction {
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<HttpMethod>,
        #[xmlserde(name = b"maxLength", ty = "attr")]
        pub max_length: Option<u16>,
        #[xmlserde(name = b"playBeep", ty = "attr")]
        pub play_beep: Option<TwimlBool>,
        #[xmlserde(name = b"transcribe", ty = "attr")]
        pub transcribe: Option<TwimlBool>,
        #[xmlserde(name = b"transcribeCallback", ty = "attr")]
        pub transcribe_callback: Option<String>,
        #[xmlserde(name = b"recordingStatusCallback", ty = "attr")]
        pub recording_status_callback: Option<String>,
        #[xmlserde(name = b"recordingStatusCallbackEvent", ty = "attr")]
        pub recording_status_callback_event: Option<String>,
        #[xmlserde(name = b"recordingStatusCallbackMethod", ty = "attr")]
        pub recording_status_callback_method: Option<HttpMethod>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub struct StartAction {
        #[xmlserde(ty = "untag")]
        pub noun: StartNoun,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum StartNoun {
        #[xmlserde(name = b"Recording")]
        Recording(RecordingNoun),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct RecordingNoun {
        #[xmlserde(name = b"track", ty = "attr")]
        pub track: Option<String>,
        #[xmlserde(name = b"trim", ty = "attr")]
        pub trim: Option<String>,
        #[xmlserde(name = b"channels", ty = "attr")]
        pub channels: Option<String>,
        #[xmlserde(name = b"recordingStatusCallback", ty = "attr")]
        pub recording_status_callback: Option<String>,
        #[xmlserde(name = b"recordingStatusCallbackEvent", ty = "attr")]
        pub recording_status_callback_event: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct DialAction {
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<HttpMethod>,
        #[xmlserde(name = b"timeout", ty = "attr")]
        pub timeout: Option<u16>,
        #[xmlserde(ty = "untag")]
        pub nouns: Vec<DialNoun>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum DialNoun {
        #[xmlserde(name = b"Number")]
        Number(NumberNoun),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct NumberNoun {
        #[xmlserde(ty = "text")]
        pub number: String,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct RedirectAction {
        #[xmlserde(ty = "text")]
        pub url: String,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<HttpMethod>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {}

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        HttpMethod {
            Get => "GET",
            Post => "POST",
        }
    }

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        TwimlBool {
            True => "true",
            False => "false",
        }
    }

    impl From<bool> for TwimlBool {
        fn from(b: bool) -> Self {
            if b {
                TwimlBool::True
            } else {
                TwimlBool::False
            }
        }
    }
}

mod builder {
    use super::twiml::*;
    use super::wrap_twiml;
    use crate::consts::{LANGUAGE, SPEECH_MODEL, SPEECH_TIMEOUT_SECS, VOICE};
    use crate::directive::{
        Callback, DigitGather, ForwardDirective, Instruction, OutboundInstructions,
        RecordDirective, SpeechGather,
    };
    use crate::flow::webhook_path;
    use crate::payload::FLOW_TOKEN;
    use crate::response_builder::{ProviderPayload, ResponseBuilder};

    use tracing::{error, trace};

    /// Renders instructions as TwiML with absolute callback urls under `base_url`
    pub struct TwimlBuilder {
        base_url: String,
    }

    impl TwimlBuilder {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into(),
            }
        }

        pub fn callback_url(&self, callback: &Callback) -> String {
            let path = webhook_path(callback.flow, callback.event).unwrap_or_else(|| {
                error!(flow=%callback.flow, event=%callback.event, "callback has no route");
                "/webhooks/voice/goodbye"
            });
            match callback.token {
                Some(token) => format!("{}{path}?{FLOW_TOKEN}={}", self.base_url, token.encode()),
                None => format!("{}{path}", self.base_url),
            }
        }

        fn say(text: &str) -> SayAction {
            SayAction {
                text: text.to_string(),
                voice: Some(VOICE.to_string()),
                language: Some(LANGUAGE.to_string()),
            }
        }

        fn gather_digits(&self, gather: &DigitGather) -> GatherAction {
            GatherAction {
                action: Some(self.callback_url(&gather.callback)),
                method: Some(HttpMethod::Post),
                num_digits: Some(gather.num_digits),
                prompts: vec![GatherPrompt::Say(Self::say(&gather.prompt))],
                ..Default::default()
            }
        }

        fn gather_speech(&self, gather: &SpeechGather) -> GatherAction {
            let hints = if gather.hints.is_empty() {
                None
            } else {
                Some(gather.hints.join(","))
            };
            GatherAction {
                input: Some("speech".to_string()),
                action: Some(self.callback_url(&gather.callback)),
                method: Some(HttpMethod::Post),
                action_on_empty_result: Some(TwimlBool::True),
                language: Some(LANGUAGE.to_string()),
                speech_model: Some(SPEECH_MODEL.to_string()),
                enhanced: Some(TwimlBool::True),
                hints,
                speech_timeout: Some(SPEECH_TIMEOUT_SECS.to_string()),
                // nesting the prompt lets the caller talk over it
                prompts: gather
                    .prompt
                    .iter()
                    .map(|p| GatherPrompt::Say(Self::say(p)))
                    .collect(),
                ..Default::default()
            }
        }

        fn record(&self, record: &RecordDirective) -> RecordAction {
            let status_callback = record.status_callback.as_ref();
            RecordAction {
                action: record.action.as_ref().map(|cb| self.callback_url(cb)),
                method: record.action.as_ref().map(|_| HttpMethod::Post),
                max_length: record.max_length_secs,
                play_beep: Some(record.play_beep.into()),
                transcribe: record.transcribe.then_some(TwimlBool::True),
                transcribe_callback: record
                    .transcribe_callback
                    .as_ref()
                    .map(|cb| self.callback_url(cb)),
                recording_status_callback: status_callback.map(|cb| self.callback_url(cb)),
                recording_status_callback_event: status_callback.map(|_| "completed".to_string()),
                recording_status_callback_method: status_callback.map(|_| HttpMethod::Post),
            }
        }

        fn dial(&self, forward: &ForwardDirective) -> DialAction {
            DialAction {
                action: forward.action.as_ref().map(|cb| self.callback_url(cb)),
                method: forward.action.as_ref().map(|_| HttpMethod::Post),
                timeout: forward.timeout_secs,
                nouns: vec![DialNoun::Number(NumberNoun {
                    number: forward.number.clone(),
                })],
            }
        }

        fn action(&self, instruction: &Instruction) -> Option<ResponseAction> {
            let action = match instruction {
                // Twilio answers on the first TwiML response
                Instruction::Answer => return None,
                Instruction::Say(text) => ResponseAction::Say(Self::say(text)),
                Instruction::GatherDigits(gather) => {
                    ResponseAction::Gather(self.gather_digits(gather))
                }
                Instruction::GatherSpeech(gather) => {
                    ResponseAction::Gather(self.gather_speech(gather))
                }
                Instruction::Record(record) => ResponseAction::Record(self.record(record)),
                Instruction::StartRecording { status_callback } => {
                    ResponseAction::Start(StartAction {
                        noun: StartNoun::Recording(RecordingNoun {
                            track: Some("both".to_string()),
                            trim: Some("do-not-trim".to_string()),
                            channels: Some("dual".to_string()),
                            recording_status_callback: Some(self.callback_url(status_callback)),
                            recording_status_callback_event: Some(
                                "in-progress completed absent".to_string(),
                            ),
                        }),
                    })
                }
                Instruction::Forward(forward) => ResponseAction::Dial(self.dial(forward)),
                Instruction::Redirect(callback) => ResponseAction::Redirect(RedirectAction {
                    url: self.callback_url(callback),
                    method: Some(HttpMethod::Post),
                }),
                Instruction::Hangup => ResponseAction::Hangup(HangupAction {}),
            };
            Some(action)
        }
    }

    impl ResponseBuilder for TwimlBuilder {
        fn build(&self, outbound: &OutboundInstructions) -> ProviderPayload {
            let response = Response {
                actions: outbound
                    .instructions()
                    .iter()
                    .filter_map(|i| self.action(i))
                    .collect(),
            };
            let twiml = wrap_twiml(xmlserde::xml_serialize(response));
            trace!("twiml: '{}'", twiml);
            ProviderPayload {
                content_type: "text/xml",
                body: twiml,
            }
        }
    }
}
pub use builder::TwimlBuilder;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{
        Callback, DigitGather, ForwardDirective, Instruction, OutboundInstructions,
        RecordDirective, SpeechGather,
    };
    use crate::flow::{EventKind, FlowKind, FlowToken, VaStep};
    use crate::response_builder::ResponseBuilder;

    fn builder() -> TwimlBuilder {
        TwimlBuilder::new("https://calls.example.com")
    }

    #[test]
    fn token_rides_on_the_callback_query() {
        let token = FlowToken::new(VaStep::AddressDetails);
        let url = builder().callback_url(&Callback::with_token(
            FlowKind::Va,
            EventKind::SpeechResult,
            token,
        ));
        assert_eq!(
            url,
            format!(
                "https://calls.example.com/webhooks/voice/va-transcription-available?step={}",
                token.encode()
            )
        );
    }

    #[test]
    fn speech_gather_nests_prompt_and_hints() {
        let outbound = OutboundInstructions::Script(vec![Instruction::GatherSpeech(
            SpeechGather {
                prompt: Some("What needs doing".to_string()),
                hints: vec!["electrician".to_string(), "power point".to_string()],
                callback: Callback::new(FlowKind::Va, EventKind::SpeechResult),
            },
        )]);
        let twiml = builder().build(&outbound).body;
        assert!(twiml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        assert!(twiml.contains("<Gather"));
        assert!(twiml.contains("input=\"speech\""));
        assert!(twiml.contains("hints=\"electrician,power point\""));
        assert!(twiml.contains("actionOnEmptyResult=\"true\""));
        assert!(twiml.contains("speechTimeout=\"3\""));
        assert!(twiml.contains("What needs doing</Say></Gather>"));
    }

    #[test]
    fn digit_gather_collects_one_digit() {
        let outbound = OutboundInstructions::Script(vec![
            Instruction::GatherDigits(DigitGather {
                prompt: "Press 1".to_string(),
                num_digits: 1,
                callback: Callback::new(FlowKind::Ivr, EventKind::Selection),
            }),
            Instruction::Redirect(Callback::new(FlowKind::Ivr, EventKind::Incoming)),
        ]);
        let twiml = builder().build(&outbound).body;
        assert!(twiml.contains("numDigits=\"1\""));
        assert!(twiml.contains("action=\"https://calls.example.com/webhooks/voice/ivr-selection\""));
        assert!(twiml.contains(">https://calls.example.com/webhooks/voice/ivr-incoming</Redirect>"));
    }

    #[test]
    fn record_registers_every_callback() {
        let outbound = OutboundInstructions::Script(vec![Instruction::Record(RecordDirective {
            play_beep: true,
            max_length_secs: Some(120),
            transcribe: true,
            transcribe_callback: Some(Callback::new(
                FlowKind::Ivr,
                EventKind::TranscriptionReady,
            )),
            status_callback: Some(Callback::new(FlowKind::Ivr, EventKind::RecordingStatus)),
            action: Some(Callback::new(FlowKind::DirectDial, EventKind::Goodbye)),
        })]);
        let twiml = builder().build(&outbound).body;
        assert!(twiml.contains("transcribe=\"true\""));
        assert!(twiml.contains("maxLength=\"120\""));
        assert!(twiml.contains(
            "transcribeCallback=\"https://calls.example.com/webhooks/voice/ivr-transcription-completed\""
        ));
        assert!(twiml.contains(
            "recordingStatusCallback=\"https://calls.example.com/webhooks/voice/ivr-recording-completed\""
        ));
        assert!(twiml.contains("playBeep=\"true\""));
    }

    #[test]
    fn forward_dials_the_number_with_timeout() {
        let outbound = OutboundInstructions::Script(vec![Instruction::Forward(ForwardDirective {
            number: "+61499888777".to_string(),
            timeout_secs: Some(20),
            action: Some(Callback::new(FlowKind::DirectDial, EventKind::DialCompleted)),
        })]);
        let twiml = builder().build(&outbound).body;
        assert!(twiml.contains("timeout=\"20\""));
        assert!(twiml.contains("<Number>+61499888777</Number></Dial>"));
    }

    #[test]
    fn farewell_ends_with_hangup() {
        let twiml = builder()
            .build(&OutboundInstructions::farewell("Goodbye."))
            .body;
        assert!(twiml.contains("Goodbye.</Say>"));
        assert!(twiml.contains("<Hangup"));
        assert!(twiml.ends_with("</Response>"));
    }

    #[test]
    fn acknowledgment_is_an_empty_response() {
        let payload = builder().build(&OutboundInstructions::Acknowledge);
        assert_eq!(payload.content_type, "text/xml");
        assert!(!payload.body.contains("<Say"));
        assert!(payload.body.contains("Response"));
    }
}
