//! Provider-agnostic description of what the call should do next.  The flow engine only ever
//! produces these; a `ResponseBuilder` turns them into a provider's wire format.

use crate::flow::{EventKind, FlowKind, FlowToken};

/// Where the provider should report the outcome of an instruction
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Callback {
    pub flow: FlowKind,
    pub event: EventKind,
    pub token: Option<FlowToken>,
}

impl Callback {
    pub fn new(flow: FlowKind, event: EventKind) -> Self {
        Self {
            flow,
            event,
            token: None,
        }
    }

    pub fn with_token(flow: FlowKind, event: EventKind, token: FlowToken) -> Self {
        Self {
            flow,
            event,
            token: Some(token),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DigitGather {
    pub prompt: String,
    pub num_digits: u16,
    pub callback: Callback,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SpeechGather {
    /// Spoken while listening; the caller may talk over it
    pub prompt: Option<String>,
    /// Vocabulary to bias recognition toward
    pub hints: Vec<String>,
    pub callback: Callback,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RecordDirective {
    pub play_beep: bool,
    pub max_length_secs: Option<u16>,
    pub transcribe: bool,
    pub transcribe_callback: Option<Callback>,
    pub status_callback: Option<Callback>,
    /// Where control goes once the recording ends
    pub action: Option<Callback>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ForwardDirective {
    pub number: String,
    pub timeout_secs: Option<u16>,
    pub action: Option<Callback>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Instruction {
    Answer,
    Say(String),
    GatherDigits(DigitGather),
    GatherSpeech(SpeechGather),
    Record(RecordDirective),
    /// Background recording of both call legs; progress is reported to the callback
    StartRecording { status_callback: Callback },
    Forward(ForwardDirective),
    Redirect(Callback),
    Hangup,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OutboundInstructions {
    Script(Vec<Instruction>),
    /// Bare acknowledgment for fire-and-forget callbacks
    Acknowledge,
}

impl OutboundInstructions {
    /// Say something and hang up
    pub fn farewell(text: &str) -> Self {
        Self::Script(vec![Instruction::Say(text.to_string()), Instruction::Hangup])
    }

    pub fn instructions(&self) -> &[Instruction] {
        match self {
            Self::Script(instructions) => instructions,
            Self::Acknowledge => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.instructions().last(), Some(Instruction::Hangup))
    }
}
