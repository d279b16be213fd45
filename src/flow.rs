use base64::{engine, Engine};
use std::fmt;

/// Which call flow a webhook belongs to.  Fixed per route.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlowKind {
    DirectDial,
    Ivr,
    Va,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventKind {
    Incoming,
    Selection,
    RecordingStatus,
    TranscriptionReady,
    SpeechResult,
    DialCompleted,
    Goodbye,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::DirectDial => "direct-dial",
            Self::Ivr => "ivr",
            Self::Va => "va",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Incoming => "incoming",
            Self::Selection => "selection",
            Self::RecordingStatus => "recording-status",
            Self::TranscriptionReady => "transcription-ready",
            Self::SpeechResult => "speech-result",
            Self::DialCompleted => "dial-completed",
            Self::Goodbye => "goodbye",
        };
        write!(f, "{name}")
    }
}

/// Webhook path the telephony provider posts a given flow event to.  Combinations without a path
/// are never routed.
pub fn webhook_path(flow: FlowKind, event: EventKind) -> Option<&'static str> {
    use EventKind::*;
    use FlowKind::*;
    match (flow, event) {
        (DirectDial, Incoming) => Some("/webhooks/voice/incoming"),
        (DirectDial, DialCompleted) => Some("/webhooks/voice/completed"),
        (DirectDial, TranscriptionReady) => Some("/webhooks/voice/transcription"),
        (DirectDial, RecordingStatus) => Some("/webhooks/voice/recording-status"),
        (DirectDial, Goodbye) => Some("/webhooks/voice/goodbye"),
        (Ivr, Incoming) => Some("/webhooks/voice/ivr-incoming"),
        (Ivr, Selection) => Some("/webhooks/voice/ivr-selection"),
        (Ivr, RecordingStatus) => Some("/webhooks/voice/ivr-recording-completed"),
        (Ivr, TranscriptionReady) => Some("/webhooks/voice/ivr-transcription-completed"),
        (Va, Incoming) => Some("/webhooks/voice/va-incoming"),
        (Va, SpeechResult) => Some("/webhooks/voice/va-transcription-available"),
        (Va, RecordingStatus) => Some("/webhooks/voice/va-recording-post"),
        _ => None,
    }
}

/// Every routed (flow, event) pair
pub const ROUTED_EVENTS: &[(FlowKind, EventKind)] = &[
    (FlowKind::DirectDial, EventKind::Incoming),
    (FlowKind::DirectDial, EventKind::DialCompleted),
    (FlowKind::DirectDial, EventKind::TranscriptionReady),
    (FlowKind::DirectDial, EventKind::RecordingStatus),
    (FlowKind::DirectDial, EventKind::Goodbye),
    (FlowKind::Ivr, EventKind::Incoming),
    (FlowKind::Ivr, EventKind::Selection),
    (FlowKind::Ivr, EventKind::RecordingStatus),
    (FlowKind::Ivr, EventKind::TranscriptionReady),
    (FlowKind::Va, EventKind::Incoming),
    (FlowKind::Va, EventKind::SpeechResult),
    (FlowKind::Va, EventKind::RecordingStatus),
];

/// The ordered questions of the virtual assistant flow
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum VaStep {
    JobDetails,
    AddressDetails,
    FinalNotes,
}

impl VaStep {
    pub const SEQUENCE: [VaStep; 3] = [
        VaStep::JobDetails,
        VaStep::AddressDetails,
        VaStep::FinalNotes,
    ];

    pub fn first() -> Self {
        Self::SEQUENCE[0]
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::JobDetails => "job-details",
            Self::AddressDetails => "address-details",
            Self::FinalNotes => "final-notes",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::SEQUENCE.into_iter().find(|s| s.slug() == slug)
    }

    pub fn position(&self) -> usize {
        Self::SEQUENCE
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::SEQUENCE.len())
    }

    /// The step asked after this one; `None` for the last step
    pub fn next(&self) -> Option<Self> {
        Self::SEQUENCE.get(self.position() + 1).copied()
    }

    pub fn is_first(&self) -> bool {
        *self == Self::first()
    }
}

/// Opaque value round-tripped through the provider naming the step whose answer the next callback
/// carries.  The wire form hides the step slug; anything that fails to decode is rejected and the
/// caller restarts from the first step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FlowToken(VaStep);

impl FlowToken {
    pub fn new(step: VaStep) -> Self {
        Self(step)
    }

    pub fn step(&self) -> VaStep {
        self.0
    }

    pub fn encode(&self) -> String {
        engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0.slug())
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw.trim())
            .ok()?;
        let slug = std::str::from_utf8(&bytes).ok()?;
        VaStep::from_slug(slug).map(Self)
    }
}
