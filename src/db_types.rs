use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Progression of a call through its flow.  Only ever moved forward by explicit updates; the last
/// write wins.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Placeholder for records created lazily by a callback that arrived first
    Processing,
    Received,
    VaReceived,
    Processed,
    VaProcessed,
    IvrRecordingCompleted,
    IvrTranscribed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Received => "RECEIVED",
            Self::VaReceived => "VA_RECEIVED",
            Self::Processed => "PROCESSED",
            Self::VaProcessed => "VA_PROCESSED",
            Self::IvrRecordingCompleted => "IVR_RECORDING_COMPLETED",
            Self::IvrTranscribed => "IVR_TRANSCRIBED",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "RECEIVED" => Ok(Self::Received),
            "VA_RECEIVED" => Ok(Self::VaReceived),
            "PROCESSED" => Ok(Self::Processed),
            "VA_PROCESSED" => Ok(Self::VaProcessed),
            "IVR_RECORDING_COMPLETED" => Ok(Self::IvrRecordingCompleted),
            "IVR_TRANSCRIBED" => Ok(Self::IvrTranscribed),
            other => Err(format!("unknown call status '{other}'")),
        }
    }
}

/// One collected answer in a speech flow
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct CallStep {
    pub name: String,
    pub text: String,
}

impl CallStep {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub status: CallStatus,
    #[serde(default)]
    pub steps: Vec<CallStep>,
    pub recording_url: Option<String>,
    pub recording_status: Option<String>,
    pub transcript: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CallRecord {
    pub fn new(call_sid: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            call_sid: call_sid.to_string(),
            from: String::new(),
            to: String::new(),
            status: CallStatus::Processing,
            steps: vec![],
            recording_url: None,
            recording_status: None,
            transcript: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the set fields of an update.  Numbers are only filled in while still empty.
    pub fn apply(&mut self, update: &CallUpdate) {
        if let Some(from) = &update.from {
            if self.from.is_empty() {
                self.from = from.clone();
            }
        }
        if let Some(to) = &update.to {
            if self.to.is_empty() {
                self.to = to.clone();
            }
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(transcript) = &update.transcript {
            self.transcript = Some(transcript.clone());
        }
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Sparse set of mutable call fields; `None` leaves the stored value alone
#[derive(Default, Clone, Debug)]
pub struct CallUpdate {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<CallStatus>,
    pub transcript: Option<String>,
}

impl CallUpdate {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn received(from: &str, to: &str, status: CallStatus) -> Self {
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn transcript(transcript: String, status: CallStatus) -> Self {
        Self {
            status: Some(status),
            transcript: Some(transcript),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Tradie {
    pub id: String,
    pub name: String,
    pub virtual_number: String,
    /// The number calls are forwarded to
    pub real_mobile: String,
    #[serde(default)]
    pub auto_create_jobs: bool,
}
