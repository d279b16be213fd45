use crate::error::AppError;
use crate::openai::OpenAiClient;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

/// Verdict on whether a transcript describes work the tradie could take on
#[derive(Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JobAnalysis {
    pub is_job: bool,
    pub summary: String,
}

#[async_trait]
pub trait SpeechAnalysisGateway: Send + Sync {
    async fn analyze(&self, transcript: &str) -> Result<JobAnalysis, AppError>;
}

/// Used when no language model is configured
pub struct KeywordSpeechAnalyzer;

#[async_trait]
impl SpeechAnalysisGateway for KeywordSpeechAnalyzer {
    async fn analyze(&self, transcript: &str) -> Result<JobAnalysis, AppError> {
        let text = transcript.to_lowercase();
        let analysis = if text.contains("quote") || text.contains("urgent") {
            JobAnalysis {
                is_job: true,
                summary: "Potential new job detected from transcript.".to_string(),
            }
        } else {
            JobAnalysis {
                is_job: false,
                summary: "General inquiry.".to_string(),
            }
        };
        Ok(analysis)
    }
}

const CLASSIFY_PROMPT: &str = "You screen voicemail transcripts for a trades business. \
Decide whether the caller is asking for work to be done (a job lead). \
Respond with a JSON object: {\"isJob\": boolean, \"summary\": string}. \
The summary is one sentence under twenty words describing the job, or the reason for the call.";

pub struct OpenAiSpeechAnalyzer {
    client: OpenAiClient,
}

impl OpenAiSpeechAnalyzer {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpeechAnalysisGateway for OpenAiSpeechAnalyzer {
    async fn analyze(&self, transcript: &str) -> Result<JobAnalysis, AppError> {
        let raw = self
            .client
            .complete_json(CLASSIFY_PROMPT, transcript.to_string())
            .await?;
        debug!(raw=%raw, "transcript classification");
        serde_json::from_str::<JobAnalysis>(&raw).map_err(|e| {
            error!(error=%e, raw=%raw, "failed to parse transcript classification");
            AppError::Downstream(e.to_string())
        })
    }
}
