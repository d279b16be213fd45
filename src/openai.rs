use crate::error::AppError;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload, ResponseFormat};

use tracing::{debug, error, warn};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Thin chat-completions client shared by the transcript classifiers and polishers
#[derive(Clone)]
pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(http_client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            http_client,
            api_key,
            model,
        }
    }

    /// Ask for a single JSON object answer and return its raw text
    pub async fn complete_json(&self, system: &str, user: String) -> Result<String, AppError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages: vec![OpenAIMessage::system(system), OpenAIMessage::user(user)],
            max_tokens: Some(512),
            temperature: Some(0.0),
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let resp = self
            .http_client
            .post(CHAT_COMPLETIONS_URL)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(error=%e, "failed to send request to OpenAI");
                AppError::Downstream(e.to_string())
            })?;
        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize openai response");
            AppError::Downstream(e.to_string())
        })?;
        if let Some(usage) = &resp.usage {
            debug!(
                id=%resp.id,
                model=%resp.model,
                prompt_tokens=usage.prompt_tokens,
                completion_tokens=usage.completion_tokens,
                total_tokens=usage.total_tokens,
                "openai completion"
            );
        }
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Downstream("openai returned no choices".to_string()))?;
        if choice.finish_reason.as_deref() != Some("stop") {
            warn!(id=%resp.id, finish_reason=?choice.finish_reason, "openai completion did not stop cleanly");
        }
        Ok(choice.message.content)
    }
}
