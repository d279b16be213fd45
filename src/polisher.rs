use crate::error::AppError;
use crate::openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct CustomerDetails {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
}

/// Cleaned-up view of a collected call
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PolishedEnquiry {
    pub details: String,
    pub customerdetails: CustomerDetails,
}

#[async_trait]
pub trait TranscriptPolisher: Send + Sync {
    async fn polish(
        &self,
        initial_request: &str,
        customer_info: &str,
        follow_up: &str,
    ) -> Result<PolishedEnquiry, AppError>;
}

const POLISH_PROMPT: &str = "You are a data extraction assistant. \
Extract 'details' (the job description) primarily from SOURCE 1 and SOURCE 3. \
Extract 'customerdetails' (name, phone, address, email) primarily from SOURCE 2. \
If a field is missing, use null. Do not hallucinate data. \
Respond with a JSON object: {\"details\": string, \"customerdetails\": \
{\"name\": string|null, \"phone\": string|null, \"address\": string|null, \"email\": string|null}}.";

pub fn polish_request(initial_request: &str, customer_info: &str, follow_up: &str) -> String {
    format!(
        "SOURCE 1 (Initial Request):\n\"{initial_request}\"\n\n\
         SOURCE 2 (Customer Details Section):\n\"{customer_info}\"\n\n\
         SOURCE 3 (Final Follow-up):\n\"{follow_up}\""
    )
}

pub struct OpenAiPolisher {
    client: OpenAiClient,
}

impl OpenAiPolisher {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TranscriptPolisher for OpenAiPolisher {
    async fn polish(
        &self,
        initial_request: &str,
        customer_info: &str,
        follow_up: &str,
    ) -> Result<PolishedEnquiry, AppError> {
        let raw = self
            .client
            .complete_json(
                POLISH_PROMPT,
                polish_request(initial_request, customer_info, follow_up),
            )
            .await?;
        serde_json::from_str::<PolishedEnquiry>(&raw).map_err(|e| {
            error!(error=%e, raw=%raw, "failed to parse polished enquiry");
            AppError::Downstream(e.to_string())
        })
    }
}
