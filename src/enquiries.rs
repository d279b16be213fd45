use crate::db_types::{CallRecord, CallStep};
use crate::error::AppError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

/// Hands a completed call to the enquiry-intake service, which extracts the job lead
#[async_trait]
pub trait DownstreamEnquiryGateway: Send + Sync {
    /// Returns the id of the created enquiry
    async fn submit(&self, record: &CallRecord) -> Result<Uuid, AppError>;
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnquiryRequest<'a> {
    pub call_sid: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_status: Option<&'a str>,
    pub steps: &'a [CallStep],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<&'a str>,
}

impl<'a> From<&'a CallRecord> for CreateEnquiryRequest<'a> {
    fn from(record: &'a CallRecord) -> Self {
        Self {
            call_sid: &record.call_sid,
            from: &record.from,
            to: &record.to,
            recording_url: record.recording_url.as_deref(),
            recording_status: record.recording_status.as_deref(),
            steps: &record.steps,
            transcript: record.transcript.as_deref(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct CreatedEnquiry {
    pub id: Uuid,
}

#[derive(Deserialize, Debug)]
pub struct CreateEnquiryResponse {
    pub enquiry: CreatedEnquiry,
}

pub struct HttpEnquiryGateway {
    http_client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl HttpEnquiryGateway {
    pub fn new(
        http_client: reqwest::Client,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl DownstreamEnquiryGateway for HttpEnquiryGateway {
    async fn submit(&self, record: &CallRecord) -> Result<Uuid, AppError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or(AppError::NotConfigured("enquiries api"))?;
        let url = format!("{}/enquiries", base_url.trim_end_matches('/'));
        let mut rq = self
            .http_client
            .post(url)
            .json(&CreateEnquiryRequest::from(record));
        if let Some(key) = &self.api_key {
            rq = rq.header("x-api-key", key);
        }
        let resp = rq
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(error=%e, call_sid=%record.call_sid, "failed to submit enquiry");
                AppError::Downstream(e.to_string())
            })?;
        let created = resp.json::<CreateEnquiryResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize enquiry response");
            AppError::Downstream(e.to_string())
        })?;
        info!(call_sid=%record.call_sid, enquiry_id=%created.enquiry.id, "enquiry created");
        Ok(created.enquiry.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_types::CallStatus;

    #[test]
    fn request_body_matches_intake_schema() {
        let mut record = CallRecord::new("CA77");
        record.from = "+61411111111".to_string();
        record.to = "+61400555666".to_string();
        record.status = CallStatus::VaProcessed;
        record.steps = vec![CallStep::new("job-details", "Fix my fence")];
        record.transcript = Some("Fix my fence".to_string());

        let body = serde_json::to_value(CreateEnquiryRequest::from(&record)).unwrap();
        assert_eq!(body["callSid"], "CA77");
        assert_eq!(body["from"], "+61411111111");
        assert_eq!(body["to"], "+61400555666");
        assert_eq!(body["steps"][0]["name"], "job-details");
        assert_eq!(body["transcript"], "Fix my fence");
        assert!(body.get("recordingUrl").is_none());
    }

    #[tokio::test]
    async fn unconfigured_gateway_refuses_to_submit() {
        let gateway = HttpEnquiryGateway::new(reqwest::Client::new(), None, None);
        let err = gateway.submit(&CallRecord::new("CA1")).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
    }
}
