use crate::error::AppError;

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, error};

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<(), AppError>;
}

pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

/// Sends texts through the Twilio Messages API
pub struct TwilioSmsGateway {
    http_client: reqwest::Client,
    credentials: Option<TwilioCredentials>,
}

impl TwilioSmsGateway {
    pub fn new(http_client: reqwest::Client, credentials: Option<TwilioCredentials>) -> Self {
        Self {
            http_client,
            credentials,
        }
    }
}

#[async_trait]
impl SmsGateway for TwilioSmsGateway {
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<(), AppError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(AppError::NotConfigured("twilio sms"))?;
        let account_sid = &credentials.account_sid;
        let url =
            format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Messages.json");
        let mut form = HashMap::new();
        form.insert("From", from);
        form.insert("To", to);
        form.insert("Body", body);
        let resp = self
            .http_client
            .post(url)
            .basic_auth(account_sid, Some(&credentials.auth_token))
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(error=%e, "failed to send sms request to twilio");
                AppError::Downstream(e.to_string())
            })?;
        debug!(twilio_resp=?resp.status(), to=%to, "twilio sms resp");
        Ok(())
    }
}

/// Text sent to a tradie when a voicemail looks like a job
pub fn lead_notification(summary: &str) -> String {
    format!("New Lead detected: \"{summary}\". Reply YES to create job.")
}
