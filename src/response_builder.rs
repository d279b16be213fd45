use crate::directive::OutboundInstructions;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// A provider's encoding of outbound instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPayload {
    pub content_type: &'static str,
    pub body: String,
}

impl IntoResponse for ProviderPayload {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}

/// One implementation per telephony provider wire format
pub trait ResponseBuilder {
    fn build(&self, outbound: &OutboundInstructions) -> ProviderPayload;
}
