use crate::db_types::CallRecord;
use crate::directive::OutboundInstructions;
use crate::error::AppError;
use crate::flow::{EventKind, FlowKind, VaStep};
use crate::payload::WebhookPayload;
use crate::response_builder::{ProviderPayload, ResponseBuilder};
use crate::sinch_types::{SinchEvent, SvamlBuilder};
use crate::twilio_types::TwimlBuilder;
use crate::types::AppState;
use crate::utils::{bounded, callback_base};

use axum::{
    extract::{Host, RawQuery, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{post, MethodRouter},
    Json,
};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

fn webhook_payload(headers: &HeaderMap, query: Option<&str>, body: &str) -> WebhookPayload {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok());
    let query = query
        .map(|raw| {
            serde_urlencoded::from_str::<HashMap<String, String>>(raw).unwrap_or_else(|e| {
                warn!(error=%e, query=%raw, "ignoring unparseable query string");
                HashMap::new()
            })
        })
        .unwrap_or_default();
    WebhookPayload::parse(content_type, body).with_query(&query)
}

/// Twilio webhook for one flow event, answered with TwiML
pub fn twilio_webhook(flow: FlowKind, event: EventKind) -> MethodRouter<Arc<AppState>> {
    post(
        move |host: Option<Host>,
              State(app_state): State<Arc<AppState>>,
              RawQuery(query): RawQuery,
              headers: HeaderMap,
              body: String| async move {
            trace!(flow=%flow, event=%event, body=%body, "twilio webhook body");
            let payload = webhook_payload(&headers, query.as_deref(), &body);
            let outbound = app_state.engine.handle_event(flow, event, &payload).await;
            let host = host.map(|Host(h)| h).unwrap_or_else(|| "localhost".to_string());
            let base = callback_base(app_state.settings.base_url.as_deref(), &host);
            TwimlBuilder::new(base).build(&outbound)
        },
    )
}

/// Single Sinch callback url; the event type selects the virtual-assistant step
pub async fn sinch_event(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> ProviderPayload {
    trace!(body=%body, "sinch callback body");
    let outbound = match SinchEvent::from_json(&body) {
        Ok(sinch_event) => match sinch_event.flow_event() {
            Some((event, payload)) => {
                app_state
                    .engine
                    .handle_event(FlowKind::Va, event, &payload)
                    .await
            }
            None => {
                debug!(event=%sinch_event.event, call_id=?sinch_event.callid, "sinch notification");
                OutboundInstructions::Acknowledge
            }
        },
        Err(_) => OutboundInstructions::Acknowledge,
    };
    SvamlBuilder.build(&outbound)
}

pub async fn all_calls(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<CallRecord>>, AppError> {
    Ok(Json(app_state.store.list_all().await?))
}

fn step_text(call: &CallRecord, step: VaStep) -> &str {
    call.steps
        .iter()
        .find(|s| s.name == step.slug())
        .map(|s| s.text.as_str())
        .unwrap_or_default()
}

/// One polished enquiry per call, newline delimited
pub async fn polished_calls(State(app_state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let calls = app_state.store.list_all().await?;
    if calls.is_empty() {
        return Ok(Json(serde_json::json!({ "error": "No calls found" })).into_response());
    }
    let polisher = app_state
        .polisher
        .as_ref()
        .ok_or(AppError::NotConfigured("transcript polisher"))?;
    let limit = app_state.settings.policy.downstream_timeout;
    let polished = join_all(calls.iter().map(|call| {
        bounded(
            limit,
            "transcript polish",
            polisher.polish(
                step_text(call, VaStep::JobDetails),
                step_text(call, VaStep::AddressDetails),
                step_text(call, VaStep::FinalNotes),
            ),
        )
    }))
    .await;
    let body = polished
        .into_iter()
        .flatten()
        .filter_map(|p| serde_json::to_string(&p).ok())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}

pub async fn ping() -> &'static str {
    "pong"
}

#[cfg(test)]
mod tests {
    use crate::analysis::KeywordSpeechAnalyzer;
    use crate::call_flow::CallFlowEngine;
    use crate::call_store::{CallRecordStore, InMemoryCallStore};
    use crate::config::Settings;
    use crate::db_types::CallStep;
    use crate::directory::StaticTradieDirectory;
    use crate::enquiries::HttpEnquiryGateway;
    use crate::error::AppError;
    use crate::flow::{FlowToken, VaStep};
    use crate::polisher::{CustomerDetails, PolishedEnquiry, TranscriptPolisher};
    use crate::sms::TwilioSmsGateway;
    use crate::types::AppState;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoPolisher;

    #[async_trait]
    impl TranscriptPolisher for EchoPolisher {
        async fn polish(
            &self,
            initial_request: &str,
            customer_info: &str,
            _follow_up: &str,
        ) -> Result<PolishedEnquiry, AppError> {
            Ok(PolishedEnquiry {
                details: initial_request.to_string(),
                customerdetails: CustomerDetails {
                    address: Some(customer_info.to_string()),
                    ..Default::default()
                },
            })
        }
    }

    fn test_app(polisher: Option<Arc<dyn TranscriptPolisher>>) -> (Router, Arc<InMemoryCallStore>) {
        let store = Arc::new(InMemoryCallStore::new());
        let settings = Settings::default();
        let http_client = reqwest::Client::new();
        let engine = CallFlowEngine::new(
            store.clone(),
            Arc::new(StaticTradieDirectory::demo()),
            Arc::new(KeywordSpeechAnalyzer),
            Arc::new(HttpEnquiryGateway::new(http_client.clone(), None, None)),
            Arc::new(TwilioSmsGateway::new(http_client, None)),
            settings.policy.clone(),
        );
        let app_state = Arc::new(AppState {
            settings,
            engine,
            store: store.clone(),
            polisher,
        });
        (crate::app(app_state), store)
    }

    fn form_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "calls.test")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn va_incoming_answers_with_twiml() {
        let (app, store) = test_app(None);
        let response = app
            .oneshot(form_post(
                "/webhooks/voice/va-incoming",
                "CallSid=CA1&From=%2B61411111111&To=%2B61400555666",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
        let twiml = body_text(response).await;
        let token = FlowToken::new(VaStep::JobDetails).encode();
        assert!(twiml.contains("<Start><Recording"));
        assert!(twiml.contains(&format!(
            "https://calls.test/webhooks/voice/va-transcription-available?step={token}"
        )));
        assert!(twiml.contains("Tom&apos;s Plumbing") || twiml.contains("Tom's Plumbing"));
        assert!(store.get("CA1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn speech_callback_reads_token_from_query() {
        let (app, store) = test_app(None);
        let token = FlowToken::new(VaStep::JobDetails).encode();
        let response = app
            .oneshot(form_post(
                &format!("/webhooks/voice/va-transcription-available?step={token}"),
                "CallSid=CA2&To=%2B61400555666&SpeechResult=Need+a+power+point+installed",
            ))
            .await
            .unwrap();
        let twiml = body_text(response).await;
        let next = FlowToken::new(VaStep::AddressDetails).encode();
        assert!(twiml.contains(&format!("step={next}")));
        let record = store.get("CA2").await.unwrap().unwrap();
        assert_eq!(
            record.steps,
            vec![CallStep::new("job-details", "Need a power point installed")]
        );
    }

    #[tokio::test]
    async fn recording_callback_is_acknowledged() {
        let (app, store) = test_app(None);
        let response = app
            .oneshot(form_post(
                "/webhooks/voice/va-recording-post",
                "CallSid=CA3&RecordingUrl=https%3A%2F%2Fapi.twilio.com%2Frec%2FRE3&RecordingStatus=in-progress",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let twiml = body_text(response).await;
        assert!(!twiml.contains("<Say"));
        let record = store.get("CA3").await.unwrap().unwrap();
        assert_eq!(record.recording_status.as_deref(), Some("in-progress"));
    }

    #[tokio::test]
    async fn garbage_body_still_gets_twiml() {
        let (app, _) = test_app(None);
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/voice/ivr-selection")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{oops"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let twiml = body_text(response).await;
        assert!(twiml.contains("<Redirect"));
    }

    #[tokio::test]
    async fn sinch_incoming_call_runs_menu() {
        let (app, _) = test_app(None);
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/sinch/voice/incoming-call")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"event":"ice","callid":"sinch-1","cli":"61411111111","to":{"type":"number","endpoint":"+61400555666"}}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["instructions"][0]["name"], "answer");
        assert_eq!(body["action"]["name"], "runMenu");
        assert_eq!(body["custom"], FlowToken::new(VaStep::JobDetails).encode());
    }

    #[tokio::test]
    async fn sinch_unrouted_call_answers_before_apologising() {
        let (app, store) = test_app(None);
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/sinch/voice/incoming-call")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"event":"ice","callid":"sinch-2","cli":"61411111111","to":{"type":"number","endpoint":"+61400000000"}}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["instructions"][0]["name"], "answer");
        assert_eq!(body["instructions"][1]["name"], "say");
        assert_eq!(body["action"]["name"], "hangup");
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn polished_view_without_calls_reports_none() {
        let (app, _) = test_app(None);
        let request = Request::builder()
            .uri("/webhooks/voice/all-calls/polished")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"error":"No calls found"}"#);
    }

    #[tokio::test]
    async fn polished_view_emits_one_line_per_call() {
        let (app, store) = test_app(Some(Arc::new(EchoPolisher)));
        for (sid, job) in [("CA4", "Rewire kitchen"), ("CA5", "New switchboard")] {
            store
                .append_steps(
                    sid,
                    vec![
                        CallStep::new("address-details", "1 High St"),
                        CallStep::new("job-details", job),
                    ],
                )
                .await
                .unwrap();
        }
        let request = Request::builder()
            .uri("/webhooks/voice/all-calls/polished")
            .body(Body::empty())
            .unwrap();
        let body = body_text(app.oneshot(request).await.unwrap()).await;
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["details"], "Rewire kitchen");
        assert_eq!(lines[1]["customerdetails"]["address"], "1 High St");
    }

    #[tokio::test]
    async fn all_calls_lists_records() {
        let (app, store) = test_app(None);
        store
            .append_steps("CA6", vec![CallStep::new("job-details", "Fix fan")])
            .await
            .unwrap();
        let request = Request::builder()
            .uri("/webhooks/voice/all-calls")
            .body(Body::empty())
            .unwrap();
        let body: serde_json::Value =
            serde_json::from_str(&body_text(app.oneshot(request).await.unwrap()).await).unwrap();
        assert_eq!(body[0]["callSid"], "CA6");
        assert_eq!(body[0]["status"], "PROCESSING");
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (app, _) = test_app(None);
        let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        assert_eq!(body_text(app.oneshot(request).await.unwrap()).await, "pong");
    }
}
