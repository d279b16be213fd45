mod analysis;
mod call_flow;
mod call_store;
mod config;
mod db_types;
mod directive;
mod directory;
mod enquiries;
mod error;
mod flow;
mod handlers;
mod openai;
mod openai_types;
mod payload;
mod polisher;
mod response_builder;
mod sinch_types;
mod sms;
mod twilio_types;
mod types;
mod utils;

use crate::analysis::{KeywordSpeechAnalyzer, OpenAiSpeechAnalyzer, SpeechAnalysisGateway};
use crate::call_flow::CallFlowEngine;
use crate::call_store::{CallRecordStore, InMemoryCallStore, PgCallStore};
use crate::config::Settings;
use crate::directory::{StaticTradieDirectory, TradieDirectory};
use crate::enquiries::HttpEnquiryGateway;
use crate::error::{handle_error, AppError};
use crate::flow::{webhook_path, ROUTED_EVENTS};
use crate::openai::OpenAiClient;
use crate::polisher::{OpenAiPolisher, TranscriptPolisher};
use crate::sms::{TwilioCredentials, TwilioSmsGateway};
use crate::types::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const DEFAULT_RING_TIMEOUT_SECS: u16 = 20;
    pub const DEFAULT_VOICEMAIL_MAX_SECS: u16 = 120;
    pub const DEFAULT_DOWNSTREAM_TIMEOUT_MILLIS: u64 = 4_000;

    pub const VOICE: &str = "Google.en-AU-Neural2-C";
    pub const LANGUAGE: &str = "en-AU";
    pub const SPEECH_MODEL: &str = "phone_call";
    pub const SPEECH_TIMEOUT_SECS: &str = "3";
    pub const TRADE_HINTS: &[&str] = &[
        "electrician",
        "power point",
        "switchboard",
        "lighting",
        "rewire",
        "safety switch",
    ];
    pub const TRANSCRIPT_SEPARATOR: &str = " \n ";
    pub const DEFAULT_BUSINESS_NAME: &str = "the service";

    pub const UNROUTED_PROMPT: &str = "We could not connect your call. Please check the number.";
    pub const ERROR_PROMPT: &str = "An error occurred. Goodbye.";
    pub const GOODBYE_PROMPT: &str = "Thank you. Goodbye.";
    pub const NO_MESSAGE_PROMPT: &str = "We did not receive a message. Goodbye.";
    pub const VA_ADDRESS_PROMPT: &str = "Thank you. To make sure we log your job with the correct \
        details, please clearly state your full name, best contact number, and the property address.";
    pub const VA_FINAL_NOTES_PROMPT: &str = "Right. Anything else you want me to note ?";
    pub const VA_COMPLETE_PROMPT: &str =
        "Thank you for the details. We will be in touch shortly. Goodbye.";
    pub const IVR_RECORD_PROMPT: &str =
        "record your message after the beep. when you are done, hangup";
    pub const IVR_INVALID_PROMPT: &str = "Sorry, that's not a valid choice.";
    pub const IVR_SAVED_PROMPT: &str = "Thank you, your message has been saved. Goodbye.";
    pub const IVR_TRANSCRIBED_PROMPT: &str = "Thank you, transcription received. Goodbye.";
}

pub fn app(app_state: Arc<AppState>) -> Router {
    let mut router: Router<Arc<AppState>> = Router::new();
    for (flow, event) in ROUTED_EVENTS {
        if let Some(path) = webhook_path(*flow, *event) {
            router = router.route(path, handlers::twilio_webhook(*flow, *event));
        }
    }
    router
        .route("/webhooks/voice/all-calls", get(handlers::all_calls))
        .route(
            "/webhooks/voice/all-calls/polished",
            get(handlers::polished_calls),
        )
        .route(
            "/webhooks/sinch/voice/incoming-call",
            post(handlers::sinch_event),
        )
        .route("/ping", get(handlers::ping))
        .with_state(app_state)
}

async fn build_state(settings: Settings) -> Result<AppState, AppError> {
    let http_client = reqwest::Client::new();

    let store: Arc<dyn CallRecordStore> = match &settings.database_url {
        Some(url) => Arc::new(PgCallStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, call records are kept in memory");
            Arc::new(InMemoryCallStore::new())
        }
    };
    let directory: Arc<dyn TradieDirectory> = match &settings.tradies_file {
        Some(path) => Arc::new(StaticTradieDirectory::from_file(path).await?),
        None => Arc::new(StaticTradieDirectory::demo()),
    };

    let openai = settings.openai_api_key.as_ref().map(|key| {
        OpenAiClient::new(
            http_client.clone(),
            key.clone(),
            settings.openai_model.clone(),
        )
    });
    let (analyzer, polisher): (
        Arc<dyn SpeechAnalysisGateway>,
        Option<Arc<dyn TranscriptPolisher>>,
    ) = match openai {
        Some(client) => (
            Arc::new(OpenAiSpeechAnalyzer::new(client.clone())),
            Some(Arc::new(OpenAiPolisher::new(client))),
        ),
        None => {
            warn!("OPENAI_API_KEY not set, using keyword transcript analysis");
            (Arc::new(KeywordSpeechAnalyzer), None)
        }
    };

    let enquiries = HttpEnquiryGateway::new(
        http_client.clone(),
        settings.enquiries_api_url.clone(),
        settings.enquiries_api_key.clone(),
    );
    let credentials = match (&settings.twilio_account_sid, &settings.twilio_auth_token) {
        (Some(account_sid), Some(auth_token)) => Some(TwilioCredentials {
            account_sid: account_sid.clone(),
            auth_token: auth_token.clone(),
        }),
        _ => None,
    };
    let sms = TwilioSmsGateway::new(http_client, credentials);

    let engine = CallFlowEngine::new(
        store.clone(),
        directory,
        analyzer,
        Arc::new(enquiries),
        Arc::new(sms),
        settings.policy.clone(),
    );
    Ok(AppState {
        settings,
        engine,
        store,
        polisher,
    })
}

async fn run() -> Result<(), AppError> {
    let settings = Settings::from_env()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let app_state = Arc::new(build_state(settings).await?);

    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app(app_state).into_make_service())
        .await
        .map_err(|e| AppError::Config(format!("server error: {e}")))
}

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("tradie_calls", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }
    if let Err(e) = dotenvy::dotenv() {
        warn!(error=%e, "no .env file loaded");
    }

    if let Err(e) = run().await {
        handle_error(e);
        std::process::exit(1);
    }
}
