use crate::call_flow::CallFlowEngine;
use crate::call_store::CallRecordStore;
use crate::config::Settings;
use crate::polisher::TranscriptPolisher;

use std::sync::Arc;

pub struct AppState {
    pub settings: Settings,
    pub engine: CallFlowEngine,
    pub store: Arc<dyn CallRecordStore>,
    /// Only present when a language model is configured
    pub polisher: Option<Arc<dyn TranscriptPolisher>>,
}
