use crate::analysis::SpeechAnalysisGateway;
use crate::call_store::CallRecordStore;
use crate::config::FlowPolicy;
use crate::consts::{
    DEFAULT_BUSINESS_NAME, ERROR_PROMPT, GOODBYE_PROMPT, IVR_INVALID_PROMPT, IVR_RECORD_PROMPT,
    IVR_SAVED_PROMPT, IVR_TRANSCRIBED_PROMPT, NO_MESSAGE_PROMPT, TRADE_HINTS,
    TRANSCRIPT_SEPARATOR, UNROUTED_PROMPT, VA_ADDRESS_PROMPT, VA_COMPLETE_PROMPT,
    VA_FINAL_NOTES_PROMPT,
};
use crate::db_types::{CallRecord, CallStatus, CallStep, CallUpdate, Tradie};
use crate::directive::{
    Callback, DigitGather, ForwardDirective, Instruction, OutboundInstructions, RecordDirective,
    SpeechGather,
};
use crate::directory::TradieDirectory;
use crate::enquiries::DownstreamEnquiryGateway;
use crate::error::{handle_error, AppError};
use crate::flow::{EventKind, FlowKind, FlowToken, VaStep};
use crate::payload::{
    WebhookPayload, CALL_SID, DIAL_CALL_STATUS, DIGITS, FROM, RECORDING_STATUS, RECORDING_URL,
    SPEECH_RESULT, TO, TRANSCRIPTION_TEXT,
};
use crate::sms::{lead_notification, SmsGateway};
use crate::utils::bounded;

use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Drives a single call through its flow, one webhook at a time.  Holds no per-call state: the
/// current position comes from the webhook itself and the call record store.
pub struct CallFlowEngine {
    store: Arc<dyn CallRecordStore>,
    directory: Arc<dyn TradieDirectory>,
    analyzer: Arc<dyn SpeechAnalysisGateway>,
    enquiries: Arc<dyn DownstreamEnquiryGateway>,
    sms: Arc<dyn SmsGateway>,
    policy: FlowPolicy,
}

fn say(text: impl Into<String>) -> Instruction {
    Instruction::Say(text.into())
}

fn ivr_menu_prompt(name: &str) -> String {
    format!(
        "Thanks for calling {name}, please press 1 if you want to auto log a call, \
         press 2 if you wish to speak to us directly"
    )
}

fn voicemail_prompt(name: &str) -> String {
    format!("Sorry, {name} is unavailable right now. Please leave a message after the beep.")
}

fn va_prompt(step: VaStep, name: &str) -> String {
    match step {
        VaStep::JobDetails => format!(
            "Hi, thanks for calling {name}. In a few words, please describe the work you want done."
        ),
        VaStep::AddressDetails => VA_ADDRESS_PROMPT.to_string(),
        VaStep::FinalNotes => VA_FINAL_NOTES_PROMPT.to_string(),
    }
}

fn business_name(tradie: Option<&Tradie>) -> &str {
    tradie.map(|t| t.name.as_str()).unwrap_or(DEFAULT_BUSINESS_NAME)
}

/// Trade vocabulary plus the tradie's own name
fn speech_hints(tradie: Option<&Tradie>) -> Vec<String> {
    let mut hints: Vec<String> = TRADE_HINTS.iter().map(|h| h.to_string()).collect();
    if let Some(tradie) = tradie {
        hints.push(tradie.name.clone());
    }
    hints
}

/// Join step texts in flow order, whatever order they were stored in
pub fn assemble_transcript(steps: &[CallStep]) -> String {
    // first answer per step wins
    let mut ordered: Vec<&CallStep> = Vec::with_capacity(steps.len());
    for step in steps {
        if !ordered.iter().any(|s| s.name == step.name) {
            ordered.push(step);
        }
    }
    ordered.sort_by_key(|s| {
        VaStep::from_slug(&s.name)
            .map(|step| step.position())
            .unwrap_or(VaStep::SEQUENCE.len())
    });
    ordered
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(TRANSCRIPT_SEPARATOR)
}

/// Callbacks whose response the provider discards
fn is_fire_and_forget(flow: FlowKind, event: EventKind) -> bool {
    matches!(
        (flow, event),
        (FlowKind::DirectDial, EventKind::TranscriptionReady)
            | (FlowKind::DirectDial, EventKind::RecordingStatus)
            | (FlowKind::Va, EventKind::RecordingStatus)
    )
}

impl CallFlowEngine {
    pub fn new(
        store: Arc<dyn CallRecordStore>,
        directory: Arc<dyn TradieDirectory>,
        analyzer: Arc<dyn SpeechAnalysisGateway>,
        enquiries: Arc<dyn DownstreamEnquiryGateway>,
        sms: Arc<dyn SmsGateway>,
        policy: FlowPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            analyzer,
            enquiries,
            sms,
            policy,
        }
    }

    /// Map one webhook to the next instructions for the call.  Never fails: errors are logged
    /// and the caller hears an apology before the call ends.
    pub async fn handle_event(
        &self,
        flow: FlowKind,
        event: EventKind,
        payload: &WebhookPayload,
    ) -> OutboundInstructions {
        trace!(flow=%flow, event=%event, payload=?payload, "webhook event");
        use EventKind::*;
        use FlowKind::*;
        let result = match (flow, event) {
            (DirectDial, Incoming) => self.direct_incoming(payload).await,
            (DirectDial, DialCompleted) => Ok(self.direct_dial_completed(payload).await),
            (DirectDial, TranscriptionReady) => self.direct_transcription(payload).await,
            (DirectDial, RecordingStatus) | (Va, RecordingStatus) => {
                self.recording_status(payload).await
            }
            (DirectDial, Goodbye) => Ok(OutboundInstructions::farewell(GOODBYE_PROMPT)),
            (Ivr, Incoming) => Ok(self.ivr_entry(payload).await),
            (Ivr, Selection) => Ok(self.ivr_selection(payload).await),
            (Ivr, RecordingStatus) => Ok(self.ivr_recording_completed(payload).await),
            (Ivr, TranscriptionReady) => Ok(self.ivr_transcription(payload).await),
            (Va, Incoming) => self.va_incoming(payload).await,
            (Va, SpeechResult) => self.va_speech_result(payload).await,
            _ => {
                warn!(flow=%flow, event=%event, "no handler for flow event");
                Ok(OutboundInstructions::farewell(ERROR_PROMPT))
            }
        };
        result.unwrap_or_else(|e| {
            handle_error(e);
            if is_fire_and_forget(flow, event) {
                OutboundInstructions::Acknowledge
            } else {
                OutboundInstructions::farewell(ERROR_PROMPT)
            }
        })
    }

    async fn tradie_for(&self, payload: &WebhookPayload) -> Option<Tradie> {
        match payload.get(TO) {
            Some(to) => self.directory.by_virtual_number(to).await,
            None => None,
        }
    }

    async fn direct_incoming(
        &self,
        payload: &WebhookPayload,
    ) -> Result<OutboundInstructions, AppError> {
        let Some(tradie) = self.tradie_for(payload).await else {
            warn!(to=?payload.get(TO), "no tradie for dialed number");
            return Ok(OutboundInstructions::farewell(UNROUTED_PROMPT));
        };
        match payload.get(CALL_SID) {
            Some(call_sid) => {
                let update = CallUpdate::received(
                    payload.get(FROM).unwrap_or_default(),
                    payload.get(TO).unwrap_or_default(),
                    CallStatus::Received,
                );
                // the forward still goes ahead if the log write fails
                if let Err(e) = self.store.upsert_status(call_sid, update).await {
                    handle_error(e);
                }
            }
            None => warn!("incoming call without a call sid"),
        }
        info!(tradie=%tradie.id, "forwarding call");
        Ok(OutboundInstructions::Script(vec![
            Instruction::Forward(ForwardDirective {
                number: tradie.real_mobile,
                timeout_secs: Some(self.policy.ring_timeout_secs),
                action: Some(Callback::new(FlowKind::DirectDial, EventKind::DialCompleted)),
            }),
            Instruction::Record(RecordDirective {
                play_beep: false,
                transcribe: true,
                transcribe_callback: Some(Callback::new(
                    FlowKind::DirectDial,
                    EventKind::TranscriptionReady,
                )),
                ..Default::default()
            }),
        ]))
    }

    async fn direct_dial_completed(&self, payload: &WebhookPayload) -> OutboundInstructions {
        let outcome = payload
            .get(DIAL_CALL_STATUS)
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        debug!(call_sid=?payload.get(CALL_SID), outcome=%outcome, "dial completed");
        if outcome == "completed" || outcome == "answered" {
            return OutboundInstructions::Script(vec![Instruction::Hangup]);
        }
        let tradie = self.tradie_for(payload).await;
        OutboundInstructions::Script(vec![
            say(voicemail_prompt(business_name(tradie.as_ref()))),
            Instruction::Record(RecordDirective {
                play_beep: true,
                max_length_secs: Some(self.policy.voicemail_max_secs),
                transcribe: true,
                transcribe_callback: Some(Callback::new(
                    FlowKind::DirectDial,
                    EventKind::TranscriptionReady,
                )),
                status_callback: Some(Callback::new(
                    FlowKind::DirectDial,
                    EventKind::RecordingStatus,
                )),
                action: Some(Callback::new(FlowKind::DirectDial, EventKind::Goodbye)),
            }),
        ])
    }

    async fn direct_transcription(
        &self,
        payload: &WebhookPayload,
    ) -> Result<OutboundInstructions, AppError> {
        let Some(text) = payload.get(TRANSCRIPTION_TEXT) else {
            debug!(call_sid=?payload.get(CALL_SID), "empty transcription");
            return Ok(OutboundInstructions::Acknowledge);
        };
        let call_sid = payload.require(CALL_SID)?;
        let record = self
            .store
            .upsert_status(
                call_sid,
                CallUpdate::transcript(text.to_string(), CallStatus::Processed),
            )
            .await?;

        let limit = self.policy.downstream_timeout;
        let Some(analysis) = bounded(limit, "speech analysis", self.analyzer.analyze(text)).await
        else {
            return Ok(OutboundInstructions::Acknowledge);
        };
        if !analysis.is_job {
            debug!(call_sid=%call_sid, summary=%analysis.summary, "not a job lead");
            return Ok(OutboundInstructions::Acknowledge);
        }

        let tradie = match self.tradie_for(payload).await {
            Some(tradie) => Some(tradie),
            None => self.directory.by_virtual_number(&record.to).await,
        };
        let Some(tradie) = tradie else {
            warn!(call_sid=%call_sid, "job lead without a tradie");
            return Ok(OutboundInstructions::Acknowledge);
        };
        if tradie.auto_create_jobs {
            if let Some(id) = bounded(limit, "enquiry submission", self.enquiries.submit(&record))
                .await
            {
                info!(call_sid=%call_sid, enquiry_id=%id, "job created from voicemail");
            }
        } else {
            let body = lead_notification(&analysis.summary);
            let sent = self
                .sms
                .send(&tradie.virtual_number, &tradie.real_mobile, &body);
            if bounded(limit, "lead sms", sent).await.is_some() {
                info!(call_sid=%call_sid, tradie=%tradie.id, "lead sms sent");
            }
        }
        Ok(OutboundInstructions::Acknowledge)
    }

    async fn recording_status(
        &self,
        payload: &WebhookPayload,
    ) -> Result<OutboundInstructions, AppError> {
        let Some(call_sid) = payload.get(CALL_SID) else {
            warn!("recording callback without a call sid");
            return Ok(OutboundInstructions::Acknowledge);
        };
        self.store
            .attach_recording(
                call_sid,
                payload.get(RECORDING_URL),
                payload.get(RECORDING_STATUS),
            )
            .await?;
        Ok(OutboundInstructions::Acknowledge)
    }

    async fn ivr_entry(&self, payload: &WebhookPayload) -> OutboundInstructions {
        let tradie = self.tradie_for(payload).await;
        OutboundInstructions::Script(vec![
            Instruction::GatherDigits(DigitGather {
                prompt: ivr_menu_prompt(business_name(tradie.as_ref())),
                num_digits: 1,
                callback: Callback::new(FlowKind::Ivr, EventKind::Selection),
            }),
            // no digit: start over
            Instruction::Redirect(Callback::new(FlowKind::Ivr, EventKind::Incoming)),
        ])
    }

    async fn ivr_selection(&self, payload: &WebhookPayload) -> OutboundInstructions {
        let digit = payload.get(DIGITS).unwrap_or("0");
        debug!(call_sid=?payload.get(CALL_SID), digit=%digit, "ivr selection");
        match digit {
            "1" => OutboundInstructions::Script(vec![
                say(IVR_RECORD_PROMPT),
                Instruction::Record(RecordDirective {
                    play_beep: true,
                    transcribe: true,
                    transcribe_callback: Some(Callback::new(
                        FlowKind::Ivr,
                        EventKind::TranscriptionReady,
                    )),
                    status_callback: Some(Callback::new(FlowKind::Ivr, EventKind::RecordingStatus)),
                    action: Some(Callback::new(FlowKind::DirectDial, EventKind::Goodbye)),
                    ..Default::default()
                }),
            ]),
            "2" => {
                let number = if self.policy.ivr_forward_to_tradie {
                    self.tradie_for(payload).await.map(|t| t.real_mobile)
                } else {
                    payload.get(TO).map(str::to_string)
                };
                match number {
                    Some(number) => {
                        OutboundInstructions::Script(vec![Instruction::Forward(ForwardDirective {
                            number,
                            timeout_secs: None,
                            action: None,
                        })])
                    }
                    None => {
                        warn!(to=?payload.get(TO), "nowhere to forward ivr call");
                        OutboundInstructions::farewell(UNROUTED_PROMPT)
                    }
                }
            }
            _ => OutboundInstructions::Script(vec![
                say(IVR_INVALID_PROMPT),
                Instruction::Redirect(Callback::new(FlowKind::Ivr, EventKind::Incoming)),
            ]),
        }
    }

    async fn ivr_recording_completed(&self, payload: &WebhookPayload) -> OutboundInstructions {
        match payload.get(CALL_SID) {
            Some(call_sid) => {
                let stored = async {
                    self.store
                        .attach_recording(
                            call_sid,
                            payload.get(RECORDING_URL),
                            payload.get(RECORDING_STATUS),
                        )
                        .await?;
                    self.store
                        .upsert_status(
                            call_sid,
                            CallUpdate::status(CallStatus::IvrRecordingCompleted),
                        )
                        .await
                };
                if let Err(e) = stored.await {
                    handle_error(e);
                }
            }
            None => warn!("ivr recording callback without a call sid"),
        }
        OutboundInstructions::farewell(IVR_SAVED_PROMPT)
    }

    async fn ivr_transcription(&self, payload: &WebhookPayload) -> OutboundInstructions {
        match (payload.get(CALL_SID), payload.get(TRANSCRIPTION_TEXT)) {
            (Some(call_sid), Some(text)) => {
                let update = CallUpdate::transcript(text.to_string(), CallStatus::IvrTranscribed);
                if let Err(e) = self.store.upsert_status(call_sid, update).await {
                    handle_error(e);
                }
            }
            (call_sid, _) => debug!(call_sid=?call_sid, "ivr transcription without text"),
        }
        OutboundInstructions::farewell(IVR_TRANSCRIBED_PROMPT)
    }

    async fn va_incoming(
        &self,
        payload: &WebhookPayload,
    ) -> Result<OutboundInstructions, AppError> {
        let Some(tradie) = self.tradie_for(payload).await else {
            warn!(to=?payload.get(TO), "no tradie for dialed number");
            // speech is only heard on an answered leg
            return Ok(OutboundInstructions::Script(vec![
                Instruction::Answer,
                say(UNROUTED_PROMPT),
                Instruction::Hangup,
            ]));
        };
        let call_sid = payload.require(CALL_SID)?;
        self.store
            .upsert_status(
                call_sid,
                CallUpdate::received(
                    payload.get(FROM).unwrap_or_default(),
                    payload.get(TO).unwrap_or_default(),
                    CallStatus::VaReceived,
                ),
            )
            .await?;
        info!(call_sid=%call_sid, tradie=%tradie.id, "virtual assistant answering");

        let first = VaStep::first();
        Ok(OutboundInstructions::Script(vec![
            Instruction::Answer,
            Instruction::StartRecording {
                status_callback: Callback::new(FlowKind::Va, EventKind::RecordingStatus),
            },
            say(va_prompt(first, &tradie.name)),
            Instruction::GatherSpeech(SpeechGather {
                prompt: None,
                hints: speech_hints(Some(&tradie)),
                callback: Callback::with_token(
                    FlowKind::Va,
                    EventKind::SpeechResult,
                    FlowToken::new(first),
                ),
            }),
        ]))
    }

    async fn va_speech_result(
        &self,
        payload: &WebhookPayload,
    ) -> Result<OutboundInstructions, AppError> {
        let step = match payload.flow_token() {
            Some(token) => token.step(),
            None => {
                warn!(call_sid=?payload.get(CALL_SID), "missing or invalid flow token, restarting");
                VaStep::first()
            }
        };
        let speech = payload.get(SPEECH_RESULT);
        if speech.is_none() && step.is_first() {
            info!(call_sid=?payload.get(CALL_SID), "no speech on first step, ending call");
            return Ok(OutboundInstructions::farewell(NO_MESSAGE_PROMPT));
        }
        let call_sid = payload.require(CALL_SID)?;
        let text = speech.unwrap_or_default();
        debug!(call_sid=%call_sid, step=%step.slug(), text=%text, "speech result");

        let record = match self.store.get(call_sid).await? {
            Some(record) if record.steps.iter().any(|s| s.name == step.slug()) => {
                info!(call_sid=%call_sid, step=%step.slug(), "step already answered, replaying");
                record
            }
            _ => {
                self.store
                    .append_steps(call_sid, vec![CallStep::new(step.slug(), text)])
                    .await?
            }
        };

        match step.next() {
            Some(next) => {
                let tradie = match self.tradie_for(payload).await {
                    Some(tradie) => Some(tradie),
                    None => self.directory.by_virtual_number(&record.to).await,
                };
                Ok(OutboundInstructions::Script(vec![
                    Instruction::GatherSpeech(SpeechGather {
                        prompt: Some(va_prompt(next, business_name(tradie.as_ref()))),
                        hints: speech_hints(tradie.as_ref()),
                        callback: Callback::with_token(
                            FlowKind::Va,
                            EventKind::SpeechResult,
                            FlowToken::new(next),
                        ),
                    }),
                ]))
            }
            None => {
                self.complete_va_call(call_sid, &record).await?;
                Ok(OutboundInstructions::farewell(VA_COMPLETE_PROMPT))
            }
        }
    }

    async fn complete_va_call(&self, call_sid: &str, record: &CallRecord) -> Result<(), AppError> {
        if record.status == CallStatus::VaProcessed {
            debug!(call_sid=%call_sid, "enquiry already submitted");
            return Ok(());
        }
        let transcript = assemble_transcript(&record.steps);
        let record = self
            .store
            .upsert_status(
                call_sid,
                CallUpdate::transcript(transcript, CallStatus::VaProcessed),
            )
            .await?;
        let limit = self.policy.downstream_timeout;
        if let Some(id) = bounded(limit, "enquiry submission", self.enquiries.submit(&record)).await
        {
            info!(call_sid=%call_sid, enquiry_id=%id, "enquiry submitted");
        }
        Ok(())
    }
}
