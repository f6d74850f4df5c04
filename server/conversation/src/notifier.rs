//! Translates [`GenerationSink`] lifecycle events into protocol envelopes
//! sent through the [`ProtocolHandler`]. The generation use case never
//! touches the wire directly — it only ever talks to a `Notifier`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ac_protocol::{
    AssistantMessage, AssistantSentence, Commentary, MemoryTrace, ReasoningStep, StartAnswer,
    ToolExecution, ToolUseRequest, TypedMessage,
};
use ac_types::{AudioFormat, ConversationId, ToolUseId};

use crate::ports::{GenerationSink, SpeechSynthesizer};
use crate::protocol_handler::ProtocolHandler;
use ac_protocol::Envelope;
use ac_types::StanzaId;

pub struct Notifier {
    conversation_id: ConversationId,
    protocol_handler: Arc<ProtocolHandler>,
    speech_synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

impl Notifier {
    pub fn new(
        conversation_id: ConversationId,
        protocol_handler: Arc<ProtocolHandler>,
        speech_synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        Self { conversation_id, protocol_handler, speech_synthesizer }
    }

    fn envelope(&self, body: TypedMessage) -> Envelope {
        Envelope::new(StanzaId(0), self.conversation_id.clone(), body)
    }
}

#[async_trait]
impl GenerationSink for Notifier {
    async fn on_start(&self, planned_sentence_count: u32) {
        let envelope = self.envelope(TypedMessage::StartAnswer(StartAnswer { planned_sentence_count }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send StartAnswer");
        }
    }

    async fn on_memory_retrieved(&self, summary: String, memory_ids: Vec<String>) {
        let envelope = self.envelope(TypedMessage::MemoryTrace(MemoryTrace { summary, memory_ids }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send MemoryTrace");
        }
    }

    async fn on_reasoning_step(&self, text: String) {
        let envelope = self.envelope(TypedMessage::ReasoningStep(ReasoningStep { text }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send ReasoningStep");
        }
    }

    async fn on_commentary(&self, text: String) {
        let envelope = self.envelope(TypedMessage::Commentary(Commentary { text }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send Commentary");
        }
    }

    async fn on_tool_use_requested(
        &self,
        request_id: ToolUseId,
        tool_name: String,
        parameters: serde_json::Value,
        execution_is_client: bool,
        timeout_ms: u32,
    ) {
        let execution = if execution_is_client { ToolExecution::Client } else { ToolExecution::Server };
        let envelope = self.envelope(TypedMessage::ToolUseRequest(ToolUseRequest {
            request_id,
            tool_name,
            parameters,
            execution,
            timeout_ms,
        }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send ToolUseRequest");
        }
    }

    async fn on_sentence(&self, sequence: u32, text: String, is_final: bool) {
        let envelope = self.envelope(TypedMessage::AssistantSentence(AssistantSentence {
            sequence,
            text: text.clone(),
            is_final,
        }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send AssistantSentence");
        }

        if let Some(synth) = &self.speech_synthesizer {
            match synth.synthesize(&text).await {
                Ok((bytes, format)) => {
                    let chunk_envelope = self.envelope(TypedMessage::AudioChunk(ac_protocol::AudioChunk {
                        encoding: match format {
                            AudioFormat::Pcm => ac_protocol::AudioEncoding::Pcm,
                            AudioFormat::Opus => ac_protocol::AudioEncoding::Opus,
                        },
                        data: bytes.clone(),
                        sequence,
                        duration_ms: 0,
                        is_last: is_final,
                    }));
                    if let Err(err) = self.protocol_handler.send_envelope(chunk_envelope).await {
                        warn!(%err, "failed to send sentence AudioChunk");
                    }
                    if let Err(err) = self.protocol_handler.send_audio(bytes, format).await {
                        warn!(%err, "failed to push sentence audio to outbound track");
                    }
                }
                Err(err) => warn!(%err, "speech synthesis failed for sentence"),
            }
        }
    }

    async fn on_complete(&self, full_text: String) {
        let envelope = self.envelope(TypedMessage::AssistantMessage(AssistantMessage { text: full_text }));
        if let Err(err) = self.protocol_handler.send_envelope(envelope).await {
            warn!(%err, "failed to send AssistantMessage");
        }
    }

    async fn on_failed(&self, message: String) {
        if let Err(err) = self
            .protocol_handler
            .send_error(ac_types::ErrorCode::InternalError, message, ac_types::Severity::Error, true)
            .await
        {
            warn!(%err, "failed to send generation-failure ErrorMessage");
        }
    }
}
