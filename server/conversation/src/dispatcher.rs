//! Per-conversation inbound router. Stateless beyond its collaborator
//! references and `conversation_id` — everything it needs to remember
//! (stanza ids, replay, active jobs) lives in [`ProtocolHandler`] and
//! [`GenerationManager`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use ac_protocol::{
    ControlStop, ControlVariation, Envelope, MemoryAction, StopType, Transcription, TypedMessage,
    UserMessage, VariationMode,
};
use ac_types::{ConversationId, MessageId};

use crate::error::{ConversationError, ConversationResult};
use crate::generation_manager::GenerationManager;
use crate::notifier::Notifier;
use crate::ports::{
    GenerationRequest, GenerationTrigger, IdGenerator, MessageRepository, SessionInfoProvider,
    SpeechSynthesizer, ToolUseRepository, UserActionSink,
};
use crate::protocol_handler::ProtocolHandler;
use crate::GenerationUseCase;

/// A long-running generation survives client disconnect; it runs to
/// completion against a detached 5-minute deadline so partial results still
/// land in durable storage.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Dispatcher {
    conversation_id: ConversationId,
    protocol_handler: Arc<ProtocolHandler>,
    generation_manager: Arc<GenerationManager>,
    message_repo: Arc<dyn MessageRepository>,
    tool_use_repo: Arc<dyn ToolUseRepository>,
    id_generator: Arc<dyn IdGenerator>,
    generation_use_case: Arc<dyn GenerationUseCase>,
    speech_synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    user_action_sink: Option<Arc<dyn UserActionSink>>,
    session_info: Option<Arc<dyn SessionInfoProvider>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: ConversationId,
        protocol_handler: Arc<ProtocolHandler>,
        generation_manager: Arc<GenerationManager>,
        message_repo: Arc<dyn MessageRepository>,
        tool_use_repo: Arc<dyn ToolUseRepository>,
        id_generator: Arc<dyn IdGenerator>,
        generation_use_case: Arc<dyn GenerationUseCase>,
        speech_synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        user_action_sink: Option<Arc<dyn UserActionSink>>,
        session_info: Option<Arc<dyn SessionInfoProvider>>,
    ) -> Self {
        Self {
            conversation_id,
            protocol_handler,
            generation_manager,
            message_repo,
            tool_use_repo,
            id_generator,
            generation_use_case,
            speech_synthesizer,
            user_action_sink,
            session_info,
        }
    }

    /// Entry point for every inbound envelope. Never propagates a send
    /// failure to the caller — validation/business errors become a client
    /// visible `ErrorMessage`; the return value only reports a problem the
    /// caller (the router) should log, not one it should retry.
    pub async fn dispatch(&self, envelope: Envelope) -> ConversationResult<()> {
        if envelope.conversation_id != self.conversation_id {
            self.reject(&ConversationError::ConversationNotFound).await;
            return Ok(());
        }

        if envelope.message_type().is_server_only() {
            return Ok(());
        }

        if let Err(err) = self.route(envelope).await {
            self.reject(&err).await;
        }
        Ok(())
    }

    async fn reject(&self, err: &ConversationError) {
        let (code, severity, recoverable) = err.to_wire();
        if let Err(send_err) =
            self.protocol_handler.send_error(code, err.to_string(), severity, recoverable).await
        {
            warn!(%send_err, "failed to deliver error message to client");
        }
    }

    async fn route(&self, envelope: Envelope) -> ConversationResult<()> {
        match envelope.body {
            TypedMessage::Configuration(cfg) => {
                self.protocol_handler.handle_configuration(cfg.last_sequence_seen).await?;
                self.emit_session_info_best_effort().await;
                Ok(())
            }
            TypedMessage::ControlStop(cs) => self.handle_control_stop(cs).await,
            TypedMessage::ControlVariation(cv) => self.handle_control_variation(cv).await,
            TypedMessage::UserMessage(um) => self.handle_user_message(um).await,
            TypedMessage::Transcription(tr) => self.handle_transcription(tr).await,
            TypedMessage::ToolUseResult(tr) => self.handle_tool_use_result(tr).await,
            TypedMessage::Feedback(f) => self.handle_feedback(f).await,
            TypedMessage::UserNote(n) => self.handle_user_note(n).await,
            TypedMessage::MemoryAction(m) => self.handle_memory_action(m).await,
            TypedMessage::DimensionPreference(d) => self.handle_dimension_preference(d).await,
            TypedMessage::EliteSelect(e) => self.handle_elite_select(e).await,
            // Carried for completeness; audio normally arrives over the SFU
            // track and is handled by the voice pipeline, not here.
            TypedMessage::AudioChunk(_) => Ok(()),
            _ => Ok(()),
        }
    }

    async fn emit_session_info_best_effort(&self) {
        let Some(provider) = &self.session_info else { return };
        if let Some(info) = provider.server_info() {
            if let Err(err) = self
                .protocol_handler
                .send_envelope(Envelope::new(
                    ac_types::StanzaId(0),
                    self.conversation_id.clone(),
                    TypedMessage::ServerInfo(info),
                ))
                .await
            {
                warn!(%err, "failed to send ServerInfo");
            }
        }
        if let Some(stats) = provider.session_stats() {
            if let Err(err) = self
                .protocol_handler
                .send_envelope(Envelope::new(
                    ac_types::StanzaId(0),
                    self.conversation_id.clone(),
                    TypedMessage::SessionStats(stats),
                ))
                .await
            {
                warn!(%err, "failed to send SessionStats");
            }
        }
        if let Some(options) = provider.elite_options(&self.conversation_id) {
            if let Err(err) = self
                .protocol_handler
                .send_envelope(Envelope::new(
                    ac_types::StanzaId(0),
                    self.conversation_id.clone(),
                    TypedMessage::EliteOptions(options),
                ))
                .await
            {
                warn!(%err, "failed to send EliteOptions");
            }
        }
    }

    async fn handle_control_stop(&self, cs: ControlStop) -> ConversationResult<()> {
        let target = cs.target_id.as_deref().unwrap_or("");
        match cs.stop_type {
            StopType::Generation => {
                self.generation_manager.cancel_generation(target);
            }
            StopType::Speech => {
                self.generation_manager.cancel_tts(target);
            }
            StopType::All | StopType::Unspecified => {
                if target.is_empty() {
                    self.generation_manager.cancel_all();
                } else {
                    self.generation_manager.cancel_generation(target);
                    self.generation_manager.cancel_tts(target);
                }
            }
        }
        Ok(())
    }

    async fn handle_control_variation(&self, cv: ControlVariation) -> ConversationResult<()> {
        let target_id = MessageId::new(cv.target_id.clone());
        let target = self
            .message_repo
            .find(&target_id)
            .await?
            .ok_or(ConversationError::ConversationNotFound)?;

        match cv.mode {
            VariationMode::Regenerate | VariationMode::Continue => {
                if !target.is_assistant {
                    return Err(ConversationError::InvalidState(
                        "regenerate/continue require an assistant target".into(),
                    ));
                }
                let message_id = self.id_generator.next_message_id();
                self.launch_generation(
                    GenerationTrigger::Variation {
                        mode: cv.mode,
                        target_id: target_id.clone(),
                        new_content: cv.new_content,
                    },
                    message_id,
                )
                .await;
                Ok(())
            }
            VariationMode::Edit => {
                if target.is_assistant {
                    // Editing an assistant message in place does not imply
                    // fresh generation; the content is simply superseded.
                    return Ok(());
                }
                self.message_repo.truncate_after(&target_id).await?;
                let message_id = self.id_generator.next_message_id();
                self.launch_generation(
                    GenerationTrigger::Variation {
                        mode: cv.mode,
                        target_id,
                        new_content: cv.new_content,
                    },
                    message_id,
                )
                .await;
                Ok(())
            }
        }
    }

    async fn handle_user_message(&self, um: UserMessage) -> ConversationResult<()> {
        let message_id = self.id_generator.next_message_id();
        self.launch_generation(
            GenerationTrigger::UserMessage { id: MessageId::new(um.id), content: um.content },
            message_id,
        )
        .await;
        Ok(())
    }

    async fn handle_transcription(&self, tr: Transcription) -> ConversationResult<()> {
        if !tr.is_final {
            return Ok(());
        }
        let message_id = self.id_generator.next_message_id();
        self.launch_generation(GenerationTrigger::Transcription { text: tr.text }, message_id).await;
        Ok(())
    }

    /// Registers the job, then spawns a detached task racing the use case
    /// against cancellation. The task outlives this call (and the client
    /// connection) up to `GENERATION_TIMEOUT`.
    async fn launch_generation(&self, trigger: GenerationTrigger, message_id: MessageId) {
        let id_key = message_id.as_str().to_string();
        let (_handle, mut cancel_rx) = self.generation_manager.register_generation(id_key.clone());

        let request = GenerationRequest {
            message_id: message_id.clone(),
            conversation_id: self.conversation_id.clone(),
            trigger,
        };
        let sink = Arc::new(Notifier::new(
            self.conversation_id.clone(),
            self.protocol_handler.clone(),
            self.speech_synthesizer.clone(),
        ));
        let use_case = self.generation_use_case.clone();
        let generation_manager = self.generation_manager.clone();

        tokio::spawn(async move {
            let gen_fut = use_case.generate(request, sink);
            let raced = async {
                tokio::select! {
                    res = gen_fut => res,
                    _ = cancel_rx.changed() => Err(ConversationError::InvalidState("generation cancelled".into())),
                }
            };
            match tokio::time::timeout(GENERATION_TIMEOUT, raced).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, message_id = %id_key, "generation ended with an error"),
                Err(_) => error!(message_id = %id_key, "generation exceeded its deadline"),
            }
            generation_manager.unregister_generation(&id_key);
        });
    }

    async fn handle_tool_use_result(
        &self,
        tr: ac_protocol::ToolUseResult,
    ) -> ConversationResult<()> {
        let id = tr.request_id;
        let record = self
            .tool_use_repo
            .find(&id)
            .await?
            .ok_or_else(|| ConversationError::Internal(format!("unknown tool use {id}")))?;
        let _ = record;
        if tr.success {
            self.tool_use_repo.mark_complete(&id, tr.result).await
        } else {
            self.tool_use_repo
                .mark_failed(&id, tr.error_message.unwrap_or_else(|| "tool execution failed".into()))
                .await
        }
    }

    async fn handle_feedback(&self, f: ac_protocol::Feedback) -> ConversationResult<()> {
        let Some(sink) = &self.user_action_sink else {
            return Err(ConversationError::ServiceUnavailable("user actions unavailable".into()));
        };
        let accepted = sink.record_feedback(&f.target_id, f.rating, f.comment).await?;
        self.send_envelope(TypedMessage::FeedbackConfirmation(ac_protocol::FeedbackConfirmation {
            target_id: f.target_id,
            accepted,
        }))
        .await
    }

    async fn handle_user_note(&self, n: ac_protocol::UserNote) -> ConversationResult<()> {
        let Some(sink) = &self.user_action_sink else {
            return Err(ConversationError::ServiceUnavailable("user actions unavailable".into()));
        };
        let accepted = sink.record_note(&n.target_id, n.text).await?;
        self.send_envelope(TypedMessage::NoteConfirmation(ac_protocol::NoteConfirmation {
            target_id: n.target_id,
            accepted,
        }))
        .await
    }

    async fn handle_memory_action(&self, m: MemoryAction) -> ConversationResult<()> {
        let Some(sink) = &self.user_action_sink else {
            return Err(ConversationError::ServiceUnavailable("user actions unavailable".into()));
        };
        let accepted = sink.record_memory_action(&m.target_id, m.action, m.note).await?;
        self.send_envelope(TypedMessage::MemoryConfirmation(ac_protocol::MemoryConfirmation {
            target_id: m.target_id,
            accepted,
            action: m.action,
        }))
        .await
    }

    async fn handle_dimension_preference(
        &self,
        d: ac_protocol::DimensionPreference,
    ) -> ConversationResult<()> {
        let Some(sink) = &self.user_action_sink else {
            return Err(ConversationError::ServiceUnavailable("user actions unavailable".into()));
        };
        sink.record_dimension_preference(&d.target_id, d.dimension, d.value).await
    }

    async fn handle_elite_select(&self, e: ac_protocol::EliteSelect) -> ConversationResult<()> {
        let Some(sink) = &self.user_action_sink else {
            return Err(ConversationError::ServiceUnavailable("user actions unavailable".into()));
        };
        sink.record_elite_select(&e.target_id, e.option_id).await
    }

    async fn send_envelope(&self, body: TypedMessage) -> ConversationResult<()> {
        self.protocol_handler
            .send_envelope(Envelope::new(ac_types::StanzaId(0), self.conversation_id.clone(), body))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{
        InMemoryConversationRepo, InMemoryMessageRepo, InMemoryToolUseRepo, InMemoryUserActionSink,
        NoopSpeechSynthesizer, RecordingAgent, ScriptedGenerationUseCase, SequentialIdGenerator,
    };
    use crate::ProtocolHandlerConfig;
    use ac_protocol::{Feedback, MemoryActionKind};

    fn build() -> (ConversationId, Arc<RecordingAgent>, Arc<ProtocolHandler>, Dispatcher) {
        let conversation_id = ConversationId::new("conv_abc");
        let agent = Arc::new(RecordingAgent::default());
        let protocol_handler = Arc::new(ProtocolHandler::new(
            conversation_id.clone(),
            agent.clone(),
            Arc::new(InMemoryConversationRepo::default()),
            Arc::new(InMemoryMessageRepo::default()),
            ProtocolHandlerConfig::default(),
        ));
        let generation_manager = Arc::new(GenerationManager::new());
        let use_case = Arc::new(ScriptedGenerationUseCase {
            sentences: vec![("Hi.".to_string(), false), ("How can I help?".to_string(), true)],
        });
        let dispatcher = Dispatcher::new(
            conversation_id.clone(),
            protocol_handler.clone(),
            generation_manager,
            Arc::new(InMemoryMessageRepo::default()),
            Arc::new(InMemoryToolUseRepo::default()),
            Arc::new(SequentialIdGenerator::new("msg")),
            use_case,
            Some(Arc::new(NoopSpeechSynthesizer)),
            Some(Arc::new(InMemoryUserActionSink::default())),
            None,
        );
        (conversation_id, agent, protocol_handler, dispatcher)
    }

    fn envelope(conversation_id: &ConversationId, body: TypedMessage) -> Envelope {
        Envelope::new(ac_types::StanzaId(1), conversation_id.clone(), body)
    }

    #[tokio::test]
    async fn user_message_drives_a_two_sentence_stream() {
        let (conversation_id, agent, _handler, dispatcher) = build();
        dispatcher
            .dispatch(envelope(
                &conversation_id,
                TypedMessage::UserMessage(UserMessage {
                    id: "u1".into(),
                    previous_id: None,
                    content: "hello".into(),
                }),
            ))
            .await
            .unwrap();

        // generation runs on a spawned task; give it a moment to land
        for _ in 0..50 {
            if agent.tracked.lock().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let tracked = agent.tracked.lock();
        // StartAnswer, AssistantSentence x2 (each also emits an AudioChunk
        // through the scripted synthesizer), AssistantMessage
        assert!(tracked.len() >= 3, "expected at least StartAnswer + 2 sentences, got {}", tracked.len());
    }

    #[tokio::test]
    async fn wrong_conversation_id_is_rejected() {
        let (_conversation_id, agent, _handler, dispatcher) = build();
        let other = ConversationId::new("conv_other");
        dispatcher
            .dispatch(Envelope::new(
                ac_types::StanzaId(1),
                other,
                TypedMessage::UserMessage(UserMessage {
                    id: "u1".into(),
                    previous_id: None,
                    content: "hi".into(),
                }),
            ))
            .await
            .unwrap();
        assert_eq!(agent.untracked.lock().len(), 1);
    }

    #[tokio::test]
    async fn server_only_types_are_silently_ignored() {
        let (conversation_id, agent, _handler, dispatcher) = build();
        dispatcher
            .dispatch(envelope(
                &conversation_id,
                TypedMessage::AssistantMessage(ac_protocol::AssistantMessage { text: "nope".into() }),
            ))
            .await
            .unwrap();
        assert!(agent.tracked.lock().is_empty());
        assert!(agent.untracked.lock().is_empty());
    }

    #[tokio::test]
    async fn control_stop_all_cancels_generation() {
        let (conversation_id, _agent, _handler, dispatcher) = build();
        let (_h, rx) = dispatcher.generation_manager.register_generation("g1");
        dispatcher
            .dispatch(envelope(
                &conversation_id,
                TypedMessage::ControlStop(ac_protocol::ControlStop {
                    stop_type: ac_protocol::StopType::All,
                    target_id: None,
                }),
            ))
            .await
            .unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn control_variation_on_unknown_target_reports_conversation_not_found() {
        let (conversation_id, agent, _handler, dispatcher) = build();
        dispatcher
            .dispatch(envelope(
                &conversation_id,
                TypedMessage::ControlVariation(ac_protocol::ControlVariation {
                    mode: ac_protocol::VariationMode::Regenerate,
                    target_id: "missing".into(),
                    new_content: None,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(agent.untracked.lock().len(), 1);
    }

    #[tokio::test]
    async fn feedback_gets_a_confirmation() {
        let (conversation_id, agent, _handler, dispatcher) = build();
        dispatcher
            .dispatch(envelope(
                &conversation_id,
                TypedMessage::Feedback(Feedback { target_id: "m1".into(), rating: 5, comment: None }),
            ))
            .await
            .unwrap();
        assert_eq!(agent.tracked.lock().len(), 1);
    }

    #[tokio::test]
    async fn memory_action_gets_a_confirmation() {
        let (conversation_id, agent, _handler, dispatcher) = build();
        dispatcher
            .dispatch(envelope(
                &conversation_id,
                TypedMessage::MemoryAction(ac_protocol::MemoryAction {
                    target_id: "m1".into(),
                    action: MemoryActionKind::Save,
                    note: None,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(agent.tracked.lock().len(), 1);
    }
}

