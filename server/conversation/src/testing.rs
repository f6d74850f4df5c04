//! In-memory fakes for every port, good enough to drive the dispatcher and
//! protocol handler in tests without a real repository, SFU, or model
//! backend. Mirrors the shape of the teacher's `InMemoryStore`: plain
//! `parking_lot`-guarded maps behind an `async_trait` impl.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value as Json;

use ac_protocol::MemoryActionKind;
use ac_types::{AudioFormat, ConversationId, MessageId, StanzaId, ToolUseId};

use crate::error::ConversationResult;
use crate::ports::*;

#[derive(Default)]
pub struct RecordingAgent {
    pub tracked: Mutex<Vec<(StanzaId, Bytes)>>,
    pub untracked: Mutex<Vec<Bytes>>,
    pub audio: Mutex<Vec<(Bytes, AudioFormat)>>,
}

#[async_trait]
impl AgentPort for RecordingAgent {
    async fn send_tracked(
        &self,
        _conversation_id: &ConversationId,
        stanza_id: StanzaId,
        payload: Bytes,
    ) -> ConversationResult<()> {
        self.tracked.lock().push((stanza_id, payload));
        Ok(())
    }

    async fn send_untracked(&self, payload: Bytes) -> ConversationResult<()> {
        self.untracked.lock().push(payload);
        Ok(())
    }

    async fn send_audio(&self, bytes: Bytes, format: AudioFormat) -> ConversationResult<()> {
        self.audio.lock().push((bytes, format));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepo {
    pub last_server: Mutex<Option<StanzaId>>,
    pub last_client: Mutex<Option<StanzaId>>,
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepo {
    async fn persist_last_server_stanza_id(
        &self,
        _conversation_id: &ConversationId,
        stanza_id: StanzaId,
    ) -> ConversationResult<()> {
        *self.last_server.lock() = Some(stanza_id);
        Ok(())
    }

    async fn persist_last_client_stanza_id(
        &self,
        _conversation_id: &ConversationId,
        stanza_id: StanzaId,
    ) -> ConversationResult<()> {
        *self.last_client.lock() = Some(stanza_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepo {
    pub messages: Mutex<HashMap<String, MessageRecord>>,
    pub turns_beyond: Mutex<Vec<ReplayedTurn>>,
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepo {
    async fn replay_since(
        &self,
        _conversation_id: &ConversationId,
        _after_sequence: u32,
    ) -> ConversationResult<Vec<ReplayedTurn>> {
        Ok(self.turns_beyond.lock().clone())
    }

    async fn find(&self, message_id: &MessageId) -> ConversationResult<Option<MessageRecord>> {
        Ok(self.messages.lock().get(message_id.as_str()).cloned())
    }

    async fn truncate_after(&self, message_id: &MessageId) -> ConversationResult<()> {
        self.messages.lock().remove(message_id.as_str());
        Ok(())
    }
}

impl InMemoryMessageRepo {
    pub fn insert(&self, record: MessageRecord) {
        self.messages.lock().insert(record.id.as_str().to_string(), record);
    }
}

#[derive(Default)]
pub struct InMemoryToolUseRepo {
    pub records: Mutex<HashMap<String, ToolUseRecord>>,
}

#[async_trait]
impl ToolUseRepository for InMemoryToolUseRepo {
    async fn find(&self, id: &ToolUseId) -> ConversationResult<Option<ToolUseRecord>> {
        Ok(self.records.lock().get(id.as_str()).cloned())
    }

    async fn mark_complete(&self, id: &ToolUseId, _result: Option<Json>) -> ConversationResult<()> {
        if let Some(record) = self.records.lock().get_mut(id.as_str()) {
            record.complete = true;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &ToolUseId, _error_message: String) -> ConversationResult<()> {
        if let Some(record) = self.records.lock().get_mut(id.as_str()) {
            record.failed = true;
        }
        Ok(())
    }
}

impl InMemoryToolUseRepo {
    pub fn insert(&self, record: ToolUseRecord) {
        self.records.lock().insert(record.id.as_str().to_string(), record);
    }
}

pub struct SequentialIdGenerator {
    next: AtomicU64,
    prefix: String,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { next: AtomicU64::new(1), prefix: prefix.into() }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_message_id(&self) -> MessageId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        MessageId::new(format!("{}-{n}", self.prefix))
    }
}

/// A use case that emits a fixed two-sentence stream, matching the
/// end-to-end "simple round trip" scenario.
pub struct ScriptedGenerationUseCase {
    pub sentences: Vec<(String, bool)>,
}

#[async_trait]
impl GenerationUseCase for ScriptedGenerationUseCase {
    async fn generate(
        &self,
        _request: GenerationRequest,
        sink: Arc<dyn GenerationSink>,
    ) -> ConversationResult<()> {
        sink.on_start(self.sentences.len() as u32).await;
        let mut full = String::new();
        for (i, (text, is_final)) in self.sentences.iter().enumerate() {
            sink.on_sentence(i as u32, text.clone(), *is_final).await;
            full.push_str(text);
        }
        sink.on_complete(full).await;
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopSpeechSynthesizer;

#[async_trait]
impl SpeechSynthesizer for NoopSpeechSynthesizer {
    async fn synthesize(&self, _text: &str) -> ConversationResult<(Bytes, AudioFormat)> {
        Ok((Bytes::new(), AudioFormat::Opus))
    }
}

#[derive(Default)]
pub struct InMemoryUserActionSink {
    pub feedback: Mutex<Vec<(String, i32, Option<String>)>>,
    pub notes: Mutex<Vec<(String, String)>>,
    pub memory_actions: Mutex<Vec<(String, MemoryActionKind, Option<String>)>>,
}

#[async_trait]
impl UserActionSink for InMemoryUserActionSink {
    async fn record_feedback(
        &self,
        target_id: &str,
        rating: i32,
        comment: Option<String>,
    ) -> ConversationResult<bool> {
        self.feedback.lock().push((target_id.to_string(), rating, comment));
        Ok(true)
    }

    async fn record_note(&self, target_id: &str, text: String) -> ConversationResult<bool> {
        self.notes.lock().push((target_id.to_string(), text));
        Ok(true)
    }

    async fn record_memory_action(
        &self,
        target_id: &str,
        action: MemoryActionKind,
        note: Option<String>,
    ) -> ConversationResult<bool> {
        self.memory_actions.lock().push((target_id.to_string(), action, note));
        Ok(true)
    }

    async fn record_dimension_preference(
        &self,
        _target_id: &str,
        _dimension: String,
        _value: f32,
    ) -> ConversationResult<()> {
        Ok(())
    }

    async fn record_elite_select(&self, _target_id: &str, _option_id: String) -> ConversationResult<()> {
        Ok(())
    }
}
