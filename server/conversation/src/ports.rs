//! Trait boundaries to every collaborator this crate does not implement
//! itself: persistence, the agent transport, and model-backed use cases.
//! Production wiring lives in `ac-agent`; [`crate::testing`] carries
//! in-memory fakes good enough to exercise the dispatcher and protocol
//! handler in isolation.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as Json;

use ac_protocol::VariationMode;
use ac_types::{AudioFormat, ConversationId, MessageId, StanzaId, ToolUseId};

use crate::error::ConversationResult;

/// What the Agent exposes to the conversation core for outbound delivery.
/// The Agent owns the pending-ack table and retry ticker; this crate only
/// ever asks it to send bytes.
#[async_trait]
pub trait AgentPort: Send + Sync {
    /// Publish `payload` and track it for ack/retry under `stanza_id`.
    async fn send_tracked(
        &self,
        conversation_id: &ConversationId,
        stanza_id: StanzaId,
        payload: Bytes,
    ) -> ConversationResult<()>;

    /// Publish `payload` with no ack tracking (control envelopes).
    async fn send_untracked(&self, payload: Bytes) -> ConversationResult<()>;

    /// Hand PCM or Opus bytes to the outbound audio track.
    async fn send_audio(&self, bytes: Bytes, format: AudioFormat) -> ConversationResult<()>;
}

/// Best-effort persistence of per-conversation stanza-id watermarks. Failure
/// is logged by the caller and never propagated — the replay ring is the
/// authoritative short-term source.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn persist_last_server_stanza_id(
        &self,
        conversation_id: &ConversationId,
        stanza_id: StanzaId,
    ) -> ConversationResult<()>;

    async fn persist_last_client_stanza_id(
        &self,
        conversation_id: &ConversationId,
        stanza_id: StanzaId,
    ) -> ConversationResult<()>;
}

/// One assistant turn as durably recorded, used to rebuild the envelope
/// sequence it implied when the replay ring doesn't cover a reconnection
/// gap.
#[derive(Clone, Debug)]
pub struct ReplayedTurn {
    pub message_id: MessageId,
    pub planned_sentence_count: u32,
    pub sentences: Vec<(u32, String, bool)>,
    pub reasoning_steps: Vec<String>,
    pub tool_use_requests: Vec<(ToolUseId, String, Json, u32)>,
    pub tool_use_results: Vec<(ToolUseId, bool, Option<Json>, Option<String>, Option<String>)>,
    pub memory_trace: Option<(String, Vec<String>)>,
    pub commentary: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub is_assistant: bool,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Turns implied by server activity strictly after `after_sequence`
    /// (absolute value of the last-seen server stanza id), in original
    /// order.
    async fn replay_since(
        &self,
        conversation_id: &ConversationId,
        after_sequence: u32,
    ) -> ConversationResult<Vec<ReplayedTurn>>;

    async fn find(&self, message_id: &MessageId) -> ConversationResult<Option<MessageRecord>>;

    /// Drops every message after `message_id` in conversation order — used
    /// when a user edit invalidates everything that followed it.
    async fn truncate_after(&self, message_id: &MessageId) -> ConversationResult<()>;
}

#[derive(Clone, Debug)]
pub struct ToolUseRecord {
    pub id: ToolUseId,
    pub tool_name: String,
    pub complete: bool,
    pub failed: bool,
}

#[async_trait]
pub trait ToolUseRepository: Send + Sync {
    async fn find(&self, id: &ToolUseId) -> ConversationResult<Option<ToolUseRecord>>;
    async fn mark_complete(&self, id: &ToolUseId, result: Option<Json>) -> ConversationResult<()>;
    async fn mark_failed(&self, id: &ToolUseId, error_message: String) -> ConversationResult<()>;
}

/// Allocates ids ahead of use-case invocation, so a generation can be
/// registered (and therefore cancellable) before the use case returns
/// anything.
pub trait IdGenerator: Send + Sync {
    fn next_message_id(&self) -> MessageId;
}

/// What kicked off a generation: a fresh user message, a finalized
/// transcription, or a variation control.
#[derive(Clone, Debug)]
pub enum GenerationTrigger {
    UserMessage { id: MessageId, content: String },
    Transcription { text: String },
    Variation { mode: VariationMode, target_id: MessageId, new_content: Option<String> },
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub trigger: GenerationTrigger,
}

/// Lifecycle events a generation use case reports as it runs. The concrete
/// [`crate::notifier::Notifier`] translates these into protocol envelopes;
/// the use case itself never touches the wire.
#[async_trait]
pub trait GenerationSink: Send + Sync {
    async fn on_start(&self, planned_sentence_count: u32);
    async fn on_memory_retrieved(&self, summary: String, memory_ids: Vec<String>);
    async fn on_reasoning_step(&self, text: String);
    async fn on_commentary(&self, text: String);
    async fn on_tool_use_requested(
        &self,
        request_id: ToolUseId,
        tool_name: String,
        parameters: Json,
        execution_is_client: bool,
        timeout_ms: u32,
    );
    async fn on_sentence(&self, sequence: u32, text: String, is_final: bool);
    async fn on_complete(&self, full_text: String);
    async fn on_failed(&self, message: String);
}

/// Generates an assistant response, reporting progress through `sink`.
/// Model-backed; this crate only invokes it.
#[async_trait]
pub trait GenerationUseCase: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
        sink: std::sync::Arc<dyn GenerationSink>,
    ) -> ConversationResult<()>;
}

/// Turns assistant sentence text into audio bytes, for both the `AudioChunk`
/// echo to the client and the outbound track.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> ConversationResult<(Bytes, AudioFormat)>;
}

/// Durable home for the synchronous user actions: feedback, notes, memory
/// actions, dimension votes, elite selections. Each `record_*` that returns
/// `bool` reports whether the action was accepted (used to populate the
/// matching `*Confirmation` envelope); the rest are fire-and-forget.
#[async_trait]
pub trait UserActionSink: Send + Sync {
    async fn record_feedback(
        &self,
        target_id: &str,
        rating: i32,
        comment: Option<String>,
    ) -> ConversationResult<bool>;

    async fn record_note(&self, target_id: &str, text: String) -> ConversationResult<bool>;

    async fn record_memory_action(
        &self,
        target_id: &str,
        action: ac_protocol::MemoryActionKind,
        note: Option<String>,
    ) -> ConversationResult<bool>;

    async fn record_dimension_preference(
        &self,
        target_id: &str,
        dimension: String,
        value: f32,
    ) -> ConversationResult<()>;

    async fn record_elite_select(&self, target_id: &str, option_id: String) -> ConversationResult<()>;
}

/// Information emitted opportunistically right after reconnection replay.
/// All three sends are best-effort; absence of a provider just skips them.
pub trait SessionInfoProvider: Send + Sync {
    fn server_info(&self) -> Option<ac_protocol::ServerInfo>;
    fn session_stats(&self) -> Option<ac_protocol::SessionStats>;
    fn elite_options(&self, conversation_id: &ConversationId) -> Option<ac_protocol::EliteOptions>;
}
