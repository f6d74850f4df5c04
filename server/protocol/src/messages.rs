//! Concrete body types for every [`MessageType`] tag, plus the [`TypedMessage`]
//! enum a decoded envelope carries. Each body knows how to encode/decode
//! itself; [`crate::codec`] dispatches on the envelope's type tag to pick the
//! right body (de)serializer, so a decoded envelope always carries a
//! strongly-typed, ready-to-dispatch body.

use bytes::{Bytes, BytesMut};
use serde_json::Value as Json;

use ac_types::{ErrorCode, Severity, ToolUseId};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message_type::MessageType;
use crate::wire_io::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Acknowledgement {
    pub acked_stanza_id: i32,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    pub last_sequence_seen: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopType {
    Generation,
    Speech,
    All,
    Unspecified,
}

impl StopType {
    fn as_str(self) -> &'static str {
        match self {
            StopType::Generation => "generation",
            StopType::Speech => "speech",
            StopType::All => "all",
            StopType::Unspecified => "",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "generation" => StopType::Generation,
            "speech" => StopType::Speech,
            "all" => StopType::All,
            _ => StopType::Unspecified,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlStop {
    pub stop_type: StopType,
    pub target_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariationMode {
    Regenerate,
    Edit,
    Continue,
}

impl VariationMode {
    fn as_str(self) -> &'static str {
        match self {
            VariationMode::Regenerate => "regenerate",
            VariationMode::Edit => "edit",
            VariationMode::Continue => "continue",
        }
    }

    fn parse(s: &str) -> ProtocolResult<Self> {
        Ok(match s {
            "regenerate" => VariationMode::Regenerate,
            "edit" => VariationMode::Edit,
            "continue" => VariationMode::Continue,
            _ => return Err(ProtocolError::MalformedData("unknown variation mode")),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlVariation {
    pub mode: VariationMode,
    pub target_id: String,
    pub new_content: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserMessage {
    pub id: String,
    pub previous_id: Option<String>,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioEncoding {
    Pcm,
    Opus,
}

impl AudioEncoding {
    fn tag(self) -> u8 {
        match self {
            AudioEncoding::Pcm => 0,
            AudioEncoding::Opus => 1,
        }
    }

    fn from_tag(tag: u8) -> ProtocolResult<Self> {
        Ok(match tag {
            0 => AudioEncoding::Pcm,
            1 => AudioEncoding::Opus,
            _ => return Err(ProtocolError::MalformedData("unknown audio encoding tag")),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    pub encoding: AudioEncoding,
    pub data: Bytes,
    pub sequence: u32,
    pub duration_ms: u32,
    pub is_last: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
    pub language: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssistantMessage {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssistantSentence {
    pub sequence: u32,
    pub text: String,
    pub is_final: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartAnswer {
    pub planned_sentence_count: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReasoningStep {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryTrace {
    pub summary: String,
    pub memory_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Commentary {
    pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolExecution {
    Server,
    Client,
}

impl ToolExecution {
    fn tag(self) -> u8 {
        match self {
            ToolExecution::Server => 0,
            ToolExecution::Client => 1,
        }
    }

    fn from_tag(tag: u8) -> ProtocolResult<Self> {
        Ok(match tag {
            0 => ToolExecution::Server,
            1 => ToolExecution::Client,
            _ => return Err(ProtocolError::MalformedData("unknown tool execution tag")),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolUseRequest {
    pub request_id: ToolUseId,
    pub tool_name: String,
    pub parameters: Json,
    pub execution: ToolExecution,
    pub timeout_ms: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolUseResult {
    pub request_id: ToolUseId,
    pub success: bool,
    pub result: Option<Json>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Feedback {
    pub target_id: String,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserNote {
    pub target_id: String,
    pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryActionKind {
    Save,
    Forget,
    Pin,
}

impl MemoryActionKind {
    fn tag(self) -> u8 {
        match self {
            MemoryActionKind::Save => 0,
            MemoryActionKind::Forget => 1,
            MemoryActionKind::Pin => 2,
        }
    }

    fn from_tag(tag: u8) -> ProtocolResult<Self> {
        Ok(match tag {
            0 => MemoryActionKind::Save,
            1 => MemoryActionKind::Forget,
            2 => MemoryActionKind::Pin,
            _ => return Err(ProtocolError::MalformedData("unknown memory action tag")),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryAction {
    pub target_id: String,
    pub action: MemoryActionKind,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DimensionPreference {
    pub target_id: String,
    pub dimension: String,
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EliteSelect {
    pub target_id: String,
    pub option_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackConfirmation {
    pub target_id: String,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NoteConfirmation {
    pub target_id: String,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryConfirmation {
    pub target_id: String,
    pub accepted: bool,
    pub action: MemoryActionKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerInfo {
    pub version: String,
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionStats {
    pub messages_count: u32,
    pub uptime_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EliteOption {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EliteOptions {
    pub target_id: String,
    pub options: Vec<EliteOption>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BranchUpdate {
    pub message_id: String,
    pub branch_id: String,
}

/// The decoded, strongly-typed body of an envelope. The variant always
/// matches the envelope's `message_type` — constructing a mismatched pair is
/// only possible by hand, never via the codec.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedMessage {
    Acknowledgement(Acknowledgement),
    ErrorMessage(ErrorMessage),
    Configuration(Configuration),
    ControlStop(ControlStop),
    ControlVariation(ControlVariation),
    UserMessage(UserMessage),
    AudioChunk(AudioChunk),
    Transcription(Transcription),
    AssistantMessage(AssistantMessage),
    AssistantSentence(AssistantSentence),
    StartAnswer(StartAnswer),
    ReasoningStep(ReasoningStep),
    MemoryTrace(MemoryTrace),
    Commentary(Commentary),
    ToolUseRequest(ToolUseRequest),
    ToolUseResult(ToolUseResult),
    Feedback(Feedback),
    UserNote(UserNote),
    MemoryAction(MemoryAction),
    DimensionPreference(DimensionPreference),
    EliteSelect(EliteSelect),
    FeedbackConfirmation(FeedbackConfirmation),
    NoteConfirmation(NoteConfirmation),
    MemoryConfirmation(MemoryConfirmation),
    ServerInfo(ServerInfo),
    SessionStats(SessionStats),
    EliteOptions(EliteOptions),
    BranchUpdate(BranchUpdate),
}

impl TypedMessage {
    pub fn message_type(&self) -> MessageType {
        use TypedMessage::*;
        match self {
            Acknowledgement(_) => MessageType::Acknowledgement,
            ErrorMessage(_) => MessageType::ErrorMessage,
            Configuration(_) => MessageType::Configuration,
            ControlStop(_) => MessageType::ControlStop,
            ControlVariation(_) => MessageType::ControlVariation,
            UserMessage(_) => MessageType::UserMessage,
            AudioChunk(_) => MessageType::AudioChunk,
            Transcription(_) => MessageType::Transcription,
            AssistantMessage(_) => MessageType::AssistantMessage,
            AssistantSentence(_) => MessageType::AssistantSentence,
            StartAnswer(_) => MessageType::StartAnswer,
            ReasoningStep(_) => MessageType::ReasoningStep,
            MemoryTrace(_) => MessageType::MemoryTrace,
            Commentary(_) => MessageType::Commentary,
            ToolUseRequest(_) => MessageType::ToolUseRequest,
            ToolUseResult(_) => MessageType::ToolUseResult,
            Feedback(_) => MessageType::Feedback,
            UserNote(_) => MessageType::UserNote,
            MemoryAction(_) => MessageType::MemoryAction,
            DimensionPreference(_) => MessageType::DimensionPreference,
            EliteSelect(_) => MessageType::EliteSelect,
            FeedbackConfirmation(_) => MessageType::FeedbackConfirmation,
            NoteConfirmation(_) => MessageType::NoteConfirmation,
            MemoryConfirmation(_) => MessageType::MemoryConfirmation,
            ServerInfo(_) => MessageType::ServerInfo,
            SessionStats(_) => MessageType::SessionStats,
            EliteOptions(_) => MessageType::EliteOptions,
            BranchUpdate(_) => MessageType::BranchUpdate,
        }
    }

    pub(crate) fn encode_body(&self, out: &mut BytesMut) -> ProtocolResult<()> {
        use TypedMessage::*;
        match self {
            Acknowledgement(m) => {
                out.extend_from_slice(&m.acked_stanza_id.to_be_bytes());
                put_bool(out, m.success);
            }
            ErrorMessage(m) => {
                out.extend_from_slice(&[m.code as u8, m.severity as u8]);
                put_bool(out, m.recoverable);
                put_string(out, &m.message);
            }
            Configuration(m) => {
                out.extend_from_slice(&m.last_sequence_seen.to_be_bytes());
            }
            ControlStop(m) => {
                put_string(out, m.stop_type.as_str());
                put_option_string(out, &m.target_id);
            }
            ControlVariation(m) => {
                put_string(out, m.mode.as_str());
                put_string(out, &m.target_id);
                put_option_string(out, &m.new_content);
            }
            UserMessage(m) => {
                put_string(out, &m.id);
                put_option_string(out, &m.previous_id);
                put_string(out, &m.content);
            }
            AudioChunk(m) => {
                out.put_u8_ext(m.encoding.tag());
                put_bytes_blob(out, &m.data);
                out.extend_from_slice(&m.sequence.to_be_bytes());
                out.extend_from_slice(&m.duration_ms.to_be_bytes());
                put_bool(out, m.is_last);
            }
            Transcription(m) => {
                put_string(out, &m.text);
                put_bool(out, m.is_final);
                out.extend_from_slice(&m.confidence.to_be_bytes());
                put_option_string(out, &m.language);
            }
            AssistantMessage(m) => put_string(out, &m.text),
            AssistantSentence(m) => {
                out.extend_from_slice(&m.sequence.to_be_bytes());
                put_string(out, &m.text);
                put_bool(out, m.is_final);
            }
            StartAnswer(m) => out.extend_from_slice(&m.planned_sentence_count.to_be_bytes()),
            ReasoningStep(m) => put_string(out, &m.text),
            MemoryTrace(m) => {
                put_string(out, &m.summary);
                put_string_vec(out, &m.memory_ids);
            }
            Commentary(m) => put_string(out, &m.text),
            ToolUseRequest(m) => {
                put_string(out, m.request_id.as_str());
                put_string(out, &m.tool_name);
                put_json(out, &m.parameters)?;
                out.put_u8_ext(m.execution.tag());
                out.extend_from_slice(&m.timeout_ms.to_be_bytes());
            }
            ToolUseResult(m) => {
                put_string(out, m.request_id.as_str());
                put_bool(out, m.success);
                put_option_json(out, &m.result)?;
                put_option_string(out, &m.error_code);
                put_option_string(out, &m.error_message);
            }
            Feedback(m) => {
                put_string(out, &m.target_id);
                out.extend_from_slice(&m.rating.to_be_bytes());
                put_option_string(out, &m.comment);
            }
            UserNote(m) => {
                put_string(out, &m.target_id);
                put_string(out, &m.text);
            }
            MemoryAction(m) => {
                put_string(out, &m.target_id);
                out.put_u8_ext(m.action.tag());
                put_option_string(out, &m.note);
            }
            DimensionPreference(m) => {
                put_string(out, &m.target_id);
                put_string(out, &m.dimension);
                out.extend_from_slice(&m.value.to_be_bytes());
            }
            EliteSelect(m) => {
                put_string(out, &m.target_id);
                put_string(out, &m.option_id);
            }
            FeedbackConfirmation(m) => {
                put_string(out, &m.target_id);
                put_bool(out, m.accepted);
            }
            NoteConfirmation(m) => {
                put_string(out, &m.target_id);
                put_bool(out, m.accepted);
            }
            MemoryConfirmation(m) => {
                put_string(out, &m.target_id);
                put_bool(out, m.accepted);
                out.put_u8_ext(m.action.tag());
            }
            ServerInfo(m) => {
                put_string(out, &m.version);
                put_string_vec(out, &m.capabilities);
            }
            SessionStats(m) => {
                out.extend_from_slice(&m.messages_count.to_be_bytes());
                out.extend_from_slice(&m.uptime_ms.to_be_bytes());
            }
            EliteOptions(m) => {
                put_string(out, &m.target_id);
                put_varint_u64(out, m.options.len() as u64);
                for opt in &m.options {
                    put_string(out, &opt.id);
                    put_string(out, &opt.label);
                }
            }
            BranchUpdate(m) => {
                put_string(out, &m.message_id);
                put_string(out, &m.branch_id);
            }
        }
        Ok(())
    }

    pub(crate) fn decode_body(mt: MessageType, buf: &mut Bytes) -> ProtocolResult<Self> {
        use bytes::Buf;
        Ok(match mt {
            MessageType::Acknowledgement => TypedMessage::Acknowledgement(Acknowledgement {
                acked_stanza_id: get_i32(buf)?,
                success: get_bool(buf)?,
            }),
            MessageType::ErrorMessage => {
                if buf.remaining() < 2 {
                    return Err(ProtocolError::MalformedData("truncated error message header"));
                }
                let code = ErrorCode::from_u8(buf.get_u8())
                    .ok_or(ProtocolError::MalformedData("unknown error code"))?;
                let severity = Severity::from_u8(buf.get_u8())
                    .ok_or(ProtocolError::MalformedData("unknown severity"))?;
                let recoverable = get_bool(buf)?;
                let message = get_string(buf)?;
                TypedMessage::ErrorMessage(ErrorMessage { code, message, severity, recoverable })
            }
            MessageType::Configuration => TypedMessage::Configuration(Configuration {
                last_sequence_seen: get_i32(buf)?,
            }),
            MessageType::ControlStop => TypedMessage::ControlStop(ControlStop {
                stop_type: StopType::parse(&get_string(buf)?),
                target_id: get_option_string(buf)?,
            }),
            MessageType::ControlVariation => TypedMessage::ControlVariation(ControlVariation {
                mode: VariationMode::parse(&get_string(buf)?)?,
                target_id: get_string(buf)?,
                new_content: get_option_string(buf)?,
            }),
            MessageType::UserMessage => TypedMessage::UserMessage(UserMessage {
                id: get_string(buf)?,
                previous_id: get_option_string(buf)?,
                content: get_string(buf)?,
            }),
            MessageType::AudioChunk => {
                if !buf.has_remaining() {
                    return Err(ProtocolError::MalformedData("truncated audio chunk"));
                }
                let encoding = AudioEncoding::from_tag(buf.get_u8())?;
                let data = get_bytes_blob(buf)?;
                let sequence = get_u32(buf)?;
                let duration_ms = get_u32(buf)?;
                let is_last = get_bool(buf)?;
                TypedMessage::AudioChunk(AudioChunk { encoding, data, sequence, duration_ms, is_last })
            }
            MessageType::Transcription => TypedMessage::Transcription(Transcription {
                text: get_string(buf)?,
                is_final: get_bool(buf)?,
                confidence: get_f32(buf)?,
                language: get_option_string(buf)?,
            }),
            MessageType::AssistantMessage => {
                TypedMessage::AssistantMessage(AssistantMessage { text: get_string(buf)? })
            }
            MessageType::AssistantSentence => TypedMessage::AssistantSentence(AssistantSentence {
                sequence: get_u32(buf)?,
                text: get_string(buf)?,
                is_final: get_bool(buf)?,
            }),
            MessageType::StartAnswer => TypedMessage::StartAnswer(StartAnswer {
                planned_sentence_count: get_u32(buf)?,
            }),
            MessageType::ReasoningStep => {
                TypedMessage::ReasoningStep(ReasoningStep { text: get_string(buf)? })
            }
            MessageType::MemoryTrace => TypedMessage::MemoryTrace(MemoryTrace {
                summary: get_string(buf)?,
                memory_ids: get_string_vec(buf)?,
            }),
            MessageType::Commentary => TypedMessage::Commentary(Commentary { text: get_string(buf)? }),
            MessageType::ToolUseRequest => {
                let request_id = ToolUseId::new(get_string(buf)?);
                let tool_name = get_string(buf)?;
                let parameters = get_json(buf)?;
                if !buf.has_remaining() {
                    return Err(ProtocolError::MalformedData("truncated tool use request"));
                }
                let execution = ToolExecution::from_tag(buf.get_u8())?;
                let timeout_ms = get_u32(buf)?;
                TypedMessage::ToolUseRequest(ToolUseRequest {
                    request_id,
                    tool_name,
                    parameters,
                    execution,
                    timeout_ms,
                })
            }
            MessageType::ToolUseResult => TypedMessage::ToolUseResult(ToolUseResult {
                request_id: ToolUseId::new(get_string(buf)?),
                success: get_bool(buf)?,
                result: get_option_json(buf)?,
                error_code: get_option_string(buf)?,
                error_message: get_option_string(buf)?,
            }),
            MessageType::Feedback => TypedMessage::Feedback(Feedback {
                target_id: get_string(buf)?,
                rating: get_i32(buf)?,
                comment: get_option_string(buf)?,
            }),
            MessageType::UserNote => TypedMessage::UserNote(UserNote {
                target_id: get_string(buf)?,
                text: get_string(buf)?,
            }),
            MessageType::MemoryAction => {
                let target_id = get_string(buf)?;
                if !buf.has_remaining() {
                    return Err(ProtocolError::MalformedData("truncated memory action"));
                }
                let action = MemoryActionKind::from_tag(buf.get_u8())?;
                let note = get_option_string(buf)?;
                TypedMessage::MemoryAction(MemoryAction { target_id, action, note })
            }
            MessageType::DimensionPreference => TypedMessage::DimensionPreference(DimensionPreference {
                target_id: get_string(buf)?,
                dimension: get_string(buf)?,
                value: get_f32(buf)?,
            }),
            MessageType::EliteSelect => TypedMessage::EliteSelect(EliteSelect {
                target_id: get_string(buf)?,
                option_id: get_string(buf)?,
            }),
            MessageType::FeedbackConfirmation => TypedMessage::FeedbackConfirmation(FeedbackConfirmation {
                target_id: get_string(buf)?,
                accepted: get_bool(buf)?,
            }),
            MessageType::NoteConfirmation => TypedMessage::NoteConfirmation(NoteConfirmation {
                target_id: get_string(buf)?,
                accepted: get_bool(buf)?,
            }),
            MessageType::MemoryConfirmation => {
                let target_id = get_string(buf)?;
                let accepted = get_bool(buf)?;
                if !buf.has_remaining() {
                    return Err(ProtocolError::MalformedData("truncated memory confirmation"));
                }
                let action = MemoryActionKind::from_tag(buf.get_u8())?;
                TypedMessage::MemoryConfirmation(MemoryConfirmation { target_id, accepted, action })
            }
            MessageType::ServerInfo => TypedMessage::ServerInfo(ServerInfo {
                version: get_string(buf)?,
                capabilities: get_string_vec(buf)?,
            }),
            MessageType::SessionStats => TypedMessage::SessionStats(SessionStats {
                messages_count: get_u32(buf)?,
                uptime_ms: get_u64(buf)?,
            }),
            MessageType::EliteOptions => {
                let target_id = get_string(buf)?;
                let count = get_varint_u64(buf)? as usize;
                let mut options = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    options.push(EliteOption { id: get_string(buf)?, label: get_string(buf)? });
                }
                TypedMessage::EliteOptions(EliteOptions { target_id, options })
            }
            MessageType::BranchUpdate => TypedMessage::BranchUpdate(BranchUpdate {
                message_id: get_string(buf)?,
                branch_id: get_string(buf)?,
            }),
        })
    }
}

fn get_i32(buf: &mut Bytes) -> ProtocolResult<i32> {
    use bytes::Buf;
    if buf.remaining() < 4 {
        return Err(ProtocolError::MalformedData("truncated i32"));
    }
    Ok(buf.get_i32())
}

fn get_u32(buf: &mut Bytes) -> ProtocolResult<u32> {
    use bytes::Buf;
    if buf.remaining() < 4 {
        return Err(ProtocolError::MalformedData("truncated u32"));
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes) -> ProtocolResult<u64> {
    use bytes::Buf;
    if buf.remaining() < 8 {
        return Err(ProtocolError::MalformedData("truncated u64"));
    }
    Ok(buf.get_u64())
}

fn get_f32(buf: &mut Bytes) -> ProtocolResult<f32> {
    use bytes::Buf;
    if buf.remaining() < 4 {
        return Err(ProtocolError::MalformedData("truncated f32"));
    }
    Ok(buf.get_f32())
}

/// `BytesMut::put_u8` is already inherent; this trait only exists so the
/// match arms above read uniformly (`out.put_u8_ext(...)`) next to the
/// `extend_from_slice` calls used for multi-byte fields.
trait PutU8Ext {
    fn put_u8_ext(&mut self, v: u8);
}

impl PutU8Ext for BytesMut {
    fn put_u8_ext(&mut self, v: u8) {
        use bytes::BufMut;
        self.put_u8(v);
    }
}
