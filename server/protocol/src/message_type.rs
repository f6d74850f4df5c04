/// Closed enumeration of wire message types. Every tag is assigned exactly
/// once; unknown tags are ignored on receive rather than rejected, so new
/// tags can be introduced without breaking older peers.
///
/// Direction is documented per variant: `C→S`, `S→C`, or `both`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// both — `stanzaId=0`; carries `ackedStanzaId`, `success`.
    Acknowledgement = 1,
    /// both — `code`, `message`, `severity`, `recoverable`.
    ErrorMessage = 2,
    /// C→S — `lastSequenceSeen` drives reconnection.
    Configuration = 3,
    /// C→S — `stopType`, `targetId`.
    ControlStop = 4,
    /// C→S — `mode`, `targetId`, optional `newContent`.
    ControlVariation = 5,

    /// C→S — `id`, `previousId`, `content`.
    UserMessage = 6,
    /// both — PCM or Opus bytes, sequence, duration, `isLast`.
    AudioChunk = 7,
    /// both — `text`, `final`, `confidence`, `language`.
    Transcription = 8,

    /// S→C — terminal full text.
    AssistantMessage = 9,
    /// S→C — streaming chunk; `sequence`, `isFinal`.
    AssistantSentence = 10,
    /// S→C — streaming preamble; `plannedSentenceCount`.
    StartAnswer = 11,
    /// S→C — chain-of-thought fragment.
    ReasoningStep = 12,
    /// S→C — retrieved-memory marker.
    MemoryTrace = 13,
    /// S→C — internal note.
    Commentary = 14,

    /// S→C — `toolName`, `parameters`, `execution`, `timeoutMs`.
    ToolUseRequest = 15,
    /// both — `requestId`, `success`, `result`, `errorCode`, `errorMessage`.
    ToolUseResult = 16,

    /// C→S — user feedback on a prior item.
    Feedback = 17,
    /// C→S — user note on a prior item.
    UserNote = 18,
    /// C→S — memory action on a prior item.
    MemoryAction = 19,
    /// C→S — dimension preference vote.
    DimensionPreference = 20,
    /// C→S — elite selection.
    EliteSelect = 21,

    /// S→C — server response to `Feedback`.
    FeedbackConfirmation = 22,
    /// S→C — server response to `UserNote`.
    NoteConfirmation = 23,
    /// S→C — server response to `MemoryAction`.
    MemoryConfirmation = 24,
    /// S→C — server capability/version info.
    ServerInfo = 25,
    /// S→C — session statistics.
    SessionStats = 26,
    /// S→C — elite options available for selection.
    EliteOptions = 27,
    /// S→C — a branch of the conversation changed.
    BranchUpdate = 28,
}

impl MessageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        use MessageType::*;
        Some(match tag {
            1 => Acknowledgement,
            2 => ErrorMessage,
            3 => Configuration,
            4 => ControlStop,
            5 => ControlVariation,
            6 => UserMessage,
            7 => AudioChunk,
            8 => Transcription,
            9 => AssistantMessage,
            10 => AssistantSentence,
            11 => StartAnswer,
            12 => ReasoningStep,
            13 => MemoryTrace,
            14 => Commentary,
            15 => ToolUseRequest,
            16 => ToolUseResult,
            17 => Feedback,
            18 => UserNote,
            19 => MemoryAction,
            20 => DimensionPreference,
            21 => EliteSelect,
            22 => FeedbackConfirmation,
            23 => NoteConfirmation,
            24 => MemoryConfirmation,
            25 => ServerInfo,
            26 => SessionStats,
            27 => EliteOptions,
            28 => BranchUpdate,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for message types the server must ignore when received from a
    /// client (assistant-authored content and a handful of confirmations).
    pub fn is_server_only(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            AssistantMessage
                | AssistantSentence
                | StartAnswer
                | ReasoningStep
                | MemoryTrace
                | Commentary
                | ToolUseRequest
                | FeedbackConfirmation
                | NoteConfirmation
                | MemoryConfirmation
                | ServerInfo
                | SessionStats
                | EliteOptions
                | BranchUpdate
        )
    }

    /// True for the two control types that always carry `stanzaId == 0`.
    pub fn is_zero_stanza_control(self) -> bool {
        matches!(self, MessageType::Acknowledgement | MessageType::ErrorMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_tag() {
        for tag in 1u8..=28 {
            let mt = MessageType::from_u8(tag).expect("tag assigned");
            assert_eq!(mt.tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_none() {
        assert!(MessageType::from_u8(0).is_none());
        assert!(MessageType::from_u8(29).is_none());
        assert!(MessageType::from_u8(255).is_none());
    }
}
