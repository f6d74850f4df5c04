pub mod audio;
pub mod ids;
pub mod wire;

pub use audio::{AudioFormat, PcmBlock, UnsupportedAudioFormat};
pub use ids::{ConversationId, MessageId, StanzaId, ToolUseId};
pub use wire::{ErrorCode, Severity};
