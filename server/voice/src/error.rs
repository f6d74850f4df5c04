use thiserror::Error;

pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("voice pipeline stopped")]
    Stopped,

    #[error("opus decode failed: {0}")]
    DecodeFailed(String),

    #[error("transcription failed: {0}")]
    AsrFailed(String),

    #[error("speech synthesis failed: {0}")]
    TtsFailed(String),
}
