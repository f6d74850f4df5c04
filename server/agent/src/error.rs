use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent is already connected")]
    AlreadyConnected,

    #[error("callbacks must be bound before connecting")]
    MissingCallbacks,

    #[error("failed to connect to room: {0}")]
    ConnectFailed(String),

    #[error("agent is not connected")]
    Disconnected,

    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("room publish failed: {0}")]
    PublishFailed(String),

    #[error("internal agent error: {0}")]
    Internal(String),
}
