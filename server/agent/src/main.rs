//! Binary entry point: parses configuration, wires the process's shared
//! collaborators, and runs the room-discovery worker until signaled.
//!
//! The persistence, model-inference, and SFU integrations are this crate's
//! explicit non-goals (see `ports.rs` and `ac_conversation::ports`), so this
//! binary ships with the bundled in-memory fakes and a connector stub that
//! makes the gap explicit rather than silently pretending to talk to a real
//! room server. A real deployment swaps `deps` and `room_connector` for its
//! own durable repositories, model-backed use case, and SFU client.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use ac_agent::opus_codec::{AsrOpusDecoder, OpusCodec};
use ac_agent::ports::{Room, RoomConnector, RoomDescriptor, RoomEvent};
use ac_agent::worker::WorkerDeps;
use ac_agent::{AgentError, AgentResult, Config, Worker};
use ac_conversation::testing::{
    InMemoryConversationRepo, InMemoryMessageRepo, InMemoryToolUseRepo, InMemoryUserActionSink,
    NoopSpeechSynthesizer, ScriptedGenerationUseCase, SequentialIdGenerator,
};

/// Stands in for a real SFU SDK client. `list_rooms` reports nothing to
/// discover and `connect` always fails, so a deployment notices immediately
/// that it needs to supply its own `RoomConnector`.
struct UnconfiguredRoomConnector;

#[async_trait]
impl RoomConnector for UnconfiguredRoomConnector {
    async fn connect(&self, room_name: &str) -> AgentResult<(Arc<dyn Room>, mpsc::Receiver<RoomEvent>)> {
        Err(AgentError::ConnectFailed(format!("no SFU client configured (room {room_name})")))
    }

    async fn list_rooms(&self) -> AgentResult<Vec<RoomDescriptor>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = Config::parse();

    let opus_codec = Arc::new(OpusCodec::new().context("initializing opus codec")?);
    let asr_decoder = Arc::new(AsrOpusDecoder::new().context("initializing asr opus decoder")?);

    let deps = WorkerDeps {
        conversation_repo: Arc::new(InMemoryConversationRepo::default()),
        message_repo: Arc::new(InMemoryMessageRepo::default()),
        tool_use_repo: Arc::new(InMemoryToolUseRepo::default()),
        id_generator: Arc::new(SequentialIdGenerator::new("msg")),
        generation_use_case: Arc::new(ScriptedGenerationUseCase { sentences: Vec::new() }),
        speech_synthesizer: Some(Arc::new(NoopSpeechSynthesizer)),
        user_action_sink: Some(Arc::new(InMemoryUserActionSink::default())),
        session_info: None,
        asr_service: None,
        tts_service: None,
        opus_decoder: asr_decoder,
        raw_opus_decoder: opus_codec.clone(),
        vad_model: None,
    };

    let worker = Arc::new(Worker::new(config, Arc::new(UnconfiguredRoomConnector), opus_codec, deps));

    let shutdown = CancellationToken::new();
    let run_handle = tokio::spawn({
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    shutdown.cancel();

    if let Err(err) = run_handle.await {
        warn!(%err, "worker task panicked during shutdown");
    }

    Ok(())
}
