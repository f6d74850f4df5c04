//! Process-level dispatch loop: discovers SFU rooms that need an agent,
//! spawns and connects one [`Agent`] + [`Router`] pair per such room, and
//! retires the pair once the room empties out or the agent disconnects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ac_conversation::{
    ConversationRepository, Dispatcher, GenerationManager, GenerationUseCase, IdGenerator, MessageRepository,
    ProtocolHandler, ProtocolHandlerConfig, SessionInfoProvider, SpeechSynthesizer, ToolUseRepository,
    UserActionSink,
};
use ac_types::ConversationId;
use ac_voice::{AsrService, OpusDecoder, TtsService, VadProcessor, VadProcessorConfig, VoiceActivityModel, VoicePipeline, VoicePipelineConfig};

use crate::agent::{Agent, AgentConfig};
use crate::config::Config;
use crate::ports::{OpusEncoder, RawOpusDecoder, RoomConnector};
use crate::router::Router;

/// Collaborators shared by every conversation this process serves. Built
/// once in `main` and handed to the worker; nothing in here is
/// conversation-specific.
pub struct WorkerDeps {
    pub conversation_repo: Arc<dyn ConversationRepository>,
    pub message_repo: Arc<dyn MessageRepository>,
    pub tool_use_repo: Arc<dyn ToolUseRepository>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub generation_use_case: Arc<dyn GenerationUseCase>,
    pub speech_synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub user_action_sink: Option<Arc<dyn UserActionSink>>,
    pub session_info: Option<Arc<dyn SessionInfoProvider>>,
    pub asr_service: Option<Arc<dyn AsrService>>,
    pub tts_service: Option<Arc<dyn TtsService>>,
    pub opus_decoder: Arc<dyn OpusDecoder>,
    pub raw_opus_decoder: Arc<dyn RawOpusDecoder>,
    pub vad_model: Option<Arc<dyn VoiceActivityModel>>,
}

struct TrackedAgent {
    agent: Arc<Agent>,
}

pub struct Worker {
    config: Config,
    room_connector: Arc<dyn RoomConnector>,
    opus_encoder: Arc<dyn OpusEncoder>,
    deps: Arc<WorkerDeps>,
    agents: tokio::sync::Mutex<HashMap<String, TrackedAgent>>,
}

impl Worker {
    pub fn new(
        config: Config,
        room_connector: Arc<dyn RoomConnector>,
        opus_encoder: Arc<dyn OpusEncoder>,
        deps: WorkerDeps,
    ) -> Self {
        Self {
            config,
            room_connector,
            opus_encoder,
            deps: Arc::new(deps),
            agents: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Runs the discovery and monitor sweeps until `shutdown` fires, then
    /// tears down every tracked agent in parallel.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut discovery = tokio::time::interval(self.config.discovery_interval());
        let mut monitor = tokio::time::interval(self.config.monitor_interval());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = discovery.tick() => self.discover_rooms().await,
                _ = monitor.tick() => self.monitor_agents().await,
            }
        }

        self.shutdown_all().await;
    }

    async fn discover_rooms(&self) {
        let rooms = match self.room_connector.list_rooms().await {
            Ok(rooms) => rooms,
            Err(err) => {
                warn!(%err, "room discovery failed");
                return;
            }
        };

        for room in rooms {
            if !room.name.starts_with(&self.config.room_prefix) {
                continue;
            }
            if room.has_agent || room.non_agent_participant_count == 0 {
                continue;
            }
            if self.agents.lock().await.contains_key(&room.name) {
                continue;
            }
            self.spawn_agent_for_room(room.name).await;
        }
    }

    /// Retires any agent whose room has emptied out or whose connection has
    /// already dropped, matching the every-10s health sweep.
    async fn monitor_agents(&self) {
        let mut stale = Vec::new();
        {
            let agents = self.agents.lock().await;
            for (room_name, tracked) in agents.iter() {
                let should_retire = match tracked.agent.get_room() {
                    None => true,
                    Some(room) => !tracked.agent.is_connected() || room.non_agent_participant_count().await == 0,
                };
                if should_retire {
                    stale.push(room_name.clone());
                }
            }
        }

        for room_name in stale {
            if let Some(tracked) = self.agents.lock().await.remove(&room_name) {
                info!(room = %room_name, "retiring agent, room empty or disconnected");
                tracked.agent.disconnect().await;
            }
        }
    }

    async fn shutdown_all(&self) {
        let tracked: Vec<_> = self.agents.lock().await.drain().collect();
        let handles: Vec<_> = tracked
            .into_iter()
            .map(|(room_name, tracked)| {
                tokio::spawn(async move {
                    debug!(room = %room_name, "shutting down agent");
                    tracked.agent.disconnect().await;
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn spawn_agent_for_room(&self, room_name: String) {
        let conversation_id = ConversationId::new(room_name.clone());
        let agent_config = self.config.agent_config();
        let agent = Arc::new(Agent::new(agent_config, self.room_connector.clone(), self.opus_encoder.clone()));

        let protocol_handler = Arc::new(ProtocolHandler::new(
            conversation_id.clone(),
            agent.clone(),
            self.deps.conversation_repo.clone(),
            self.deps.message_repo.clone(),
            ProtocolHandlerConfig {
                max_buffer_size: self.config.max_buffer_size,
                max_reconnection_gap: self.config.max_reconnection_gap,
            },
        ));
        let generation_manager = Arc::new(GenerationManager::new());
        self.spawn_generation_cleanup(&agent, &generation_manager);
        let dispatcher = Arc::new(Dispatcher::new(
            conversation_id.clone(),
            protocol_handler,
            generation_manager.clone(),
            self.deps.message_repo.clone(),
            self.deps.tool_use_repo.clone(),
            self.deps.id_generator.clone(),
            self.deps.generation_use_case.clone(),
            self.deps.speech_synthesizer.clone(),
            self.deps.user_action_sink.clone(),
            self.deps.session_info.clone(),
        ));

        let vad = self.build_vad();
        let router = Arc::new(Router::with_fallback_asr(
            conversation_id.clone(),
            dispatcher,
            generation_manager,
            vad,
            Some(self.deps.raw_opus_decoder.clone()),
            self.deps.asr_service.clone(),
        ));

        if let (Some(asr), Some(tts)) = (&self.deps.asr_service, &self.deps.tts_service) {
            let audio_track: Arc<dyn ac_voice::AgentAudioTrack> = agent.clone();
            let pipeline = Arc::new(VoicePipeline::new(
                conversation_id.clone(),
                VoicePipelineConfig::default(),
                self.deps.opus_decoder.clone(),
                asr.clone(),
                tts.clone(),
                router.clone() as Arc<dyn ac_voice::TranscriptionSink>,
                None,
                audio_track,
            ));
            router.bind_voice_pipeline(pipeline);
        }

        agent.bind_callbacks(router);

        if let Err(err) = agent.connect(&room_name).await {
            warn!(%err, room = %room_name, "failed to connect agent to room");
            return;
        }

        info!(room = %room_name, "agent connected");
        self.agents.lock().await.insert(room_name, TrackedAgent { agent });
    }

    /// Optional background sweep named in the generation manager's design:
    /// cancels any job that has outlived `generation_max_age`. Ties its own
    /// lifetime to the agent via a weak reference rather than the worker's
    /// shutdown token, so it exits on its own once the agent is retired.
    fn spawn_generation_cleanup(&self, agent: &Arc<Agent>, generation_manager: &Arc<GenerationManager>) {
        let agent = Arc::downgrade(agent);
        let generation_manager = generation_manager.clone();
        let interval = self.config.generation_cleanup_interval();
        let max_age = self.config.generation_max_age();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(agent) = agent.upgrade() else { break };
                if !agent.is_connected() {
                    break;
                }
                let cancelled = generation_manager.cleanup_stale_generations(max_age);
                if cancelled > 0 {
                    debug!(cancelled, "cleaned up stale generations");
                }
            }
        });
    }

    fn build_vad(&self) -> Option<VadProcessor<Box<dyn VoiceActivityModel>>> {
        if !self.config.vad_enabled() {
            return None;
        }
        let model = self.deps.vad_model.clone()?;
        let boxed: Box<dyn VoiceActivityModel> = Box::new(ArcModel(model));
        Some(VadProcessor::new(
            boxed,
            VadProcessorConfig { min_silence_duration: self.config.vad_silence_duration() },
        ))
    }
}

/// Adapts a shared `Arc<dyn VoiceActivityModel>` (one model, many
/// conversations) into the owned `Box<dyn VoiceActivityModel>` each
/// `VadProcessor` wants.
struct ArcModel(Arc<dyn VoiceActivityModel>);

impl VoiceActivityModel for ArcModel {
    fn is_speech(&self, pcm_mono_16k: &[i16]) -> bool {
        self.0.is_speech(pcm_mono_16k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeOpusEncoder, FakeRawOpusDecoder, FakeRoom, FakeRoomConnector};
    use ac_conversation::testing::*;
    use tokio::sync::mpsc;

    fn test_config() -> Config {
        Config {
            url: "wss://example".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            agent_identity: "ac-agent".into(),
            agent_name: "Assistant".into(),
            token_validity_duration_s: 3600,
            work_queue_size: 16,
            worker_count: 2,
            work_queue_timeout_ms: 50,
            ack_timeout_s: 5,
            max_retries: 3,
            max_buffer_size: 200,
            max_reconnection_gap: 1000,
            vad_model_path: "".into(),
            vad_silence_duration_ms: 1200,
            vad_threshold: 0.5,
            tts_sample_rate: 24_000,
            tts_channels: 1,
            room_prefix: "conv_".into(),
            discovery_interval_s: 5,
            monitor_interval_s: 10,
            generation_cleanup_interval_s: 60,
            generation_max_age_s: 600,
        }
    }

    fn test_deps() -> WorkerDeps {
        WorkerDeps {
            conversation_repo: Arc::new(InMemoryConversationRepo::default()),
            message_repo: Arc::new(InMemoryMessageRepo::default()),
            tool_use_repo: Arc::new(InMemoryToolUseRepo::default()),
            id_generator: Arc::new(SequentialIdGenerator::new("msg")),
            generation_use_case: Arc::new(ScriptedGenerationUseCase { sentences: vec![("hi".into(), true)] }),
            speech_synthesizer: None,
            user_action_sink: None,
            session_info: None,
            asr_service: None,
            tts_service: None,
            opus_decoder: Arc::new(NoopOpusDecoder),
            raw_opus_decoder: Arc::new(FakeRawOpusDecoder),
            vad_model: None,
        }
    }

    struct NoopOpusDecoder;
    impl ac_voice::OpusDecoder for NoopOpusDecoder {
        fn decode(&self, frame: &[u8]) -> ac_voice::VoiceResult<Vec<i16>> {
            Ok(frame.iter().map(|&b| b as i16).collect())
        }
    }

    #[tokio::test]
    async fn discovery_connects_an_agent_for_an_eligible_room() {
        let room = Arc::new(FakeRoom::default());
        let (_events_tx, events_rx) = mpsc::channel(4);
        let mut connector = FakeRoomConnector::new(room.clone(), events_rx);
        connector.rooms = vec![crate::ports::RoomDescriptor {
            name: "conv_1".into(),
            non_agent_participant_count: 1,
            has_agent: false,
        }];

        let worker = Arc::new(Worker::new(
            test_config(),
            Arc::new(connector),
            Arc::new(FakeOpusEncoder),
            test_deps(),
        ));

        worker.discover_rooms().await;
        assert_eq!(worker.agents.lock().await.len(), 1);
        assert!(worker.agents.lock().await.contains_key("conv_1"));

        worker.shutdown_all().await;
        assert!(worker.agents.lock().await.is_empty());
    }

    #[tokio::test]
    async fn discovery_skips_rooms_already_served_or_without_a_waiting_participant() {
        let room = Arc::new(FakeRoom::default());
        let (_events_tx, events_rx) = mpsc::channel(4);
        let mut connector = FakeRoomConnector::new(room, events_rx);
        connector.rooms = vec![
            crate::ports::RoomDescriptor { name: "conv_empty".into(), non_agent_participant_count: 0, has_agent: false },
            crate::ports::RoomDescriptor { name: "conv_taken".into(), non_agent_participant_count: 2, has_agent: true },
            crate::ports::RoomDescriptor { name: "other_prefix".into(), non_agent_participant_count: 2, has_agent: false },
        ];

        let worker = Arc::new(Worker::new(
            test_config(),
            Arc::new(connector),
            Arc::new(FakeOpusEncoder),
            test_deps(),
        ));

        worker.discover_rooms().await;
        assert!(worker.agents.lock().await.is_empty());
    }
}
