//! Agent-side protocol core: a process that joins an SFU media room, talks
//! the binary wire protocol over its reliable data channel, and bridges
//! voice activity on the room's audio track into the conversation core.
//!
//! [`agent::Agent`] owns one room connection; [`router::Router`] binds an
//! `Agent`'s callbacks to [`ac_conversation::Dispatcher`] and
//! [`ac_voice::VoicePipeline`]; [`worker::Worker`] discovers rooms and keeps
//! an `Agent` + `Router` pair running for each one that needs it.

pub mod agent;
pub mod config;
pub mod error;
pub mod opus_codec;
pub mod pending;
pub mod ports;
pub mod resample;
pub mod router;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{Agent, AgentConfig};
pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use opus_codec::OpusCodec;
pub use router::Router;
pub use worker::{Worker, WorkerDeps};
