//! mixlink — server-side real-time audio mixing engine.
//!
//! The engine maintains many concurrent logical audio channels. Each channel
//! mixes its active clips (and optionally a live URL stream) into fixed-size
//! mono PCM packets on a strict cadence, Opus-encodes every packet and hands
//! it to the host's transport sink. Channel ids come from one global
//! 256-slot space shared by pools and ad-hoc channels alike.
//!
//! Structure:
//! - [`engine::AudioEngine`] — process-wide context: registries, config,
//!   transcoder and sink.
//! - [`channel`] — channels, the mix tick, the id registry and the channel
//!   pool.
//! - [`audio`] — clip playback state, mixing and the Opus packet encoder.
//! - [`stream`] — live ingestion: external transcoder process → bounded byte
//!   pipe → format decoder → sample queue.
//! - [`storage`] / [`transport`] — the clip-store and packet-sink
//!   collaborator boundaries.

pub mod audio;
pub mod channel;
pub mod common;
pub mod config;
pub mod engine;
pub mod storage;
pub mod stream;
pub mod transport;

pub use audio::{Clip, ClipProgress, PacketEncoder, PlayOptions};
pub use channel::{Audience, Channel, ChannelPool, IdOwner, IdRegistry, PoolStats};
pub use common::errors::EngineError;
pub use config::{Config, EngineConfig, LoggingConfig, TranscoderConfig};
pub use engine::{AudioEngine, ChannelOptions};
pub use storage::{ClipSource, ClipStore};
pub use stream::{StreamSession, StreamSnapshot, StreamState, Transcoder};
pub use transport::{PacketFrame, PacketSink, RecipientId};
