//! Central constants for the mixing engine.
//!
//! All magic numbers in `src/audio/**` and the channel scheduler live here so
//! they can be tuned in one place and remain consistent across modules.

// ── Sample / PCM ─────────────────────────────────────────────────────────────

/// Output sample rate of every channel (Hz).
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per mixed packet (mono). 960 samples at 48 kHz = 20 ms cadence.
pub const PACKET_SAMPLES: usize = 960;

/// Mono output throughout the mixer; stereo sources are downmixed upstream.
pub const MIXER_CHANNELS: usize = 1;

// ── Codec ────────────────────────────────────────────────────────────────────

/// Upper bound for one encoded Opus packet (bytes).
pub const MAX_ENCODED_BYTES: usize = 4_000;

// ── Channel identifiers ──────────────────────────────────────────────────────

/// Size of the channel identifier space; ids are `0..=255`.
pub const ID_SPACE: usize = 256;

// ── Live-stream ingestion ────────────────────────────────────────────────────

/// Byte pipe capacity between the transcoder process and the decoder (1 MiB).
pub const PIPE_CAPACITY: usize = 1_024 * 1_024;

/// Chunk size for copying transcoder output into the pipe (8 KiB).
pub const PIPE_CHUNK: usize = 8 * 1_024;

// ── Pools ────────────────────────────────────────────────────────────────────

/// Poll interval for drain-before-release waits (milliseconds).
pub const DRAIN_POLL_MS: u64 = 500;
