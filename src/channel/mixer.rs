//! The per-channel mix → encode → dispatch tick.
//!
//! Every channel runs one independent interval task at the packet cadence,
//! from creation until destruction. A tick that fails (encode error, missing
//! engine) is logged and skipped; the schedule itself never stops early
//! except through channel destruction.

use std::sync::{Arc, Weak};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::audio::clip::ClipProgress;
use crate::audio::codec::PacketEncoder;
use crate::audio::constants::MAX_ENCODED_BYTES;
use crate::channel::Channel;
use crate::config::EngineConfig;
use crate::engine::AudioEngine;

enum TickOutcome {
    Continue,
    /// Channel emptied with destroy-when-empty set.
    Destroy,
    /// Channel (or engine) is gone; stop the schedule.
    Stop,
}

/// Spawn the tick task for `channel`. The first tick fires immediately.
pub(crate) fn spawn_tick(
    channel: Arc<Channel>,
    engine: Weak<AudioEngine>,
    config: EngineConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut encoder = match PacketEncoder::new(config.sample_rate) {
            Ok(encoder) => encoder,
            Err(err) => {
                error!(channel = channel.id(), error = %err, "failed to create encoder, channel stays silent");
                return;
            }
        };

        let mut mix_buf = vec![0.0f32; config.packet_samples];
        let mut stream_buf = vec![0.0f32; config.packet_samples];
        let mut encoded = vec![0u8; MAX_ENCODED_BYTES];

        let mut ticker = tokio::time::interval(config.packet_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match run_tick(
                &channel,
                &engine,
                &mut encoder,
                &mut mix_buf,
                &mut stream_buf,
                &mut encoded,
            ) {
                TickOutcome::Continue => {}
                TickOutcome::Destroy => {
                    if let Some(engine) = engine.upgrade() {
                        debug!(channel = channel.id(), "destroying empty channel");
                        engine.destroy_channel(channel.id());
                    }
                    break;
                }
                TickOutcome::Stop => break,
            }
        }
    })
}

fn run_tick(
    channel: &Arc<Channel>,
    engine: &Weak<AudioEngine>,
    encoder: &mut PacketEncoder,
    mix_buf: &mut [f32],
    stream_buf: &mut [f32],
    encoded: &mut [u8],
) -> TickOutcome {
    let Some(engine) = engine.upgrade() else {
        return TickOutcome::Stop;
    };

    let audience = {
        let mut state = channel.state.lock();
        // Checked under the state lock: destruction marks the flag under the
        // same lock, so a destroyed channel's buffers are never mixed.
        if channel.is_destroyed() {
            return TickOutcome::Stop;
        }

        mix_buf.fill(0.0);

        let mut ended: Vec<u32> = Vec::new();
        for (id, clip) in state.clips.iter_mut() {
            if clip.mix_into(mix_buf) == ClipProgress::Finished {
                ended.push(*id);
            }
        }
        // Removal happens only after the full mix, so a clip that ended
        // mid-tick still contributed its partial content.
        for id in ended {
            state.clips.remove(&id);
        }

        let mut live = false;
        if let Some(attachment) = state.stream.as_ref() {
            live = true;
            let n = attachment.session.read(stream_buf);
            for i in 0..n {
                mix_buf[i] += stream_buf[i] * attachment.volume;
            }
        }

        if state.clips.is_empty() && !live {
            if channel.destroy_when_empty() {
                return TickOutcome::Destroy;
            }
            // An empty channel produces nothing; no silence packets.
            return TickOutcome::Continue;
        }

        state.audience.clone()
    };

    let len = match encoder.encode(mix_buf, encoded) {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            warn!(channel = channel.id(), "encoder produced an empty packet, skipping tick");
            return TickOutcome::Continue;
        }
        Err(err) => {
            warn!(channel = channel.id(), error = %err, "encode failed, skipping tick");
            return TickOutcome::Continue;
        }
    };
    let payload = &encoded[..len];

    let sink = engine.sink();
    if let Some(validator) = audience.validator {
        for recipient in sink.ready_recipients() {
            if validator(recipient) {
                sink.send_to(recipient, channel.id(), payload);
            }
        }
    } else if audience.broadcast {
        sink.send(channel.id(), payload);
    } else {
        for recipient in &audience.owners {
            sink.send_to(*recipient, channel.id(), payload);
        }
    }

    TickOutcome::Continue
}
