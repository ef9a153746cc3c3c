//! Per-clip playback state and the packet-fill algorithm.
//!
//! A [`Clip`] is one playable instance of a shared [`ClipSource`] buffer: its
//! own cursor, volume and lifecycle flags. Clip state is mutated only by the
//! mix tick of its owning channel and never crosses threads.

use std::sync::Arc;

use crate::storage::ClipSource;

/// Creation parameters for one clip instance.
#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    pub volume: f32,
    pub looping: bool,
    /// When `false`, the clip parks at end-of-buffer instead of removing
    /// itself, holding its slot until explicitly removed or rewound.
    pub destroy_on_end: bool,
    pub paused: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            looping: false,
            destroy_on_end: true,
            paused: false,
        }
    }
}

/// What a clip did during one mix pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipProgress {
    /// Samples were produced and the clip keeps its slot.
    Playing,
    /// The clip reached its end this pass and should be removed after the
    /// full mix is computed.
    Finished,
    /// Nothing was produced (paused or parked at end-of-buffer).
    Idle,
}

/// One playable instance of a [`ClipSource`] on a channel.
pub struct Clip {
    pub id: u32,
    source: Arc<ClipSource>,
    cursor: usize,
    pub volume: f32,
    pub looping: bool,
    pub destroy_on_end: bool,
    pub paused: bool,
    at_end: bool,
}

impl Clip {
    pub fn new(id: u32, source: Arc<ClipSource>, opts: PlayOptions) -> Self {
        Self {
            id,
            source,
            cursor: 0,
            volume: opts.volume,
            looping: opts.looping,
            destroy_on_end: opts.destroy_on_end,
            paused: opts.paused,
            at_end: false,
        }
    }

    pub fn source(&self) -> &Arc<ClipSource> {
        &self.source
    }

    /// Current sample offset into the source buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// `true` once a non-looping clip has consumed its whole buffer.
    pub fn at_end(&self) -> bool {
        self.at_end
    }

    /// Rewind to the start and clear the parked end-of-buffer state.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.at_end = false;
        self.paused = false;
    }

    /// Accumulate up to `out.len()` samples into `out`, advancing the cursor.
    ///
    /// Contributions are summed, never clipped per source; only the final mix
    /// is soft-limited by the encoder. A non-looping clip that runs out
    /// mid-pass contributes its remaining samples and leaves the tail of
    /// `out` untouched, which zero-pads its final packet.
    pub fn mix_into(&mut self, out: &mut [f32]) -> ClipProgress {
        if self.paused || self.at_end {
            return ClipProgress::Idle;
        }

        let samples = &self.source.samples;
        let len = samples.len();
        let mut filled = 0usize;

        while filled < out.len() {
            let take = (len - self.cursor).min(out.len() - filled);
            for i in 0..take {
                out[filled + i] += samples[self.cursor + i] * self.volume;
            }
            self.cursor += take;
            filled += take;

            if self.cursor >= len {
                if self.looping {
                    // Wrap and keep filling from the start.
                    self.cursor = 0;
                } else if self.destroy_on_end {
                    return ClipProgress::Finished;
                } else {
                    // Park at end-of-buffer until removed or rewound. The
                    // partial content already written still counts this tick.
                    self.at_end = true;
                    self.paused = true;
                    return ClipProgress::Playing;
                }
            }
        }

        ClipProgress::Playing
    }
}
