use audiopus::{Application, Channels, SampleRate, coder::Encoder as OpusEncoder};

use crate::common::errors::EngineError;

/// PCM f32 → Opus packet encoder for mono mixer output.
pub struct PacketEncoder {
    encoder: OpusEncoder,
}

impl PacketEncoder {
    /// Create an encoder for mono PCM at `sample_rate` with the AUDIO
    /// application profile.
    pub fn new(sample_rate: u32) -> Result<Self, EngineError> {
        let rate = opus_sample_rate(sample_rate)?;
        let encoder = OpusEncoder::new(rate, Channels::Mono, Application::Audio)
            .map_err(|e| EngineError::EncodeFailure(e.to_string()))?;
        Ok(Self { encoder })
    }

    /// Encode one packet of f32 PCM into `out`, returning bytes written.
    /// `pcm.len()` must be a valid Opus frame size for the encoder's rate.
    pub fn encode(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<usize, EngineError> {
        self.encoder
            .encode_float(pcm, out)
            .map_err(|e| EngineError::EncodeFailure(e.to_string()))
    }
}

fn opus_sample_rate(rate: u32) -> Result<SampleRate, EngineError> {
    match rate {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(EngineError::EncodeFailure(format!(
            "unsupported sample rate {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::constants::MAX_ENCODED_BYTES;

    #[test]
    fn encodes_a_20ms_mono_frame() {
        let mut encoder = PacketEncoder::new(48_000).unwrap();
        let pcm = vec![0.0f32; 960];
        let mut out = vec![0u8; MAX_ENCODED_BYTES];
        let n = encoder.encode(&pcm, &mut out).unwrap();
        assert!(n > 0);
    }

    #[test]
    fn rejects_unsupported_rate() {
        assert!(matches!(
            PacketEncoder::new(44_100),
            Err(EngineError::EncodeFailure(_))
        ));
    }

    #[test]
    fn rejects_invalid_frame_size() {
        let mut encoder = PacketEncoder::new(48_000).unwrap();
        let pcm = vec![0.0f32; 961];
        let mut out = vec![0u8; MAX_ENCODED_BYTES];
        assert!(encoder.encode(&pcm, &mut out).is_err());
    }
}
