//! Live URL-stream ingestion sessions.
//!
//! One session = one external transcoder process plus two dedicated threads:
//! a reader piping process stdout into a bounded [`BytePipe`], and a decoder
//! draining the pipe through symphonia into the sample queue the mixer
//! reads. Threads are plain `std::thread` because both sides block on I/O.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;

use parking_lot::Mutex;
use serde::Serialize;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::constants::PIPE_CHUNK;
use crate::common::errors::EngineError;
use crate::config::EngineConfig;
use crate::stream::pipe::{BytePipe, PipeReader};
use crate::stream::transcoder::Transcoder;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum StreamState {
    /// Process spawned, pipeline threads starting.
    Starting = 0,
    /// Process output is being copied into the byte pipe.
    Piping = 1,
    /// The format decoder is producing samples.
    Decoding = 2,
    /// The process closed its output and the decoder drained it.
    Ended = 3,
    /// Explicitly stopped.
    Cancelled = 4,
    /// Unrecoverable decode or I/O error.
    Failed = 5,
}

impl StreamState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Piping,
            2 => Self::Decoding,
            3 => Self::Ended,
            4 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled | Self::Failed)
    }
}

/// Telemetry view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub state: StreamState,
    pub ready: bool,
    pub queued: usize,
}

pub struct StreamSession {
    id: Uuid,
    url: String,
    state: AtomicU8,
    ready: AtomicBool,
    pipe: Arc<BytePipe>,
    samples: flume::Receiver<f32>,
    child: Mutex<Option<Child>>,
}

impl StreamSession {
    /// Spawn the transcoder for `url` and start the pipeline threads.
    ///
    /// Spawn failures are classified, logged once and never retried.
    pub(crate) fn start(
        transcoder: &Transcoder,
        config: &EngineConfig,
        url: &str,
    ) -> Result<Arc<Self>, EngineError> {
        let binary = transcoder.path().display().to_string();
        let mut child = Command::new(transcoder.path())
            .args(transcoder.stream_args(url, config.sample_rate))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                let err = EngineError::classify_spawn(&e, &binary);
                error!(url, error = %err, "failed to spawn transcoder");
                err
            })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::ProcessFailure("transcoder stdout not captured".to_string())
        })?;

        let (tx, rx) = flume::unbounded::<f32>();
        let pipe = Arc::new(BytePipe::new(config.pipe_capacity));
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            state: AtomicU8::new(StreamState::Starting as u8),
            ready: AtomicBool::new(false),
            pipe: pipe.clone(),
            samples: rx,
            child: Mutex::new(Some(child)),
        });

        {
            let session = session.clone();
            let pipe = pipe.clone();
            thread::spawn(move || reader_loop(&session, stdout, &pipe));
        }
        {
            let session = session.clone();
            let hint_ext = transcoder.format().to_string();
            thread::spawn(move || {
                if let Err(err) = decode_loop(&session, pipe, tx, &hint_ext) {
                    session.fail(err);
                }
            });
        }

        session.transition(StreamState::Piping);
        info!(session = %session.id, url, "stream session started");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `true` once the first decoded batch has been queued — distinguishes
    /// "still buffering" from "actively playing".
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Decoded samples queued and not yet consumed by the mixer.
    pub fn queued(&self) -> usize {
        self.samples.len()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            state: self.state(),
            ready: self.is_ready(),
            queued: self.queued(),
        }
    }

    /// Non-blocking drain of up to `out.len()` decoded samples, in producer
    /// order. Returns 0 while the session is still buffering — the mixer
    /// tick is never blocked.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.samples.try_recv() {
                Ok(sample) => {
                    out[n] = sample;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        n
    }

    /// Stop the session: forcibly terminate the transcoder process and
    /// unblock both pipeline threads. Safe from any thread, idempotent.
    pub fn stop(&self) {
        let previous = self.state.swap(StreamState::Cancelled as u8, Ordering::AcqRel);
        if previous == StreamState::Cancelled as u8 {
            return;
        }
        self.pipe.cancel();
        self.kill_process();
        info!(session = %self.id, url = %self.url, "stream session cancelled");
    }

    fn transition(&self, to: StreamState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if StreamState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn mark_ready(&self) {
        if !self.ready.load(Ordering::Acquire) {
            self.ready.store(true, Ordering::Release);
            debug!(session = %self.id, "first decoded batch queued");
        }
    }

    fn fail(&self, err: EngineError) {
        if !self.transition(StreamState::Failed) {
            return;
        }
        error!(session = %self.id, url = %self.url, error = %err, "stream session failed");
        self.pipe.cancel();
        self.kill_process();
    }

    /// Forceful kill, not a negotiated shutdown; also reaps the child.
    fn kill_process(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(err) = child.kill() {
                debug!(session = %self.id, error = %err, "transcoder already exited");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Copy process stdout into the pipe until end-of-stream or cancellation.
/// Writes block when the pipe is full: backpressure, never dropped data.
fn reader_loop(session: &Arc<StreamSession>, mut stdout: impl Read, pipe: &BytePipe) {
    let mut chunk = vec![0u8; PIPE_CHUNK];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => {
                pipe.complete();
                break;
            }
            Ok(n) => {
                if !pipe.write(&chunk[..n]) {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                if session.state() != StreamState::Cancelled {
                    warn!(session = %session.id, error = %err, "transcoder output read failed");
                }
                pipe.complete();
                break;
            }
        }
    }
    session.kill_process();
}

/// Probe and decode the pipe as a byte stream, pushing samples into the
/// queue in strict producer order.
fn decode_loop(
    session: &Arc<StreamSession>,
    pipe: Arc<BytePipe>,
    tx: flume::Sender<f32>,
    hint_ext: &str,
) -> Result<(), EngineError> {
    let source = ReadOnlySource::new(PipeReader { pipe });
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(hint_ext);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| match cancelled(session) {
            true => EngineError::Cancelled,
            false => EngineError::ProcessFailure(format!("probe failed: {e}")),
        })?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            EngineError::ProcessFailure("no audio track in transcoder output".to_string())
        })?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::ProcessFailure(format!("decoder init failed: {e}")))?;

    session.transition(StreamState::Decoding);

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        if cancelled(session) {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::BrokenPipe =>
            {
                return Ok(());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(session = %session.id, "demux error: {e}");
                continue;
            }
            Err(e) => {
                return Err(EngineError::ProcessFailure(format!("demux failed: {e}")));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                let spec = *audio_buf.spec();
                let mut buf = match sample_buf.take() {
                    Some(buf) => buf,
                    None => SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec),
                };
                buf.copy_interleaved_ref(audio_buf);
                if !buf.samples().is_empty() {
                    for &sample in buf.samples() {
                        if tx.send(sample).is_err() {
                            return Ok(());
                        }
                    }
                    session.mark_ready();
                }
                sample_buf = Some(buf);
            }
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(session = %session.id, "decode error: {e}");
                continue;
            }
            Err(e) => {
                return Err(EngineError::ProcessFailure(format!("decode failed: {e}")));
            }
        }
    }

    session.transition(StreamState::Ended);
    info!(session = %session.id, url = %session.url, "stream ended");
    Ok(())
}

fn cancelled(session: &StreamSession) -> bool {
    session.state() == StreamState::Cancelled
}
