//! External transcoder binary management.
//!
//! Both live-stream ingestion and any offline transcode path go through the
//! same executable. Availability is verified once, asynchronously, before
//! first use; failures are classified rather than surfaced as opaque I/O
//! errors, and never retried automatically.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::common::errors::EngineError;
use crate::config::TranscoderConfig;

pub struct Transcoder {
    path: PathBuf,
    format: String,
    available: AtomicBool,
}

impl Transcoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            format: config.format.clone(),
            available: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container format the transcoder emits on stdout.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Verify the transcoder binary is runnable.
    ///
    /// Succeeds at most once per process; later calls are cheap. A failure is
    /// classified (`NotFound | AccessDenied | ProcessFailure`) and left to the
    /// caller — the engine never retries on its own.
    pub async fn ensure_available(&self) -> Result<(), EngineError> {
        if self.available.load(Ordering::Acquire) {
            return Ok(());
        }
        let status = tokio::process::Command::new(&self.path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| EngineError::classify_spawn(&e, &self.path.display().to_string()))?;
        if !status.success() {
            return Err(EngineError::ProcessFailure(format!(
                "{} exited with {status}",
                self.path.display()
            )));
        }
        self.available.store(true, Ordering::Release);
        info!(path = %self.path.display(), "transcoder available");
        Ok(())
    }

    /// Arguments producing mono, fixed-sample-rate, compressed-container
    /// output on the process's standard output.
    pub(crate) fn stream_args(&self, url: &str, sample_rate: u32) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-vn".into(),
            "-i".into(),
            url.to_string(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            sample_rate.to_string(),
            "-f".into(),
            self.format.clone(),
            "pipe:1".into(),
        ]
    }
}
