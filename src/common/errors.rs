use std::io;

use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// Recoverable conditions (`ResourceExhausted`) are expected under load and
/// callers retry or back off; transcoder problems are never retried
/// automatically and degrade the affected feature to silence; everything that
/// happens inside a mixer tick is caught and logged at the tick boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pool or id space momentarily full.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// The external transcoder binary could not be found.
    #[error("transcoder not found: {0}")]
    NotFound(String),

    /// The external transcoder binary is not executable by this process.
    #[error("transcoder access denied: {0}")]
    AccessDenied(String),

    /// The transcoder process failed after it was spawned.
    #[error("transcoder process failure: {0}")]
    ProcessFailure(String),

    /// Opus encoding failed for one packet.
    #[error("encode failure: {0}")]
    EncodeFailure(String),

    /// A channel with this name already exists.
    #[error("duplicate channel name: {0}")]
    DuplicateName(String),

    /// A live channel already holds this id.
    #[error("duplicate channel id: {0}")]
    DuplicateId(u8),

    /// Expected terminal state of an explicitly stopped session.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Classify an I/O error from spawning (or probing) the external
    /// transcoder binary.
    pub fn classify_spawn(err: &io::Error, binary: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(binary.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(binary.to_string()),
            _ => Self::ProcessFailure(format!("{binary}: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_missing_binary() {
        let err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        assert!(matches!(
            EngineError::classify_spawn(&err, "ffmpeg"),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn classify_permission_denied() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            EngineError::classify_spawn(&err, "ffmpeg"),
            EngineError::AccessDenied(_)
        ));
    }

    #[test]
    fn classify_other() {
        let err = io::Error::new(io::ErrorKind::OutOfMemory, "oom");
        assert!(matches!(
            EngineError::classify_spawn(&err, "ffmpeg"),
            EngineError::ProcessFailure(_)
        ));
    }
}
