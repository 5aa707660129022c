//! Per-segment error types for the speak pipeline.

use std::path::PathBuf;
use std::process::ExitStatus;

/// Errors raised while fetching or playing a single segment.
///
/// None of these abort a `speak` run; the pipeline logs them and moves on
/// to the next segment.
#[derive(Debug, thiserror::Error)]
pub enum SpeakError {
    /// Synthesis request failed (network, DNS, non-success HTTP status).
    #[error("Synthesis request for segment {index} failed: {source}")]
    Transport {
        index: usize,
        source: anyhow::Error,
    },

    /// The player program could not be started.
    #[error("Failed to start player '{program}': {source}")]
    PlayerSpawn {
        program: String,
        source: std::io::Error,
    },

    /// The player exited abnormally on its own.
    #[error("Player exited with {0}")]
    PlayerExit(ExitStatus),

    /// Waiting on or terminating the player failed.
    #[error("Failed to wait for player: {0}")]
    PlayerWait(std::io::Error),

    /// Staging file could not be written.
    #[error("Filesystem error at {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
}
