//! Jukebox error types.
//!
//! Remote I/O failures stay inside `anyhow::Result` and are turned into
//! success indicators at the storage boundary.  [`JukeboxError`] covers
//! the failures a user has to act on: bad configuration, a player that
//! keeps failing, missing songs or playlists, and multi-step operations
//! that only partly succeeded.

use thiserror::Error;

/// User-facing jukebox errors.
#[derive(Debug, Error)]
pub enum JukeboxError {
    /// The configuration file could not be read or parsed.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The player launch configuration failed validation.
    #[error("invalid player configuration: {message}")]
    InvalidPlayerConfig { message: String },

    /// `storage.backend` (or a mirror side) names no known backend.
    #[error("unknown storage backend '{name}'")]
    UnknownBackend { name: String },

    /// The storage backend refused to open a session.
    #[error("unable to connect to {backend} storage")]
    StorageUnavailable { backend: String },

    /// The player failed too many times in a row.
    #[error("player failed {failures} consecutive times; giving up")]
    PlayerFailing { failures: u32 },

    /// The requested song is not in the metadata store.
    #[error("song '{uid}' not found")]
    SongNotFound { uid: String },

    /// The requested playlist does not exist.
    #[error("playlist '{name}' not found")]
    PlaylistNotFound { name: String },

    /// The selection resolved to zero songs.
    #[error("no songs to play")]
    NothingToPlay,

    /// Some steps of a multi-step operation failed.
    #[error("{operation}: {failed} of {attempted} steps failed")]
    PartialFailure {
        operation: String,
        attempted: usize,
        failed: usize,
    },

    /// Catch-all for unexpected internal errors.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JukeboxError {
    /// Short machine-readable error code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            JukeboxError::InvalidConfig { .. } => "InvalidConfig",
            JukeboxError::InvalidPlayerConfig { .. } => "InvalidPlayerConfig",
            JukeboxError::UnknownBackend { .. } => "UnknownBackend",
            JukeboxError::StorageUnavailable { .. } => "StorageUnavailable",
            JukeboxError::PlayerFailing { .. } => "PlayerFailing",
            JukeboxError::SongNotFound { .. } => "SongNotFound",
            JukeboxError::PlaylistNotFound { .. } => "PlaylistNotFound",
            JukeboxError::NothingToPlay => "NothingToPlay",
            JukeboxError::PartialFailure { .. } => "PartialFailure",
            JukeboxError::Internal(_) => "Internal",
        }
    }
}
