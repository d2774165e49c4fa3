//! Cloud Jukebox library -- a music jukebox backed by remote object storage.
//!
//! Songs live as objects in a storage backend (local disk, memory, S3, or
//! a mirror of two of those), their metadata in SQLite.  Playback keeps a
//! small cache of upcoming songs downloaded in the background while an
//! external player works through the queue.

pub mod checksum;
pub mod config;
pub mod errors;
pub mod jukebox;
pub mod metadata;
pub mod metrics;
pub mod naming;
pub mod playback;
pub mod storage;

pub use errors::JukeboxError;
pub use jukebox::Jukebox;
