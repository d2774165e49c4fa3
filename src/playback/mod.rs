//! Playback: the song queue, the prefetch cache, and the player state
//! machine driven by [`command::PlayerCommand`]s.

pub mod command;
pub mod controller;
pub mod error_log;
pub mod player;
pub mod prefetch;
pub mod queue;
