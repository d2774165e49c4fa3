//! Typed playback control commands.
//!
//! Anything that wants to steer playback (OS signal handlers, tests, a
//! future remote control) holds a [`CommandSender`].  The play loop owns
//! the matching [`CommandReceiver`] and is the only consumer.

use tokio::sync::mpsc;

/// A request to change playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    /// Pause when playing, resume when paused.
    TogglePause,
    Pause,
    Resume,
    /// Stop the current song and move to the next one.
    Skip,
    /// Stop playback and end the play loop.
    Terminate,
    /// Log the current playback status.
    ShowStatus,
}

pub type CommandReceiver = mpsc::UnboundedReceiver<PlayerCommand>;

/// Cloneable handle for posting [`PlayerCommand`]s to the play loop.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<PlayerCommand>,
}

/// Create a connected sender/receiver pair.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, rx)
}

impl CommandSender {
    /// Post `command`. Returns false once the play loop has gone away.
    pub fn send(&self, command: PlayerCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn toggle_pause_play(&self) -> bool {
        self.send(PlayerCommand::TogglePause)
    }

    pub fn advance_to_next_song(&self) -> bool {
        self.send(PlayerCommand::Skip)
    }

    pub fn request_terminate(&self) -> bool {
        self.send(PlayerCommand::Terminate)
    }

    pub fn request_status_display(&self) -> bool {
        self.send(PlayerCommand::ShowStatus)
    }
}
