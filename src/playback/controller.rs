//! Playback state machine.
//!
//! States are `Stopped → Playing ⇄ Paused → Terminating`.  The controller
//! launches the external player for one song at a time and waits for it
//! to exit while listening for [`PlayerCommand`]s.  Pausing kills the
//! player and remembers how far into the song it got; resuming relaunches
//! it with that offset.
//!
//! A launch failure or non-zero player exit counts toward a circuit
//! breaker.  After [`MAX_SUCCESSIVE_FAILURES`] in a row the controller
//! moves to `Terminating` and reports [`JukeboxError::PlayerFailing`].
//! Kills caused by pause, skip or terminate never count as failures.

use garde::Validate;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::command::{CommandReceiver, PlayerCommand};
use super::error_log::ErrorLog;
use super::player::{build_args, format_offset, launch};
use crate::config::PlayerConfig;
use crate::errors::JukeboxError;
use crate::metrics::{PLAYER_FAILURES_TOTAL, SONGS_PLAYED_TOTAL};

/// Consecutive player failures that end playback.
pub const MAX_SUCCESSIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Terminating,
}

/// How a call to [`PlaybackController::play_song`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The player exited successfully.
    Completed,
    /// The player could not be launched or exited non-zero.
    Failed,
    Skipped,
    /// Playback stopped part way; the song resumes after a resume command.
    Paused,
    Terminated,
}

/// How [`PlaybackController::wait_while_paused`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseExit {
    Resumed,
    Skipped,
    Terminated,
}

/// Snapshot handed to status callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: PlaybackState,
    pub resume_offset: u64,
    pub successive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Pause,
    Skip,
    Terminate,
}

pub struct PlaybackController {
    player: PlayerConfig,
    commands: CommandReceiver,
    /// Shared with the prefetch task so downloads stop too.
    terminate: Arc<AtomicBool>,
    error_log: ErrorLog,
    state: PlaybackState,
    successive_failures: u32,
    /// Seconds into the current song, accumulated across pauses.
    resume_offset: u64,
    resume_pending: bool,
}

impl PlaybackController {
    /// Build a controller. Fails if the player launch configuration is invalid.
    pub fn new(
        player: PlayerConfig,
        commands: CommandReceiver,
        terminate: Arc<AtomicBool>,
        error_log: ErrorLog,
    ) -> Result<Self, JukeboxError> {
        player
            .validate()
            .map_err(|e| JukeboxError::InvalidPlayerConfig {
                message: e.to_string(),
            })?;
        Ok(Self {
            player,
            commands,
            terminate,
            error_log,
            state: PlaybackState::Stopped,
            successive_failures: 0,
            resume_offset: 0,
            resume_pending: false,
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn successive_failures(&self) -> u32 {
        self.successive_failures
    }

    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    pub fn is_terminating(&self) -> bool {
        self.state == PlaybackState::Terminating || self.terminate.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            resume_offset: self.resume_offset,
            successive_failures: self.successive_failures,
        }
    }

    /// `Stopped → Playing`.
    pub fn start(&mut self) {
        if self.state == PlaybackState::Stopped {
            self.state = PlaybackState::Playing;
        }
    }

    /// Move to `Terminating` and raise the shared termination flag.
    pub fn request_terminate(&mut self) {
        self.state = PlaybackState::Terminating;
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Play the song at `audio_path` until the player exits or a command
    /// interrupts it. `on_status` is called for every status request.
    pub async fn play_song<F>(
        &mut self,
        audio_path: &Path,
        mut on_status: F,
    ) -> Result<PlayOutcome, JukeboxError>
    where
        F: FnMut(ControllerStatus),
    {
        // Commands that arrived between songs apply before launching.
        while let Ok(command) = self.commands.try_recv() {
            if let Some(outcome) = self.apply_idle_command(command, &mut on_status) {
                return Ok(outcome);
            }
        }
        if self.is_terminating() {
            return Ok(PlayOutcome::Terminated);
        }

        self.state = PlaybackState::Playing;
        let offset = if std::mem::take(&mut self.resume_pending) {
            Some(self.resume_offset)
        } else {
            self.resume_offset = 0;
            None
        };
        let args = build_args(&self.player, audio_path, offset);
        debug!("launching {} {:?}", self.player.exe, args);

        let started = Instant::now();
        let mut child = match launch(&self.player.exe, &args) {
            Ok(child) => child,
            Err(e) => {
                self.error_log.record(&format!(
                    "unable to launch player '{}' for {}: {e}",
                    self.player.exe,
                    audio_path.display()
                ));
                return self.record_failure();
            }
        };

        let mut interrupt: Option<Interrupt> = None;
        let exit = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(command) = self.commands.recv() => {
                    if let Some(next) = self.interrupt_for(command, interrupt, &mut on_status) {
                        if interrupt.is_none() {
                            if let Err(e) = child.start_kill() {
                                debug!("player already gone: {e}");
                            }
                        }
                        interrupt = Some(next);
                    }
                }
            }
        };

        let elapsed = started.elapsed().as_secs();
        match interrupt {
            Some(Interrupt::Pause) => {
                self.resume_offset += elapsed;
                info!("paused at {}", format_offset(self.resume_offset));
                Ok(PlayOutcome::Paused)
            }
            Some(Interrupt::Skip) => {
                self.resume_offset = 0;
                Ok(PlayOutcome::Skipped)
            }
            Some(Interrupt::Terminate) => Ok(PlayOutcome::Terminated),
            None => match exit {
                Ok(status) if status.success() => {
                    self.successive_failures = 0;
                    self.resume_offset = 0;
                    metrics::counter!(SONGS_PLAYED_TOTAL).increment(1);
                    Ok(PlayOutcome::Completed)
                }
                Ok(status) => {
                    self.error_log.record(&format!(
                        "player exited with {status} playing {}",
                        audio_path.display()
                    ));
                    self.record_failure()
                }
                Err(e) => {
                    self.error_log.record(&format!(
                        "unable to wait for player playing {}: {e}",
                        audio_path.display()
                    ));
                    self.record_failure()
                }
            },
        }
    }

    /// Wait up to `timeout` for a command while no player is running,
    /// e.g. while the current song is still downloading. Returns the
    /// outcome a pause, skip or terminate command causes.
    pub async fn wait_for_command<F>(
        &mut self,
        timeout: Duration,
        mut on_status: F,
    ) -> Option<PlayOutcome>
    where
        F: FnMut(ControllerStatus),
    {
        if self.is_terminating() {
            return Some(PlayOutcome::Terminated);
        }
        match tokio::time::timeout(timeout, self.commands.recv()).await {
            Ok(Some(command)) => self.apply_idle_command(command, &mut on_status),
            Ok(None) => {
                // No sender left; nothing can interrupt, so just let time pass.
                tokio::time::sleep(timeout).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Block while paused. Returns once a resume, skip or terminate
    /// command arrives.
    pub async fn wait_while_paused<F>(&mut self, mut on_status: F) -> PauseExit
    where
        F: FnMut(ControllerStatus),
    {
        while self.state == PlaybackState::Paused {
            match self.commands.recv().await {
                Some(PlayerCommand::Resume) | Some(PlayerCommand::TogglePause) => {
                    self.state = PlaybackState::Playing;
                    self.resume_pending = true;
                    info!("resuming at {}", format_offset(self.resume_offset));
                    return PauseExit::Resumed;
                }
                Some(PlayerCommand::Skip) => {
                    self.state = PlaybackState::Playing;
                    self.resume_offset = 0;
                    return PauseExit::Skipped;
                }
                Some(PlayerCommand::Terminate) | None => {
                    self.request_terminate();
                    return PauseExit::Terminated;
                }
                Some(PlayerCommand::ShowStatus) => on_status(self.status()),
                Some(PlayerCommand::Pause) => {}
            }
        }
        if self.is_terminating() {
            PauseExit::Terminated
        } else {
            PauseExit::Resumed
        }
    }

    /// Apply `command` while a song is (about to be) playing and return the
    /// interruption it causes, if any. Terminate overrides an earlier
    /// pause or skip.
    fn interrupt_for<F>(
        &mut self,
        command: PlayerCommand,
        pending: Option<Interrupt>,
        on_status: &mut F,
    ) -> Option<Interrupt>
    where
        F: FnMut(ControllerStatus),
    {
        match command {
            PlayerCommand::Terminate => {
                self.request_terminate();
                Some(Interrupt::Terminate)
            }
            PlayerCommand::Pause | PlayerCommand::TogglePause
                if pending.is_none() && self.state == PlaybackState::Playing =>
            {
                self.state = PlaybackState::Paused;
                Some(Interrupt::Pause)
            }
            PlayerCommand::Skip if pending.is_none() => Some(Interrupt::Skip),
            PlayerCommand::ShowStatus => {
                on_status(self.status());
                None
            }
            _ => None,
        }
    }

    /// Apply `command` when no player process is running.
    fn apply_idle_command<F>(
        &mut self,
        command: PlayerCommand,
        on_status: &mut F,
    ) -> Option<PlayOutcome>
    where
        F: FnMut(ControllerStatus),
    {
        match self.interrupt_for(command, None, on_status)? {
            Interrupt::Terminate => Some(PlayOutcome::Terminated),
            Interrupt::Pause => Some(PlayOutcome::Paused),
            Interrupt::Skip => {
                self.resume_offset = 0;
                self.resume_pending = false;
                Some(PlayOutcome::Skipped)
            }
        }
    }

    fn record_failure(&mut self) -> Result<PlayOutcome, JukeboxError> {
        self.successive_failures += 1;
        self.resume_offset = 0;
        metrics::counter!(PLAYER_FAILURES_TOTAL).increment(1);
        if self.successive_failures >= MAX_SUCCESSIVE_FAILURES {
            self.request_terminate();
            return Err(JukeboxError::PlayerFailing {
                failures: self.successive_failures,
            });
        }
        Ok(PlayOutcome::Failed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::playback::command::{command_channel, CommandSender};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sender: CommandSender,
        terminate: Arc<AtomicBool>,
        controller: PlaybackController,
    }

    impl Fixture {
        fn script(&self, name: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            path
        }

        fn error_log(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("errors.log")).unwrap_or_default()
        }
    }

    /// Songs are shell scripts run by `/bin/sh`; the resume template passes
    /// the offset as `$1`.
    fn fixture() -> Fixture {
        fixture_with_exe("/bin/sh")
    }

    fn fixture_with_exe(exe: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (sender, commands) = command_channel();
        let terminate = Arc::new(AtomicBool::new(false));
        let player = PlayerConfig {
            exe: exe.to_string(),
            command_args: "%%AUDIO_FILE_PATH%%".to_string(),
            resume_args: Some("%%AUDIO_FILE_PATH%% %%START_SONG_TIME_OFFSET%%".to_string()),
        };
        let controller = PlaybackController::new(
            player,
            commands,
            terminate.clone(),
            ErrorLog::new(dir.path().join("errors.log")),
        )
        .unwrap();
        Fixture {
            dir,
            sender,
            terminate,
            controller,
        }
    }

    fn send_later(sender: &CommandSender, command: PlayerCommand) {
        let sender = sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            sender.send(command);
        });
    }

    #[test]
    fn test_rejects_template_without_audio_path() {
        let (_sender, commands) = command_channel();
        let player = PlayerConfig {
            exe: "/usr/bin/mpv".to_string(),
            command_args: "--no-video".to_string(),
            resume_args: None,
        };
        let result = PlaybackController::new(
            player,
            commands,
            Arc::new(AtomicBool::new(false)),
            ErrorLog::new("errors.log"),
        );
        assert!(matches!(result, Err(JukeboxError::InvalidPlayerConfig { .. })));
    }

    #[tokio::test]
    async fn test_success_after_failure_resets_counter() {
        let mut f = fixture();
        let fail = f.script("fail.sh", "exit 3\n");
        let ok = f.script("ok.sh", "exit 0\n");
        f.controller.start();
        assert_eq!(f.controller.state(), PlaybackState::Playing);

        let outcome = f.controller.play_song(&fail, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Failed);
        assert_eq!(f.controller.successive_failures(), 1);
        assert!(f.error_log().contains("fail.sh"));

        let outcome = f.controller.play_song(&ok, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Completed);
        assert_eq!(f.controller.successive_failures(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_trip_breaker() {
        let mut f = fixture();
        let fail = f.script("fail.sh", "exit 3\n");
        f.controller.start();

        for _ in 0..2 {
            assert_eq!(
                f.controller.play_song(&fail, |_| {}).await.unwrap(),
                PlayOutcome::Failed
            );
        }
        let result = f.controller.play_song(&fail, |_| {}).await;
        assert!(matches!(result, Err(JukeboxError::PlayerFailing { failures: 3 })));
        assert_eq!(f.controller.state(), PlaybackState::Terminating);
        assert!(f.terminate.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_launch_failure_counts() {
        let mut f = fixture_with_exe("/nonexistent/player");
        let song = f.script("ok.sh", "exit 0\n");
        f.controller.start();
        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Failed);
        assert_eq!(f.controller.successive_failures(), 1);
        assert!(f.error_log().contains("unable to launch player"));
    }

    #[tokio::test]
    async fn test_skip_kills_player_without_failure() {
        let mut f = fixture();
        let song = f.script("long.sh", "sleep 10\n");
        f.controller.start();
        send_later(&f.sender, PlayerCommand::Skip);

        let started = Instant::now();
        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Skipped);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.controller.successive_failures(), 0);
        assert_eq!(f.controller.resume_offset(), 0);
    }

    #[tokio::test]
    async fn test_pause_then_resume_relaunches_with_offset() {
        let mut f = fixture();
        // Exits at once when given an offset, otherwise plays "forever".
        let song = f.script("song.sh", "if [ -n \"$1\" ]; then exit 0; fi\nsleep 10\n");
        f.controller.start();
        send_later(&f.sender, PlayerCommand::TogglePause);

        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Paused);
        assert_eq!(f.controller.state(), PlaybackState::Paused);
        assert_eq!(f.controller.successive_failures(), 0);

        send_later(&f.sender, PlayerCommand::Resume);
        assert_eq!(f.controller.wait_while_paused(|_| {}).await, PauseExit::Resumed);
        assert_eq!(f.controller.state(), PlaybackState::Playing);

        let started = Instant::now();
        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Completed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.controller.resume_offset(), 0);
    }

    #[tokio::test]
    async fn test_offset_accumulates_across_pauses() {
        let mut f = fixture();
        let launches = f.dir.path().join("launches.log");
        let song = f.script(
            "song.sh",
            &format!(
                "echo \"launch $1\" >> {}\nif [ \"$1\" = \"2\" ]; then exit 0; fi\nsleep 10\n",
                launches.display()
            ),
        );
        f.controller.start();

        for expected in [1, 2] {
            let sender = f.sender.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1300)).await;
                sender.toggle_pause_play();
            });
            let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
            assert_eq!(outcome, PlayOutcome::Paused);
            assert_eq!(f.controller.resume_offset(), expected);

            f.sender.toggle_pause_play();
            assert_eq!(f.controller.wait_while_paused(|_| {}).await, PauseExit::Resumed);
        }

        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Completed);
        assert_eq!(f.controller.resume_offset(), 0);

        let lines: Vec<String> = std::fs::read_to_string(&launches)
            .unwrap()
            .lines()
            .map(|line| line.trim().to_string())
            .collect();
        assert_eq!(lines, vec!["launch", "launch 1", "launch 2"]);
    }

    #[tokio::test]
    async fn test_wait_for_command_between_songs() {
        let mut f = fixture();
        f.controller.start();
        let idle = Duration::from_millis(50);

        assert_eq!(f.controller.wait_for_command(idle, |_| {}).await, None);

        f.sender.request_status_display();
        let mut statuses = 0;
        assert_eq!(f.controller.wait_for_command(idle, |_| statuses += 1).await, None);
        assert_eq!(statuses, 1);

        f.sender.advance_to_next_song();
        assert_eq!(
            f.controller.wait_for_command(idle, |_| {}).await,
            Some(PlayOutcome::Skipped)
        );

        f.sender.request_terminate();
        assert_eq!(
            f.controller.wait_for_command(idle, |_| {}).await,
            Some(PlayOutcome::Terminated)
        );
        assert!(f.terminate.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_terminate_while_playing() {
        let mut f = fixture();
        let song = f.script("long.sh", "sleep 10\n");
        f.controller.start();
        send_later(&f.sender, PlayerCommand::Terminate);

        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Terminated);
        assert!(f.controller.is_terminating());
        assert!(f.terminate.load(Ordering::SeqCst));

        // Nothing is launched once terminating.
        let outcome = f.controller.play_song(&song, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Terminated);
    }

    #[tokio::test]
    async fn test_terminate_while_paused() {
        let mut f = fixture();
        let song = f.script("long.sh", "sleep 10\n");
        f.controller.start();
        f.sender.send(PlayerCommand::Pause);
        assert_eq!(
            f.controller.play_song(&song, |_| {}).await.unwrap(),
            PlayOutcome::Paused
        );

        f.sender.request_status_display();
        f.sender.request_terminate();
        let mut statuses = Vec::new();
        let exit = f.controller.wait_while_paused(|s| statuses.push(s)).await;
        assert_eq!(exit, PauseExit::Terminated);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, PlaybackState::Paused);
    }

    #[tokio::test]
    async fn test_pending_skip_applies_before_launch() {
        let mut f = fixture();
        let fail = f.script("fail.sh", "exit 3\n");
        f.controller.start();
        f.sender.advance_to_next_song();

        let outcome = f.controller.play_song(&fail, |_| {}).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Skipped);
        assert_eq!(f.controller.successive_failures(), 0);
    }

    #[tokio::test]
    async fn test_status_requests_reach_callback() {
        let mut f = fixture();
        let ok = f.script("ok.sh", "exit 0\n");
        f.controller.start();
        f.sender.request_status_display();

        let mut calls = 0;
        let outcome = f.controller.play_song(&ok, |_| calls += 1).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Completed);
        assert_eq!(calls, 1);
    }
}
