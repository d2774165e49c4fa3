//! External audio player launching.
//!
//! The player is an arbitrary executable.  Its arguments come from a
//! whitespace-separated template; each argument may contain
//! [`AUDIO_FILE_PLACEHOLDER`] and, for resumes, [`START_OFFSET_PLACEHOLDER`].

use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::config::PlayerConfig;

pub const AUDIO_FILE_PLACEHOLDER: &str = "%%AUDIO_FILE_PATH%%";
pub const START_OFFSET_PLACEHOLDER: &str = "%%START_SONG_TIME_OFFSET%%";

/// Format a resume offset: bare seconds below a minute, `M:SS` above.
pub fn format_offset(seconds: u64) -> String {
    if seconds < 60 {
        seconds.to_string()
    } else {
        format!("{}:{:02}", seconds / 60, seconds % 60)
    }
}

/// Resolve the player arguments for `audio_path`.
///
/// A resume offset uses `resume_args` when configured; without it the
/// song restarts from the beginning.
pub fn build_args(player: &PlayerConfig, audio_path: &Path, resume_offset: Option<u64>) -> Vec<String> {
    let audio = audio_path.to_string_lossy();
    let (template, offset) = match (resume_offset, player.resume_args.as_deref()) {
        (Some(secs), Some(resume)) => (resume, format_offset(secs)),
        _ => (player.command_args.as_str(), String::new()),
    };
    template
        .split_whitespace()
        .map(|token| {
            token
                .replace(AUDIO_FILE_PLACEHOLDER, &audio)
                .replace(START_OFFSET_PLACEHOLDER, &offset)
        })
        .collect()
}

/// Spawn the player. The process is killed if the handle is dropped.
pub fn launch(exe: &str, args: &[String]) -> std::io::Result<Child> {
    Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpv() -> PlayerConfig {
        PlayerConfig {
            exe: "/usr/bin/mpv".to_string(),
            command_args: "--no-video %%AUDIO_FILE_PATH%%".to_string(),
            resume_args: Some("--start=%%START_SONG_TIME_OFFSET%% %%AUDIO_FILE_PATH%%".to_string()),
        }
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0), "0");
        assert_eq!(format_offset(45), "45");
        assert_eq!(format_offset(59), "59");
        assert_eq!(format_offset(60), "1:00");
        assert_eq!(format_offset(125), "2:05");
        assert_eq!(format_offset(3725), "62:05");
    }

    #[test]
    fn test_build_args_plain() {
        let args = build_args(&mpv(), Path::new("/cache/My Song.flac"), None);
        assert_eq!(args, vec!["--no-video", "/cache/My Song.flac"]);
    }

    #[test]
    fn test_build_args_resume() {
        let args = build_args(&mpv(), Path::new("/cache/a.flac"), Some(125));
        assert_eq!(args, vec!["--start=2:05", "/cache/a.flac"]);
    }

    #[test]
    fn test_resume_without_template_restarts() {
        let player = PlayerConfig {
            resume_args: None,
            ..mpv()
        };
        let args = build_args(&player, Path::new("/cache/a.flac"), Some(30));
        assert_eq!(args, vec!["--no-video", "/cache/a.flac"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_reports_exit_status() {
        let mut ok = launch("/bin/sh", &["-c".to_string(), "exit 0".to_string()]).unwrap();
        assert!(ok.wait().await.unwrap().success());

        let mut failing = launch("/bin/sh", &["-c".to_string(), "exit 3".to_string()]).unwrap();
        assert_eq!(failing.wait().await.unwrap().code(), Some(3));

        assert!(launch("/nonexistent/player", &[]).is_err());
    }
}
