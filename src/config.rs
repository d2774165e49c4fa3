//! Configuration loading and types for the jukebox.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: object storage, metadata persistence, the play cache, the
//! external player, logging and metrics.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::playback::player::{AUDIO_FILE_PLACEHOLDER, START_OFFSET_PLACEHOLDER};
use crate::storage::mirror::WritePolicy;

/// Name of the PID file written while a play loop is running.
pub const PID_FILE_NAME: &str = "jukebox.pid";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Import directories and play cache settings.
    #[serde(default)]
    pub jukebox: JukeboxConfig,

    /// External audio player launch settings.
    #[serde(default)]
    pub player: PlayerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (Prometheus metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, `s3` or `mirror`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Prefix prepended to every container name on the remote side.
    #[serde(default)]
    pub container_prefix: String,

    /// Local filesystem storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Memory storage configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,

    /// AWS S3 configuration.
    #[serde(default)]
    pub s3: Option<S3Config>,

    /// Mirror configuration; names the two wrapped backends.
    #[serde(default)]
    pub mirror: Option<MirrorConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            container_prefix: String::new(),
            local: LocalStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
            s3: None,
            mirror: None,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory holding one subdirectory per container.
    #[serde(default = "default_storage_root")]
    pub root_dir: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Memory storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// AWS S3 configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

/// Mirror backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Backend type of the primary side (`local`, `memory` or `s3`).
    pub primary: String,
    /// Backend type of the secondary side.
    pub secondary: String,
    /// Apply writes to both sides concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// How many sides must succeed for a write to count.
    #[serde(default)]
    pub write_policy: WritePolicy,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataConfig {
    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Directories and play cache behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct JukeboxConfig {
    /// Directory scanned by `import-songs`.
    #[serde(default = "default_song_import_dir")]
    pub song_import_dir: PathBuf,

    /// Directory scanned by `import-playlists`.
    #[serde(default = "default_playlist_import_dir")]
    pub playlist_import_dir: PathBuf,

    /// Local "now playing" cache directory.
    #[serde(default = "default_song_play_dir")]
    pub song_play_dir: PathBuf,

    /// File receiving one line per playback failure.
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,

    /// Number of upcoming songs kept in the play cache.
    #[serde(default = "default_file_cache_count")]
    pub file_cache_count: usize,

    /// Verify the md5 of each downloaded song against its record.
    #[serde(default)]
    pub check_integrity: bool,

    /// Start over from the beginning after the last song.
    #[serde(default = "default_true")]
    pub repeat: bool,

    /// Log extra diagnostics (prefetch throughput, player command lines).
    #[serde(default)]
    pub debug_print: bool,
}

impl JukeboxConfig {
    /// PID file location: next to the play directory.
    pub fn pid_file_path(&self) -> PathBuf {
        match self.song_play_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(PID_FILE_NAME),
            _ => PathBuf::from(PID_FILE_NAME),
        }
    }
}

impl Default for JukeboxConfig {
    fn default() -> Self {
        Self {
            song_import_dir: default_song_import_dir(),
            playlist_import_dir: default_playlist_import_dir(),
            song_play_dir: default_song_play_dir(),
            error_log: default_error_log(),
            file_cache_count: default_file_cache_count(),
            check_integrity: false,
            repeat: true,
            debug_print: false,
        }
    }
}

/// External player launch configuration.
///
/// `command_args` and `resume_args` are whitespace-separated argument
/// templates; placeholders are substituted per argument.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
pub struct PlayerConfig {
    /// Player executable.
    #[serde(default = "default_player_exe")]
    #[garde(length(min = 1))]
    pub exe: String,

    /// Arguments for a fresh start; must contain `%%AUDIO_FILE_PATH%%`.
    #[serde(default = "default_command_args")]
    #[garde(custom(has_audio_placeholder))]
    pub command_args: String,

    /// Arguments for resuming at an offset; when set, must contain both
    /// `%%START_SONG_TIME_OFFSET%%` and `%%AUDIO_FILE_PATH%%`.
    #[serde(default)]
    #[garde(custom(has_resume_placeholders))]
    pub resume_args: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            exe: default_player_exe(),
            command_args: default_command_args(),
            resume_args: None,
        }
    }
}

fn has_audio_placeholder(value: &str, _ctx: &()) -> garde::Result {
    if value.contains(AUDIO_FILE_PLACEHOLDER) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "must contain {AUDIO_FILE_PLACEHOLDER}"
        )))
    }
}

fn has_resume_placeholders(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value {
        None => Ok(()),
        Some(args) if args.contains(START_OFFSET_PLACEHOLDER) => has_audio_placeholder(args, &()),
        Some(_) => Err(garde::Error::new(format!(
            "must contain {START_OFFSET_PLACEHOLDER}"
        ))),
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder and its scrape listener.
    #[serde(default)]
    pub metrics: bool,

    /// Scrape listener address.
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: false,
            listen: default_metrics_listen(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/jukebox_db.sqlite3")
}

fn default_song_import_dir() -> PathBuf {
    PathBuf::from("./song-import")
}

fn default_playlist_import_dir() -> PathBuf {
    PathBuf::from("./playlist-import")
}

fn default_song_play_dir() -> PathBuf {
    PathBuf::from("./song-play")
}

fn default_error_log() -> PathBuf {
    PathBuf::from("./jukebox_errors.log")
}

fn default_file_cache_count() -> usize {
    3
}

fn default_player_exe() -> String {
    "/usr/bin/mpv".to_string()
}

fn default_command_args() -> String {
    AUDIO_FILE_PLACEHOLDER.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9187".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.jukebox.file_cache_count, 3);
        assert!(config.jukebox.repeat);
        assert!(!config.jukebox.check_integrity);
        assert_eq!(
            config.metadata.sqlite.path,
            PathBuf::from("./data/jukebox_db.sqlite3")
        );
        assert_eq!(config.logging.format, "text");
        assert!(!config.observability.metrics);
    }

    #[test]
    fn test_mirror_section() {
        let yaml = r#"
storage:
  backend: mirror
  container_prefix: "acme-"
  s3:
    bucket: music
  mirror:
    primary: local
    secondary: s3
    parallel: true
    write_policy: both
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let mirror = config.storage.mirror.unwrap();
        assert_eq!(mirror.primary, "local");
        assert!(mirror.parallel);
        assert_eq!(mirror.write_policy, WritePolicy::Both);
        let s3 = config.storage.s3.unwrap();
        assert_eq!(s3.bucket, "music");
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(config.storage.container_prefix, "acme-");
    }

    #[test]
    fn test_negative_cache_count_rejected() {
        let yaml = "jukebox:\n  file_cache_count: -1\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_pid_file_next_to_play_dir() {
        let mut jukebox = JukeboxConfig::default();
        jukebox.song_play_dir = PathBuf::from("/var/jukebox/song-play");
        assert_eq!(
            jukebox.pid_file_path(),
            PathBuf::from("/var/jukebox/jukebox.pid")
        );
        jukebox.song_play_dir = PathBuf::from("song-play");
        assert_eq!(jukebox.pid_file_path(), PathBuf::from("jukebox.pid"));
    }

    #[test]
    fn test_player_config_validation() {
        assert!(PlayerConfig::default().validate().is_ok());

        let missing_path = PlayerConfig {
            command_args: "--no-video".to_string(),
            ..PlayerConfig::default()
        };
        assert!(missing_path.validate().is_err());

        let empty_exe = PlayerConfig {
            exe: String::new(),
            ..PlayerConfig::default()
        };
        assert!(empty_exe.validate().is_err());

        let resume_without_offset = PlayerConfig {
            resume_args: Some("%%AUDIO_FILE_PATH%%".to_string()),
            ..PlayerConfig::default()
        };
        assert!(resume_without_offset.validate().is_err());

        let resume_ok = PlayerConfig {
            resume_args: Some(
                "--start=%%START_SONG_TIME_OFFSET%% %%AUDIO_FILE_PATH%%".to_string(),
            ),
            ..PlayerConfig::default()
        };
        assert!(resume_ok.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jukebox.yaml");
        std::fs::write(
            &path,
            "player:\n  exe: /bin/sh\n  command_args: \"%%AUDIO_FILE_PATH%%\"\njukebox:\n  repeat: false\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.player.exe, "/bin/sh");
        assert!(!config.jukebox.repeat);
        assert!(load_config(dir.path().join("missing.yaml")).is_err());
    }
}
