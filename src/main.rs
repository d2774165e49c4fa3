//! cloud-jukebox -- play music stored in a remote object store.
//!
//! Every subcommand opens the configured storage backend and metadata
//! store, does its work, and closes the storage session again.  During
//! playback, OS signals are forwarded to the player as commands.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use cloudjukebox::config::{load_config, Config};
use cloudjukebox::jukebox::Jukebox;
use cloudjukebox::playback::command::{command_channel, CommandSender};
use cloudjukebox::JukeboxError;

const DEFAULT_CONFIG: &str = "jukebox.yaml";

/// Command-line arguments for the jukebox.
#[derive(Parser, Debug)]
#[command(
    name = "cloud-jukebox",
    version,
    about = "Music jukebox backed by remote object storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Log at debug level.
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the song, playlist, album-art and metadata containers.
    InitStorage,
    /// Upload songs from the song import directory.
    ImportSongs,
    /// Upload playlists from the playlist import directory.
    ImportPlaylists,
    /// Play songs in order.
    Play {
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        album: Option<String>,
    },
    /// Play songs in random order.
    ShufflePlay {
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        album: Option<String>,
    },
    PlayAlbum { artist: String, album: String },
    PlayPlaylist { name: String },
    ListSongs {
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        album: Option<String>,
    },
    ListArtists,
    ListAlbums,
    ListContainers,
    ListPlaylists,
    ShowPlaylist { name: String },
    DeleteSong { uid: String },
    DeleteAlbum { artist: String, album: String },
    DeleteArtist { artist: String },
    DeletePlaylist { name: String },
    /// Copy the metadata database into the metadata container.
    UploadMetadataDb,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match read_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config, cli.debug);
    info!("Configuration loaded from {}", cli.config);

    if config.observability.metrics {
        match cloudjukebox::metrics::init_metrics(&config.observability.listen) {
            Ok(addr) => info!("Prometheus metrics listening on {addr}"),
            Err(e) => warn!("metrics disabled: {e:#}"),
        }
    }

    let jukebox = match Jukebox::open(config).await {
        Ok(jukebox) => jukebox,
        Err(e) => {
            error!(code = e.code(), "{e}");
            return ExitCode::FAILURE;
        }
    };
    let result = run(&jukebox, cli.command).await;
    jukebox.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), "{e}");
            ExitCode::FAILURE
        }
    }
}

/// Load the configuration file. A missing default file means defaults.
fn read_config(path: &str) -> Result<Config, JukeboxError> {
    if path == DEFAULT_CONFIG && !Path::new(path).exists() {
        return Ok(Config::default());
    }
    load_config(path).map_err(|e| JukeboxError::InvalidConfig {
        message: format!("{path}: {e:#}"),
    })
}

fn init_logging(config: &Config, debug: bool) {
    let level = if debug || config.jukebox.debug_print {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(jukebox: &Jukebox, command: Command) -> Result<(), JukeboxError> {
    match command {
        Command::InitStorage => {
            jukebox.init_storage().await?.into_result()?;
        }
        Command::ImportSongs => {
            jukebox.import_songs().await?.into_result("import-songs")?;
        }
        Command::ImportPlaylists => {
            jukebox
                .import_playlists()
                .await?
                .into_result("import-playlists")?;
        }
        Command::Play { artist, album } => {
            play(|commands| {
                jukebox.play_songs(false, artist.as_deref(), album.as_deref(), commands)
            })
            .await?;
        }
        Command::ShufflePlay { artist, album } => {
            play(|commands| {
                jukebox.play_songs(true, artist.as_deref(), album.as_deref(), commands)
            })
            .await?;
        }
        Command::PlayAlbum { artist, album } => {
            play(|commands| jukebox.play_album(&artist, &album, commands)).await?;
        }
        Command::PlayPlaylist { name } => {
            play(|commands| jukebox.play_playlist(&name, commands)).await?;
        }
        Command::ListSongs { artist, album } => {
            for song in jukebox
                .list_songs(artist.as_deref(), album.as_deref())
                .await?
            {
                println!("{}", song.file_uid);
            }
        }
        Command::ListArtists => {
            for artist in jukebox.list_artists().await? {
                println!("{artist}");
            }
        }
        Command::ListAlbums => {
            for (artist, album) in jukebox.list_albums().await? {
                println!("{album} ({artist})");
            }
        }
        Command::ListContainers => {
            for container in jukebox.list_containers().await? {
                println!("{container}");
            }
        }
        Command::ListPlaylists => {
            for playlist in jukebox.list_playlists().await? {
                println!("{}", playlist.name);
            }
        }
        Command::ShowPlaylist { name } => {
            let playlist = jukebox.show_playlist(&name).await?;
            println!("{}", playlist.name);
            for entry in playlist.songs {
                println!("  {} - {} ({})", entry.artist, entry.song, entry.album);
            }
        }
        Command::DeleteSong { uid } => {
            if !jukebox.delete_song(&uid).await? {
                return Err(JukeboxError::PartialFailure {
                    operation: format!("delete-song {uid}"),
                    attempted: 1,
                    failed: 1,
                });
            }
        }
        Command::DeleteAlbum { artist, album } => {
            let report = jukebox.delete_album(&artist, &album).await?;
            if report.attempted == 0 {
                warn!("no songs found for '{album}' by {artist}");
            }
            report.into_result("delete-album")?;
        }
        Command::DeleteArtist { artist } => {
            let report = jukebox.delete_artist(&artist).await?;
            if report.attempted == 0 {
                warn!("no songs found for {artist}");
            }
            report.into_result("delete-artist")?;
        }
        Command::DeletePlaylist { name } => {
            if !jukebox.delete_playlist(&name).await? {
                return Err(JukeboxError::PartialFailure {
                    operation: format!("delete-playlist {name}"),
                    attempted: 1,
                    failed: 1,
                });
            }
        }
        Command::UploadMetadataDb => {
            if !jukebox.upload_metadata_db().await? {
                return Err(JukeboxError::PartialFailure {
                    operation: "upload-metadata-db".to_string(),
                    attempted: 1,
                    failed: 1,
                });
            }
        }
    }
    Ok(())
}

/// Run a play loop with OS signals feeding its command channel.
async fn play<F, Fut>(start: F) -> Result<(), JukeboxError>
where
    F: FnOnce(cloudjukebox::playback::command::CommandReceiver) -> Fut,
    Fut: std::future::Future<Output = Result<(), JukeboxError>>,
{
    let (sender, commands) = command_channel();
    let signals = tokio::spawn(async move {
        if let Err(e) = forward_signals(sender).await {
            warn!("signal handling unavailable: {e}");
        }
    });
    let result = start(commands).await;
    signals.abort();
    result
}

/// SIGUSR1 toggles pause, SIGUSR2 skips, SIGINT/SIGTERM quit and SIGWINCH
/// shows the status.
#[cfg(unix)]
async fn forward_signals(sender: CommandSender) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut toggle = signal(SignalKind::user_defined1())?;
    let mut skip = signal(SignalKind::user_defined2())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut status = signal(SignalKind::window_change())?;

    loop {
        let delivered = tokio::select! {
            _ = toggle.recv() => sender.toggle_pause_play(),
            _ = skip.recv() => sender.advance_to_next_song(),
            _ = interrupt.recv() => {
                info!("Received SIGINT, stopping playback");
                sender.request_terminate()
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, stopping playback");
                sender.request_terminate()
            }
            _ = status.recv() => sender.request_status_display(),
        };
        if !delivered {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(sender: CommandSender) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, stopping playback");
    sender.request_terminate();
    Ok(())
}
