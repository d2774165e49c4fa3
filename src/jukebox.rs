//! The jukebox orchestrator.
//!
//! [`Jukebox`] ties a [`StorageBackend`] and a [`MetadataStore`] together.
//! It imports songs and playlists, deletes them again, and runs the play
//! loop, which keeps the [`PrefetchCache`] topped up while the
//! [`PlaybackController`] plays the cached files in order.

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::checksum::md5_file;
use crate::config::Config;
use crate::errors::JukeboxError;
use crate::metadata::sqlite::SqliteMetadataStore;
use crate::metadata::store::{MetadataStore, PlaylistRecord, SongRecord};
use crate::metrics::QUEUE_LENGTH;
use crate::naming::{
    album_uid, container_for_song, encode_value, is_supported_audio, parse_song_file_name,
    playlist_object_name, song_uid, SongName, ALBUM_ART_CONTAINER, METADATA_CONTAINER,
    NAME_SEPARATOR, PLAYLIST_CONTAINER, SONG_CONTAINER_SUFFIX, SUPPORTED_EXTENSIONS,
};
use crate::playback::command::CommandReceiver;
use crate::playback::controller::{ControllerStatus, PauseExit, PlayOutcome, PlaybackController};
use crate::playback::error_log::ErrorLog;
use crate::playback::player::format_offset;
use crate::playback::prefetch::PrefetchCache;
use crate::playback::queue::PlaybackQueue;
use crate::storage::backend::StorageBackend;
use crate::storage::build_backend;
use crate::storage::properties::{PropertySet, PropertyValue};

/// How often the play loop re-checks the cache while a batch downloads.
const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counts from an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Files whose stored record already matched.
    pub unchanged: usize,
    pub failed: usize,
}

impl ImportReport {
    pub fn attempted(&self) -> usize {
        self.imported + self.unchanged + self.failed
    }

    /// `Err(PartialFailure)` when any file failed.
    pub fn into_result(self, operation: &str) -> Result<Self, JukeboxError> {
        if self.failed > 0 {
            return Err(JukeboxError::PartialFailure {
                operation: operation.to_string(),
                attempted: self.attempted(),
                failed: self.failed,
            });
        }
        Ok(self)
    }
}

/// Outcome of [`Jukebox::init_storage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub created: usize,
    pub existing: usize,
    /// Containers the backend failed to create.
    pub failed: Vec<String>,
}

impl InitReport {
    pub fn into_result(self) -> Result<Self, JukeboxError> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        Err(JukeboxError::PartialFailure {
            operation: "init-storage".to_string(),
            attempted: self.created + self.existing + self.failed.len(),
            failed: self.failed.len(),
        })
    }
}

/// Counts from a multi-song delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub attempted: usize,
    pub failed: usize,
}

impl DeleteReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn into_result(self, operation: &str) -> Result<Self, JukeboxError> {
        if self.all_succeeded() {
            Ok(self)
        } else {
            Err(JukeboxError::PartialFailure {
                operation: operation.to_string(),
                attempted: self.attempted,
                failed: self.failed,
            })
        }
    }
}

/// A playlist document as stored in the playlist container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistDocument {
    pub name: String,
    #[serde(default)]
    pub songs: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub artist: String,
    pub album: String,
    pub song: String,
}

impl PlaylistEntry {
    /// `file_uid` without its extension.
    fn uid_stem(&self) -> String {
        format!(
            "{}{NAME_SEPARATOR}{}{NAME_SEPARATOR}{}",
            encode_value(&self.artist),
            encode_value(&self.album),
            encode_value(&self.song)
        )
    }
}

/// Headers uploaded with each song object.
fn song_headers(song: &SongRecord) -> PropertySet {
    let mut headers = PropertySet::new();
    headers.add("artist", PropertyValue::String(song.artist_name.clone()));
    headers.add("album", PropertyValue::String(song.album_name.clone()));
    headers.add("song", PropertyValue::String(song.song_name.clone()));
    headers.add("size", PropertyValue::ULong(song.origin_file_size));
    headers.add("hash", PropertyValue::String(song.md5_hash.clone()));
    headers
}

/// Regular files in `dir` accepted by `filter`, sorted by path.
fn scan_dir(dir: &Path, filter: impl Fn(&Path) -> bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("unable to read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && filter(path))
        .collect();
    paths.sort();
    Ok(paths)
}

fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn log_status(
    song: &SongRecord,
    queue: &PlaybackQueue,
    window: &[String],
    status: ControllerStatus,
) {
    info!(
        "status: {:?} '{}' by {} ({}/{}), offset {}, failures {}, prefetching {:?}",
        status.state,
        song.song_name,
        song.artist_name,
        queue.current_index() + 1,
        queue.len(),
        format_offset(status.resume_offset),
        status.successive_failures,
        window
    );
}

fn remove_cached(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("unable to remove cached {}: {e}", path.display());
    }
}

/// PID file present for the lifetime of a play loop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("unable to write {}", path.display()))?;
        Ok(Self { path })
    }

    fn remove(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("unable to remove PID file {}: {e}", self.path.display());
        }
    }
}

pub struct Jukebox {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    metadata: Arc<dyn MetadataStore>,
}

impl Jukebox {
    /// Build the configured storage backend and SQLite store, then open a
    /// storage session.
    pub async fn open(config: Config) -> Result<Self, JukeboxError> {
        let storage = build_backend(&config.storage).await?;

        let db_path = &config.metadata.sqlite.path;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("unable to create {}", parent.display()))?;
            }
        }
        let metadata = SqliteMetadataStore::new(db_path)?;
        info!("SQLite metadata store initialized at {}", db_path.display());

        let jukebox = Self::with_parts(config, storage, Arc::new(metadata));
        jukebox.enter().await?;
        Ok(jukebox)
    }

    /// Assemble a jukebox from already-built parts. No session is opened.
    pub fn with_parts(
        config: Config,
        storage: Arc<dyn StorageBackend>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            storage,
            metadata,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Open a storage session.
    pub async fn enter(&self) -> Result<(), JukeboxError> {
        let backend = self.storage.backend_name().to_string();
        match self.storage.enter().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(JukeboxError::StorageUnavailable { backend }),
            Err(e) => {
                error!("{backend} storage session failed: {e:#}");
                Err(JukeboxError::StorageUnavailable { backend })
            }
        }
    }

    /// Close the storage session.
    pub async fn close(&self) {
        if let Err(e) = self.storage.exit().await {
            warn!("error closing {} storage: {e:#}", self.storage.backend_name());
        }
    }

    // ── Containers ──────────────────────────────────────────────────

    /// Create every container the jukebox uses. A container the backend
    /// fails to create is logged and counted; the rest are still tried.
    pub async fn init_storage(&self) -> Result<InitReport, JukeboxError> {
        let mut containers: Vec<String> = ('a'..='z')
            .chain('0'..='9')
            .map(|c| format!("{c}{SONG_CONTAINER_SUFFIX}"))
            .collect();
        containers.extend(
            [PLAYLIST_CONTAINER, ALBUM_ART_CONTAINER, METADATA_CONTAINER]
                .iter()
                .map(|c| c.to_string()),
        );

        let mut report = InitReport::default();
        for container in containers {
            match self.storage.create_container(&container).await {
                Ok(true) => {
                    debug!("created container {container}");
                    report.created += 1;
                }
                Ok(false) => report.existing += 1,
                Err(e) => {
                    warn!("unable to create container {container}: {e:#}");
                    report.failed.push(container);
                }
            }
        }
        info!(
            "containers: {} created, {} existing, {} failed",
            report.created,
            report.existing,
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn list_containers(&self) -> Result<Vec<String>, JukeboxError> {
        Ok(self.storage.list_account_containers().await?)
    }

    // ── Import ──────────────────────────────────────────────────────

    /// Upload every supported audio file in the song import directory.
    pub async fn import_songs(&self) -> Result<ImportReport, JukeboxError> {
        let dir = &self.config.jukebox.song_import_dir;
        let mut report = ImportReport::default();
        for path in scan_dir(dir, is_supported_audio)? {
            let Some((file_name, name)) =
                file_name_of(&path).and_then(|f| parse_song_file_name(f).map(|n| (f, n)))
            else {
                warn!(
                    "skipping {}: expected Artist--Album--Song file name",
                    path.display()
                );
                report.failed += 1;
                continue;
            };
            match self.import_song(&path, file_name, &name).await {
                Ok(true) => {
                    info!("imported {file_name}");
                    report.imported += 1;
                }
                Ok(false) => {
                    debug!("{file_name} unchanged");
                    report.unchanged += 1;
                }
                Err(e) => {
                    error!("import of {file_name} failed: {e:#}");
                    report.failed += 1;
                }
            }
        }
        info!(
            "song import: {} imported, {} unchanged, {} failed",
            report.imported, report.unchanged, report.failed
        );
        Ok(report)
    }

    /// Returns `Ok(false)` when the stored record already matches.
    async fn import_song(
        &self,
        path: &Path,
        file_name: &str,
        name: &SongName,
    ) -> anyhow::Result<bool> {
        let size = std::fs::metadata(path)?.len();
        let file_uid = song_uid(file_name);
        let container_name = container_for_song(&file_uid, SONG_CONTAINER_SUFFIX)
            .with_context(|| format!("no song container for {file_uid}"))?;
        let record = SongRecord {
            object_name: file_uid.clone(),
            file_uid,
            artist_name: name.artist.clone(),
            album_name: name.album.clone(),
            song_name: name.song.clone(),
            origin_file_size: size,
            stored_file_size: size,
            pad_char_count: 0,
            md5_hash: md5_file(path)?,
            compressed: false,
            encrypted: false,
            container_name,
            album_uid: Some(album_uid(&name.artist, &name.album)),
        };

        if self.metadata.retrieve_song(&record.file_uid).await?.as_ref() == Some(&record) {
            return Ok(false);
        }

        self.storage.create_container(&record.container_name).await?;
        let headers = song_headers(&record);
        let uploaded = self
            .storage
            .put_object_from_file(&record.container_name, &record.object_name, path, Some(&headers))
            .await?;
        if !uploaded {
            anyhow::bail!("upload to {} refused", record.container_name);
        }

        let stored = match self.metadata.store_song_metadata(&record).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("metadata write for {file_name} failed: {e:#}");
                false
            }
        };
        if !stored {
            // Leave no unreferenced object behind.
            match self
                .storage
                .delete_object(&record.container_name, &record.object_name)
                .await
            {
                Ok(_) => {}
                Err(e) => warn!("unable to remove orphaned {file_name}: {e:#}"),
            }
            anyhow::bail!("metadata for {file_name} not stored");
        }
        Ok(true)
    }

    /// Upload every `*.json` playlist in the playlist import directory and
    /// register it by the name inside the document.
    pub async fn import_playlists(&self) -> Result<ImportReport, JukeboxError> {
        let dir = &self.config.jukebox.playlist_import_dir;
        let is_json = |path: &Path| path.extension().is_some_and(|ext| ext == "json");
        let mut report = ImportReport::default();
        for path in scan_dir(dir, is_json)? {
            match self.import_playlist(&path).await {
                Ok(name) => {
                    info!("imported playlist '{name}'");
                    report.imported += 1;
                }
                Err(e) => {
                    error!("import of {} failed: {e:#}", path.display());
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn import_playlist(&self, path: &Path) -> anyhow::Result<String> {
        let contents = std::fs::read(path)?;
        let document: PlaylistDocument = serde_json::from_slice(&contents)
            .with_context(|| format!("{} is not a playlist document", path.display()))?;
        let object_name = playlist_object_name(&document.name);

        self.storage.create_container(PLAYLIST_CONTAINER).await?;
        if !self
            .storage
            .put_object(PLAYLIST_CONTAINER, &object_name, Bytes::from(contents), None)
            .await?
        {
            anyhow::bail!("upload of {object_name} refused");
        }
        let record = PlaylistRecord {
            name: document.name.clone(),
            object_name,
        };
        if !self.metadata.store_playlist(&record).await? {
            anyhow::bail!("playlist '{}' not registered", document.name);
        }
        Ok(document.name)
    }

    // ── Playlists ───────────────────────────────────────────────────

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistRecord>, JukeboxError> {
        Ok(self.metadata.get_playlists().await?)
    }

    /// Download and parse the named playlist.
    pub async fn show_playlist(&self, name: &str) -> Result<PlaylistDocument, JukeboxError> {
        let not_found = || JukeboxError::PlaylistNotFound {
            name: name.to_string(),
        };
        let record = self.metadata.get_playlist(name).await?.ok_or_else(not_found)?;

        let scratch = std::env::temp_dir().join(format!("jukebox-{}.json", uuid::Uuid::new_v4()));
        let fetched = self
            .storage
            .get_object(PLAYLIST_CONTAINER, &record.object_name, &scratch)
            .await;
        let contents = match fetched {
            Ok(0) => return Err(not_found()),
            Ok(_) => std::fs::read(&scratch).context("unable to read downloaded playlist"),
            Err(e) => Err(e),
        };
        let _ = std::fs::remove_file(&scratch);
        let document = serde_json::from_slice(&contents?)
            .with_context(|| format!("playlist '{name}' is not valid JSON"))?;
        Ok(document)
    }

    /// Remove the playlist object and its registry entry.
    pub async fn delete_playlist(&self, name: &str) -> Result<bool, JukeboxError> {
        let record =
            self.metadata
                .get_playlist(name)
                .await?
                .ok_or_else(|| JukeboxError::PlaylistNotFound {
                    name: name.to_string(),
                })?;
        let object_deleted = self
            .storage
            .delete_object(PLAYLIST_CONTAINER, &record.object_name)
            .await
            .unwrap_or_else(|e| {
                warn!("unable to delete playlist object {}: {e:#}", record.object_name);
                false
            });
        let entry_deleted = self.metadata.delete_playlist(name).await?;
        Ok(object_deleted && entry_deleted)
    }

    // ── Listing ─────────────────────────────────────────────────────

    pub async fn list_songs(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
    ) -> Result<Vec<SongRecord>, JukeboxError> {
        Ok(self.metadata.retrieve_songs(artist, album).await?)
    }

    pub async fn list_artists(&self) -> Result<Vec<String>, JukeboxError> {
        Ok(self.metadata.get_artists().await?)
    }

    pub async fn list_albums(&self) -> Result<Vec<(String, String)>, JukeboxError> {
        Ok(self.metadata.get_albums().await?)
    }

    // ── Delete ──────────────────────────────────────────────────────

    /// Delete one song's object and its metadata row. Returns whether
    /// both went away.
    pub async fn delete_song(&self, file_uid: &str) -> Result<bool, JukeboxError> {
        let song = self
            .metadata
            .retrieve_song(file_uid)
            .await?
            .ok_or_else(|| JukeboxError::SongNotFound {
                uid: file_uid.to_string(),
            })?;
        Ok(self.remove_song(&song).await)
    }

    pub async fn delete_album(&self, artist: &str, album: &str) -> Result<DeleteReport, JukeboxError> {
        let songs = self.metadata.retrieve_songs(Some(artist), Some(album)).await?;
        Ok(self.remove_songs(&songs).await)
    }

    pub async fn delete_artist(&self, artist: &str) -> Result<DeleteReport, JukeboxError> {
        let songs = self.metadata.songs_for_artist(artist).await?;
        Ok(self.remove_songs(&songs).await)
    }

    async fn remove_songs(&self, songs: &[SongRecord]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for song in songs {
            report.attempted += 1;
            if !self.remove_song(song).await {
                report.failed += 1;
            }
        }
        report
    }

    async fn remove_song(&self, song: &SongRecord) -> bool {
        let object_deleted = match self
            .storage
            .delete_object(&song.container_name, &song.object_name)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("unable to delete object for {}: {e:#}", song.file_uid);
                false
            }
        };
        let row_deleted = match self.metadata.delete_song(&song.file_uid).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("unable to delete metadata for {}: {e:#}", song.file_uid);
                false
            }
        };
        if object_deleted && row_deleted {
            info!("deleted {}", song.file_uid);
        } else {
            warn!(
                "partial delete of {} (object: {object_deleted}, metadata: {row_deleted})",
                song.file_uid
            );
        }
        object_deleted && row_deleted
    }

    // ── Metadata backup ─────────────────────────────────────────────

    /// Copy the SQLite database file into the metadata container.
    pub async fn upload_metadata_db(&self) -> Result<bool, JukeboxError> {
        let path = &self.config.metadata.sqlite.path;
        let object = file_name_of(path).ok_or_else(|| JukeboxError::InvalidConfig {
            message: format!("metadata path {} has no file name", path.display()),
        })?;
        self.storage.create_container(METADATA_CONTAINER).await?;
        let uploaded = self
            .storage
            .put_object_from_file(METADATA_CONTAINER, object, path, None)
            .await?;
        if uploaded {
            info!("uploaded {} to {METADATA_CONTAINER}", path.display());
        }
        Ok(uploaded)
    }

    // ── Playback ────────────────────────────────────────────────────

    /// Play every song, optionally filtered by artist and album.
    pub async fn play_songs(
        &self,
        shuffle: bool,
        artist: Option<&str>,
        album: Option<&str>,
        commands: CommandReceiver,
    ) -> Result<(), JukeboxError> {
        let songs = self.metadata.retrieve_songs(artist, album).await?;
        let queue = PlaybackQueue::new(songs, shuffle, self.config.jukebox.repeat);
        self.play_queue(queue, commands).await
    }

    /// Play an album in track order.
    pub async fn play_album(
        &self,
        artist: &str,
        album: &str,
        commands: CommandReceiver,
    ) -> Result<(), JukeboxError> {
        self.play_songs(false, Some(artist), Some(album), commands).await
    }

    /// Play the named playlist. Entries that match no stored song are
    /// skipped.
    pub async fn play_playlist(
        &self,
        name: &str,
        commands: CommandReceiver,
    ) -> Result<(), JukeboxError> {
        let document = self.show_playlist(name).await?;
        let mut songs = Vec::with_capacity(document.songs.len());
        for entry in &document.songs {
            match self.resolve_entry(entry).await? {
                Some(song) => songs.push(song),
                None => warn!(
                    "playlist '{name}': no song '{}' by {} on '{}'",
                    entry.song, entry.artist, entry.album
                ),
            }
        }
        let queue = PlaybackQueue::new(songs, false, self.config.jukebox.repeat);
        self.play_queue(queue, commands).await
    }

    async fn resolve_entry(&self, entry: &PlaylistEntry) -> anyhow::Result<Option<SongRecord>> {
        let stem = entry.uid_stem();
        for ext in SUPPORTED_EXTENSIONS {
            if let Some(song) = self.metadata.retrieve_song(&format!("{stem}.{ext}")).await? {
                return Ok(Some(song));
            }
        }
        Ok(None)
    }

    /// Run the play loop over `queue` until it ends, a terminate command
    /// arrives, or the player keeps failing.
    pub async fn play_queue(
        &self,
        mut queue: PlaybackQueue,
        commands: CommandReceiver,
    ) -> Result<(), JukeboxError> {
        if queue.is_empty() {
            return Err(JukeboxError::NothingToPlay);
        }
        let jukebox = &self.config.jukebox;
        std::fs::create_dir_all(&jukebox.song_play_dir).with_context(|| {
            format!("unable to create {}", jukebox.song_play_dir.display())
        })?;

        let terminate = Arc::new(AtomicBool::new(false));
        let error_log = ErrorLog::new(&jukebox.error_log);
        let mut controller = PlaybackController::new(
            self.config.player.clone(),
            commands,
            Arc::clone(&terminate),
            error_log.clone(),
        )?;
        let mut prefetch = PrefetchCache::new(
            Arc::clone(&self.storage),
            &jukebox.song_play_dir,
            jukebox.file_cache_count,
            jukebox.check_integrity,
            terminate,
        );

        let pid_file = PidFile::create(jukebox.pid_file_path())?;
        metrics::gauge!(QUEUE_LENGTH).set(queue.len() as f64);
        info!("playing {} songs", queue.len());

        controller.start();
        let result = self
            .run_play_loop(&mut queue, &mut controller, &mut prefetch, &error_log)
            .await;

        controller.request_terminate();
        if let Some(report) = prefetch.wait_for_batch().await {
            debug!("final prefetch batch: {report:?}");
        }
        pid_file.remove();
        metrics::gauge!(QUEUE_LENGTH).set(0.0);
        result
    }

    /// Wait for the prefetch batch to deliver `song` while still serving
    /// commands. Returns the outcome of a command that ended the wait, or
    /// `None` once the file is cached or no batch will bring it.
    async fn wait_for_download(
        song: &SongRecord,
        path: &Path,
        queue: &PlaybackQueue,
        controller: &mut PlaybackController,
        prefetch: &mut PrefetchCache,
    ) -> Option<PlayOutcome> {
        loop {
            prefetch.cleanup().await;
            if path.is_file() || !prefetch.window().contains(&song.file_uid) {
                return None;
            }
            let window = prefetch.window();
            let outcome = controller
                .wait_for_command(DOWNLOAD_POLL_INTERVAL, |status| {
                    log_status(song, queue, window, status)
                })
                .await;
            if outcome.is_some() {
                return outcome;
            }
        }
    }

    async fn run_play_loop(
        &self,
        queue: &mut PlaybackQueue,
        controller: &mut PlaybackController,
        prefetch: &mut PrefetchCache,
        error_log: &ErrorLog,
    ) -> Result<(), JukeboxError> {
        let mut missing_in_row = 0usize;
        loop {
            if controller.is_terminating() {
                return Ok(());
            }
            if let Some(report) = prefetch.cleanup().await {
                if self.config.jukebox.debug_print {
                    debug!("prefetch batch finished: {report:?}");
                }
            }
            prefetch.refill(queue);

            let Some(song) = queue.current().cloned() else {
                return Ok(());
            };
            let path = prefetch.cache_path(&song.file_uid);

            let interrupted = if path.is_file() {
                None
            } else {
                Self::wait_for_download(&song, &path, queue, controller, prefetch).await
            };
            let outcome = match interrupted {
                Some(outcome) => outcome,
                None => {
                    if !path.is_file() {
                        prefetch.fetch_now(&song).await;
                    }
                    if !path.is_file() {
                        error_log.record(&format!("song file not available: {}", song.file_uid));
                        missing_in_row += 1;
                        if missing_in_row >= queue.len() {
                            return Err(JukeboxError::NothingToPlay);
                        }
                        if !queue.advance() {
                            return Ok(());
                        }
                        continue;
                    }
                    missing_in_row = 0;

                    info!(
                        "playing '{}' by {} ({}/{})",
                        song.song_name,
                        song.artist_name,
                        queue.current_index() + 1,
                        queue.len()
                    );
                    let (queue_view, window) = (&*queue, prefetch.window());
                    controller
                        .play_song(&path, |status| log_status(&song, queue_view, window, status))
                        .await?
                }
            };

            match outcome {
                PlayOutcome::Completed | PlayOutcome::Skipped => remove_cached(&path),
                PlayOutcome::Failed => {}
                PlayOutcome::Terminated => return Ok(()),
                PlayOutcome::Paused => {
                    let exit = {
                        let (queue_view, window) = (&*queue, prefetch.window());
                        controller
                            .wait_while_paused(|status| {
                                log_status(&song, queue_view, window, status)
                            })
                            .await
                    };
                    match exit {
                        PauseExit::Resumed => continue,
                        PauseExit::Skipped => remove_cached(&path),
                        PauseExit::Terminated => return Ok(()),
                    }
                }
            }

            if !queue.advance() {
                info!("end of queue");
                return Ok(());
            }
        }
    }
}
