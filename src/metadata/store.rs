//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses `async_trait`-style methods (manual desugaring with pinned
//! futures) so the jukebox can hold it as `Arc<dyn MetadataStore>`.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

// ── Record types ───────────────────────────────────────────────────

/// Metadata record for one song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRecord {
    /// Unique id; also the object name and the play cache file name.
    pub file_uid: String,
    /// Artist display name.
    pub artist_name: String,
    /// Album display name.
    pub album_name: String,
    /// Song display name.
    pub song_name: String,
    /// Size of the file as imported.
    pub origin_file_size: u64,
    /// Size of the object as stored remotely.
    pub stored_file_size: u64,
    /// Bytes of block-cipher padding. Always 0 while encryption is off.
    pub pad_char_count: u64,
    /// Lowercase hex md5 of the stored bytes.
    pub md5_hash: String,
    pub compressed: bool,
    pub encrypted: bool,
    /// Container holding the object.
    pub container_name: String,
    /// Object name inside the container.
    pub object_name: String,
    /// Optional album identifier for album art lookups.
    pub album_uid: Option<String>,
}

/// Registry entry for an uploaded playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRecord {
    /// Display name.
    pub name: String,
    /// Object name inside the playlist container.
    pub object_name: String,
}

// ── MetadataStore trait ────────────────────────────────────────────

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    // ── Songs ───────────────────────────────────────────────────────

    /// Insert or replace a song record.
    fn store_song_metadata(
        &self,
        song: &SongRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Look up a song by `file_uid`.
    fn retrieve_song(
        &self,
        file_uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<SongRecord>>> + Send + '_>>;

    /// Delete a song. `Ok(false)` if it did not exist.
    fn delete_song(
        &self,
        file_uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Songs filtered by artist and/or album, ordered by `file_uid`.
    fn retrieve_songs(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SongRecord>>> + Send + '_>>;

    /// All songs by `artist`.
    fn songs_for_artist(
        &self,
        artist: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SongRecord>>> + Send + '_>> {
        self.retrieve_songs(Some(artist), None)
    }

    /// Distinct artist names, sorted.
    fn get_artists(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>>;

    /// Distinct `(artist, album)` pairs, sorted.
    fn get_albums(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<(String, String)>>> + Send + '_>>;

    /// Number of songs stored.
    fn song_count(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>>;

    // ── Playlists ───────────────────────────────────────────────────

    /// Insert or replace a playlist registry entry.
    fn store_playlist(
        &self,
        playlist: &PlaylistRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Look up a playlist by name.
    fn get_playlist(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<PlaylistRecord>>> + Send + '_>>;

    /// All registered playlists, sorted by name.
    fn get_playlists(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PlaylistRecord>>> + Send + '_>>;

    /// Remove a playlist entry. `Ok(false)` if it did not exist.
    fn delete_playlist(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}
