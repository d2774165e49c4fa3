//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{MetadataStore, PlaylistRecord, SongRecord};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const SONG_COLUMNS: &str = "file_uid, artist_name, album_name, song_name, origin_file_size,
     stored_file_size, pad_char_count, md5_hash, compressed, encrypted,
     container_name, object_name, album_uid";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("metadata connection mutex poisoned"))
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent, so it runs on every open.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            -- Songs
            CREATE TABLE IF NOT EXISTS songs (
                file_uid          TEXT PRIMARY KEY,
                artist_name       TEXT NOT NULL,
                album_name        TEXT NOT NULL,
                song_name         TEXT NOT NULL,
                origin_file_size  INTEGER NOT NULL,
                stored_file_size  INTEGER NOT NULL,
                pad_char_count    INTEGER NOT NULL DEFAULT 0,
                md5_hash          TEXT NOT NULL,
                compressed        INTEGER NOT NULL DEFAULT 0,
                encrypted         INTEGER NOT NULL DEFAULT 0,
                container_name    TEXT NOT NULL,
                object_name       TEXT NOT NULL,
                album_uid         TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_songs_artist
                ON songs(artist_name);
            CREATE INDEX IF NOT EXISTS idx_songs_artist_album
                ON songs(artist_name, album_name);

            -- Playlists
            CREATE TABLE IF NOT EXISTS playlists (
                name         TEXT PRIMARY KEY,
                object_name  TEXT NOT NULL
            );
            ",
        )?;

        // Record schema version if not already present.
        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, chrono::Utc::now().to_rfc3339()],
            )?;
        }

        Ok(())
    }
}

fn map_song_row(row: &Row<'_>) -> rusqlite::Result<SongRecord> {
    Ok(SongRecord {
        file_uid: row.get(0)?,
        artist_name: row.get(1)?,
        album_name: row.get(2)?,
        song_name: row.get(3)?,
        origin_file_size: row.get::<_, i64>(4)? as u64,
        stored_file_size: row.get::<_, i64>(5)? as u64,
        pad_char_count: row.get::<_, i64>(6)? as u64,
        md5_hash: row.get(7)?,
        compressed: row.get(8)?,
        encrypted: row.get(9)?,
        container_name: row.get(10)?,
        object_name: row.get(11)?,
        album_uid: row.get(12)?,
    })
}

impl MetadataStore for SqliteMetadataStore {
    // ── Songs ───────────────────────────────────────────────────────

    fn store_song_metadata(
        &self,
        song: &SongRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let song = song.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO songs ({SONG_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    song.file_uid,
                    song.artist_name,
                    song.album_name,
                    song.song_name,
                    song.origin_file_size as i64,
                    song.stored_file_size as i64,
                    song.pad_char_count as i64,
                    song.md5_hash,
                    song.compressed,
                    song.encrypted,
                    song.container_name,
                    song.object_name,
                    song.album_uid,
                ],
            )?;
            Ok(true)
        })
    }

    fn retrieve_song(
        &self,
        file_uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<SongRecord>>> + Send + '_>> {
        let file_uid = file_uid.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let song = conn
                .query_row(
                    &format!("SELECT {SONG_COLUMNS} FROM songs WHERE file_uid = ?1"),
                    params![file_uid],
                    map_song_row,
                )
                .optional()?;
            Ok(song)
        })
    }

    fn delete_song(
        &self,
        file_uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let file_uid = file_uid.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let deleted = conn.execute("DELETE FROM songs WHERE file_uid = ?1", params![file_uid])?;
            Ok(deleted > 0)
        })
    }

    fn retrieve_songs(
        &self,
        artist: Option<&str>,
        album: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SongRecord>>> + Send + '_>> {
        let artist = artist.map(str::to_string);
        let album = album.map(str::to_string);
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SONG_COLUMNS} FROM songs
                 WHERE (?1 IS NULL OR artist_name = ?1)
                   AND (?2 IS NULL OR album_name = ?2)
                 ORDER BY file_uid"
            ))?;
            let rows = stmt.query_map(params![artist, album], map_song_row)?;
            let mut songs = Vec::new();
            for row in rows {
                songs.push(row?);
            }
            Ok(songs)
        })
    }

    fn get_artists(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt =
                conn.prepare("SELECT DISTINCT artist_name FROM songs ORDER BY artist_name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut artists = Vec::new();
            for row in rows {
                artists.push(row?);
            }
            Ok(artists)
        })
    }

    fn get_albums(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<(String, String)>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT DISTINCT artist_name, album_name FROM songs
                 ORDER BY artist_name, album_name",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut albums = Vec::new();
            for row in rows {
                albums.push(row?);
            }
            Ok(albums)
        })
    }

    fn song_count(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    // ── Playlists ───────────────────────────────────────────────────

    fn store_playlist(
        &self,
        playlist: &PlaylistRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let playlist = playlist.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO playlists (name, object_name) VALUES (?1, ?2)",
                params![playlist.name, playlist.object_name],
            )?;
            Ok(true)
        })
    }

    fn get_playlist(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<PlaylistRecord>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let playlist = conn
                .query_row(
                    "SELECT name, object_name FROM playlists WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(PlaylistRecord {
                            name: row.get(0)?,
                            object_name: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(playlist)
        })
    }

    fn get_playlists(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PlaylistRecord>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn.prepare("SELECT name, object_name FROM playlists ORDER BY name")?;
            let rows = stmt.query_map([], |row| {
                Ok(PlaylistRecord {
                    name: row.get(0)?,
                    object_name: row.get(1)?,
                })
            })?;
            let mut playlists = Vec::new();
            for row in rows {
                playlists.push(row?);
            }
            Ok(playlists)
        })
    }

    fn delete_playlist(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let deleted = conn.execute("DELETE FROM playlists WHERE name = ?1", params![name])?;
            Ok(deleted > 0)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteMetadataStore {
        SqliteMetadataStore::new(":memory:").expect("failed to create in-memory store")
    }

    fn make_song(artist: &str, album: &str, song: &str) -> SongRecord {
        let uid = format!(
            "{}--{}--{}.flac",
            artist.replace(' ', "-"),
            album.replace(' ', "-"),
            song.replace(' ', "-")
        );
        SongRecord {
            file_uid: uid.clone(),
            artist_name: artist.to_string(),
            album_name: album.to_string(),
            song_name: song.to_string(),
            origin_file_size: 1024,
            stored_file_size: 1024,
            pad_char_count: 0,
            md5_hash: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            compressed: false,
            encrypted: false,
            container_name: "x-artist-songs".to_string(),
            object_name: uid,
            album_uid: None,
        }
    }

    // ── Schema tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jukebox_db.sqlite3");
        let store = SqliteMetadataStore::new(&path).unwrap();
        store.store_song_metadata(&make_song("A", "B", "C")).await.unwrap();
        drop(store);

        let reopened = SqliteMetadataStore::new(&path).unwrap();
        assert_eq!(reopened.song_count().await.unwrap(), 1);
    }

    // ── Song tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_store_and_retrieve_song() {
        let store = test_store();
        let mut song = make_song("The Who", "Whos Next", "My Wife");
        song.album_uid = Some("The-Who--Whos-Next".to_string());
        song.origin_file_size = 5_000_000_000;
        assert!(store.store_song_metadata(&song).await.unwrap());

        let fetched = store.retrieve_song(&song.file_uid).await.unwrap().unwrap();
        assert_eq!(fetched, song);
        assert!(store.retrieve_song("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_song_replaces_existing() {
        let store = test_store();
        let mut song = make_song("Queen", "Jazz", "Mustapha");
        store.store_song_metadata(&song).await.unwrap();
        song.md5_hash = "0cc175b9c0f1b6a831c399e269772661".to_string();
        store.store_song_metadata(&song).await.unwrap();

        assert_eq!(store.song_count().await.unwrap(), 1);
        let fetched = store.retrieve_song(&song.file_uid).await.unwrap().unwrap();
        assert_eq!(fetched.md5_hash, song.md5_hash);
    }

    #[tokio::test]
    async fn test_delete_song() {
        let store = test_store();
        let song = make_song("Queen", "Jazz", "Mustapha");
        store.store_song_metadata(&song).await.unwrap();
        assert!(store.delete_song(&song.file_uid).await.unwrap());
        assert!(!store.delete_song(&song.file_uid).await.unwrap());
        assert_eq!(store.song_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_songs_filters() {
        let store = test_store();
        for song in [
            make_song("Queen", "Jazz", "Mustapha"),
            make_song("Queen", "Jazz", "Bicycle Race"),
            make_song("Queen", "Innuendo", "Innuendo"),
            make_song("The Who", "Whos Next", "My Wife"),
        ] {
            store.store_song_metadata(&song).await.unwrap();
        }

        assert_eq!(store.retrieve_songs(None, None).await.unwrap().len(), 4);
        assert_eq!(store.songs_for_artist("Queen").await.unwrap().len(), 3);

        let jazz = store.retrieve_songs(Some("Queen"), Some("Jazz")).await.unwrap();
        let uids: Vec<&str> = jazz.iter().map(|s| s.file_uid.as_str()).collect();
        assert_eq!(
            uids,
            vec!["Queen--Jazz--Bicycle-Race.flac", "Queen--Jazz--Mustapha.flac"]
        );

        assert!(store
            .retrieve_songs(Some("Nobody"), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_artists_and_albums_are_distinct_and_sorted() {
        let store = test_store();
        for song in [
            make_song("The Who", "Whos Next", "My Wife"),
            make_song("Queen", "Jazz", "Mustapha"),
            make_song("Queen", "Jazz", "Bicycle Race"),
            make_song("Queen", "Innuendo", "Innuendo"),
        ] {
            store.store_song_metadata(&song).await.unwrap();
        }

        assert_eq!(
            store.get_artists().await.unwrap(),
            vec!["Queen".to_string(), "The Who".to_string()]
        );
        assert_eq!(
            store.get_albums().await.unwrap(),
            vec![
                ("Queen".to_string(), "Innuendo".to_string()),
                ("Queen".to_string(), "Jazz".to_string()),
                ("The Who".to_string(), "Whos Next".to_string()),
            ]
        );
    }

    // ── Playlist tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_playlist_registry() {
        let store = test_store();
        let road_trip = PlaylistRecord {
            name: "Road Trip".to_string(),
            object_name: "Road-Trip.json".to_string(),
        };
        let chill = PlaylistRecord {
            name: "Chill".to_string(),
            object_name: "Chill.json".to_string(),
        };
        assert!(store.store_playlist(&road_trip).await.unwrap());
        assert!(store.store_playlist(&chill).await.unwrap());

        assert_eq!(
            store.get_playlists().await.unwrap(),
            vec![chill.clone(), road_trip.clone()]
        );
        assert_eq!(
            store.get_playlist("Road Trip").await.unwrap(),
            Some(road_trip)
        );

        assert!(store.delete_playlist("Chill").await.unwrap());
        assert!(!store.delete_playlist("Chill").await.unwrap());
        assert!(store.get_playlist("Chill").await.unwrap().is_none());
    }
}
