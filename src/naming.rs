//! Song and playlist naming conventions.
//!
//! Song files are named `Artist--Album--Song.ext` with spaces written as
//! `-`.  The encoded stem plus extension is the song's `file_uid`, its
//! remote object name and its file name in the play cache.

use std::path::Path;

/// Separator between the artist, album and song parts of a file name.
pub const NAME_SEPARATOR: &str = "--";

/// Suffix of the per-letter song containers (`w-artist-songs`).
pub const SONG_CONTAINER_SUFFIX: &str = "-artist-songs";

/// Container holding uploaded playlist documents.
pub const PLAYLIST_CONTAINER: &str = "playlists";

/// Container holding album art.
pub const ALBUM_ART_CONTAINER: &str = "album-art";

/// Container holding the metadata database backup.
pub const METADATA_CONTAINER: &str = "music-metadata";

/// Audio file extensions accepted by import.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "ogg", "wav"];

/// Artist, album and song names decoded from a song file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongName {
    pub artist: String,
    pub album: String,
    pub song: String,
}

pub fn encode_value(value: &str) -> String {
    value.replace(' ', "-")
}

pub fn decode_value(value: &str) -> String {
    value.replace('-', " ")
}

/// Split `Artist--Album--Song.ext` into its decoded parts. Returns `None`
/// unless the stem has exactly three non-empty parts.
pub fn parse_song_file_name(file_name: &str) -> Option<SongName> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split(NAME_SEPARATOR).collect();
    match parts.as_slice() {
        [artist, album, song] if !artist.is_empty() && !album.is_empty() && !song.is_empty() => {
            Some(SongName {
                artist: decode_value(artist),
                album: decode_value(album),
                song: decode_value(song),
            })
        }
        _ => None,
    }
}

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Container for songs by `artist`: the first character of the name
/// (after a leading "A " or "The "), lowercased, plus `suffix`.
/// Non-alphanumeric first characters map to `0`.
pub fn artist_container(artist: &str, suffix: &str) -> String {
    let trimmed = artist.trim();
    let name = trimmed
        .strip_prefix("The ")
        .or_else(|| trimmed.strip_prefix("A "))
        .unwrap_or(trimmed);
    let letter = match name.chars().next() {
        Some(c) if c.is_alphanumeric() => c.to_lowercase().collect::<String>(),
        _ => "0".to_string(),
    };
    format!("{letter}{suffix}")
}

/// `file_uid` for an imported file: the file name with its extension
/// lowercased, so `SOS.MP3` and `SOS.mp3` name the same song.
pub fn song_uid(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{}", ext.to_ascii_lowercase()),
        _ => file_name.to_string(),
    }
}

/// Container for the song identified by `file_uid`.
pub fn container_for_song(file_uid: &str, suffix: &str) -> Option<String> {
    parse_song_file_name(file_uid).map(|name| artist_container(&name.artist, suffix))
}

/// Object name of a playlist document.
pub fn playlist_object_name(name: &str) -> String {
    format!("{}.json", encode_value(name))
}

/// `Artist--Album` identifier shared by every song of an album.
pub fn album_uid(artist: &str, album: &str) -> String {
    format!("{}{NAME_SEPARATOR}{}", encode_value(artist), encode_value(album))
}
