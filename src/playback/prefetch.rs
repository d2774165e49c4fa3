//! Background download of upcoming songs into the play cache.
//!
//! The play directory holds one file per cached song, named by its
//! `file_uid`.  Downloads land in `<file_uid>.download` and are renamed
//! into place once complete (and verified, when integrity checking is
//! on), so a cache file is either whole or absent.
//!
//! At most one batch runs at a time.  The batch task only reads the song
//! records it was handed; the queue and its index belong to the play loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::PlaybackQueue;
use crate::checksum::md5_file;
use crate::metadata::store::SongRecord;
use crate::metrics::{DOWNLOADS_TOTAL, DOWNLOAD_BYTES_TOTAL};
use crate::storage::backend::StorageBackend;

/// Suffix of an in-progress download.
pub const DOWNLOAD_SUFFIX: &str = ".download";

/// Result of one background batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub bytes: u64,
    pub elapsed: Duration,
    pub downloaded: usize,
    pub failed: usize,
    /// Termination was requested before the batch finished.
    pub terminated: bool,
}

impl BatchReport {
    /// Throughput in KiB/s, or `None` when no time elapsed.
    pub fn kb_per_sec(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.bytes as f64 / 1024.0 / secs)
        } else {
            None
        }
    }
}

/// Cache file path for `file_uid`.
pub fn cache_path(play_dir: &Path, file_uid: &str) -> PathBuf {
    play_dir.join(file_uid)
}

fn download_path(play_dir: &Path, file_uid: &str) -> PathBuf {
    play_dir.join(format!("{file_uid}{DOWNLOAD_SUFFIX}"))
}

/// Queue indices, in the order they will play after the current song,
/// wrapping around only when the queue repeats. Never yields the current
/// index.
fn upcoming(queue: &PlaybackQueue) -> impl Iterator<Item = usize> + '_ {
    let len = queue.len();
    let current = queue.current_index();
    (1..len).map_while(move |step| {
        let index = current + step;
        if index < len {
            Some(index)
        } else if queue.repeat() {
            Some(index - len)
        } else {
            None
        }
    })
}

/// Indices of upcoming songs that are not in the play cache, at most
/// `cache_count` of them. A song whose uid matches the current song or an
/// earlier candidate is skipped; partial `.download` files count as absent.
pub fn scan_missing(queue: &PlaybackQueue, play_dir: &Path, cache_count: usize) -> Vec<usize> {
    let mut missing = Vec::new();
    if cache_count == 0 {
        return missing;
    }
    let current_uid = queue.current().map(|s| s.file_uid.as_str());
    let mut seen: Vec<&str> = Vec::new();

    for index in upcoming(queue) {
        let Some(song) = queue.get(index) else {
            break;
        };
        let uid = song.file_uid.as_str();
        if Some(uid) == current_uid || seen.contains(&uid) {
            continue;
        }
        seen.push(uid);
        if !cache_path(play_dir, uid).is_file() {
            missing.push(index);
            if missing.len() == cache_count {
                break;
            }
        }
    }
    missing
}

/// Number of distinct upcoming songs already in the play cache.
fn cached_upcoming(queue: &PlaybackQueue, play_dir: &Path) -> usize {
    let current_uid = queue.current().map(|s| s.file_uid.as_str());
    let mut seen: Vec<&str> = Vec::new();
    for index in upcoming(queue) {
        if let Some(song) = queue.get(index) {
            let uid = song.file_uid.as_str();
            if Some(uid) != current_uid && !seen.contains(&uid) && cache_path(play_dir, uid).is_file()
            {
                seen.push(uid);
            }
        }
    }
    seen.len()
}

/// Download `song` into the play cache. Returns the number of bytes
/// cached, or `None` when the song could not be fetched or failed the
/// integrity check. No partial file is left behind.
pub async fn download_song(
    storage: &dyn StorageBackend,
    play_dir: &Path,
    song: &SongRecord,
    check_integrity: bool,
) -> Option<u64> {
    let partial = download_path(play_dir, &song.file_uid);
    let result = storage
        .get_object(&song.container_name, &song.object_name, &partial)
        .await;

    let bytes = match result {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            warn!("song {} not found in {}", song.file_uid, song.container_name);
            discard(&partial);
            metrics::counter!(DOWNLOADS_TOTAL, "status" => "missing").increment(1);
            return None;
        }
        Err(e) => {
            warn!("download of {} failed: {e:#}", song.file_uid);
            discard(&partial);
            metrics::counter!(DOWNLOADS_TOTAL, "status" => "error").increment(1);
            return None;
        }
    };

    if check_integrity {
        match md5_file(&partial) {
            Ok(hash) if hash == song.md5_hash => {}
            Ok(hash) => {
                warn!(
                    "integrity check failed for {}: expected {} got {}",
                    song.file_uid, song.md5_hash, hash
                );
                discard(&partial);
                metrics::counter!(DOWNLOADS_TOTAL, "status" => "corrupt").increment(1);
                return None;
            }
            Err(e) => {
                warn!("unable to hash {}: {e:#}", partial.display());
                discard(&partial);
                metrics::counter!(DOWNLOADS_TOTAL, "status" => "error").increment(1);
                return None;
            }
        }
    }

    if let Err(e) = std::fs::rename(&partial, cache_path(play_dir, &song.file_uid)) {
        warn!("unable to move {} into the play cache: {e}", song.file_uid);
        discard(&partial);
        metrics::counter!(DOWNLOADS_TOTAL, "status" => "error").increment(1);
        return None;
    }

    metrics::counter!(DOWNLOADS_TOTAL, "status" => "ok").increment(1);
    metrics::counter!(DOWNLOAD_BYTES_TOTAL).increment(bytes);
    Some(bytes)
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("unable to remove {}: {e}", path.display());
        }
    }
}

async fn run_batch(
    storage: Arc<dyn StorageBackend>,
    play_dir: PathBuf,
    songs: Vec<SongRecord>,
    check_integrity: bool,
    terminate: Arc<AtomicBool>,
) -> BatchReport {
    let started = Instant::now();
    let mut report = BatchReport::default();
    for song in &songs {
        if terminate.load(Ordering::SeqCst) {
            report.terminated = true;
            break;
        }
        match download_song(storage.as_ref(), &play_dir, song, check_integrity).await {
            Some(bytes) => {
                report.bytes += bytes;
                report.downloaded += 1;
            }
            None => report.failed += 1,
        }
    }
    report.elapsed = started.elapsed();
    report
}

/// Keeps the play directory stocked with upcoming songs.
pub struct PrefetchCache {
    storage: Arc<dyn StorageBackend>,
    play_dir: PathBuf,
    cache_count: usize,
    check_integrity: bool,
    terminate: Arc<AtomicBool>,
    batch: Option<JoinHandle<BatchReport>>,
    /// uids handed to the batch in flight.
    window: Vec<String>,
    last_report: Option<BatchReport>,
}

impl PrefetchCache {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        play_dir: impl Into<PathBuf>,
        cache_count: usize,
        check_integrity: bool,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage,
            play_dir: play_dir.into(),
            cache_count,
            check_integrity,
            terminate,
            batch: None,
            window: Vec::new(),
            last_report: None,
        }
    }

    pub fn play_dir(&self) -> &Path {
        &self.play_dir
    }

    pub fn cache_path(&self, file_uid: &str) -> PathBuf {
        cache_path(&self.play_dir, file_uid)
    }

    pub fn is_cached(&self, file_uid: &str) -> bool {
        self.cache_path(file_uid).is_file()
    }

    /// Whether a batch task is still held (running or not yet cleaned up).
    pub fn batch_in_flight(&self) -> bool {
        self.batch.is_some()
    }

    /// uids in the current batch.
    pub fn window(&self) -> &[String] {
        &self.window
    }

    pub fn last_report(&self) -> Option<&BatchReport> {
        self.last_report.as_ref()
    }

    /// Download `song` in the foreground.
    pub async fn fetch_now(&self, song: &SongRecord) -> Option<u64> {
        download_song(self.storage.as_ref(), &self.play_dir, song, self.check_integrity).await
    }

    /// Spawn a batch downloading `songs` in order. Refused (returns false)
    /// while another batch is held, after termination, or for an empty list.
    pub fn start_batch(&mut self, songs: Vec<SongRecord>) -> bool {
        if self.batch.is_some() || songs.is_empty() || self.terminate.load(Ordering::SeqCst) {
            return false;
        }
        self.window = songs.iter().map(|s| s.file_uid.clone()).collect();
        debug!("prefetch batch started: {:?}", self.window);
        self.batch = Some(tokio::spawn(run_batch(
            Arc::clone(&self.storage),
            self.play_dir.clone(),
            songs,
            self.check_integrity,
            Arc::clone(&self.terminate),
        )));
        true
    }

    /// Top the cache back up to `cache_count` upcoming songs. Returns
    /// whether a batch was started.
    pub fn refill(&mut self, queue: &PlaybackQueue) -> bool {
        if self.batch.is_some() {
            return false;
        }
        let room = self
            .cache_count
            .saturating_sub(cached_upcoming(queue, &self.play_dir));
        if room == 0 {
            return false;
        }
        let songs: Vec<SongRecord> = scan_missing(queue, &self.play_dir, self.cache_count)
            .into_iter()
            .take(room)
            .filter_map(|index| queue.get(index).cloned())
            .collect();
        self.start_batch(songs)
    }

    /// Release a finished batch so another may start. A running batch is
    /// left alone.
    pub async fn cleanup(&mut self) -> Option<BatchReport> {
        if !self.batch.as_ref().is_some_and(|handle| handle.is_finished()) {
            return None;
        }
        self.finish().await
    }

    /// Wait for the batch in flight, if any, to finish.
    pub async fn wait_for_batch(&mut self) -> Option<BatchReport> {
        self.finish().await
    }

    async fn finish(&mut self) -> Option<BatchReport> {
        let handle = self.batch.take()?;
        self.window.clear();
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!("prefetch batch task failed: {e}");
                return None;
            }
        };
        if !report.terminated {
            match report.kb_per_sec() {
                Some(rate) => info!(
                    "prefetched {} songs ({} failed), {} bytes at {:.1} KB/s",
                    report.downloaded, report.failed, report.bytes, rate
                ),
                None => info!(
                    "prefetched {} songs ({} failed), {} bytes",
                    report.downloaded, report.failed, report.bytes
                ),
            }
        }
        self.last_report = Some(report.clone());
        Some(report)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md5_hex;
    use crate::playback::queue::tests::{song, songs};
    use crate::storage::memory::MemoryBackend;
    use bytes::Bytes;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"cached").unwrap();
    }

    async fn stocked_backend(records: &[SongRecord]) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(0, ""));
        backend.create_container("a-artist-songs").await.unwrap();
        for record in records {
            backend
                .put_object(
                    &record.container_name,
                    &record.object_name,
                    Bytes::from(format!("audio of {}", record.file_uid)),
                    None,
                )
                .await
                .unwrap();
        }
        backend
    }

    #[test]
    fn test_scan_missing_skips_cached_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PlaybackQueue::new(songs(5), false, true);
        touch(dir.path(), "song-1.mp3");
        touch(dir.path(), "song-3.mp3");

        assert_eq!(scan_missing(&queue, dir.path(), 3), vec![2, 4]);
    }

    #[test]
    fn test_scan_missing_stops_at_cache_count_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = PlaybackQueue::new(songs(5), false, true);
        queue.advance();
        queue.advance();
        queue.advance();
        assert_eq!(queue.current_index(), 3);
        assert_eq!(scan_missing(&queue, dir.path(), 3), vec![4, 0, 1]);
        assert!(scan_missing(&queue, dir.path(), 0).is_empty());
    }

    #[test]
    fn test_scan_missing_does_not_wrap_without_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = PlaybackQueue::new(songs(4), false, false);
        queue.advance();
        queue.advance();
        assert_eq!(scan_missing(&queue, dir.path(), 3), vec![3]);
    }

    #[test]
    fn test_scan_missing_treats_partial_download_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PlaybackQueue::new(songs(3), false, true);
        touch(dir.path(), "song-1.mp3.download");
        assert_eq!(scan_missing(&queue, dir.path(), 3), vec![1, 2]);
    }

    #[test]
    fn test_scan_missing_dedups_uids() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PlaybackQueue::new(
            vec![song("a.mp3"), song("b.mp3"), song("a.mp3"), song("b.mp3"), song("c.mp3")],
            false,
            true,
        );
        assert_eq!(scan_missing(&queue, dir.path(), 3), vec![1, 4]);
    }

    #[test]
    fn test_kb_per_sec() {
        let report = BatchReport {
            bytes: 2048,
            elapsed: Duration::from_secs(2),
            ..BatchReport::default()
        };
        assert_eq!(report.kb_per_sec(), Some(1.0));
        assert_eq!(BatchReport::default().kb_per_sec(), None);
    }

    #[tokio::test]
    async fn test_download_song_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let record = song("song-0.mp3");
        let backend = stocked_backend(std::slice::from_ref(&record)).await;

        let bytes = download_song(backend.as_ref(), dir.path(), &record, false).await;
        assert_eq!(bytes, Some("audio of song-0.mp3".len() as u64));
        assert!(dir.path().join("song-0.mp3").is_file());
        assert!(!dir.path().join("song-0.mp3.download").exists());
    }

    #[tokio::test]
    async fn test_download_missing_song_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = stocked_backend(&[]).await;
        let record = song("ghost.mp3");
        assert_eq!(download_song(backend.as_ref(), dir.path(), &record, false).await, None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_integrity_mismatch_discards_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut good = song("good.mp3");
        good.md5_hash = md5_hex(b"audio of good.mp3");
        let mut bad = song("bad.mp3");
        bad.md5_hash = md5_hex(b"something else");
        let backend = stocked_backend(&[good.clone(), bad.clone()]).await;

        assert!(download_song(backend.as_ref(), dir.path(), &good, true).await.is_some());
        assert!(download_song(backend.as_ref(), dir.path(), &bad, true).await.is_none());
        assert!(dir.path().join("good.mp3").is_file());
        assert!(!dir.path().join("bad.mp3").exists());
        assert!(!dir.path().join("bad.mp3.download").exists());
    }

    #[tokio::test]
    async fn test_single_batch_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let records = songs(4);
        let backend = stocked_backend(&records).await;
        let terminate = Arc::new(AtomicBool::new(false));
        let mut cache = PrefetchCache::new(backend, dir.path(), 3, false, terminate);

        assert!(cache.start_batch(records[1..3].to_vec()));
        assert!(!cache.start_batch(records[3..].to_vec()));
        assert_eq!(cache.window().len(), 2);

        let report = cache.wait_for_batch().await.unwrap();
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed, 0);
        assert!(!report.terminated);
        assert!(!cache.batch_in_flight());
        assert!(cache.window().is_empty());
        assert!(cache.is_cached("song-1.mp3"));
        assert!(cache.start_batch(records[3..].to_vec()));
    }

    #[tokio::test]
    async fn test_cleanup_waits_for_completion() {
        let dir = tempfile::tempdir().unwrap();
        let records = songs(3);
        let backend = stocked_backend(&records).await;
        let mut cache = PrefetchCache::new(
            backend,
            dir.path(),
            3,
            false,
            Arc::new(AtomicBool::new(false)),
        );
        assert!(cache.cleanup().await.is_none());

        assert!(cache.start_batch(records.clone()));
        let mut report = None;
        for _ in 0..100 {
            report = cache.cleanup().await;
            if report.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(report.unwrap().downloaded, 3);
        assert_eq!(cache.last_report().unwrap().downloaded, 3);
    }

    #[tokio::test]
    async fn test_terminated_batch_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let records = songs(3);
        let backend = stocked_backend(&records).await;
        let terminate = Arc::new(AtomicBool::new(false));
        let mut cache = PrefetchCache::new(backend, dir.path(), 3, false, terminate.clone());

        // The task cannot run before the flag is raised on a current-thread runtime.
        assert!(cache.start_batch(records));
        terminate.store(true, Ordering::SeqCst);
        let report = cache.wait_for_batch().await.unwrap();
        assert!(report.terminated);
        assert_eq!(report.downloaded, 0);
        assert!(!cache.start_batch(songs(1)));
    }

    #[tokio::test]
    async fn test_refill_tops_up_to_cache_count() {
        let dir = tempfile::tempdir().unwrap();
        let records = songs(6);
        let backend = stocked_backend(&records).await;
        let queue = PlaybackQueue::new(records, false, true);
        touch(dir.path(), "song-1.mp3");
        touch(dir.path(), "song-3.mp3");
        let mut cache = PrefetchCache::new(
            backend,
            dir.path(),
            3,
            false,
            Arc::new(AtomicBool::new(false)),
        );

        assert!(cache.refill(&queue));
        assert_eq!(cache.window(), &["song-2.mp3".to_string()]);
        cache.wait_for_batch().await;
        assert!(!cache.refill(&queue));
    }
}
