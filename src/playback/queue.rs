//! The ordered list of songs being played.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::metadata::store::SongRecord;

/// Songs to play plus the index of the current one.
///
/// The order is fixed at construction; shuffling happens once, there.
/// Only the play loop moves the index.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    songs: Vec<SongRecord>,
    index: usize,
    repeat: bool,
}

impl PlaybackQueue {
    pub fn new(songs: Vec<SongRecord>, shuffle: bool, repeat: bool) -> Self {
        Self::with_rng(songs, shuffle, repeat, &mut rand::thread_rng())
    }

    /// Like [`PlaybackQueue::new`] with a caller-supplied random source.
    pub fn with_rng<R: Rng + ?Sized>(
        mut songs: Vec<SongRecord>,
        shuffle: bool,
        repeat: bool,
        rng: &mut R,
    ) -> Self {
        if shuffle {
            songs.shuffle(rng);
        }
        Self {
            songs,
            index: 0,
            repeat,
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&SongRecord> {
        self.songs.get(self.index)
    }

    pub fn get(&self, index: usize) -> Option<&SongRecord> {
        self.songs.get(index)
    }

    pub fn songs(&self) -> &[SongRecord] {
        &self.songs
    }

    /// Move to the next song. At the end, wraps to the start when the
    /// queue repeats; otherwise returns false and leaves the index alone.
    pub fn advance(&mut self) -> bool {
        if self.songs.is_empty() {
            return false;
        }
        if self.index + 1 < self.songs.len() {
            self.index += 1;
            true
        } else if self.repeat {
            self.index = 0;
            true
        } else {
            false
        }
    }
}
