// SPDX-License-Identifier: GPL-3.0-only

//! Ordered playback queue with loop and shuffle policies
//!
//! The cursor is a position in `order`, a permutation of entry indices for
//! the current pass. Sequential playback uses the identity permutation;
//! shuffle draws a new permutation once per pass, so one pass visits every
//! entry exactly once.

use crate::errors::{ErrorKind, PlaybackError, PlaybackResult};
use crate::media::{MediaDescriptor, MediaKind, classify};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stable identity of a queued entry
pub type EntryId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub id: EntryId,
    pub descriptor: MediaDescriptor,
    /// Replay this entry when it completes
    pub repeat: bool,
    /// Pass over this entry when advancing
    pub skip: bool,
}

/// A path that could not be queued
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub path: PathBuf,
    pub reason: ErrorKind,
    pub message: String,
}

/// Result of a batch load
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub accepted: Vec<EntryId>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Default)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    order: Vec<usize>,
    cursor: Option<usize>,
    looping: bool,
    shuffle: bool,
}

impl Playlist {
    pub fn new(looping: bool, shuffle: bool) -> Self {
        Self {
            looping,
            shuffle,
            ..Self::default()
        }
    }

    /// Validate and append paths
    ///
    /// Each path is checked for existence and against the allow-list. Invalid
    /// paths are reported without aborting the batch. Directories expand
    /// recursively to the supported files they contain.
    pub fn load<P: AsRef<Path>>(&mut self, paths: &[P]) -> LoadReport {
        let mut report = LoadReport::default();
        let first_new = self.entries.len();

        for path in paths {
            let path = path.as_ref();
            match Self::resolve(path) {
                Ok(descriptors) => {
                    for descriptor in descriptors {
                        let id = Uuid::new_v4();
                        debug!(%id, path = %descriptor.path.display(), kind = %descriptor.kind, "Queued entry");
                        self.entries.push(PlaylistEntry {
                            id,
                            descriptor,
                            repeat: false,
                            skip: false,
                        });
                        report.accepted.push(id);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Rejected playlist entry");
                    report.rejected.push(Rejection {
                        path: path.to_path_buf(),
                        reason: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.extend_order(first_new);
        if self.cursor.is_none() && !self.entries.is_empty() {
            self.cursor = Some(0);
        }

        info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            total = self.entries.len(),
            "Playlist loaded"
        );
        report
    }

    fn resolve(path: &Path) -> PlaybackResult<Vec<MediaDescriptor>> {
        let metadata =
            std::fs::metadata(path).map_err(|_| PlaybackError::NotFound(path.to_path_buf()))?;
        let absolute = std::path::absolute(path)?;

        if metadata.is_dir() {
            let mut files = Vec::new();
            collect_supported(&absolute, &mut files);
            files.sort();
            return Ok(files
                .iter()
                .filter_map(|file| classify(file).ok())
                .collect());
        }

        classify(&absolute).map(|descriptor| vec![descriptor])
    }

    /// Add indices `first_new..` to the current pass
    fn extend_order(&mut self, first_new: usize) {
        let mut added: Vec<usize> = (first_new..self.entries.len()).collect();
        if self.shuffle {
            added.shuffle(&mut rand::rng());
        }
        self.order.extend(added);
    }

    /// Entry under the cursor
    pub fn current(&self) -> PlaybackResult<&PlaylistEntry> {
        self.cursor
            .map(|pos| &self.entries[self.order[pos]])
            .ok_or(PlaybackError::Empty)
    }

    /// Advance to the next non-skipped entry
    pub fn next(&mut self) -> PlaybackResult<&PlaylistEntry> {
        let mut pos = self.cursor.ok_or(PlaybackError::Empty)?;
        for _ in 0..self.entries.len() {
            if pos + 1 < self.order.len() {
                pos += 1;
            } else if self.looping {
                self.begin_pass();
                pos = 0;
            } else {
                return Err(PlaybackError::EndOfPlaylist);
            }
            if !self.entries[self.order[pos]].skip {
                self.cursor = Some(pos);
                return self.current();
            }
        }
        Err(PlaybackError::EndOfPlaylist)
    }

    /// Step back to the previous non-skipped entry
    pub fn previous(&mut self) -> PlaybackResult<&PlaylistEntry> {
        let mut pos = self.cursor.ok_or(PlaybackError::Empty)?;
        for _ in 0..self.entries.len() {
            if pos > 0 {
                pos -= 1;
            } else if self.looping {
                pos = self.order.len() - 1;
            } else {
                return Err(PlaybackError::EndOfPlaylist);
            }
            if !self.entries[self.order[pos]].skip {
                self.cursor = Some(pos);
                return self.current();
            }
        }
        Err(PlaybackError::EndOfPlaylist)
    }

    /// Start a new pass; shuffle draws a fresh permutation
    fn begin_pass(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut rand::rng());
            debug!("Reshuffled playlist for new pass");
        }
    }

    /// Move the cursor to the start of a fresh pass
    pub fn rewind(&mut self) {
        if self.entries.is_empty() {
            self.cursor = None;
            return;
        }
        self.begin_pass();
        let first = (0..self.order.len())
            .find(|&pos| !self.entries[self.order[pos]].skip)
            .unwrap_or(0);
        self.cursor = Some(first);
    }

    /// Point the cursor at a specific entry
    pub fn select(&mut self, id: EntryId) -> PlaybackResult<&PlaylistEntry> {
        let pos = self
            .order
            .iter()
            .position(|&index| self.entries[index].id == id)
            .ok_or_else(|| PlaybackError::InvalidState(format!("no playlist entry {}", id)))?;
        self.cursor = Some(pos);
        self.current()
    }

    /// Remove an entry, returning whether it was the current one
    pub fn remove(&mut self, id: EntryId) -> PlaybackResult<bool> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| PlaybackError::InvalidState(format!("no playlist entry {}", id)))?;
        let pos = self
            .order
            .iter()
            .position(|&i| i == index)
            .ok_or_else(|| PlaybackError::InvalidState("playlist order out of sync".into()))?;

        let was_current = self.cursor == Some(pos);
        self.entries.remove(index);
        self.order.remove(pos);
        for i in self.order.iter_mut() {
            if *i > index {
                *i -= 1;
            }
        }

        self.cursor = match self.cursor {
            _ if self.entries.is_empty() => None,
            Some(cur) if cur > pos => Some(cur - 1),
            Some(cur) => Some(cur.min(self.order.len() - 1)),
            None => None,
        };
        Ok(was_current)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.cursor = None;
    }

    pub fn set_flags(&mut self, id: EntryId, repeat: bool, skip: bool) -> PlaybackResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| PlaybackError::InvalidState(format!("no playlist entry {}", id)))?;
        entry.repeat = repeat;
        entry.skip = skip;
        Ok(())
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Toggle shuffle, keeping the current entry under the cursor
    ///
    /// Enabling shuffle starts a new random pass beginning at the current entry.
    pub fn set_shuffle(&mut self, shuffle: bool) {
        if self.shuffle == shuffle {
            return;
        }
        self.shuffle = shuffle;
        let current = self.cursor.map(|pos| self.order[pos]);

        if shuffle {
            let mut rest: Vec<usize> = (0..self.entries.len())
                .filter(|&i| Some(i) != current)
                .collect();
            rest.shuffle(&mut rand::rng());
            self.order = current.into_iter().chain(rest).collect();
            self.cursor = current.map(|_| 0);
        } else {
            self.order = (0..self.entries.len()).collect();
            self.cursor = current;
        }
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    /// Entries in the order the current pass will play them
    pub fn upcoming(&self) -> impl Iterator<Item = &PlaylistEntry> {
        self.order.iter().map(|&index| &self.entries[index])
    }
}

fn collect_supported(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "Failed to read directory");
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_supported(&path, out);
        } else if classify(&path).is_ok_and(|d| d.kind != MediaKind::LiveCamera) {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs::File;

    fn playlist_with(names: &[&str], looping: bool, shuffle: bool) -> (tempfile::TempDir, Playlist) {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                File::create(&path).unwrap();
                path
            })
            .collect();
        let mut playlist = Playlist::new(looping, shuffle);
        let report = playlist.load(&paths);
        assert_eq!(report.accepted.len(), names.len());
        (dir, playlist)
    }

    fn current_name(playlist: &Playlist) -> String {
        let entry = playlist.current().unwrap();
        entry.descriptor.path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn test_empty_playlist() {
        let mut playlist = Playlist::new(true, false);
        assert_eq!(playlist.current().unwrap_err(), PlaybackError::Empty);
        assert_eq!(playlist.next().unwrap_err(), PlaybackError::Empty);
        assert_eq!(playlist.previous().unwrap_err(), PlaybackError::Empty);
    }

    #[test]
    fn test_looping_wraps_to_first() {
        let (_dir, mut playlist) = playlist_with(&["a.mp4", "b.mp4", "c.mp3"], true, false);
        assert_eq!(current_name(&playlist), "a.mp4");
        for _ in 0..playlist.len() {
            playlist.next().unwrap();
        }
        assert_eq!(current_name(&playlist), "a.mp4");
    }

    #[test]
    fn test_non_looping_reports_end() {
        let (_dir, mut playlist) = playlist_with(&["a.mp4", "b.mp4"], false, false);
        playlist.next().unwrap();
        assert_eq!(current_name(&playlist), "b.mp4");
        assert_eq!(playlist.next().unwrap_err(), PlaybackError::EndOfPlaylist);
        // Cursor stays on the last entry
        assert_eq!(current_name(&playlist), "b.mp4");
    }

    #[test]
    fn test_previous_at_start() {
        let (_dir, mut playlist) = playlist_with(&["a.mp4", "b.mp4", "c.mp4"], false, false);
        assert_eq!(playlist.previous().unwrap_err(), PlaybackError::EndOfPlaylist);

        playlist.set_looping(true);
        playlist.previous().unwrap();
        assert_eq!(current_name(&playlist), "c.mp4");
    }

    #[test]
    fn test_shuffle_pass_visits_each_entry_once() {
        let names = ["1.mp4", "2.mp4", "3.mp4", "4.mp4", "5.mp4", "6.mp4"];
        let (_dir, mut playlist) = playlist_with(&names, false, true);

        let mut seen = HashSet::new();
        seen.insert(playlist.current().unwrap().id);
        while let Ok(entry) = playlist.next() {
            assert!(seen.insert(entry.id), "entry visited twice in one pass");
        }
        assert_eq!(seen.len(), names.len());
    }

    #[test]
    fn test_skip_flag_is_honored() {
        let (_dir, mut playlist) = playlist_with(&["a.mp4", "b.mp4", "c.mp4"], false, false);
        let b = playlist.entries()[1].id;
        playlist.set_flags(b, false, true).unwrap();
        playlist.next().unwrap();
        assert_eq!(current_name(&playlist), "c.mp4");
    }

    #[test]
    fn test_remove_keeps_cursor_in_bounds() {
        let (_dir, mut playlist) = playlist_with(&["a.mp4", "b.mp4"], false, false);
        playlist.next().unwrap();
        let b = playlist.current().unwrap().id;
        assert!(playlist.remove(b).unwrap());
        assert_eq!(current_name(&playlist), "a.mp4");

        let a = playlist.current().unwrap().id;
        playlist.remove(a).unwrap();
        assert!(playlist.is_empty());
        assert_eq!(playlist.current().unwrap_err(), PlaybackError::Empty);
    }

    #[test]
    fn test_directory_expands_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        File::create(dir.path().join("b.mp4")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        File::create(dir.path().join("nested").join("a.wav")).unwrap();

        let mut playlist = Playlist::new(false, false);
        let report = playlist.load(&[dir.path()]);
        assert_eq!(report.accepted.len(), 2);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_enabling_shuffle_keeps_current() {
        let (_dir, mut playlist) = playlist_with(&["a.mp4", "b.mp4", "c.mp4"], false, false);
        playlist.next().unwrap();
        let current = playlist.current().unwrap().id;
        playlist.set_shuffle(true);
        assert_eq!(playlist.current().unwrap().id, current);
        playlist.set_shuffle(false);
        assert_eq!(playlist.current().unwrap().id, current);
    }
}
