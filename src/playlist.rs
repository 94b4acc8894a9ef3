//! Randomly-extending persistent playlist.
//!
//! The playlist is a logically infinite ordered sequence of catalog song
//! references with a movable cursor. It never duplicates song data; entries
//! are surrogate keys resolved against the catalog on demand. Whenever a
//! cursor exists, at least [`INCREMENT`] entries are kept buffered from the
//! cursor onward by appending random songs.

use std::path::Path;

use log::warn;

use crate::db_manager::{DbManager, SettingKey};

/// Minimum number of buffered entries kept from the cursor onward.
pub const INCREMENT: usize = 5;

/// Ordered song-reference sequence with a movable cursor.
#[derive(Debug, Default)]
pub struct Playlist {
    song_ids: Vec<i64>,
    /// `None` until a first operation establishes the cursor, and again
    /// after navigating past the front of the list.
    current: Option<usize>,
}

impl Playlist {
    pub fn new() -> Playlist {
        Playlist {
            song_ids: Vec::new(),
            current: None,
        }
    }

    pub fn song_ids(&self) -> &[i64] {
        &self.song_ids
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.song_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.song_ids.is_empty()
    }

    /// Appends `count` random songs, then keeps appending until the
    /// lookahead margin holds. Establishes the cursor on first use. Does
    /// nothing while the catalog has no songs.
    pub fn populate(&mut self, db: &DbManager, count: usize) -> Result<(), rusqlite::Error> {
        if !db.has_songs()? {
            return Ok(());
        }

        let cursor = match self.current {
            Some(cursor) => cursor,
            None => {
                self.current = Some(0);
                0
            }
        };

        for _ in 0..count {
            match db.get_random_song()? {
                Some(song) => self.song_ids.push(song.id),
                None => return Ok(()),
            }
        }

        while self.song_ids.len() < cursor + INCREMENT {
            match db.get_random_song()? {
                Some(song) => self.song_ids.push(song.id),
                None => return Ok(()),
            }
        }

        Ok(())
    }

    /// The song id under the cursor. Establishes the cursor on first use;
    /// `None` on an empty list or an out-of-bounds cursor.
    pub fn current_song_id(&mut self) -> Option<i64> {
        if self.song_ids.is_empty() {
            return None;
        }

        let cursor = match self.current {
            Some(cursor) => cursor,
            None => {
                self.current = Some(0);
                0
            }
        };

        self.song_ids.get(cursor).copied()
    }

    /// Moves the cursor back one entry. Returns `false` once the cursor
    /// falls off the front of the list, signalling the caller to stop
    /// playback instead of loading a song.
    pub fn previous(&mut self) -> bool {
        match self.current {
            Some(0) => {
                self.current = None;
                false
            }
            Some(cursor) => {
                self.current = Some(cursor - 1);
                true
            }
            None => false,
        }
    }

    /// Advances the cursor and restores the lookahead margin.
    pub fn next(&mut self, db: &DbManager) -> Result<(), rusqlite::Error> {
        self.current = Some(match self.current {
            Some(cursor) => cursor + 1,
            None => 0,
        });
        self.populate(db, 0)
    }

    /// Jumps the cursor to an arbitrary index and restores the lookahead
    /// margin. No bounds rejection: a forward out-of-range index is healed
    /// by the top-up while the catalog has songs.
    pub fn select(&mut self, db: &DbManager, index: usize) -> Result<(), rusqlite::Error> {
        self.current = Some(index);
        self.populate(db, 0)
    }

    /// Inserts a song directly after the cursor without moving it.
    pub fn add_next(&mut self, song_id: i64) {
        let insert_at = match self.current {
            Some(cursor) => cursor + 1,
            None => 0,
        };
        let insert_at = insert_at.min(self.song_ids.len());
        self.song_ids.insert(insert_at, song_id);
    }

    /// Removes the entry at `index`. Returns `true` when the removed entry
    /// was the current one, telling the caller to reload or stop. An
    /// out-of-range index is a no-op.
    pub fn remove(&mut self, db: &DbManager, index: usize) -> Result<bool, rusqlite::Error> {
        if index >= self.song_ids.len() {
            return Ok(false);
        }

        self.song_ids.remove(index);
        self.populate(db, 0)?;

        match self.current {
            Some(cursor) if index < cursor => {
                self.current = Some(cursor - 1);
                Ok(false)
            }
            Some(cursor) if index == cursor => Ok(true),
            _ => Ok(false),
        }
    }

    /// Drops every entry whose backing file no longer exists on disk (or
    /// whose catalog row is gone), walking the list in reverse so pending
    /// indices stay valid, then restores the lookahead margin.
    pub fn clean(&mut self, db: &DbManager) -> Result<(), rusqlite::Error> {
        for index in (0..self.song_ids.len()).rev() {
            let still_there = db
                .get_song(self.song_ids[index])?
                .map(|song| Path::new(&song.file_path).exists())
                .unwrap_or(false);
            if still_there {
                continue;
            }

            self.song_ids.remove(index);
            if let Some(cursor) = self.current {
                if index <= cursor {
                    self.current = cursor.checked_sub(1);
                }
            }
        }

        self.populate(db, 0)
    }

    /// Persists `(cursor, song ids)` to the settings store. An empty list
    /// is not saved, so a meaningless empty playlist never overwrites a
    /// previously good one.
    pub fn save(&self, db: &DbManager) -> Result<(), rusqlite::Error> {
        if self.song_ids.is_empty() {
            return Ok(());
        }

        let cursor = self.current.map(|index| index as i64).unwrap_or(-1);
        let ids = self
            .song_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        db.set_setting(SettingKey::Playlist, &format!("{cursor}|{ids}"))
    }

    /// Restores the playlist from an explicit payload, or from the settings
    /// store when none is given. An empty source leaves the state
    /// untouched; a malformed payload is dropped with a warning. Entries
    /// whose catalog row no longer exists are skipped, adjusting the
    /// restored cursor the same way [`Playlist::clean`] would.
    pub fn load(&mut self, db: &DbManager, payload: Option<&str>) -> Result<(), rusqlite::Error> {
        let stored;
        let payload = match payload {
            Some(payload) => payload,
            None => {
                stored = db.get_setting(SettingKey::Playlist)?;
                &stored
            }
        };
        if payload.is_empty() {
            return Ok(());
        }

        let Some((cursor_text, ids_text)) = payload.split_once('|') else {
            warn!("Ignoring malformed playlist payload (no cursor separator)");
            return Ok(());
        };
        let Ok(mut cursor) = cursor_text.parse::<i64>() else {
            warn!("Ignoring malformed playlist payload (bad cursor {cursor_text:?})");
            return Ok(());
        };

        let mut parsed_ids = Vec::new();
        for id_text in ids_text.split(',') {
            match id_text.parse::<i64>() {
                Ok(id) => parsed_ids.push(id),
                Err(_) => {
                    warn!("Ignoring malformed playlist payload (bad song id {id_text:?})");
                    return Ok(());
                }
            }
        }

        let mut restored = Vec::with_capacity(parsed_ids.len());
        for (position, id) in parsed_ids.into_iter().enumerate() {
            if db.get_song(id)?.is_some() {
                restored.push(id);
            } else {
                warn!("Dropping playlist entry for deleted song id {id}");
                if (position as i64) <= cursor {
                    cursor -= 1;
                }
            }
        }

        self.song_ids = restored;
        self.current = usize::try_from(cursor).ok();
        Ok(())
    }
}
