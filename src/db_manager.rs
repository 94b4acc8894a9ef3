//! Catalog and settings storage backed by SQLite.
//!
//! Owns the normalized Artist/Album/Genre/Song tables and the key-value
//! settings table. All upserts match on natural keys (artist/genre name,
//! album (name, artist) pair, song file path) and activate the touched row;
//! activation cascades to referenced parent rows so that mark-sweep
//! reconciliation never deletes a parent that an active song still needs.

use std::path::{Path, PathBuf};

use log::debug;
use rand::RngExt;
use rusqlite::{params, Connection, OptionalExtension, Row};

const DATABASE_FILE: &str = "library.db";

const SONG_COLUMNS: &str = "id, track, track_total, title, genre_id, album_id, \
     disc, disc_total, artist_id, year, duration, status, file_path, file_mtime, file_size";

/// One row of the artists table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistRow {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

/// One row of the genres table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreRow {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

/// One row of the albums table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRow {
    pub id: i64,
    pub name: String,
    pub artist_id: Option<i64>,
    pub year: Option<i64>,
    pub active: bool,
}

/// One row of the songs table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRow {
    pub id: i64,
    pub track: Option<i64>,
    pub track_total: Option<i64>,
    pub title: Option<String>,
    pub genre_id: Option<i64>,
    pub album_id: Option<i64>,
    pub disc: Option<i64>,
    pub disc_total: Option<i64>,
    pub artist_id: Option<i64>,
    pub year: Option<i64>,
    pub duration: i64,
    pub active: bool,
    pub file_path: String,
    pub file_mtime: i64,
    pub file_size: i64,
}

/// Field set for a song upsert, as derived from one scanned file.
#[derive(Debug, Clone, Default)]
pub struct SongUpsert {
    pub track: Option<i64>,
    pub track_total: Option<i64>,
    pub title: Option<String>,
    pub genre_id: Option<i64>,
    pub album_id: Option<i64>,
    pub disc: Option<i64>,
    pub disc_total: Option<i64>,
    pub artist_id: Option<i64>,
    pub year: Option<i64>,
    pub duration: i64,
    pub file_path: String,
    pub file_mtime: i64,
    pub file_size: i64,
}

/// Catalog entity selector for bulk status operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Artist,
    Album,
    Genre,
    Song,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Artist,
        EntityKind::Album,
        EntityKind::Genre,
        EntityKind::Song,
    ];

    /// Sweep order: songs first, then the entities they reference.
    pub const SWEEP_ORDER: [EntityKind; 4] = [
        EntityKind::Song,
        EntityKind::Album,
        EntityKind::Artist,
        EntityKind::Genre,
    ];

    fn table(self) -> &'static str {
        match self {
            EntityKind::Artist => "artists",
            EntityKind::Album => "albums",
            EntityKind::Genre => "genres",
            EntityKind::Song => "songs",
        }
    }
}

/// Durable key-value settings recognized by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    /// Semicolon-joined list of scan root directories.
    MusicDir,
    /// Serialized playlist, `"<index>|<id,id,...>"`.
    Playlist,
    /// Stringified integer volume, 0-100.
    Volume,
}

impl SettingKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::MusicDir => "music_dir",
            SettingKey::Playlist => "playlist",
            SettingKey::Volume => "volume",
        }
    }
}

/// Item selected from a library browse view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryItem {
    Song(i64),
    Album(i64),
    Artist(i64),
}

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    /// Opens (creating if needed) the catalog database at the default
    /// per-user application data location.
    pub fn open_in_app_data() -> Result<Self, rusqlite::Error> {
        let data_dir = dirs::data_dir()
            .expect("Could not find data directory")
            .join("tonearm");

        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).expect("Could not create data directory");
        }

        Self::open(data_dir.join(DATABASE_FILE))
    }

    /// Opens (creating if needed) the catalog database at an explicit path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    /// Opens a throwaway in-memory catalog, used by tests.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS artists (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                status INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS genres (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                status INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS albums (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                artist_id INTEGER REFERENCES artists(id),
                year INTEGER,
                status INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY,
                track INTEGER,
                track_total INTEGER,
                title TEXT,
                genre_id INTEGER REFERENCES genres(id),
                album_id INTEGER REFERENCES albums(id),
                disc INTEGER,
                disc_total INTEGER,
                artist_id INTEGER REFERENCES artists(id),
                year INTEGER,
                duration INTEGER NOT NULL,
                status INTEGER NOT NULL,
                file_path TEXT NOT NULL UNIQUE,
                file_mtime INTEGER NOT NULL,
                file_size INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        // The catalog is single-writer and rebuildable from a scan, so
        // durability is traded for scan throughput.
        self.conn
            .query_row("PRAGMA journal_mode = OFF", [], |_row| Ok(()))?;
        self.conn.pragma_update(None, "synchronous", 0)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Upserts

    /// Finds or creates an artist by exact name. `None` name is a no-op.
    pub fn upsert_artist(&self, name: Option<&str>) -> Result<Option<ArtistRow>, rusqlite::Error> {
        let Some(name) = name else {
            return Ok(None);
        };

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM artists WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                self.conn
                    .execute("UPDATE artists SET status = 1 WHERE id = ?1", params![id])?;
                id
            }
            None => {
                self.conn.execute(
                    "INSERT INTO artists (name, status) VALUES (?1, 1)",
                    params![name],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        Ok(Some(ArtistRow {
            id,
            name: name.to_string(),
            active: true,
        }))
    }

    /// Finds or creates a genre by exact name. `None` name is a no-op.
    pub fn upsert_genre(&self, name: Option<&str>) -> Result<Option<GenreRow>, rusqlite::Error> {
        let Some(name) = name else {
            return Ok(None);
        };

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM genres WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                self.conn
                    .execute("UPDATE genres SET status = 1 WHERE id = ?1", params![id])?;
                id
            }
            None => {
                self.conn.execute(
                    "INSERT INTO genres (name, status) VALUES (?1, 1)",
                    params![name],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        Ok(Some(GenreRow {
            id,
            name: name.to_string(),
            active: true,
        }))
    }

    /// Finds or creates an album by its `(name, artist)` pair, comparing the
    /// artist reference NULL-aware. On a match, a known incoming year lowers
    /// the stored year to the minimum of the two.
    pub fn upsert_album(
        &self,
        name: Option<&str>,
        artist_id: Option<i64>,
        year: Option<i64>,
    ) -> Result<Option<AlbumRow>, rusqlite::Error> {
        let Some(name) = name else {
            return Ok(None);
        };

        let existing: Option<(i64, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT id, year FROM albums WHERE name = ?1 AND artist_id IS ?2",
                params![name, artist_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, year) = match existing {
            Some((id, stored_year)) => {
                let merged_year = match (stored_year, year) {
                    (Some(stored), Some(incoming)) => Some(stored.min(incoming)),
                    (stored, None) => stored,
                    (None, incoming) => incoming,
                };
                self.conn.execute(
                    "UPDATE albums SET year = ?1, status = 1 WHERE id = ?2",
                    params![merged_year, id],
                )?;
                (id, merged_year)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO albums (name, artist_id, year, status) VALUES (?1, ?2, ?3, 1)",
                    params![name, artist_id, year],
                )?;
                (self.conn.last_insert_rowid(), year)
            }
        };

        Ok(Some(AlbumRow {
            id,
            name: name.to_string(),
            artist_id,
            year,
            active: true,
        }))
    }

    /// Creates or updates the song row matching `file_path`.
    pub fn upsert_song(&self, song: &SongUpsert) -> Result<SongRow, rusqlite::Error> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM songs WHERE file_path = ?1",
                params![song.file_path],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                // TODO confirm intent: the update path overwrites track_total
                // with the track number; preserved for compatibility with
                // existing catalogs.
                self.conn.execute(
                    "UPDATE songs SET track = ?1, track_total = ?1, title = ?2, genre_id = ?3, \
                     album_id = ?4, disc = ?5, disc_total = ?6, artist_id = ?7, year = ?8, \
                     duration = ?9, status = 1, file_mtime = ?10, file_size = ?11 \
                     WHERE id = ?12",
                    params![
                        song.track,
                        song.title,
                        song.genre_id,
                        song.album_id,
                        song.disc,
                        song.disc_total,
                        song.artist_id,
                        song.year,
                        song.duration,
                        song.file_mtime,
                        song.file_size,
                        id
                    ],
                )?;
                id
            }
            None => {
                self.conn.execute(
                    "INSERT INTO songs (track, track_total, title, genre_id, album_id, disc, \
                     disc_total, artist_id, year, duration, status, file_path, file_mtime, \
                     file_size) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?13)",
                    params![
                        song.track,
                        song.track_total,
                        song.title,
                        song.genre_id,
                        song.album_id,
                        song.disc,
                        song.disc_total,
                        song.artist_id,
                        song.year,
                        song.duration,
                        song.file_path,
                        song.file_mtime,
                        song.file_size
                    ],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        match self.get_song(id)? {
            Some(row) => Ok(row),
            None => Err(rusqlite::Error::QueryReturnedNoRows),
        }
    }

    // ------------------------------------------------------------------
    // Activation and mark-sweep

    /// Returns the stored modification time for a file path, or `None` when
    /// the path is unknown (a caller comparing against a real mtime then
    /// always sees a difference). Finding the row reactivates it and its
    /// referenced artist/album/genre.
    pub fn get_file_mtime(&self, file_path: &str) -> Result<Option<i64>, rusqlite::Error> {
        let found: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT id, file_mtime FROM songs WHERE file_path = ?1",
                params![file_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match found {
            Some((id, file_mtime)) => {
                self.set_song_active(id)?;
                Ok(Some(file_mtime))
            }
            None => Ok(None),
        }
    }

    /// Marks a song active and cascades activation to its referenced
    /// artist, genre, and album (and the album's own artist).
    pub fn set_song_active(&self, song_id: i64) -> Result<(), rusqlite::Error> {
        let refs: Option<(Option<i64>, Option<i64>, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT artist_id, album_id, genre_id FROM songs WHERE id = ?1",
                params![song_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((artist_id, album_id, genre_id)) = refs else {
            debug!("set_song_active: no song row with id {}", song_id);
            return Ok(());
        };

        self.conn.execute(
            "UPDATE songs SET status = 1 WHERE id = ?1",
            params![song_id],
        )?;

        if let Some(artist_id) = artist_id {
            self.conn.execute(
                "UPDATE artists SET status = 1 WHERE id = ?1",
                params![artist_id],
            )?;
        }

        if let Some(genre_id) = genre_id {
            self.conn.execute(
                "UPDATE genres SET status = 1 WHERE id = ?1",
                params![genre_id],
            )?;
        }

        if let Some(album_id) = album_id {
            self.set_album_active(album_id)?;
        }

        Ok(())
    }

    /// Marks an album active, cascading to its artist.
    pub fn set_album_active(&self, album_id: i64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE albums SET status = 1 WHERE id = ?1",
            params![album_id],
        )?;

        let artist_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT artist_id FROM albums WHERE id = ?1",
                params![album_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        if let Some(artist_id) = artist_id {
            self.conn.execute(
                "UPDATE artists SET status = 1 WHERE id = ?1",
                params![artist_id],
            )?;
        }

        Ok(())
    }

    /// Resets every row of one entity table to inactive. Run once per
    /// entity at the start of a scan to establish the deletion baseline.
    pub fn mark_all_inactive(&self, kind: EntityKind) -> Result<(), rusqlite::Error> {
        self.conn
            .execute(&format!("UPDATE {} SET status = 0", kind.table()), [])?;
        Ok(())
    }

    /// Deletes every row of one entity table still marked inactive.
    /// Returns the number of rows swept.
    pub fn delete_inactive(&self, kind: EntityKind) -> Result<usize, rusqlite::Error> {
        self.conn
            .execute(&format!("DELETE FROM {} WHERE status = 0", kind.table()), [])
    }

    /// Reclaims storage space after a sweep.
    pub fn vacuum(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Browse queries

    /// Artists ordered by name, optionally narrowed to those referenced by
    /// at least one album and/or at least one song.
    pub fn get_artists(
        &self,
        has_album: bool,
        has_song: bool,
    ) -> Result<Vec<ArtistRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, status FROM artists \
             WHERE (?1 = 0 OR EXISTS (SELECT 1 FROM albums WHERE albums.artist_id = artists.id)) \
             AND (?2 = 0 OR EXISTS (SELECT 1 FROM songs WHERE songs.artist_id = artists.id)) \
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![has_album as i64, has_song as i64], |row| {
            Ok(ArtistRow {
                id: row.get(0)?,
                name: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
            })
        })?;
        rows.collect()
    }

    /// Genres ordered by name.
    pub fn get_genres(&self) -> Result<Vec<GenreRow>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, status FROM genres ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(GenreRow {
                id: row.get(0)?,
                name: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
            })
        })?;
        rows.collect()
    }

    /// Albums ordered by `(year, name)`, optionally narrowed to one artist.
    pub fn get_albums(&self, artist_id: Option<i64>) -> Result<Vec<AlbumRow>, rusqlite::Error> {
        fn map_row(row: &Row) -> Result<AlbumRow, rusqlite::Error> {
            Ok(AlbumRow {
                id: row.get(0)?,
                name: row.get(1)?,
                artist_id: row.get(2)?,
                year: row.get(3)?,
                active: row.get::<_, i64>(4)? != 0,
            })
        }

        match artist_id {
            Some(artist_id) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, artist_id, year, status FROM albums \
                     WHERE artist_id = ?1 ORDER BY year, name",
                )?;
                let rows = stmt.query_map(params![artist_id], map_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, artist_id, year, status FROM albums ORDER BY year, name",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect()
            }
        }
    }

    /// Songs ordered by `(disc, track, title)`, optionally narrowed to one
    /// album.
    pub fn get_songs(&self, album_id: Option<i64>) -> Result<Vec<SongRow>, rusqlite::Error> {
        match album_id {
            Some(album_id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {SONG_COLUMNS} FROM songs WHERE album_id = ?1 \
                     ORDER BY disc, track, title"
                ))?;
                let rows = stmt.query_map(params![album_id], Self::song_from_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {SONG_COLUMNS} FROM songs ORDER BY disc, track, title"
                ))?;
                let rows = stmt.query_map([], Self::song_from_row)?;
                rows.collect()
            }
        }
    }

    /// Distinct years present across all songs, ascending.
    pub fn get_years(&self) -> Result<Vec<i64>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT year FROM songs WHERE year IS NOT NULL ORDER BY year")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    // ------------------------------------------------------------------
    // Playlist and player support

    pub fn has_songs(&self) -> Result<bool, rusqlite::Error> {
        let exists: i64 =
            self.conn
                .query_row("SELECT EXISTS (SELECT 1 FROM songs)", [], |row| row.get(0))?;
        Ok(exists != 0)
    }

    /// One uniformly random song, or `None` on an empty catalog.
    pub fn get_random_song(&self) -> Result<Option<SongRow>, rusqlite::Error> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        if count == 0 {
            return Ok(None);
        }

        let offset = rand::rng().random_range(0..count);
        self.conn
            .query_row(
                &format!("SELECT {SONG_COLUMNS} FROM songs ORDER BY id LIMIT 1 OFFSET ?1"),
                params![offset],
                Self::song_from_row,
            )
            .optional()
    }

    pub fn get_song(&self, song_id: i64) -> Result<Option<SongRow>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?1"),
                params![song_id],
                Self::song_from_row,
            )
            .optional()
    }

    /// Song ids of one album ordered by `(track DESC, title DESC)`. Queuing
    /// these one-by-one directly after the playlist cursor yields ascending
    /// playback order.
    pub fn get_album_song_ids_reversed(&self, album_id: i64) -> Result<Vec<i64>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM songs WHERE album_id = ?1 ORDER BY track DESC, title DESC")?;
        let rows = stmt.query_map(params![album_id], |row| row.get(0))?;
        rows.collect()
    }

    fn song_from_row(row: &Row) -> Result<SongRow, rusqlite::Error> {
        Ok(SongRow {
            id: row.get(0)?,
            track: row.get(1)?,
            track_total: row.get(2)?,
            title: row.get(3)?,
            genre_id: row.get(4)?,
            album_id: row.get(5)?,
            disc: row.get(6)?,
            disc_total: row.get(7)?,
            artist_id: row.get(8)?,
            year: row.get(9)?,
            duration: row.get(10)?,
            active: row.get::<_, i64>(11)? != 0,
            file_path: row.get(12)?,
            file_mtime: row.get(13)?,
            file_size: row.get(14)?,
        })
    }

    // ------------------------------------------------------------------
    // Settings

    /// Returns the stored value for a settings key, or the empty string
    /// when the key was never written.
    pub fn get_setting(&self, key: SettingKey) -> Result<String, rusqlite::Error> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }

    pub fn set_setting(&self, key: SettingKey, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key.as_str(), value],
        )?;
        Ok(())
    }
}

/// Default on-disk location of the catalog database, when resolvable.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("tonearm").join(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_upsert(file_path: &str, file_mtime: i64) -> SongUpsert {
        SongUpsert {
            title: Some("<unknown>".to_string()),
            duration: 180,
            file_path: file_path.to_string(),
            file_mtime,
            file_size: 1024,
            ..SongUpsert::default()
        }
    }

    #[test]
    fn test_upsert_artist_is_stable_by_name() {
        let db = DbManager::open_in_memory().expect("in-memory db");

        let first = db.upsert_artist(Some("X")).unwrap().unwrap();
        let second = db.upsert_artist(Some("X")).unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.get_artists(false, false).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_artist_with_no_name_is_a_noop() {
        let db = DbManager::open_in_memory().expect("in-memory db");

        assert!(db.upsert_artist(None).unwrap().is_none());
        assert!(db.get_artists(false, false).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_album_merges_year_to_minimum() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let artist = db.upsert_artist(Some("A")).unwrap().unwrap();

        let first = db
            .upsert_album(Some("Album"), Some(artist.id), Some(2001))
            .unwrap()
            .unwrap();
        let second = db
            .upsert_album(Some("Album"), Some(artist.id), Some(1999))
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.year, Some(1999));
        let albums = db.get_albums(Some(artist.id)).unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].year, Some(1999));

        // A later rescan without a year keeps the stored one.
        let third = db
            .upsert_album(Some("Album"), Some(artist.id), None)
            .unwrap()
            .unwrap();
        assert_eq!(third.year, Some(1999));
    }

    #[test]
    fn test_upsert_album_distinguishes_missing_artist() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let artist = db.upsert_artist(Some("A")).unwrap().unwrap();

        let with_artist = db
            .upsert_album(Some("Album"), Some(artist.id), None)
            .unwrap()
            .unwrap();
        let without_artist = db.upsert_album(Some("Album"), None, None).unwrap().unwrap();
        let without_artist_again = db.upsert_album(Some("Album"), None, None).unwrap().unwrap();

        assert_ne!(with_artist.id, without_artist.id);
        assert_eq!(without_artist.id, without_artist_again.id);
        assert_eq!(db.get_albums(None).unwrap().len(), 2);
    }

    #[test]
    fn test_upsert_song_update_overwrites_track_total_with_track() {
        let db = DbManager::open_in_memory().expect("in-memory db");

        let mut upsert = song_upsert("/m/a.mp3", 100);
        upsert.track = Some(3);
        upsert.track_total = Some(12);
        let created = db.upsert_song(&upsert).unwrap();
        assert_eq!(created.track_total, Some(12));

        upsert.track = Some(4);
        upsert.track_total = Some(9);
        upsert.file_mtime = 150;
        let updated = db.upsert_song(&upsert).unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.track, Some(4));
        assert_eq!(updated.track_total, Some(4));
        assert_eq!(updated.file_mtime, 150);
    }

    #[test]
    fn test_get_file_mtime_returns_none_for_unknown_path() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        assert_eq!(db.get_file_mtime("/nope.mp3").unwrap(), None);
    }

    #[test]
    fn test_get_file_mtime_reactivates_song_lineage() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let artist = db.upsert_artist(Some("Band")).unwrap().unwrap();
        let genre = db.upsert_genre(Some("Rock")).unwrap().unwrap();
        let album = db
            .upsert_album(Some("Album"), Some(artist.id), Some(2000))
            .unwrap()
            .unwrap();
        let mut upsert = song_upsert("/m/a.mp3", 100);
        upsert.artist_id = Some(artist.id);
        upsert.genre_id = Some(genre.id);
        upsert.album_id = Some(album.id);
        db.upsert_song(&upsert).unwrap();

        for kind in EntityKind::ALL {
            db.mark_all_inactive(kind).unwrap();
        }

        assert_eq!(db.get_file_mtime("/m/a.mp3").unwrap(), Some(100));

        assert!(db.get_songs(None).unwrap()[0].active);
        assert!(db.get_artists(false, false).unwrap()[0].active);
        assert!(db.get_genres().unwrap()[0].active);
        assert!(db.get_albums(None).unwrap()[0].active);
    }

    #[test]
    fn test_album_activation_cascades_to_its_artist() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let artist = db.upsert_artist(Some("Band")).unwrap().unwrap();
        let album = db
            .upsert_album(Some("Album"), Some(artist.id), None)
            .unwrap()
            .unwrap();

        db.mark_all_inactive(EntityKind::Artist).unwrap();
        db.mark_all_inactive(EntityKind::Album).unwrap();
        db.set_album_active(album.id).unwrap();

        assert!(db.get_albums(None).unwrap()[0].active);
        assert!(db.get_artists(false, false).unwrap()[0].active);
    }

    #[test]
    fn test_sweep_deletes_only_inactive_rows() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let kept_artist = db.upsert_artist(Some("Kept")).unwrap().unwrap();
        let gone_artist = db.upsert_artist(Some("Gone")).unwrap().unwrap();
        let mut kept = song_upsert("/m/kept.mp3", 100);
        kept.artist_id = Some(kept_artist.id);
        db.upsert_song(&kept).unwrap();
        let mut gone = song_upsert("/m/gone.mp3", 100);
        gone.artist_id = Some(gone_artist.id);
        db.upsert_song(&gone).unwrap();

        for kind in EntityKind::ALL {
            db.mark_all_inactive(kind).unwrap();
        }
        db.get_file_mtime("/m/kept.mp3").unwrap();

        for kind in EntityKind::SWEEP_ORDER {
            db.delete_inactive(kind).unwrap();
        }

        let songs = db.get_songs(None).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].file_path, "/m/kept.mp3");
        let artists = db.get_artists(false, false).unwrap();
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "Kept");
    }

    #[test]
    fn test_get_songs_orders_by_disc_track_title() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let album = db.upsert_album(Some("Album"), None, None).unwrap().unwrap();

        for (path, disc, track, title) in [
            ("/m/c.mp3", Some(2), Some(1), "Cc"),
            ("/m/a.mp3", Some(1), Some(2), "Aa"),
            ("/m/b.mp3", Some(1), Some(1), "Bb"),
        ] {
            let mut upsert = song_upsert(path, 100);
            upsert.album_id = Some(album.id);
            upsert.disc = disc;
            upsert.track = track;
            upsert.title = Some(title.to_string());
            db.upsert_song(&upsert).unwrap();
        }

        let titles: Vec<String> = db
            .get_songs(Some(album.id))
            .unwrap()
            .into_iter()
            .filter_map(|song| song.title)
            .collect();
        assert_eq!(titles, ["Bb", "Aa", "Cc"]);
    }

    #[test]
    fn test_get_artists_filters_by_references() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let with_album = db.upsert_artist(Some("AlbumArtist")).unwrap().unwrap();
        let with_song = db.upsert_artist(Some("SongArtist")).unwrap().unwrap();
        db.upsert_artist(Some("Bare")).unwrap().unwrap();
        db.upsert_album(Some("Album"), Some(with_album.id), None)
            .unwrap();
        let mut upsert = song_upsert("/m/a.mp3", 100);
        upsert.artist_id = Some(with_song.id);
        db.upsert_song(&upsert).unwrap();

        let names = |rows: Vec<ArtistRow>| -> Vec<String> {
            rows.into_iter().map(|artist| artist.name).collect()
        };

        assert_eq!(
            names(db.get_artists(false, false).unwrap()),
            ["AlbumArtist", "Bare", "SongArtist"]
        );
        assert_eq!(names(db.get_artists(true, false).unwrap()), ["AlbumArtist"]);
        assert_eq!(names(db.get_artists(false, true).unwrap()), ["SongArtist"]);
        assert!(names(db.get_artists(true, true).unwrap()).is_empty());
    }

    #[test]
    fn test_get_years_is_distinct_and_sorted() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        for (path, year) in [
            ("/m/a.mp3", Some(2003)),
            ("/m/b.mp3", Some(1999)),
            ("/m/c.mp3", Some(2003)),
            ("/m/d.mp3", None),
        ] {
            let mut upsert = song_upsert(path, 100);
            upsert.year = year;
            db.upsert_song(&upsert).unwrap();
        }

        assert_eq!(db.get_years().unwrap(), [1999, 2003]);
    }

    #[test]
    fn test_get_random_song_on_empty_catalog() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        assert!(!db.has_songs().unwrap());
        assert!(db.get_random_song().unwrap().is_none());
    }

    #[test]
    fn test_get_random_song_returns_a_row() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        db.upsert_song(&song_upsert("/m/a.mp3", 100)).unwrap();
        db.upsert_song(&song_upsert("/m/b.mp3", 100)).unwrap();

        for _ in 0..16 {
            assert!(db.get_random_song().unwrap().is_some());
        }
    }

    #[test]
    fn test_album_song_ids_reversed_yield_descending_tracks() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        let album = db.upsert_album(Some("Album"), None, None).unwrap().unwrap();
        let mut ids = Vec::new();
        for track in 1..=3 {
            let mut upsert = song_upsert(&format!("/m/{track}.mp3"), 100);
            upsert.album_id = Some(album.id);
            upsert.track = Some(track);
            ids.push(db.upsert_song(&upsert).unwrap().id);
        }

        let reversed = db.get_album_song_ids_reversed(album.id).unwrap();
        assert_eq!(reversed, ids.iter().rev().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_settings_round_trip_and_default() {
        let db = DbManager::open_in_memory().expect("in-memory db");

        assert_eq!(db.get_setting(SettingKey::Volume).unwrap(), "");

        db.set_setting(SettingKey::Volume, "80").unwrap();
        assert_eq!(db.get_setting(SettingKey::Volume).unwrap(), "80");

        db.set_setting(SettingKey::Volume, "35").unwrap();
        assert_eq!(db.get_setting(SettingKey::Volume).unwrap(), "35");
    }
}
