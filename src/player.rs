//! Playback controller state machine.
//!
//! Wraps an external audio transport behind the [`AudioTransport`] trait and
//! drives it from a persistent playlist. All state lives behind one mutex,
//! shared between the caller and a background listener thread that polls the
//! transport's event queue and advances the playlist when a track ends.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use crate::db_manager::{DbManager, LibraryItem, SettingKey};
use crate::playlist::Playlist;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MISSING_SONG_SKIP_LIMIT: usize = 8;
const DEFAULT_VOLUME: u8 = 100;

/// Playback states of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
}

/// Asynchronous signal from the audio transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    TrackEnded,
}

/// Opaque failure reported by the audio transport.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Contract of the external single-track audio engine.
pub trait AudioTransport: Send {
    fn load(&mut self, path: &Path) -> Result<(), TransportError>;
    fn play(&mut self);
    fn pause(&mut self);
    fn unpause(&mut self);
    fn stop(&mut self);
    fn unload(&mut self);
    /// Volume in the transport's own scale, 0.0 to 1.0.
    fn set_volume(&mut self, volume: f32);
    /// Position within the loaded track. May be transiently negative right
    /// after a seek on some engines.
    fn position_ms(&self) -> i64;
    fn set_position_secs(&mut self, seconds: u32);
    /// Drains one pending event from the transport's queue.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("catalog storage failed: {0}")]
    Storage(#[from] rusqlite::Error),
}

struct PlayerShared<T: AudioTransport> {
    transport: T,
    playlist: Playlist,
    state: PlayerState,
    /// Seconds already consumed before the transport's current position
    /// baseline, updated on seek.
    base_position_secs: u32,
    volume: u8,
}

impl<T: AudioTransport> PlayerShared<T> {
    fn apply_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        self.volume = volume;
        self.transport.set_volume(volume as f32 / 100.0);
    }

    /// Loads the playlist's current song into the transport, skipping over
    /// entries whose catalog row or backing file is gone. Playback starts
    /// immediately unless the controller is stopped.
    fn load_current(&mut self, db: &DbManager) -> Result<(), PlayerError> {
        for _ in 0..MISSING_SONG_SKIP_LIMIT {
            let Some(song_id) = self.playlist.current_song_id() else {
                self.stop();
                return Ok(());
            };

            let Some(song) = db.get_song(song_id)? else {
                warn!("Playlist references missing song id {}, skipping", song_id);
                self.playlist.next(db)?;
                continue;
            };

            self.base_position_secs = 0;
            match self.transport.load(Path::new(&song.file_path)) {
                Ok(()) => {
                    if self.state != PlayerState::Stopped {
                        self.transport.play();
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "Could not load {} ({}), skipping to next",
                        song.file_path, err
                    );
                    self.playlist.next(db)?;
                }
            }
        }

        warn!(
            "No loadable song after {} attempts, stopping playback",
            MISSING_SONG_SKIP_LIMIT
        );
        self.stop();
        Ok(())
    }

    fn stop(&mut self) {
        if self.state != PlayerState::Stopped {
            self.state = PlayerState::Stopped;
            self.transport.stop();
            self.transport.unload();
        }
    }

    fn next(&mut self, db: &DbManager) -> Result<(), PlayerError> {
        self.state = PlayerState::Playing;
        self.playlist.next(db)?;
        self.load_current(db)
    }
}

/// Single-track player over a persistent, randomly-extending playlist.
///
/// The playlist is restored from the settings store on construction and
/// saved back by [`Player::quit`]. One background thread polls the
/// transport's event queue and turns end-of-track events into `next`.
pub struct Player<T: AudioTransport + 'static> {
    shared: Arc<Mutex<PlayerShared<T>>>,
    db: Arc<Mutex<DbManager>>,
    listener_run: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl<T: AudioTransport + 'static> Player<T> {
    pub fn new(transport: T, db: Arc<Mutex<DbManager>>) -> Result<Self, PlayerError> {
        let mut shared = PlayerShared {
            transport,
            playlist: Playlist::new(),
            state: PlayerState::Stopped,
            base_position_secs: 0,
            volume: DEFAULT_VOLUME,
        };

        {
            let db = db.lock().expect("catalog lock poisoned");
            let stored_volume = db.get_setting(SettingKey::Volume)?;
            let volume = stored_volume
                .trim()
                .parse::<u8>()
                .ok()
                .unwrap_or(DEFAULT_VOLUME);
            shared.apply_volume(volume);
            shared.playlist.load(&db, None)?;
            shared.playlist.populate(&db, 0)?;
        }

        let shared = Arc::new(Mutex::new(shared));
        let listener_run = Arc::new(AtomicBool::new(true));
        let listener = {
            let shared = Arc::clone(&shared);
            let db = Arc::clone(&db);
            let run = Arc::clone(&listener_run);
            thread::spawn(move || run_event_listener(shared, db, run))
        };

        Ok(Self {
            shared,
            db,
            listener_run,
            listener: Some(listener),
        })
    }

    pub fn state(&self) -> PlayerState {
        self.shared.lock().expect("player state lock poisoned").state
    }

    /// Stopped -> Playing (loads the current playlist song),
    /// Playing -> Paused, Paused -> Playing.
    pub fn play_pause(&self) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        match shared.state {
            PlayerState::Stopped => {
                shared.state = PlayerState::Playing;
                let db = self.db.lock().expect("catalog lock poisoned");
                shared.playlist.populate(&db, 0)?;
                shared.load_current(&db)?;
            }
            PlayerState::Playing => {
                shared.state = PlayerState::Paused;
                shared.transport.pause();
            }
            PlayerState::Paused => {
                shared.state = PlayerState::Playing;
                shared.transport.unpause();
            }
        }
        Ok(())
    }

    /// Steps back one playlist entry; stops when already at the start.
    pub fn previous(&self) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        shared.state = PlayerState::Playing;
        shared.transport.unload();

        if shared.playlist.previous() {
            let db = self.db.lock().expect("catalog lock poisoned");
            shared.load_current(&db)?;
        } else {
            shared.stop();
        }
        Ok(())
    }

    /// Advances to the next playlist entry; the lookahead margin guarantees
    /// one exists while the catalog has songs.
    pub fn next(&self) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        shared.next(&db)
    }

    /// Jumps the playlist cursor to `index` and starts playing it.
    pub fn select(&self, index: usize) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        shared.state = PlayerState::Playing;
        shared.playlist.select(&db, index)?;
        shared.load_current(&db)
    }

    /// Stops and unloads the transport. Idempotent.
    pub fn stop(&self) {
        self.shared
            .lock()
            .expect("player state lock poisoned")
            .stop();
    }

    /// Queues one song directly after the playlist cursor.
    pub fn queue_song(&self, song_id: i64) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        if db.get_song(song_id)?.is_some() {
            shared.playlist.add_next(song_id);
        } else {
            warn!("Ignoring queue request for missing song id {}", song_id);
        }
        Ok(())
    }

    /// Queues a whole album directly after the playlist cursor, in
    /// ascending track order.
    pub fn queue_album(&self, album_id: i64) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        // Songs arrive in descending order; inserting each right after the
        // cursor reverses them back into playback order.
        for song_id in db.get_album_song_ids_reversed(album_id)? {
            shared.playlist.add_next(song_id);
        }
        Ok(())
    }

    /// Queues a browse selection: a song, an album, or an artist's whole
    /// discography.
    pub fn queue_item(&self, item: LibraryItem) -> Result<(), PlayerError> {
        match item {
            LibraryItem::Song(song_id) => self.queue_song(song_id),
            LibraryItem::Album(album_id) => self.queue_album(album_id),
            LibraryItem::Artist(artist_id) => {
                let mut shared = self.shared.lock().expect("player state lock poisoned");
                let db = self.db.lock().expect("catalog lock poisoned");
                // Albums come back oldest first; queue newest first so the
                // oldest ends up nearest the cursor.
                for album in db.get_albums(Some(artist_id))?.iter().rev() {
                    for song_id in db.get_album_song_ids_reversed(album.id)? {
                        shared.playlist.add_next(song_id);
                    }
                }
                Ok(())
            }
        }
    }

    /// Removes one playlist entry, reloading the transport when the entry
    /// was the current one.
    pub fn remove_song(&self, index: usize) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        if shared.playlist.remove(&db, index)? {
            shared.load_current(&db)?;
        }
        Ok(())
    }

    /// Prunes playlist entries whose backing file vanished from disk.
    pub fn clean_playlist(&self) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        shared.playlist.clean(&db)?;
        Ok(())
    }

    /// Seeks within the current song by unloading and reloading the
    /// transport; in-place rewind is not reliable across engines.
    pub fn seek(&self, seconds: u32) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        if shared.state == PlayerState::Stopped || shared.playlist.current_song_id().is_none() {
            return Ok(());
        }

        let db = self.db.lock().expect("catalog lock poisoned");
        let volume = shared.volume;

        shared.transport.unload();
        if shared.state == PlayerState::Paused {
            // The reload below briefly plays; mute it to avoid a crack.
            shared.transport.set_volume(0.0);
        }

        shared.load_current(&db)?;
        shared.transport.set_position_secs(seconds);

        if shared.state == PlayerState::Paused {
            shared.transport.pause();
            shared.apply_volume(volume);
        }

        shared.base_position_secs = seconds;
        Ok(())
    }

    /// Elapsed and total seconds of the current song, `(0, 0)` when
    /// stopped or nothing is selected.
    pub fn current_time(&self) -> Result<(u32, u32), PlayerError> {
        let mut shared = self.shared.lock().expect("player state lock poisoned");
        if shared.state == PlayerState::Stopped {
            return Ok((0, 0));
        }
        let Some(song_id) = shared.playlist.current_song_id() else {
            return Ok((0, 0));
        };

        let db = self.db.lock().expect("catalog lock poisoned");
        let Some(song) = db.get_song(song_id)? else {
            return Ok((0, 0));
        };

        let sub_track_secs = (shared.transport.position_ms() / 1000).max(0) as u32;
        let elapsed = sub_track_secs + shared.base_position_secs;
        Ok((elapsed, song.duration.max(0) as u32))
    }

    pub fn volume(&self) -> u8 {
        self.shared
            .lock()
            .expect("player state lock poisoned")
            .volume
    }

    /// Applies a 0-100 volume to the transport. Persisting the value to the
    /// settings store is the caller's responsibility.
    pub fn set_volume(&self, volume: u8) {
        self.shared
            .lock()
            .expect("player state lock poisoned")
            .apply_volume(volume);
    }

    /// Current playlist entries and cursor, for a playlist view.
    pub fn playlist_view(&self) -> (Vec<i64>, Option<usize>) {
        let shared = self.shared.lock().expect("player state lock poisoned");
        (
            shared.playlist.song_ids().to_vec(),
            shared.playlist.current_index(),
        )
    }

    /// Persists the playlist without tearing anything down.
    pub fn save_playlist(&self) -> Result<(), PlayerError> {
        let shared = self.shared.lock().expect("player state lock poisoned");
        let db = self.db.lock().expect("catalog lock poisoned");
        shared.playlist.save(&db)?;
        Ok(())
    }

    /// Saves the playlist, stops playback, and joins the event listener.
    /// No background activity survives this call.
    pub fn quit(&mut self) -> Result<(), PlayerError> {
        {
            let mut shared = self.shared.lock().expect("player state lock poisoned");
            let db = self.db.lock().expect("catalog lock poisoned");
            shared.playlist.save(&db)?;
            shared.stop();
        }
        self.shutdown_listener();
        Ok(())
    }

    fn shutdown_listener(&mut self) {
        self.listener_run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                error!("Transport event listener terminated with a panic");
            }
        }
    }
}

impl<T: AudioTransport + 'static> Drop for Player<T> {
    fn drop(&mut self) {
        self.shutdown_listener();
    }
}

fn run_event_listener<T: AudioTransport>(
    shared: Arc<Mutex<PlayerShared<T>>>,
    db: Arc<Mutex<DbManager>>,
    run: Arc<AtomicBool>,
) {
    while run.load(Ordering::SeqCst) {
        {
            let mut shared = shared.lock().expect("player state lock poisoned");
            while let Some(TransportEvent::TrackEnded) = shared.transport.poll_event() {
                if shared.state == PlayerState::Stopped {
                    // The user stopped playback while the track was ending
                    // on its own; the event is stale.
                    debug!("Dropping end-of-track event received while stopped");
                    continue;
                }
                let db = db.lock().expect("catalog lock poisoned");
                if let Err(err) = shared.next(&db) {
                    error!("Failed to advance after end of track: {}", err);
                }
            }
        }
        thread::sleep(EVENT_POLL_INTERVAL);
    }
}
