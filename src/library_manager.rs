//! Incremental library scanning and reconciliation.
//!
//! A scan is one full mark-sweep pass: every catalog row starts inactive,
//! every file seen during the walk reactivates (and, when changed, updates)
//! its row, and whatever is still inactive afterwards is deleted. Files whose
//! modification time matches the stored value are skipped without touching
//! the metadata extractor, which is what keeps rescans of a large library
//! cheap.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::audio_probe;
use crate::db_manager::{DbManager, EntityKind, SettingKey, SongUpsert};
use crate::metadata_tags::{self, parse_year, split_number_pair, TagRecord};

const SUPPORTED_AUDIO_EXTENSION: &str = "mp3";

/// Placeholder title for files with no usable title tag.
pub const UNKNOWN_TITLE: &str = "<unknown>";

/// Source of raw tag records and playable durations. The production
/// implementation reads real files; tests substitute a canned one.
pub trait MetadataExtractor: Send + Sync {
    /// Raw tag record, or `None` when the file has no readable tag header.
    fn read_tags(&self, path: &Path) -> Option<TagRecord>;

    /// Playable duration in seconds, or `None` when probing fails.
    fn probe_duration_secs(&self, path: &Path) -> Option<f64>;
}

/// Extractor over the real tag and duration probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagFileExtractor;

impl MetadataExtractor for TagFileExtractor {
    fn read_tags(&self, path: &Path) -> Option<TagRecord> {
        match metadata_tags::read_tag_record(path) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!("No readable tag header: {}", err);
                None
            }
        }
    }

    fn probe_duration_secs(&self, path: &Path) -> Option<f64> {
        audio_probe::probe_duration_secs(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("catalog storage failed during scan: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Outcome counters for one scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Candidate audio files seen during the walk.
    pub scanned_files: usize,
    /// Files that were new or changed and went through metadata extraction.
    pub extracted_files: usize,
    /// Catalog rows deleted by the sweep.
    pub swept_rows: usize,
    pub elapsed: Duration,
}

fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(SUPPORTED_AUDIO_EXTENSION))
        .unwrap_or(false)
}

fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut pending_directories = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Scan failed to read {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "Scan failed to read an entry in {}: {}",
                        directory.display(),
                        err
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Scan failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }

            if file_type.is_file() && is_supported_audio_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort_unstable();
    files
}

/// Drives mark-sweep reconciliation scans against an injected catalog.
pub struct LibraryManager<E: MetadataExtractor = TagFileExtractor> {
    db: Arc<Mutex<DbManager>>,
    extractor: E,
}

impl LibraryManager<TagFileExtractor> {
    /// Creates a scanner over the real file-based extractor.
    pub fn new(db: Arc<Mutex<DbManager>>) -> Self {
        Self::with_extractor(db, TagFileExtractor)
    }
}

impl<E: MetadataExtractor> LibraryManager<E> {
    pub fn with_extractor(db: Arc<Mutex<DbManager>>, extractor: E) -> Self {
        Self { db, extractor }
    }

    /// Scan roots currently persisted in the settings store.
    pub fn scan_roots(&self) -> Result<Vec<PathBuf>, ScanError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let stored = db.get_setting(SettingKey::MusicDir)?;
        Ok(stored
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Persists the scan root list as a semicolon-joined setting.
    pub fn set_scan_roots(&self, roots: &[PathBuf]) -> Result<(), ScanError> {
        let joined = roots
            .iter()
            .map(|root| root.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(";");
        let db = self.db.lock().expect("catalog lock poisoned");
        db.set_setting(SettingKey::MusicDir, &joined)?;
        Ok(())
    }

    /// Runs a scan over the persisted root list.
    pub fn scan_configured(&self) -> Result<ScanSummary, ScanError> {
        let roots = self.scan_roots()?;
        self.scan(&roots)
    }

    /// Runs one full reconciliation pass over the given root directories.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ScanSummary, ScanError> {
        let scan_started = Instant::now();
        let mut summary = ScanSummary::default();

        {
            let db = self.db.lock().expect("catalog lock poisoned");
            for kind in EntityKind::ALL {
                db.mark_all_inactive(kind)?;
            }
        }

        for root in roots {
            if !root.is_dir() {
                warn!(
                    "Scan root does not exist or is not a directory, skipping: {}",
                    root.display()
                );
                continue;
            }

            info!("Scanning {}", root.display());
            let root_started = Instant::now();
            let files = collect_audio_files(root);
            for file in &files {
                self.scan_file(file, &mut summary)?;
            }
            info!(
                "Successfully scanned {} file(s) under {} in {:.2}s",
                files.len(),
                root.display(),
                root_started.elapsed().as_secs_f64()
            );
        }

        {
            let db = self.db.lock().expect("catalog lock poisoned");
            for kind in EntityKind::SWEEP_ORDER {
                summary.swept_rows += db.delete_inactive(kind)?;
            }
            if summary.swept_rows > 0 {
                info!("Swept {} stale catalog row(s)", summary.swept_rows);
            }
            db.vacuum()?;
        }

        summary.elapsed = scan_started.elapsed();
        Ok(summary)
    }

    fn scan_file(&self, path: &Path, summary: &mut ScanSummary) -> Result<(), ScanError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("Skipping vanished file {}: {}", path.display(), err);
                return Ok(());
            }
        };

        let file_mtime = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        let file_size = metadata.len() as i64;
        let path_string = path.to_string_lossy().to_string();
        summary.scanned_files += 1;

        // The lookup reactivates a known row and its artist/album/genre as a
        // side effect, so an unchanged file survives the sweep.
        let stored_mtime = {
            let db = self.db.lock().expect("catalog lock poisoned");
            db.get_file_mtime(&path_string)?
        };
        if stored_mtime == Some(file_mtime) {
            return Ok(());
        }

        let tags = self.extractor.read_tags(path).unwrap_or_default();
        let duration = match self.extractor.probe_duration_secs(path) {
            Some(duration) => duration,
            None => {
                debug!("No playable duration for {}, storing 0", path.display());
                0.0
            }
        };

        let (track, track_total) = tags
            .track_number
            .as_deref()
            .map(split_number_pair)
            .unwrap_or((None, None));
        let (disc, disc_total) = tags
            .disc_number
            .as_deref()
            .map(split_number_pair)
            .unwrap_or((None, None));
        let year = tags.date.as_deref().and_then(parse_year);
        let title = tags
            .title
            .clone()
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

        let db = self.db.lock().expect("catalog lock poisoned");
        let album_artist = db.upsert_artist(tags.album_artist.as_deref())?;
        let song_artist = db.upsert_artist(tags.artist.as_deref())?;
        let genre = db.upsert_genre(tags.genre.as_deref())?;
        // Albums are keyed to the album artist, not the per-track artist.
        let album = db.upsert_album(
            tags.album.as_deref(),
            album_artist.as_ref().map(|artist| artist.id),
            year,
        )?;

        db.upsert_song(&SongUpsert {
            track,
            track_total,
            title: Some(title),
            genre_id: genre.as_ref().map(|genre| genre.id),
            album_id: album.as_ref().map(|album| album.id),
            disc,
            disc_total,
            artist_id: song_artist.as_ref().map(|artist| artist.id),
            year,
            duration: duration as i64,
            file_path: path_string,
            file_mtime,
            file_size,
        })?;

        summary.extracted_files += 1;
        Ok(())
    }
}
