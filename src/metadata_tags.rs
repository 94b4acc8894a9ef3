//! Tag readers backed by `lofty`, plus parsers for raw tag values.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use lofty::config::ParseOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};

/// Raw tag values read from one audio file. Every field is optional; a
/// default record stands in for a file with no readable tag header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRecord {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    /// Date string as stored in the tag, either a bare year or `YYYY-MM-DD`.
    pub date: Option<String>,
    /// Track number string, `"N"` or `"N/M"`.
    pub track_number: Option<String>,
    /// Disc number string, `"N"` or `"N/M"`.
    pub disc_number: Option<String>,
}

/// Failure to open or parse a file's tag header.
#[derive(Debug, thiserror::Error)]
#[error("failed to read tags from {}: {source}", path.display())]
pub struct TagReadError {
    pub path: PathBuf,
    source: lofty::error::LoftyError,
}

fn first_non_empty_value<F>(
    primary_tag: Option<&Tag>,
    tags: &[Tag],
    mut extractor: F,
) -> Option<String>
where
    F: FnMut(&Tag) -> Option<String>,
{
    if let Some(tag) = primary_tag {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    for tag in tags {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    None
}

/// Reads the raw tag record of one file. Audio properties are not parsed;
/// the playable duration comes from the independent probe in
/// [`crate::audio_probe`].
pub fn read_tag_record(path: &Path) -> Result<TagRecord, TagReadError> {
    let parse_options = ParseOptions::new().read_properties(false);
    let tagged_file = Probe::open(path)
        .and_then(|probe| probe.options(parse_options).read())
        .map_err(|source| TagReadError {
            path: path.to_path_buf(),
            source,
        })?;

    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    Ok(TagRecord {
        title: first_non_empty_value(primary_tag, tags, |tag| {
            tag.title().map(Cow::into_owned)
        }),
        artist: first_non_empty_value(primary_tag, tags, |tag| {
            tag.artist().map(Cow::into_owned)
        }),
        album: first_non_empty_value(primary_tag, tags, |tag| {
            tag.album().map(Cow::into_owned)
        }),
        album_artist: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(ItemKey::AlbumArtist).map(str::to_string)
        }),
        genre: first_non_empty_value(primary_tag, tags, |tag| {
            tag.genre().map(Cow::into_owned)
        }),
        date: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(ItemKey::RecordingDate)
                .or_else(|| tag.get_string(ItemKey::Year))
                .map(str::to_string)
        }),
        track_number: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(ItemKey::TrackNumber)
                .map(str::to_string)
                .or_else(|| tag.track().map(|value| value.to_string()))
        }),
        disc_number: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(ItemKey::DiscNumber)
                .map(str::to_string)
                .or_else(|| tag.disk().map(|value| value.to_string()))
        }),
    })
}

/// Splits an `"N"` or `"N/M"` tag value into `(number, total)`.
pub fn split_number_pair(value: &str) -> (Option<i64>, Option<i64>) {
    match value.split_once('/') {
        Some((number, total)) => (parse_int(number), parse_int(total)),
        None => (parse_int(value), None),
    }
}

fn parse_int(text: &str) -> Option<i64> {
    text.trim().parse().ok()
}

/// Parses a year from a date tag value: either a bare integer or the year
/// component of a `YYYY-MM-DD` calendar date.
pub fn parse_year(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return trimmed.parse().ok();
    }

    let mut parts = trimmed.splitn(3, '-');
    let year = parts.next()?;
    let month = parts.next()?;
    let day = parts.next()?;
    let all_digits = [year, month, day]
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()));
    if year.len() == 4 && month.len() == 2 && day.len() == 2 && all_digits {
        let month_number: u32 = month.parse().ok()?;
        let day_number: u32 = day.parse().ok()?;
        if (1..=12).contains(&month_number) && (1..=31).contains(&day_number) {
            return year.parse().ok();
        }
    }

    None
}
