//! Playable-duration probing.
//!
//! Estimates a track's playable duration from the container/codec layer,
//! independently of whatever the metadata tags claim. A file whose header
//! cannot be probed simply has no known duration.

use std::fs::File;
use std::path::Path;

use log::debug;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Probes the playable duration of an audio file, in seconds.
pub fn probe_duration_secs(path: &Path) -> Option<f64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!("Duration probe could not open {}: {}", path.display(), err);
            return None;
        }
    };

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(err) => {
            debug!("Duration probe failed for {}: {}", path.display(), err);
            return None;
        }
    };

    let format = probed.format;
    let track = format.default_track()?;
    let time_base = track.codec_params.time_base?;
    let n_frames = track.codec_params.n_frames?;
    let time = time_base.calc_time(n_frames);
    Some(time.seconds as f64 + time.frac)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use super::probe_duration_secs;

    #[test]
    fn test_probe_returns_none_for_missing_file() {
        assert_eq!(probe_duration_secs(Path::new("/nonexistent/file.mp3")), None);
    }

    #[test]
    fn test_probe_returns_none_for_garbage_content() {
        let mut file = tempfile::Builder::new()
            .suffix(".mp3")
            .tempfile()
            .expect("should create temp file");
        file.write_all(b"not an mpeg frame")
            .expect("should write fixture");

        assert_eq!(probe_duration_secs(file.path()), None);
    }
}
