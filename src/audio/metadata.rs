use std::fs::File;
use std::path::Path;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;

use super::detection::{audio_extension, container_name};
use crate::core::project::FRAMES_PER_SECOND;
use crate::job::{JobError, Result};

/// Duration and title of a source audio file
#[derive(Debug, Clone, PartialEq)]
pub struct TrackProbe {
    pub seconds: f64,
    pub title: Option<String>,
}

impl TrackProbe {
    /// Length in CD frames, rounded up so the last samples are never cut
    pub fn frames(&self) -> u64 {
        (self.seconds * FRAMES_PER_SECOND as f64).ceil() as u64
    }
}

/// Read duration and title from an audio file's container
pub fn probe_track(path: &Path) -> Result<TrackProbe> {
    let file = File::open(path).map_err(|e| JobError::artifact(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = audio_extension(path) {
        hint.with_extension(&ext);
    }
    log::debug!(
        "Probing {} ({})",
        path.display(),
        container_name(path).unwrap_or("unknown container")
    );

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            JobError::InvalidProject(format!("Failed to probe {}: {}", path.display(), e))
        })?;

    let mut title = probed
        .metadata
        .get()
        .and_then(|m| m.current().and_then(|rev| track_title(rev.tags())));

    let mut format = probed.format;
    if title.is_none() {
        title = format
            .metadata()
            .current()
            .and_then(|rev| track_title(rev.tags()));
    }

    let track = format.default_track().ok_or_else(|| {
        JobError::InvalidProject(format!("No audio track found in {}", path.display()))
    })?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100) as f64;
    let n_frames = track.codec_params.n_frames.ok_or_else(|| {
        JobError::InvalidProject(format!("Unknown duration of {}", path.display()))
    })?;

    Ok(TrackProbe {
        seconds: n_frames as f64 / sample_rate,
        title,
    })
}

fn track_title(tags: &[symphonia::core::meta::Tag]) -> Option<String> {
    tags.iter()
        .find(|t| t.std_key == Some(StandardTagKey::TrackTitle))
        .map(|t| t.value.to_string())
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::write_silent_wav;

    #[test]
    fn test_frames_round_up() {
        let probe = TrackProbe {
            seconds: 1.001,
            title: None,
        };
        assert_eq!(probe.frames(), 76);

        let exact = TrackProbe {
            seconds: 2.0,
            title: None,
        };
        assert_eq!(exact.frames(), 150);
    }

    #[test]
    fn test_probe_wav_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one_second.wav");
        write_silent_wav(&path, 44100);

        assert_eq!(probe_track(&path).unwrap().frames(), 75);
    }

    #[test]
    fn test_probe_missing_file() {
        let err = probe_track(Path::new("/nonexistent/track.flac")).unwrap_err();
        assert!(matches!(err, JobError::ArtifactIo { .. }));
    }
}
