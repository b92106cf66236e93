//! Audio source detection by file extension

use std::path::Path;

/// Extensions the decoder is expected to handle, with the container behind them
const AUDIO_CONTAINERS: &[(&str, &str)] = &[
    ("mp3", "MPEG audio"),
    ("flac", "FLAC"),
    ("wav", "RIFF WAVE"),
    ("aiff", "AIFF"),
    ("aif", "AIFF"),
    ("ogg", "Ogg"),
    ("opus", "Ogg"),
    ("m4a", "MP4"),
    ("aac", "ADTS"),
    ("wv", "WavPack"),
];

/// Lowercased extension of `path`, if it names a known audio container
pub fn audio_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    AUDIO_CONTAINERS
        .iter()
        .any(|(known, _)| *known == ext)
        .then_some(ext)
}

/// Container name for log messages
pub fn container_name(path: &Path) -> Option<&'static str> {
    let ext = audio_extension(path)?;
    AUDIO_CONTAINERS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, name)| *name)
}

pub fn is_audio_file(path: &Path) -> bool {
    audio_extension(path).is_some()
}
