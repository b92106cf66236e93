//! Project description for a mixed-mode disc
//!
//! A project is built by the UI/config side before a run starts and stays
//! immutable for the whole run. Lengths are counted in blocks: 2048-byte
//! sectors for the data track and 2352-byte frames for audio, 75 per second.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::{is_audio_file, probe_track};
use crate::core::scanning::data_tree_sectors;
use crate::job::{JobError, Result};

/// Bytes per data sector
pub const DATA_SECTOR_BYTES: u64 = 2048;
/// Bytes per audio frame (1/75 s of 16-bit stereo 44.1 kHz)
pub const AUDIO_FRAME_BYTES: u64 = 2352;
/// Audio frames per second
pub const FRAMES_PER_SECOND: u64 = 75;

/// Where the data track goes relative to the audio tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackLayout {
    #[default]
    DataFirst,
    DataLast,
    DataSecondSession,
}

/// How produced bytes reach the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// Produce into buffer files first, then write them
    #[default]
    Staged,
    /// Produce straight into the writer's input ("on the fly")
    Streaming,
}

/// The two kinds of content on a mixed-mode disc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    Data,
    Audio,
}

impl Content {
    pub fn other(self) -> Self {
        match self {
            Content::Data => Content::Audio,
            Content::Audio => Content::Data,
        }
    }
}

/// External program that writes the disc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WritingApp {
    /// cdrdao for disc-at-once, cdrecord otherwise
    #[default]
    Auto,
    Cdrecord,
    Cdrdao,
}

/// Writer selection carried by the project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterSelection {
    #[serde(default)]
    pub app: WritingApp,
    /// Overrides the device from the settings
    #[serde(default)]
    pub device: Option<String>,
    /// Overrides the speed from the settings (0 lets the writer decide)
    #[serde(default)]
    pub speed: Option<u32>,
    #[serde(default)]
    pub dao: bool,
}

/// Filesystem tree that becomes the ISO9660 data track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub root: PathBuf,
    #[serde(default = "default_volume_label")]
    pub volume_label: String,
    /// Image size in sectors; 0 means "compute from the tree"
    #[serde(default)]
    pub length: u64,
}

fn default_volume_label() -> String {
    "MIXEDCD".to_string()
}

/// One audio track of the disc
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source: PathBuf,
    /// Length in frames; 0 means "probe the source"
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub title: Option<String>,
    /// Pregap in frames
    #[serde(default = "default_pregap")]
    pub pregap: u32,
    #[serde(default = "default_true")]
    pub copy_permitted: bool,
    #[serde(default)]
    pub preemphasis: bool,
}

fn default_pregap() -> u32 {
    150
}

fn default_true() -> bool {
    true
}

impl AudioTrack {
    pub fn new(source: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            source: source.into(),
            length,
            title: None,
            pregap: default_pregap(),
            copy_permitted: true,
            preemphasis: false,
        }
    }

    /// Title for progress messages, falling back to the file name
    pub fn display_name(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }

    /// Exact number of PCM bytes the track occupies on disc
    pub fn byte_size(&self) -> u64 {
        self.length * AUDIO_FRAME_BYTES
    }
}

/// Complete description of one mixed-mode disc
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub data: DataSource,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(default)]
    pub layout: TrackLayout,
    /// Content of the first session when `layout` is `DataSecondSession`
    #[serde(default = "default_first_session")]
    pub first_session: Content,
    #[serde(default)]
    pub transfer: TransferMode,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub writer: WriterSelection,
    /// Delete staged buffer files after a successful run
    #[serde(default = "default_true")]
    pub remove_buffer_files: bool,
}

fn default_first_session() -> Content {
    Content::Audio
}

impl Project {
    pub fn new(data: DataSource, audio_tracks: Vec<AudioTrack>) -> Self {
        Self {
            data,
            audio_tracks,
            layout: TrackLayout::default(),
            first_session: default_first_session(),
            transfer: TransferMode::default(),
            simulate: false,
            writer: WriterSelection::default(),
            remove_buffer_files: true,
        }
    }

    /// Load a project from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| JobError::InvalidProject(format!("Failed to read {}: {}", path.display(), e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| JobError::InvalidProject(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Fill in lengths and titles the project file left out
    pub fn resolve_lengths(&mut self) -> Result<()> {
        if self.data.length == 0 && self.data.root.exists() {
            self.data.length = data_tree_sectors(&self.data.root)?;
            log::debug!(
                "Data tree {} needs {} sectors",
                self.data.root.display(),
                self.data.length
            );
        }

        for track in self.audio_tracks.iter().filter(|t| !is_audio_file(&t.source)) {
            log::warn!("{} does not look like an audio file", track.source.display());
        }

        for track in self
            .audio_tracks
            .iter_mut()
            .filter(|t| t.length == 0 || t.title.is_none())
        {
            if track.length == 0 {
                let probe = probe_track(&track.source)?;
                track.length = probe.frames();
                log::debug!("Track {} is {} frames", track.source.display(), track.length);
                track.title = track.title.take().or(probe.title);
            } else if let Ok(probe) = probe_track(&track.source) {
                // titles are cosmetic
                track.title = probe.title;
            }
        }

        Ok(())
    }

    pub fn data_length(&self) -> u64 {
        self.data.length
    }

    pub fn audio_length(&self) -> u64 {
        self.audio_tracks.iter().map(|t| t.length).sum()
    }

    pub fn has_data(&self) -> bool {
        self.data_length() > 0
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty() && self.audio_length() > 0
    }

    /// Check the invariants a run relies on
    pub fn validate(&self) -> Result<()> {
        if self.data_length() + self.audio_length() == 0 {
            return Err(JobError::InvalidProject(
                "project contains neither data nor audio".to_string(),
            ));
        }

        if let Some(track) = self.audio_tracks.iter().find(|t| t.length == 0) {
            return Err(JobError::InvalidProject(format!(
                "audio track {} has no length",
                track.source.display()
            )));
        }

        if self.layout == TrackLayout::DataSecondSession && !(self.has_data() && self.has_audio()) {
            return Err(JobError::InvalidProject(
                "a second-session layout needs both audio tracks and data".to_string(),
            ));
        }

        Ok(())
    }

    /// Contents of each write session, in writing order, leaving out empty content
    pub fn sessions(&self) -> Vec<Vec<Content>> {
        let present = |c: &Content| match c {
            Content::Data => self.has_data(),
            Content::Audio => self.has_audio(),
        };

        let sessions = match self.layout {
            TrackLayout::DataFirst => vec![vec![Content::Data, Content::Audio]],
            TrackLayout::DataLast => vec![vec![Content::Audio, Content::Data]],
            TrackLayout::DataSecondSession => vec![
                vec![self.first_session],
                vec![self.first_session.other()],
            ],
        };

        sessions
            .into_iter()
            .map(|s| s.into_iter().filter(present).collect::<Vec<_>>())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Pick the writing application once for the whole run
    pub fn writing_app(&self) -> WritingApp {
        match self.writer.app {
            WritingApp::Auto if self.writer.dao => WritingApp::Cdrdao,
            WritingApp::Auto => WritingApp::Cdrecord,
            app => app,
        }
    }

    /// Number of tracks on the finished disc
    pub fn number_of_tracks(&self) -> usize {
        self.audio_tracks.len() + usize::from(self.has_data())
    }
}
