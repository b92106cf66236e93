//! Progress weighting
//!
//! Every stage reports its own 0-100 percent. The job maps those onto one
//! overall percent using the audio share of the disc, computed once when the
//! run starts.

use crate::core::{Content, Project, TrackLayout, TransferMode};

/// Audio share of the whole run, `audio / (audio + data)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWeight {
    audio: f64,
}

impl ProgressWeight {
    pub fn from_project(project: &Project) -> Self {
        Self::from_lengths(project.data_length(), project.audio_length())
    }

    pub fn from_lengths(data: u64, audio: u64) -> Self {
        let total = data + audio;
        let audio = if total == 0 {
            0.0
        } else {
            audio as f64 / total as f64
        };
        Self {
            audio: audio.clamp(0.0, 1.0),
        }
    }

    pub fn audio(&self) -> f64 {
        self.audio
    }

    pub fn data(&self) -> f64 {
        1.0 - self.audio
    }

    pub fn of(&self, content: Content) -> f64 {
        match content {
            Content::Audio => self.audio(),
            Content::Data => self.data(),
        }
    }
}

/// Maps stage percentages onto the overall percent and keeps it monotonic
#[derive(Debug, Clone)]
pub struct ProgressModel {
    weight: ProgressWeight,
    transfer: TransferMode,
    two_sessions: bool,
    /// Share of the session written first
    first_share: f64,
    last: Option<u8>,
}

impl ProgressModel {
    pub fn new(project: &Project) -> Self {
        let weight = ProgressWeight::from_project(project);
        let two_sessions = project.layout == TrackLayout::DataSecondSession;
        Self {
            weight,
            transfer: project.transfer,
            two_sessions,
            first_share: weight.of(project.first_session),
            last: None,
        }
    }

    pub fn weight(&self) -> ProgressWeight {
        self.weight
    }

    /// Image producer percent. Only surfaced in staged mode, where the image is produced first.
    pub fn image_produced(&self, p: u8) -> Option<f64> {
        match self.transfer {
            TransferMode::Staged => Some(p as f64 * self.weight.data() * 0.5),
            TransferMode::Streaming => None,
        }
    }

    /// Audio producer percent. Only surfaced in staged mode, after the image is done.
    pub fn audio_produced(&self, p: u8) -> Option<f64> {
        match self.transfer {
            TransferMode::Staged => {
                Some(self.weight.data() * 50.0 + p as f64 * self.weight.audio() * 0.5)
            }
            TransferMode::Streaming => None,
        }
    }

    /// Writer percent for the given session index
    pub fn written(&self, session: usize, p: u8) -> f64 {
        let p = p as f64;
        let w = self.first_share;
        match (self.transfer, self.two_sessions) {
            (TransferMode::Streaming, true) if session == 0 => p * w,
            (TransferMode::Streaming, true) => 100.0 * w + (1.0 - w) * p,
            (TransferMode::Streaming, false) => p,
            (TransferMode::Staged, true) if session == 0 => 50.0 + p * w * 0.5,
            (TransferMode::Staged, true) => 50.0 + 50.0 * w + p * (1.0 - w) * 0.5,
            (TransferMode::Staged, false) => 50.0 + p / 2.0,
        }
    }

    /// Turn a mapped value into the next percent to publish, if it moves forward
    pub fn advance(&mut self, value: f64) -> Option<u8> {
        let percent = value.clamp(0.0, 100.0) as u8;
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}
