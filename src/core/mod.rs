//! Core project model and state
//!
//! This module contains:
//! - The project description a run is built from
//! - Persisted settings (temp dir, device, tool paths)
//! - Run phase and state flags
//! - Data tree scanning for image size estimates

pub mod project;
pub mod scanning;
mod settings;
mod state;

pub use project::{
    AudioTrack, Content, DataSource, Project, TrackLayout, TransferMode,
    WritingApp, AUDIO_FRAME_BYTES, DATA_SECTOR_BYTES,
};
pub use scanning::{format_msf, format_size};
pub use settings::{Settings, ToolPaths};
pub use state::{JobPhase, RunState};
