//! Run state types
//!
//! - JobPhase: current phase of a mixed-mode run
//! - RunState: phase plus the flags that make cancel and error handling idempotent

use crate::core::project::Content;

/// Phase of the orchestrator's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    /// Asking the image producer for the exact image size (streaming only)
    SizeCalculation,
    /// Producing the image into its buffer file (staged only)
    ProducingImage,
    /// Decoding audio tracks into buffer files (staged only)
    ProducingAudio,
    /// Waiting for an empty medium before the first session
    WaitingForMedia,
    Writing,
    /// Ejecting and reloading between the two sessions
    SessionReload,
    Completed,
    Canceled,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Canceled | JobPhase::Failed)
    }

    pub fn display_text(&self) -> &'static str {
        match self {
            JobPhase::Idle => "Idle",
            JobPhase::SizeCalculation => "Calculating image size...",
            JobPhase::ProducingImage => "Creating image...",
            JobPhase::ProducingAudio => "Decoding audio...",
            JobPhase::WaitingForMedia => "Insert empty disc",
            JobPhase::Writing => "Writing...",
            JobPhase::SessionReload => "Reloading medium...",
            JobPhase::Completed => "Complete!",
            JobPhase::Canceled => "Canceled",
            JobPhase::Failed => "Failed",
        }
    }
}

/// Per-run state, reset at the start of every run
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub phase: JobPhase,
    pub canceled: bool,
    pub error_reported: bool,
    /// Index of the session being prepared or written
    pub session: usize,
    /// Content currently being produced or written
    pub current: Option<Content>,
}

impl RunState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True once nothing a component reports may be acted upon any more
    pub fn is_settled(&self) -> bool {
        self.canceled || self.error_reported || self.phase.is_terminal()
    }

    pub fn set_phase(&mut self, phase: JobPhase) {
        if self.phase != phase {
            log::debug!("Job phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}
