//! Mixed-mode workflow execution
//!
//! Wires the real producers, writers and drive into a [`MixedJob`] and runs
//! it. The job itself knows nothing about external programs; this is the
//! only place that picks them.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc::UnboundedSender;

use super::coordinator::SystemDrive;
use super::iso::IsoImager;
use super::writer::ProcessWriterFactory;
use crate::audio::AudioDecoder;
use crate::core::{DATA_SECTOR_BYTES, Project, Settings, ToolPaths, format_msf, format_size};
use crate::job::{JobEvent, JobOutcome, JobParts, MixedJob, Result, Severity};

/// What happened during one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: JobOutcome,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished - self.started
    }

    pub fn summary(&self) -> String {
        let secs = self.elapsed().num_seconds();
        let verdict = match &self.outcome {
            JobOutcome::Success => "completed".to_string(),
            JobOutcome::Canceled => "canceled".to_string(),
            JobOutcome::Failed(reason) => format!("failed: {}", reason),
        };
        format!("Job {} after {}:{:02}", verdict, secs / 60, secs % 60)
    }
}

/// Build the real collaborators for a project
pub fn build_parts(project: &Project, settings: &Settings) -> Result<JobParts> {
    let tools = &settings.tools;
    let image_tool = if project.has_data() {
        tools.image_tool()?
    } else {
        // never started without data
        tools.genisoimage.clone().unwrap_or_else(|| "genisoimage".into())
    };
    let ffmpeg = if project.has_audio() {
        ToolPaths::resolve(&tools.ffmpeg, "ffmpeg")?
    } else {
        tools.ffmpeg.clone().unwrap_or_else(|| "ffmpeg".into())
    };
    let device = project
        .writer
        .device
        .clone()
        .unwrap_or_else(|| settings.device.clone());

    Ok(JobParts {
        image: Box::new(IsoImager::new(image_tool, project.data.clone())),
        audio: Box::new(AudioDecoder::new(ffmpeg, project.audio_tracks.clone())),
        writers: Box::new(ProcessWriterFactory::new(tools.clone())),
        drive: Arc::new(SystemDrive::from_settings(settings, device)?),
    })
}

/// Resolve lengths, then build a job around the real collaborators
pub fn prepare_job(
    mut project: Project,
    settings: Settings,
    events: UnboundedSender<JobEvent>,
) -> Result<MixedJob> {
    project.resolve_lengths()?;
    log::info!(
        "Project: data {} ({} sectors), audio {} in {} tracks",
        format_size(project.data_length() * DATA_SECTOR_BYTES),
        project.data_length(),
        format_msf(project.audio_length()),
        project.audio_tracks.len()
    );

    let parts = build_parts(&project, &settings)?;
    Ok(MixedJob::new(project, settings, parts, events))
}

/// Run a prepared job to its end
pub async fn execute(job: &mut MixedJob) -> RunReport {
    let started = Local::now();
    let outcome = job.run().await;
    let report = RunReport {
        outcome,
        started,
        finished: Local::now(),
    };
    log::info!("{} ({})", report.summary(), job.phase().display_text());
    report
}

/// One log line per job event
pub fn log_event(event: &JobEvent) {
    match event {
        JobEvent::Started => log::info!("Job started"),
        JobEvent::NewTask(task) => log::info!("== {} ==", task),
        JobEvent::NewSubTask(task) => log::info!("{}", task),
        JobEvent::InfoMessage(text, severity) => match severity {
            Severity::Error => log::error!("{}", text),
            Severity::Warning => log::warn!("{}", text),
            Severity::Info | Severity::Status | Severity::Process => log::info!("{}", text),
        },
        JobEvent::Percent(p) => log::info!("Overall progress: {}%", p),
        JobEvent::SubPercent(p) => log::debug!("Task progress: {}%", p),
        JobEvent::BufferStatus(fill) => log::debug!("Drive buffer: {}%", fill),
        JobEvent::WritingSpeed(kbs) => log::debug!("Writing speed: {} kB/s", kbs),
        JobEvent::Canceled => log::warn!("Job canceled"),
        JobEvent::Finished(ok) => log::info!("Job finished, success: {}", ok),
    }
}
