//! mixedcd - mixed-mode CD writer
//!
//! Writes an ISO9660 data track and a set of audio tracks to one CD,
//! either staged through buffer files or streamed straight to the writer.

mod audio;
mod burning;
mod core;
mod job;
mod logging;
#[cfg(test)]
mod test_fixtures;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use crate::core::{Project, Settings, TransferMode};
use crate::job::JobOutcome;

#[derive(Parser, Debug)]
#[command(name = "mixedcd", version, about = "Write a mixed-mode CD from a project file")]
struct Cli {
    /// Project description (JSON)
    project: PathBuf,

    /// Run the writer without the laser turned on
    #[arg(long)]
    simulate: bool,

    /// Stream image and audio to the writer instead of staging buffer files
    #[arg(long)]
    on_the_fly: bool,

    /// Keep the staged image and WAV files after a successful run
    #[arg(long)]
    keep_buffers: bool,

    /// Writer device, overriding the project and settings
    #[arg(long)]
    device: Option<String>,

    /// Writing speed, overriding the project and settings
    #[arg(long)]
    speed: Option<u32>,
}

impl Cli {
    fn apply(&self, project: &mut Project) {
        if self.simulate {
            project.simulate = true;
        }
        if self.on_the_fly {
            project.transfer = TransferMode::Streaming;
        }
        if self.keep_buffers {
            project.remove_buffer_files = false;
        }
        if let Some(device) = &self.device {
            project.writer.device = Some(device.clone());
        }
        if let Some(speed) = self.speed {
            project.writer.speed = Some(speed);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging();

    let settings = Settings::load();
    let mut project = match Project::load(&cli.project) {
        Ok(project) => project,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut project);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            burning::log_event(&event);
        }
    });

    let mut job = match burning::prepare_job(project, settings, tx) {
        Ok(job) => job,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let handle = job.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let report = burning::execute(&mut job).await;

    // dropping the job closes the event channel
    drop(job);
    let _ = printer.await;

    match report.outcome {
        JobOutcome::Success => ExitCode::SUCCESS,
        JobOutcome::Canceled => ExitCode::from(130),
        JobOutcome::Failed(_) => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataSource;

    fn project() -> Project {
        Project::new(
            DataSource {
                root: PathBuf::from("/srv/data"),
                volume_label: "MIXED".to_string(),
                length: 10,
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_flags_override_project() {
        let cli = Cli::parse_from([
            "mixedcd",
            "disc.json",
            "--simulate",
            "--on-the-fly",
            "--keep-buffers",
            "--device",
            "/dev/sr1",
            "--speed",
            "8",
        ]);
        let mut p = project();
        cli.apply(&mut p);

        assert!(p.simulate);
        assert_eq!(p.transfer, TransferMode::Streaming);
        assert!(!p.remove_buffer_files);
        assert_eq!(p.writer.device.as_deref(), Some("/dev/sr1"));
        assert_eq!(p.writer.speed, Some(8));
    }

    #[test]
    fn test_no_flags_keep_project() {
        let cli = Cli::parse_from(["mixedcd", "disc.json"]);
        let mut p = project();
        cli.apply(&mut p);

        assert_eq!(cli.project, PathBuf::from("disc.json"));
        assert!(!p.simulate);
        assert_eq!(p.transfer, TransferMode::Staged);
        assert!(p.remove_buffer_files);
    }
}
