//! Drive status and tray control using cdrdao and eject

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::job::{JobError, Result};

/// Status of the medium in the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdStatus {
    /// No disc inserted, or the drive is not ready yet
    NoDisc,
    /// Blank disc ready to write
    Blank,
    /// Disc with an open session that can take another one
    Appendable,
    /// Closed disc, cannot be written
    Closed,
}

impl CdStatus {
    pub fn has_disc(self) -> bool {
        self != CdStatus::NoDisc
    }
}

/// Interpret the output of `cdrdao disk-info`
pub fn parse_disk_info(output: &str) -> CdStatus {
    let lower = output.to_lowercase();
    if lower.contains("unit not ready") || lower.contains("no disk") || lower.contains("medium not present") {
        return CdStatus::NoDisc;
    }

    let field = |name: &str| {
        lower
            .lines()
            .find(|l| l.trim_start().starts_with(name))
            .and_then(|l| l.split_once(':'))
            .map(|(_, value)| value.trim().starts_with("yes"))
    };

    match (field("cd-r empty"), field("appendable")) {
        (Some(true), _) => CdStatus::Blank,
        (_, Some(true)) => CdStatus::Appendable,
        (Some(false), _) | (_, Some(false)) => CdStatus::Closed,
        (None, None) => CdStatus::NoDisc,
    }
}

/// Check the status of the medium in `device`
pub async fn check_cd_status(cdrdao: &Path, device: &str) -> Result<CdStatus> {
    let output = Command::new(cdrdao)
        .args(["disk-info", "--device", device])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| JobError::MediaState(format!("Failed to execute cdrdao: {}", e)))?;

    // cdrdao prints the report on stderr
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(parse_disk_info(&text))
}

/// Open the tray
pub async fn eject_tray(eject: &Path, device: &str) -> Result<()> {
    run_eject(eject, &[device]).await
}

/// Close the tray
pub async fn load_tray(eject: &Path, device: &str) -> Result<()> {
    run_eject(eject, &["-t", device]).await
}

async fn run_eject(eject: &Path, args: &[&str]) -> Result<()> {
    log::debug!("{} {}", eject.display(), args.join(" "));
    let status = Command::new(eject)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| JobError::MediaState(format!("Failed to execute eject: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(JobError::MediaState(format!("eject exited with {}", status)))
    }
}
