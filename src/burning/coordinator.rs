//! Media coordination - waiting for a writable disc and reloading between sessions
//!
//! The job never blocks on the drive itself. It asks a [`Drive`] for a future
//! and gets the result back as an event, so both operations stay cancelable.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;

use super::cd::{CdStatus, check_cd_status, eject_tray, load_tray};
use crate::core::{Settings, ToolPaths};
use crate::job::{JobError, Result};

/// Delay between two status checks
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drive operations the job waits on
pub trait Drive: Send + Sync {
    /// Resolves once an empty, writable medium is in the drive
    fn wait_for_empty_disc(&self) -> BoxFuture<'static, Result<()>>;

    /// Eject and reload the medium so the next session can be appended
    fn reload(&self) -> BoxFuture<'static, Result<()>>;
}

/// Poll `probe` until it reports a status accepted by `accept`
pub async fn wait_for_status<F, Fut>(
    mut probe: F,
    accept: fn(CdStatus) -> bool,
    timeout: Duration,
    interval: Duration,
) -> Result<CdStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CdStatus>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last = None;

    loop {
        match probe().await {
            Ok(status) if accept(status) => {
                log::info!("Medium ready: {:?}", status);
                return Ok(status);
            }
            Ok(status) => {
                if last != Some(status) {
                    if status.has_disc() {
                        log::info!("Waiting for medium, drive reports {:?}", status);
                    } else {
                        log::info!("Waiting for medium, the drive is empty");
                    }
                    last = Some(status);
                }
            }
            Err(e) => log::warn!("Error checking medium: {}", e),
        }

        if tokio::time::Instant::now() + interval > deadline {
            return Err(JobError::MediaState(format!(
                "no suitable medium after {} seconds",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// The real drive, driven through cdrdao and eject
#[derive(Debug, Clone)]
pub struct SystemDrive {
    cdrdao: PathBuf,
    /// Only needed between sessions, so it is looked up on first use
    eject: Option<PathBuf>,
    device: String,
    timeout: Duration,
}

impl SystemDrive {
    pub fn new(tools: &ToolPaths, device: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            cdrdao: ToolPaths::resolve(&tools.cdrdao, "cdrdao")?,
            eject: tools.eject.clone(),
            device,
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings, device: String) -> Result<Self> {
        Self::new(
            &settings.tools,
            device,
            Duration::from_secs(settings.media_wait_timeout_secs as u64),
        )
    }
}

impl Drive for SystemDrive {
    fn wait_for_empty_disc(&self) -> BoxFuture<'static, Result<()>> {
        let drive = self.clone();
        Box::pin(async move {
            log::info!("Waiting for an empty medium in {}", drive.device);
            wait_for_status(
                || check_cd_status(&drive.cdrdao, &drive.device),
                |status| status == CdStatus::Blank,
                drive.timeout,
                POLL_INTERVAL,
            )
            .await
            .map(|_| ())
        })
    }

    fn reload(&self) -> BoxFuture<'static, Result<()>> {
        let drive = self.clone();
        Box::pin(async move {
            log::info!("Reloading medium in {}", drive.device);
            let eject = ToolPaths::resolve(&drive.eject, "eject")?;
            eject_tray(&eject, &drive.device).await?;
            load_tray(&eject, &drive.device).await?;

            // a simulated first session leaves the disc blank
            wait_for_status(
                || check_cd_status(&drive.cdrdao, &drive.device),
                |status| matches!(status, CdStatus::Appendable | CdStatus::Blank),
                drive.timeout,
                POLL_INTERVAL,
            )
            .await
            .map(|_| ())
        })
    }
}
