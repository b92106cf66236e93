//! Persisted settings shared by all runs
//!
//! Persisted to `<config dir>/mixedcd/settings.json`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::{JobError, Result};

/// Paths of the external tools. `None` means "look it up on the PATH".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default)]
    pub cdrecord: Option<PathBuf>,
    #[serde(default)]
    pub cdrdao: Option<PathBuf>,
    #[serde(default)]
    pub genisoimage: Option<PathBuf>,
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    #[serde(default)]
    pub eject: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve a tool, preferring the configured path
    pub fn resolve(configured: &Option<PathBuf>, name: &str) -> Result<PathBuf> {
        if let Some(path) = configured {
            return Ok(path.clone());
        }
        which::which(name).map_err(|e| JobError::Settings(format!("{} not found: {}", name, e)))
    }

    /// The ISO tool; mkisofs is accepted when genisoimage is missing
    pub fn image_tool(&self) -> Result<PathBuf> {
        Self::resolve(&self.genisoimage, "genisoimage")
            .or_else(|_| Self::resolve(&None, "mkisofs"))
    }
}

/// Application-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory for buffer files, named pipes and toc files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_device")]
    pub device: String,
    /// Writing speed; 0 lets the writer pick
    #[serde(default)]
    pub speed: u32,
    #[serde(default = "default_true")]
    pub burnfree: bool,
    /// How long to wait for an empty medium before giving up
    #[serde(default = "default_media_timeout")]
    pub media_wait_timeout_secs: u32,
    #[serde(default)]
    pub tools: ToolPaths,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("mixedcd")
}

fn default_device() -> String {
    "/dev/sr0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_media_timeout() -> u32 {
    120
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            device: default_device(),
            speed: 0,
            burnfree: true,
            media_wait_timeout_secs: default_media_timeout(),
            tools: ToolPaths::default(),
        }
    }
}

impl Settings {
    const SETTINGS_FILE: &'static str = "settings.json";

    /// Get the app config directory, creating it if needed
    fn get_app_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| JobError::Settings("Could not determine config directory".to_string()))?;

        let app_dir = config_dir.join("mixedcd");

        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir).map_err(|e| {
                JobError::Settings(format!("Failed to create config directory: {}", e))
            })?;
        }

        Ok(app_dir)
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(settings) => {
                log::debug!("Loaded settings from disk");
                settings
            }
            Err(e) => {
                log::debug!("Using default settings: {}", e);
                let settings = Self::default();
                // seed an editable file on first use
                if matches!(Self::settings_path(), Ok(path) if !path.exists()) {
                    if let Err(e) = settings.save() {
                        log::warn!("Could not store default settings: {}", e);
                    }
                }
                settings
            }
        }
    }

    fn settings_path() -> Result<PathBuf> {
        Ok(Self::get_app_config_dir()?.join(Self::SETTINGS_FILE))
    }

    fn try_load() -> Result<Self> {
        let settings_path = Self::settings_path()?;

        if !settings_path.exists() {
            return Err(JobError::Settings("Settings file not found".to_string()));
        }

        let contents = std::fs::read_to_string(&settings_path)
            .map_err(|e| JobError::Settings(format!("Failed to read settings: {}", e)))?;

        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| JobError::Settings(format!("Failed to parse settings: {}", e)))
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let settings_path = Self::settings_path()?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| JobError::Settings(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(&settings_path, json)
            .map_err(|e| JobError::Settings(format!("Failed to write settings: {}", e)))?;

        log::debug!("Saved settings to {:?}", settings_path);
        Ok(())
    }
}
