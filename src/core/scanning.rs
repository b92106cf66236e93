//! Data tree scanning
//!
//! Estimates how many sectors the ISO9660 image of a directory tree will
//! take. The estimate only feeds the progress weighting; streaming writes use
//! the exact size reported by the image tool.

use std::path::Path;
use walkdir::WalkDir;

use crate::core::project::{DATA_SECTOR_BYTES, FRAMES_PER_SECOND};
use crate::job::{JobError, Result};

/// System area, volume descriptors and path tables of a small image
const ISO_OVERHEAD_SECTORS: u64 = 32;

/// Estimate the image size of a data tree in 2048-byte sectors
pub fn data_tree_sectors(root: &Path) -> Result<u64> {
    let mut sectors = ISO_OVERHEAD_SECTORS;

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            JobError::artifact(path, source)
        })?;

        if entry.file_type().is_dir() {
            // one directory record extent per directory
            sectors += 1;
        } else if entry.file_type().is_file() {
            let len = entry
                .metadata()
                .map_err(|e| {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                    JobError::artifact(entry.path(), source)
                })?
                .len();
            sectors += len.div_ceil(DATA_SECTOR_BYTES);
        }
    }

    Ok(sectors)
}

/// Format a block count as mm:ss:ff
pub fn format_msf(frames: u64) -> String {
    let minutes = frames / (60 * FRAMES_PER_SECOND);
    let seconds = (frames / FRAMES_PER_SECOND) % 60;
    let rest = frames % FRAMES_PER_SECOND;
    format!("{:02}:{:02}:{:02}", minutes, seconds, rest)
}

/// Format size in human-readable form (KB, MB, GB)
/// Uses decimal units (1 MB = 1,000,000 bytes)
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = KB * 1000;
    const GB: u64 = MB * 1000;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
