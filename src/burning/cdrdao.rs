//! cdrdao command line and progress output

use std::path::Path;

use super::cdrecord::{SINGLE_SPEED_KBS, leading_percent};
use super::writer::{ProgressParser, SessionLayout, WriterConfig, percent_of, track_megabytes};
use crate::job::{Severity, WriterEvent};

/// Build the `cdrdao write` argument list for one session
pub fn arguments(config: &WriterConfig, toc: &Path) -> Vec<String> {
    let mut args = vec![
        "write".to_string(),
        "--device".to_string(),
        config.device.clone(),
        "-n".to_string(),
    ];

    if config.speed > 0 {
        args.push("--speed".to_string());
        args.push(config.speed.to_string());
    }
    if config.simulate {
        args.push("--simulate".to_string());
    }
    if config.session.is_multisession() {
        args.push("--multi".to_string());
    }
    args.push("--buffer-under-run-protection".to_string());
    args.push(if config.burnfree { "1" } else { "0" }.to_string());
    args.push(toc.display().to_string());

    args
}

/// Progress state of one cdrdao run
#[derive(Debug, Clone)]
pub struct CdrdaoProgress {
    track_mb: Vec<f64>,
    total_mb: f64,
    current: usize,
}

impl CdrdaoProgress {
    pub fn new(session: &SessionLayout) -> Self {
        let track_mb = track_megabytes(session);
        let total_mb = track_mb.iter().sum();
        Self {
            track_mb,
            total_mb,
            current: 0,
        }
    }

    fn track_start(&self, track: usize) -> f64 {
        self.track_mb.iter().take(track.saturating_sub(1)).sum()
    }
}

/// "Wrote 12 of 50 MB (Buffers 100%  98%)." -> (12, 50, [100, 98])
fn parse_wrote_line(line: &str) -> Option<(f64, f64, Vec<u8>)> {
    let rest = line.strip_prefix("Wrote ")?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let written: f64 = tokens.first()?.parse().ok()?;
    if tokens.get(1) != Some(&"of") {
        return None;
    }
    let size: f64 = tokens.get(2)?.parse().ok()?;

    let buffers = rest
        .find("Buffers")
        .map(|i| {
            rest[i + "Buffers".len()..]
                .split_whitespace()
                .filter_map(leading_percent)
                .collect()
        })
        .unwrap_or_default();

    Some((written, size, buffers))
}

/// "Writing track 02 (mode AUDIO/AUDIO )..." -> 2
fn parse_track_start(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("Writing track ")?;
    rest.split_whitespace().next()?.parse().ok()
}

/// "Starting write at speed 8..." -> 8
fn parse_speed(line: &str) -> Option<f64> {
    let rest = line.strip_prefix("Starting write at speed ")?;
    rest.trim_end_matches('.').trim().parse().ok()
}

impl ProgressParser for CdrdaoProgress {
    fn parse_line(&mut self, line: &str) -> Vec<WriterEvent> {
        let mut events = Vec::new();

        if let Some(track) = parse_track_start(line) {
            if track != self.current {
                self.current = track;
                events.push(WriterEvent::NextTrack {
                    current: track,
                    total: self.track_mb.len(),
                });
            }
        } else if let Some((written, size, buffers)) = parse_wrote_line(line) {
            let whole = if size > 0.0 { size } else { self.total_mb };
            events.push(WriterEvent::Percent(percent_of(written, whole)));

            if self.current > 0 {
                let start = self.track_start(self.current);
                let length = self
                    .track_mb
                    .get(self.current - 1)
                    .copied()
                    .unwrap_or(0.0);
                events.push(WriterEvent::SubPercent(percent_of(written - start, length)));
            }

            // second figure is the drive buffer, the first the fifo
            if let Some(fill) = buffers.get(1).or_else(|| buffers.first()) {
                events.push(WriterEvent::Buffer(*fill));
            }
        } else if let Some(speed) = parse_speed(line) {
            events.push(WriterEvent::Throughput((speed * SINGLE_SPEED_KBS) as u32));
        } else if line.starts_with("Flushing cache") {
            events.push(WriterEvent::Info("Fixating".to_string(), Severity::Status));
        }

        events
    }
}
