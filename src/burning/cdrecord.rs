//! cdrecord command line and progress output

use super::writer::{
    ProgressParser, SessionLayout, TrackKind, TrackSource, WriterConfig, percent_of, track_megabytes,
};
use crate::job::{Severity, WriterEvent};

/// kB/s written at 1x
pub(crate) const SINGLE_SPEED_KBS: f64 = 176.0;

/// Build the cdrecord argument list for one session
pub fn arguments(config: &WriterConfig) -> Vec<String> {
    let session = &config.session;
    let mut args = vec![
        "-v".to_string(),
        "-gracetime=2".to_string(),
        format!("dev={}", config.device),
    ];

    if config.speed > 0 {
        args.push(format!("speed={}", config.speed));
    }
    if config.simulate {
        args.push("-dummy".to_string());
    }
    if config.dao {
        args.push("-dao".to_string());
    }
    if config.burnfree {
        args.push("driveropts=burnfree".to_string());
    }
    if session.is_multisession() {
        args.push("-multi".to_string());
    }
    if session.is_appended() && config.is_streaming() {
        args.push("-waiti".to_string());
    }

    let mut audio_mode = false;
    for track in &session.tracks {
        match track.kind {
            TrackKind::Data { xa } => {
                audio_mode = false;
                args.push(if xa { "-xa1" } else { "-data" }.to_string());
                match &track.source {
                    TrackSource::Stdin => {
                        args.push(format!("-tsize={}s", track.length));
                        args.push("-".to_string());
                    }
                    TrackSource::File(path) | TrackSource::Pipe(path) => {
                        args.push(path.display().to_string())
                    }
                }
            }
            TrackKind::Audio {
                copy,
                preemphasis,
                pregap,
            } => {
                if !audio_mode {
                    args.push("-audio".to_string());
                    audio_mode = true;
                }
                args.push(if copy { "-copy" } else { "-nocopy" }.to_string());
                args.push(if preemphasis { "-preemp" } else { "-nopreemp" }.to_string());
                args.push(format!("-pregap={}", pregap));

                match &track.source {
                    TrackSource::File(path) => args.push(path.display().to_string()),
                    // streamed PCM is little endian
                    TrackSource::Pipe(path) => {
                        args.push("-swab".to_string());
                        args.push(format!("-tsize={}f", track.length));
                        args.push(path.display().to_string());
                    }
                    TrackSource::Stdin => {
                        args.push("-swab".to_string());
                        args.push(format!("-tsize={}f", track.length));
                        args.push("-".to_string());
                    }
                }
            }
        }
    }

    args
}

/// A parsed "Track 01: 12 of 50 MB written (fifo 100%) [buf 99%] 4.0x." line
#[derive(Debug, Clone, PartialEq)]
struct TrackLine {
    track: usize,
    written: f64,
    size: Option<f64>,
    buffer: Option<u8>,
    speed: Option<f64>,
}

fn parse_track_line(line: &str) -> Option<TrackLine> {
    let rest = line.strip_prefix("Track ")?;
    let (number, rest) = rest.split_once(':')?;
    let track: usize = number.trim().parse().ok()?;
    if !rest.contains("written") {
        return None;
    }

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let written: f64 = tokens.first()?.parse().ok()?;
    let size = match tokens.get(1) {
        Some(&"of") => tokens.get(2).and_then(|t| t.parse().ok()),
        _ => None,
    };
    let buffer = rest
        .find("[buf")
        .and_then(|i| leading_percent(&rest[i + 4..]));
    let speed = tokens.iter().rev().find_map(|t| {
        t.strip_suffix("x.")
            .or_else(|| t.strip_suffix('x'))
            .and_then(|v| v.parse::<f64>().ok())
    });

    Some(TrackLine {
        track,
        written,
        size,
        buffer,
        speed,
    })
}

/// "  99%] ..." -> 99
pub(crate) fn leading_percent(s: &str) -> Option<u8> {
    let s = s.trim_start();
    let end = s.find('%')?;
    s[..end].trim().parse::<u32>().ok().map(|p| p.min(100) as u8)
}

/// Progress state of one cdrecord run
#[derive(Debug, Clone)]
pub struct CdrecordProgress {
    track_mb: Vec<f64>,
    total_mb: f64,
    current: usize,
}

impl CdrecordProgress {
    pub fn new(session: &SessionLayout) -> Self {
        let track_mb = track_megabytes(session);
        let total_mb = track_mb.iter().sum();
        Self {
            track_mb,
            total_mb,
            current: 0,
        }
    }
}

impl ProgressParser for CdrecordProgress {
    fn parse_line(&mut self, line: &str) -> Vec<WriterEvent> {
        let mut events = Vec::new();

        if let Some(progress) = parse_track_line(line) {
            if progress.track != self.current {
                self.current = progress.track;
                events.push(WriterEvent::NextTrack {
                    current: progress.track,
                    total: self.track_mb.len(),
                });
            }

            let before: f64 = self
                .track_mb
                .iter()
                .take(progress.track.saturating_sub(1))
                .sum();
            events.push(WriterEvent::Percent(percent_of(
                before + progress.written,
                self.total_mb,
            )));

            let size = progress.size.unwrap_or_else(|| {
                self.track_mb
                    .get(progress.track.saturating_sub(1))
                    .copied()
                    .unwrap_or(0.0)
            });
            events.push(WriterEvent::SubPercent(percent_of(progress.written, size)));

            if let Some(buffer) = progress.buffer {
                events.push(WriterEvent::Buffer(buffer));
            }
            if let Some(speed) = progress.speed {
                events.push(WriterEvent::Throughput((speed * SINGLE_SPEED_KBS) as u32));
            }
        } else if line.starts_with("Fixating") {
            events.push(WriterEvent::Info("Fixating".to_string(), Severity::Status));
        } else if line.starts_with("Starting new track") {
            log::debug!("cdrecord: {}", line);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burning::writer::WriterInput;
    use crate::core::WritingApp;
    use crate::test_fixtures::{audio_input, data_input, session_layout};
    use std::path::PathBuf;

    fn config(session: SessionLayout, input: WriterInput) -> WriterConfig {
        WriterConfig {
            app: WritingApp::Cdrecord,
            device: "/dev/sr0".to_string(),
            speed: 8,
            simulate: false,
            burnfree: true,
            dao: false,
            session,
            input,
            toc_file: None,
        }
    }

    #[test]
    fn test_staged_data_first_arguments() {
        let session = session_layout(
            vec![
                data_input(TrackSource::File(PathBuf::from("/tmp/image.iso")), 100, false),
                audio_input(TrackSource::File(PathBuf::from("/tmp/t1.wav")), 750),
                audio_input(TrackSource::File(PathBuf::from("/tmp/t2.wav")), 750),
            ],
            0,
            1,
        );
        let args = arguments(&config(session, WriterInput::Files));

        assert_eq!(
            args,
            vec![
                "-v",
                "-gracetime=2",
                "dev=/dev/sr0",
                "speed=8",
                "driveropts=burnfree",
                "-data",
                "/tmp/image.iso",
                "-audio",
                "-copy",
                "-nopreemp",
                "-pregap=150",
                "/tmp/t1.wav",
                "-copy",
                "-nopreemp",
                "-pregap=150",
                "/tmp/t2.wav",
            ]
        );
    }

    #[test]
    fn test_streaming_arguments_use_stdin_and_fifos() {
        let session = session_layout(
            vec![
                audio_input(TrackSource::Pipe(PathBuf::from("/tmp/t1.fifo")), 750),
                data_input(TrackSource::Stdin, 100, false),
            ],
            0,
            1,
        );
        let args = arguments(&config(session, WriterInput::Stream { size_bytes: 204800 }));
        let joined = args.join(" ");

        assert!(joined.contains("-audio -copy -nopreemp -pregap=150 -swab -tsize=750f /tmp/t1.fifo"));
        assert!(joined.ends_with("-data -tsize=100s -"));
    }

    #[test]
    fn test_two_session_flags() {
        let first = session_layout(
            vec![audio_input(TrackSource::File(PathBuf::from("/tmp/t1.wav")), 750)],
            0,
            2,
        );
        let args = arguments(&config(first, WriterInput::Files));
        assert!(args.contains(&"-multi".to_string()));
        assert!(!args.contains(&"-waiti".to_string()));

        let second = session_layout(vec![data_input(TrackSource::Stdin, 100, true)], 1, 2);
        let args = arguments(&config(second, WriterInput::Stream { size_bytes: 204800 }));
        assert!(!args.contains(&"-multi".to_string()));
        assert!(args.contains(&"-waiti".to_string()));
        assert!(args.contains(&"-xa1".to_string()));
    }

    #[test]
    fn test_simulate_and_nocopy() {
        let mut track = audio_input(TrackSource::File(PathBuf::from("/tmp/t1.wav")), 750);
        track.kind = TrackKind::Audio {
            copy: false,
            preemphasis: true,
            pregap: 0,
        };
        let mut cfg = config(session_layout(vec![track], 0, 1), WriterInput::Files);
        cfg.simulate = true;
        cfg.speed = 0;
        cfg.burnfree = false;

        let args = arguments(&cfg);
        assert!(args.contains(&"-dummy".to_string()));
        assert!(args.contains(&"-nocopy".to_string()));
        assert!(args.contains(&"-preemp".to_string()));
        assert!(args.contains(&"-pregap=0".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("speed=")));
        assert!(!args.contains(&"driveropts=burnfree".to_string()));
    }

    #[test]
    fn test_parse_track_line() {
        let line = "Track 02:   12 of   50 MB written (fifo 100%) [buf  99%]   4.0x.";
        let parsed = parse_track_line(line).unwrap();
        assert_eq!(parsed.track, 2);
        assert_eq!(parsed.written, 12.0);
        assert_eq!(parsed.size, Some(50.0));
        assert_eq!(parsed.buffer, Some(99));
        assert_eq!(parsed.speed, Some(4.0));
    }

    #[test]
    fn test_parse_ignores_summary_lines() {
        assert!(parse_track_line("Track 01: Total bytes read/written: 1000/1000").is_none());
        assert!(parse_track_line("Starting new track at sector: 0").is_none());
    }

    #[test]
    fn test_progress_events() {
        // two tracks of 1 MiB each
        let session = session_layout(
            vec![
                data_input(TrackSource::Stdin, 512, false),
                data_input(TrackSource::Stdin, 512, false),
            ],
            0,
            1,
        );
        let mut progress = CdrecordProgress::new(&session);

        let events = progress.parse_line("Track 02:    0 of    1 MB written (fifo 100%) [buf  50%]   8.0x.");
        assert!(matches!(events[0], WriterEvent::NextTrack { current: 2, total: 2 }));
        assert!(matches!(events[1], WriterEvent::Percent(50)));
        assert!(matches!(events[2], WriterEvent::SubPercent(0)));
        assert!(matches!(events[3], WriterEvent::Buffer(50)));
        assert!(matches!(events[4], WriterEvent::Throughput(1408)));

        // same track again: no new NextTrack
        let events = progress.parse_line("Track 02:    1 of    1 MB written.");
        assert!(matches!(events[0], WriterEvent::Percent(100)));
        assert!(matches!(events[1], WriterEvent::SubPercent(100)));
    }

    #[test]
    fn test_fixating_is_reported() {
        let session = session_layout(vec![data_input(TrackSource::Stdin, 512, false)], 0, 1);
        let mut progress = CdrecordProgress::new(&session);
        let events = progress.parse_line("Fixating...");
        assert!(matches!(&events[0], WriterEvent::Info(msg, Severity::Status) if msg == "Fixating"));
    }
}
