//! Track description files for cdrdao
//!
//! The job writes the file and hands its path to the writer; nothing reads
//! it back.

use std::fmt::Write;

use super::writer::{SessionLayout, TrackInput, TrackKind, TrackSource};
use crate::core::format_msf;

/// Render the toc for one session
pub fn render(session: &SessionLayout) -> String {
    let mut toc = String::new();
    let header = if session.is_two_session() {
        "CD_ROM_XA"
    } else {
        "CD_ROM"
    };
    let _ = writeln!(toc, "{}", header);

    // offset of the next streamed audio track, in frames
    let mut stream_frames = 0u64;

    for (i, track) in session.tracks.iter().enumerate() {
        let _ = writeln!(toc);
        let _ = writeln!(toc, "// Track {}: {}", i + 1, track.name);
        match track.kind {
            TrackKind::Data { xa } => write_data_track(&mut toc, track, xa),
            TrackKind::Audio {
                copy,
                preemphasis,
                pregap,
            } => {
                let _ = writeln!(toc, "TRACK AUDIO");
                let _ = writeln!(toc, "{}", if copy { "COPY" } else { "NO COPY" });
                let _ = writeln!(
                    toc,
                    "{}",
                    if preemphasis {
                        "PRE_EMPHASIS"
                    } else {
                        "NO PRE_EMPHASIS"
                    }
                );
                if i > 0 && pregap > 0 {
                    let _ = writeln!(toc, "PREGAP {}", format_msf(pregap as u64));
                }

                match &track.source {
                    TrackSource::File(path) | TrackSource::Pipe(path) => {
                        let _ = writeln!(toc, "FILE \"{}\" 0", path.display());
                    }
                    TrackSource::Stdin => {
                        let _ = writeln!(toc, "SWAP");
                        let _ = writeln!(
                            toc,
                            "FILE \"-\" {} {}",
                            format_msf(stream_frames),
                            format_msf(track.length)
                        );
                        stream_frames += track.length;
                    }
                }
            }
        }
    }

    toc
}

fn write_data_track(toc: &mut String, track: &TrackInput, xa: bool) {
    let _ = writeln!(toc, "TRACK {}", if xa { "MODE2_FORM1" } else { "MODE1" });
    match &track.source {
        TrackSource::Stdin => {
            let _ = writeln!(toc, "DATAFILE \"-\" {}", track.byte_size());
        }
        TrackSource::File(path) | TrackSource::Pipe(path) => {
            let _ = writeln!(toc, "DATAFILE \"{}\" 0", path.display());
        }
    }
}
