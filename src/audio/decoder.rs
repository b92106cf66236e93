//! Audio producer backed by ffmpeg
//!
//! Every track is decoded to raw 16-bit little-endian stereo PCM at 44.1 kHz
//! and cut or padded to exactly the track's length in frames, so the bytes
//! delivered always match what the writer was told to expect.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::core::{AUDIO_FRAME_BYTES, AudioTrack};
use crate::job::{ChunkGate, Producer, ProducerEvent, ProducerSender, Severity};

/// 28 frames per chunk
const CHUNK_BYTES: usize = AUDIO_FRAME_BYTES as usize * 28;

/// Decodes the audio tracks of a project one after another
pub struct AudioDecoder {
    ffmpeg: PathBuf,
    tracks: Vec<AudioTrack>,
    gate: ChunkGate,
    task: Option<JoinHandle<()>>,
}

impl AudioDecoder {
    pub fn new(ffmpeg: PathBuf, tracks: Vec<AudioTrack>) -> Self {
        Self {
            ffmpeg,
            tracks,
            gate: ChunkGate::new(),
            task: None,
        }
    }
}

impl Producer for AudioDecoder {
    fn start(&mut self, events: ProducerSender) {
        self.gate = ChunkGate::new();
        let gate = self.gate.clone();
        let ffmpeg = self.ffmpeg.clone();
        let tracks = self.tracks.clone();

        self.task = Some(tokio::spawn(async move {
            let result = decode_tracks(&ffmpeg, &tracks, &gate, &events).await;
            if gate.is_canceled() {
                log::debug!("Audio decoding stopped after cancel");
                return;
            }
            match result {
                Ok(()) => {
                    events.send(ProducerEvent::Finished(true));
                }
                Err(reason) => {
                    log::error!("Audio decoding failed: {}", reason);
                    events.send(ProducerEvent::Info(reason, Severity::Warning));
                    events.send(ProducerEvent::Finished(false));
                }
            }
        }));
    }

    fn resume(&mut self) {
        self.gate.resume();
    }

    fn cancel(&mut self) {
        self.gate.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// ffmpeg arguments producing raw CD audio on stdout
pub fn decode_arguments(source: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        source.display().to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-".to_string(),
    ]
}

/// Tracks overall and per-track percentages, reporting only changes
struct DecodeProgress {
    total: u64,
    done: u64,
    percent: Option<u8>,
    sub_percent: Option<u8>,
}

impl DecodeProgress {
    fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            percent: None,
            sub_percent: None,
        }
    }

    fn advance(&mut self, bytes: u64, track_done: u64, track_total: u64, events: &ProducerSender) {
        self.done += bytes;

        let percent = ratio(self.done, self.total);
        if self.percent != Some(percent) {
            self.percent = Some(percent);
            events.send(ProducerEvent::Percent(percent));
        }

        let sub = ratio(track_done, track_total);
        if self.sub_percent != Some(sub) {
            self.sub_percent = Some(sub);
            events.send(ProducerEvent::SubPercent(sub));
        }
    }
}

fn ratio(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 100;
    }
    (part.min(whole) * 100 / whole) as u8
}

async fn decode_tracks(
    ffmpeg: &Path,
    tracks: &[AudioTrack],
    gate: &ChunkGate,
    events: &ProducerSender,
) -> Result<(), String> {
    let total_bytes = tracks.iter().map(|t| t.byte_size()).sum();
    let mut progress = DecodeProgress::new(total_bytes);

    for (i, track) in tracks.iter().enumerate() {
        events.send(ProducerEvent::NextTrack {
            index: i + 1,
            total: tracks.len(),
        });
        progress.sub_percent = None;

        if !decode_track(ffmpeg, track, gate, events, &mut progress).await? {
            return Ok(());
        }
    }

    Ok(())
}

/// Decode one track. Ok(false) means the job stopped listening.
async fn decode_track(
    ffmpeg: &Path,
    track: &AudioTrack,
    gate: &ChunkGate,
    events: &ProducerSender,
    progress: &mut DecodeProgress,
) -> Result<bool, String> {
    let target = track.byte_size();
    log::info!(
        "Decoding {} ({} bytes)",
        track.source.display(),
        target
    );

    let mut child = Command::new(ffmpeg)
        .args(decode_arguments(&track.source))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to execute ffmpeg: {}", e))?;
    gate.process().register(child.id());

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| "ffmpeg has no output".to_string())?;
    let mut stderr_task = child.stderr.take().map(|stderr| tokio::spawn(last_line(stderr)));

    let mut delivered = 0u64;
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut exited = false;

    while delivered < target {
        let want = (target - delivered).min(CHUNK_BYTES as u64) as usize;
        let chunk = if exited {
            vec![0u8; want]
        } else {
            let n = stdout
                .read(&mut buf[..want])
                .await
                .map_err(|e| format!("Failed to read decoded audio: {}", e))?;
            if n == 0 {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| format!("Error waiting for ffmpeg: {}", e))?;
                gate.process().clear();

                if !status.success() {
                    let reason = match stderr_task.take() {
                        Some(task) => task.await.ok().flatten(),
                        None => None,
                    };
                    return Err(format!(
                        "Could not decode {}: {}",
                        track.display_name(),
                        reason.unwrap_or_else(|| format!("ffmpeg exited with {}", status))
                    ));
                }

                // the source is shorter than announced
                exited = true;
                log::debug!(
                    "{} is {} bytes short, padding with silence",
                    track.source.display(),
                    target - delivered
                );
                continue;
            }
            buf[..n].to_vec()
        };

        let len = chunk.len() as u64;
        if !gate.send_chunk(events, chunk).await {
            gate.process().kill();
            return Ok(false);
        }
        delivered += len;
        progress.advance(len, delivered, target, events);
    }

    if !exited {
        // anything past the announced length is cut
        drop(stdout);
        gate.process().kill();
        let _ = child.wait().await;
        gate.process().clear();
    }

    Ok(true)
}

/// Last non-empty line of ffmpeg's diagnostics
async fn last_line<R: AsyncRead + Unpin>(reader: R) -> Option<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    last
}
