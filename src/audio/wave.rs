//! WAV buffer files for decoded audio tracks

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::job::{JobError, Result};

/// CD audio: 16-bit stereo at 44.1 kHz
pub fn cd_audio_spec() -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// One track's buffer file, fed with raw little-endian PCM
pub struct WaveBuffer {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    /// Half of a sample left over from the previous chunk
    carry: Option<u8>,
}

impl WaveBuffer {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = WavWriter::create(path, cd_audio_spec()).map_err(|e| wav_error(path, e))?;
        log::debug!("Writing audio buffer {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            carry: None,
        })
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if let Some(low) = self.carry.take() {
            match data.split_first() {
                Some((high, rest)) => {
                    self.push(i16::from_le_bytes([low, *high]))?;
                    data = rest;
                }
                None => {
                    self.carry = Some(low);
                    return Ok(());
                }
            }
        }

        let mut samples = data.chunks_exact(2);
        for pair in &mut samples {
            self.push(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        self.carry = samples.remainder().first().copied();
        Ok(())
    }

    fn push(&mut self, sample: i16) -> Result<()> {
        self.writer
            .write_sample(sample)
            .map_err(|e| wav_error(&self.path, e))
    }

    /// Complete the header. A dangling odd byte is dropped.
    pub fn finalize(self) -> Result<()> {
        if self.carry.is_some() {
            log::warn!("Dropping odd trailing byte of {}", self.path.display());
        }
        let path = self.path;
        self.writer.finalize().map_err(|e| wav_error(&path, e))
    }
}

fn wav_error(path: &Path, error: hound::Error) -> JobError {
    match error {
        hound::Error::IoError(source) => JobError::artifact(path, source),
        other => JobError::artifact(path, std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_split_mid_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track01.wav");

        let mut wave = WaveBuffer::create(&path).unwrap();
        // 0x0201, 0x0403 split across three chunks
        wave.write(&[0x01]).unwrap();
        wave.write(&[0x02, 0x03]).unwrap();
        wave.write(&[0x04]).unwrap();
        wave.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec(), cd_audio_spec());
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0x0201, 0x0403]);
    }

    #[test]
    fn test_one_frame_has_588_sample_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.wav");

        let mut wave = WaveBuffer::create(&path).unwrap();
        wave.write(&vec![0u8; 2352]).unwrap();
        wave.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 588);
    }
}
