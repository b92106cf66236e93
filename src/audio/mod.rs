// Audio module - probing, decoding and WAV buffering of audio tracks

pub mod decoder;
pub mod detection;
pub mod metadata;
pub mod wave;

pub use decoder::AudioDecoder;
pub use detection::is_audio_file;
pub use metadata::probe_track;
pub use wave::WaveBuffer;
