//! File decoding and encoding for clips.
//!
//! The render pipeline never touches files; a [`Codec`] turns a path into
//! channel-major samples and back. [`FileCodec`] is the stock implementation:
//! `symphonium` decodes, `hound` writes WAV.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use symphonium::SymphoniumLoader;

use crate::clip::Clip;
use crate::error::{ClipError, ClipResult};

/// Decoded audio: one row per channel plus the file's sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub data: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl Decoded {
    /// Drop everything past `max_duration` seconds.
    pub fn truncate(&mut self, max_duration: Option<f64>) {
        if let Some(secs) = max_duration {
            let keep = (secs.max(0.0) * self.sample_rate as f64) as usize;
            for row in &mut self.data {
                row.truncate(keep);
            }
        }
    }
}

/// Converts between audio files and PCM samples.
pub trait Codec {
    /// Read `path`, keeping at most `max_duration` seconds.
    fn decode(&self, path: &Path, max_duration: Option<f64>) -> ClipResult<Decoded>;

    /// Write `clip` to `path`. The extension selects the format.
    fn encode(&self, path: &Path, clip: &Clip) -> ClipResult<()>;
}

/// Decodes wav/ogg/mp3/flac through symphonium and writes 32-bit float WAV.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCodec;

impl Codec for FileCodec {
    fn decode(&self, path: &Path, max_duration: Option<f64>) -> ClipResult<Decoded> {
        let decode_err = |reason: String| ClipError::Decode {
            path: path.to_path_buf(),
            reason,
        };

        if !path.exists() {
            return Err(decode_err("no such file".into()));
        }

        let decoded = SymphoniumLoader::new()
            .load_f32(path, None)
            .map_err(|e| decode_err(e.to_string()))?;

        let mut decoded = Decoded {
            data: decoded.data,
            sample_rate: decoded.sample_rate,
        };
        decoded.truncate(max_duration);
        Ok(decoded)
    }

    fn encode(&self, path: &Path, clip: &Clip) -> ClipResult<()> {
        let encode_err = |reason: String| ClipError::Encode {
            path: path.to_path_buf(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if extension.as_deref() != Some("wav") {
            return Err(encode_err(format!(
                "unsupported output extension {:?}; only .wav is written",
                extension.unwrap_or_default()
            )));
        }

        let channels = u16::try_from(clip.channels())
            .map_err(|_| encode_err(format!("too many channels: {}", clip.channels())))?;
        let spec = WavSpec {
            channels,
            sample_rate: clip.rate(),
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let mut writer = WavWriter::create(path, spec).map_err(|e| encode_err(e.to_string()))?;

        // WAV is interleaved; clips are channel-major.
        for i in 0..clip.len() {
            for ch in 0..clip.channels() {
                writer
                    .write_sample(clip.samples(ch)[i])
                    .map_err(|e| encode_err(e.to_string()))?;
            }
        }
        writer.finalize().map_err(|e| encode_err(e.to_string()))?;

        tracing::debug!(path = %path.display(), frames = clip.len(), "saved clip");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_whole_samples() {
        let mut decoded = Decoded {
            data: vec![vec![0.0; 100]],
            sample_rate: 10,
        };

        decoded.truncate(Some(2.55));
        assert_eq!(decoded.data[0].len(), 25);

        decoded.truncate(None);
        assert_eq!(decoded.data[0].len(), 25);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let clip = Clip::new(1, 4).unwrap();

        FileCodec.encode(&dir.path().join("upper.WAV"), &clip).unwrap();
        assert!(matches!(
            FileCodec.encode(&dir.path().join("noext"), &clip),
            Err(ClipError::Encode { .. })
        ));
    }
}
