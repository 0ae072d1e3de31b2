//! In-memory PCM clips.

use std::path::{Path, PathBuf};

use crate::codec::{Codec, FileCodec};
use crate::error::{ClipError, ClipResult};

/// Sample rate given to clips created with [`Clip::new`].
pub const DEFAULT_RATE: u32 = 44100;

/// A multi-channel block of PCM audio held in memory.
///
/// Samples are stored channel-major: row `c` holds every sample of channel
/// `c`. A clip is never empty, so anything reading it can wrap positions
/// with a plain modulo.
///
/// The shape is fixed once built. Share a clip between several
/// [`ReadHead`](crate::ReadHead)s by wrapping it in an `Arc`.
///
/// # Example
///
/// ```
/// use loopdeck::Clip;
///
/// let clip = Clip::new(2, 100).unwrap();
/// assert_eq!(clip.rate(), 44100);
/// assert_eq!(clip.channel(1).unwrap().len(), 100);
/// assert!(clip.channel(2).is_err());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Clip {
    rate: u32,
    channels: usize,
    length: usize,
    data: Vec<f32>,
    path: Option<PathBuf>,
}

impl Clip {
    /// Create a silent clip of `channels` x `length` samples at [`DEFAULT_RATE`].
    pub fn new(channels: usize, length: usize) -> ClipResult<Self> {
        check_shape(channels, length, DEFAULT_RATE)?;

        Ok(Self {
            rate: DEFAULT_RATE,
            channels,
            length,
            data: vec![0.0; channels * length],
            path: None,
        })
    }

    /// Build a clip from one row of samples per channel.
    ///
    /// Every row must have the same, non-zero length.
    pub fn from_channels(rate: u32, rows: Vec<Vec<f32>>) -> ClipResult<Self> {
        let channels = rows.len();
        let length = rows.first().map_or(0, Vec::len);
        check_shape(channels, length, rate)?;

        let mut data = Vec::with_capacity(channels * length);
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != length {
                return Err(ClipError::RaggedChannels {
                    index,
                    expected: length,
                    found: row.len(),
                });
            }
            data.extend(row);
        }

        Ok(Self {
            rate,
            channels,
            length,
            data,
            path: None,
        })
    }

    /// Load an audio file with the default [`FileCodec`].
    ///
    /// `max_duration` (seconds) truncates longer files.
    pub fn load(path: impl AsRef<Path>, max_duration: Option<f64>) -> ClipResult<Self> {
        Self::load_with(&FileCodec, path, max_duration)
    }

    /// Load an audio file through a specific codec.
    pub fn load_with<C: Codec + ?Sized>(
        codec: &C,
        path: impl AsRef<Path>,
        max_duration: Option<f64>,
    ) -> ClipResult<Self> {
        let path = path.as_ref();
        let decoded = codec.decode(path, max_duration)?;

        let mut clip = Self::from_channels(decoded.sample_rate, decoded.data).map_err(|e| {
            ClipError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        clip.path = Some(path.to_path_buf());

        tracing::debug!(
            path = %path.display(),
            channels = clip.channels,
            length = clip.length,
            rate = clip.rate,
            "loaded clip"
        );

        Ok(clip)
    }

    /// Save the clip with the default [`FileCodec`] (WAV output).
    pub fn save(&self, path: impl AsRef<Path>) -> ClipResult<()> {
        self.save_with(&FileCodec, path)
    }

    /// Save the clip through a specific codec.
    pub fn save_with<C: Codec + ?Sized>(&self, codec: &C, path: impl AsRef<Path>) -> ClipResult<()> {
        codec.encode(path.as_ref(), self)
    }

    /// Read-only view of one channel.
    ///
    /// Unlike head construction, an out-of-range index is rejected rather
    /// than wrapped.
    pub fn channel(&self, index: usize) -> ClipResult<&[f32]> {
        self.check_channel(index)?;
        Ok(self.samples(index))
    }

    /// Mutable view of one channel, for filling a clip before it is shared.
    pub fn channel_mut(&mut self, index: usize) -> ClipResult<&mut [f32]> {
        self.check_channel(index)?;
        let start = index * self.length;
        Ok(&mut self.data[start..start + self.length])
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Number of channels.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel. Never zero.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Always `false`; present for API symmetry with slices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Duration in seconds at the clip's own rate.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.length as f64 / self.rate as f64
    }

    /// File the clip was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Unchecked row access for the render path. `index` must be `< channels`.
    #[inline]
    pub(crate) fn samples(&self, index: usize) -> &[f32] {
        let start = index * self.length;
        &self.data[start..start + self.length]
    }

    fn check_channel(&self, index: usize) -> ClipResult<()> {
        if index < self.channels {
            Ok(())
        } else {
            Err(ClipError::ChannelOutOfRange {
                index,
                channels: self.channels,
            })
        }
    }
}

fn check_shape(channels: usize, length: usize, rate: u32) -> ClipResult<()> {
    if channels == 0 || length == 0 || rate == 0 {
        return Err(ClipError::InvalidShape {
            channels,
            length,
            rate,
        });
    }
    Ok(())
}
