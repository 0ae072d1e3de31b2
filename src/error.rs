//! Error types for clips and devices.
//!
//! Nothing in here is ever produced on the real-time thread. Render-path
//! failures are converted to silence or clamped values, and deadline misses
//! are reported through [`RenderMetrics`](crate::RenderMetrics) instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, loading or saving a [`Clip`](crate::Clip).
#[derive(Error, Debug)]
pub enum ClipError {
    /// The codec could not read the file (missing path, unknown format, corrupt data).
    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// The codec could not write the file (unsupported extension, I/O failure).
    #[error("failed to encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    /// A clip needs a positive rate, at least one channel and at least one sample.
    #[error("invalid clip shape: {channels} channel(s) x {length} sample(s) at {rate} Hz")]
    InvalidShape {
        channels: usize,
        length: usize,
        rate: u32,
    },

    /// Channel rows passed to a clip must all have the same length.
    #[error("channel {index} has {found} samples, expected {expected}")]
    RaggedChannels {
        index: usize,
        expected: usize,
        found: usize,
    },

    /// Channel access outside `[0, channels)`.
    #[error("channel {index} out of range for clip with {channels} channel(s)")]
    ChannelOutOfRange { index: usize, channels: usize },
}

/// Result type for clip operations
pub type ClipResult<T> = Result<T, ClipError>;

/// Errors raised while configuring a [`Device`](crate::Device) or driving its stream.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The selected device has no output channels.
    #[error("device does not support playback: {0}")]
    NoPlayback(String),

    /// No device matches the identifier.
    #[error("audio device not found: {0}")]
    NotFound(String),

    /// The rate is not one of [`SAMPLE_RATES`](crate::device::SAMPLE_RATES).
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedRate(u32),

    #[error("invalid channel count: {0}")]
    InvalidChannels(u16),

    #[error("invalid buffer length: {0} frames")]
    InvalidLength(u32),

    /// The operation needs a closed stream.
    #[error("a stream is open on this device; close it first")]
    StreamActive,

    /// The operation needs an open stream.
    #[error("no stream is open on this device")]
    StreamClosed,

    /// The audio host could not be initialized.
    #[error("audio host unavailable: {0}")]
    Host(String),

    #[error("failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("failed to start audio stream: {0}")]
    StreamPlay(String),

    #[error("failed to pause audio stream: {0}")]
    StreamPause(String),

    /// The stream thread could not be spawned or exited unexpectedly.
    #[error("audio stream thread failed: {0}")]
    Thread(String),

    /// The mixer was not handed back by the previous stream.
    #[error("mixer is unavailable; the previous stream did not release it")]
    MixerUnavailable,
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
