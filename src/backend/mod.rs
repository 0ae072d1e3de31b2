//! Audio host backends.
//!
//! A [`Backend`] answers capability questions about devices and opens output
//! streams that call back into the render pipeline. Two are provided:
//!
//! - [`CpalBackend`] - the system audio host (requires `cpal_output` feature)
//! - [`OfflineBackend`] - simulated devices driven by a plain thread, for
//!   tests and rendering without hardware

mod offline;
pub use offline::{OfflineBackend, OfflineStream, Pacing, OFFLINE_DEVICE};

#[cfg(feature = "cpal_output")]
mod cpal_backend;
#[cfg(feature = "cpal_output")]
pub use cpal_backend::{CpalBackend, CpalStream};

use std::fmt;

use crate::error::DeviceResult;

/// Rates probed when describing a device.
pub const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Which device to use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeviceId {
    /// The host's default output device.
    #[default]
    Default,
    /// A device by its host-reported name.
    Name(String),
}

impl DeviceId {
    pub fn named(name: impl Into<String>) -> Self {
        DeviceId::Name(name.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Default => write!(f, "<default>"),
            DeviceId::Name(name) => write!(f, "{}", name),
        }
    }
}

/// What a device can do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    /// Supported rates, ascending.
    pub sample_rates: Vec<u32>,
}

impl DeviceInfo {
    /// Whether the device can record and play.
    pub fn duplex(&self) -> bool {
        self.max_input_channels > 0 && self.max_output_channels > 0
    }
}

/// Parameters of a stream. Samples are always interleaved `f32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamParams {
    pub channels: u16,
    pub sample_rate: u32,
    /// Frames per callback.
    pub buffer_frames: u32,
}

/// An open output stream. Dropping it closes the stream; once `drop`
/// returns, the callback will not run again.
pub trait OutputStream {
    fn start(&self) -> DeviceResult<()>;
    fn pause(&self) -> DeviceResult<()>;
}

/// Device capability queries and stream creation.
///
/// Backends are cloned onto the stream thread, so they must be cheap to
/// clone and `Send`. Streams themselves never leave that thread.
pub trait Backend: Clone + Send + 'static {
    type Stream: OutputStream;

    /// Every device the host knows about.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Look up one device.
    fn query_device(&self, id: &DeviceId) -> DeviceResult<DeviceInfo>;

    /// Can the device play `params` as `f32`? Never fails; any negotiation
    /// error reads as `false`.
    fn probe_output(&self, id: &DeviceId, params: &StreamParams) -> bool;

    /// Can the device record `params` as `f32`?
    fn probe_input(&self, id: &DeviceId, params: &StreamParams) -> bool;

    /// Open a paused output stream that fills each buffer through `callback`.
    ///
    /// The callback receives interleaved samples and must fill all of them.
    fn open_stream<F>(&self, id: &DeviceId, params: &StreamParams, callback: F) -> DeviceResult<Self::Stream>
    where
        F: FnMut(&mut [f32]) + Send + 'static;
}
