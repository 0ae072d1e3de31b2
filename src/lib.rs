//! loopdeck - real-time clip playback
//!
//! Play heads read in-memory clips at any speed, in either direction, and a
//! mixer sums them into the buffer an output device asks for on every
//! callback.
//!
//! Design principles:
//! - Clips are immutable once built and shared between heads with `Arc`
//! - The render path never allocates, locks or blocks
//! - Heads are added, removed and steered through `rtrb` ring buffers
//! - Memory the mixer lets go of is freed on the control thread
//! - Devices are a trait; cpal is one backend, an offline thread is another
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use loopdeck::{Clip, ClipPolicy, Mixer, MixerConfig, ReadHead};
//!
//! let clip = Arc::new(Clip::from_channels(48000, vec![vec![0.25; 480]]).unwrap());
//!
//! let config = MixerConfig::new(48000, 2, 256).with_clip_policy(ClipPolicy::HardClip);
//! let (mut mixer, mut control) = Mixer::new(config);
//! let mut head = control.add(ReadHead::new(clip).with_speed(0.5)).ok().unwrap();
//!
//! let mut out = vec![0.0; 256 * 2];
//! mixer.render(&mut out);
//! assert_eq!(out[0], 0.25);
//!
//! head.seek(100.0).unwrap();
//! ```
//!
//! To hear it, hand the mixer's parameters to a [`Device`] instead; it owns
//! the mixer and renders it from the backend's callback.

pub mod backend;
mod clip;
mod codec;
pub mod device;
mod error;
mod handle;
mod head;
mod metrics;
mod mixer;

pub use backend::{Backend, DeviceId, DeviceInfo, OfflineBackend, OutputStream, Pacing, StreamParams};
#[cfg(feature = "cpal_output")]
pub use backend::{CpalBackend, CpalStream};
pub use clip::{Clip, DEFAULT_RATE};
pub use codec::{Codec, Decoded, FileCodec};
pub use device::{Device, DeviceConfig, StreamState, Support, SAMPLE_RATES};
pub use error::{ClipError, ClipResult, DeviceError, DeviceResult};
pub use handle::{HeadHandle, HeadId, MixerHandle};
pub use head::{HeadMessage, ReadHead};
pub use metrics::{MetricsSnapshot, RenderMetrics};
pub use mixer::{ClipPolicy, Mixer, MixerConfig, ProcessContext};
