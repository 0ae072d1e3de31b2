//! Render deadline metrics.
//!
//! The real-time thread only stores into atomics here; reading and reporting
//! happen on whichever thread holds a [`MixerHandle`](crate::MixerHandle).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared between the render callback and the control side.
#[derive(Debug, Default)]
pub struct RenderMetrics {
    renders: AtomicU64,
    frames: AtomicU64,
    overruns: AtomicU64,
    rejected_heads: AtomicU64,
    /// f32 bits of the last elapsed/allowed ratio
    last_load: AtomicU32,
    /// f32 bits of the highest ratio since the last `reset_peak`
    peak_load: AtomicU32,
}

/// A point-in-time copy of [`RenderMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Render calls completed.
    pub renders: u64,
    /// Frames rendered in total (the transport position).
    pub frames: u64,
    /// Renders that took longer than the audio they produced.
    pub overruns: u64,
    /// Heads turned away because the head table was full.
    pub rejected_heads: u64,
    /// Elapsed time of the last render divided by the time it covers.
    pub last_load: f32,
    pub peak_load: f32,
}

impl RenderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one render of `frames` frames at `rate` Hz that took `elapsed`.
    pub(crate) fn record(&self, elapsed: Duration, frames: usize, rate: u32) {
        self.renders.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);

        if frames == 0 || rate == 0 {
            return;
        }

        let allowed = frames as f64 / rate as f64;
        let load = (elapsed.as_secs_f64() / allowed) as f32;
        self.last_load.store(load.to_bits(), Ordering::Relaxed);

        if load > f32::from_bits(self.peak_load.load(Ordering::Relaxed)) {
            self.peak_load.store(load.to_bits(), Ordering::Relaxed);
        }
        if load > 1.0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reject_head(&self) {
        self.rejected_heads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            renders: self.renders.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            rejected_heads: self.rejected_heads.load(Ordering::Relaxed),
            last_load: f32::from_bits(self.last_load.load(Ordering::Relaxed)),
            peak_load: f32::from_bits(self.peak_load.load(Ordering::Relaxed)),
        }
    }

    /// Forget the peak load, e.g. after reporting it.
    pub fn reset_peak(&self) {
        self.peak_load.store(0f32.to_bits(), Ordering::Relaxed);
    }
}
