//! Simulated devices driven from a plain thread.
//!
//! Streams opened here call the render callback in a loop, either paced to
//! the wall clock like a sound card or as fast as possible. Rendered audio
//! can be captured into a ring buffer for inspection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hashbrown::HashMap;
use rtrb::{Consumer, Producer, RingBuffer};

use super::{Backend, DeviceId, DeviceInfo, OutputStream, StreamParams, COMMON_RATES};
use crate::error::{DeviceError, DeviceResult};

/// Name of the device every [`OfflineBackend`] starts with.
pub const OFFLINE_DEVICE: &str = "offline";

/// How an offline stream schedules its callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep one buffer duration between callbacks.
    #[default]
    RealTime,
    /// Call back again immediately.
    Freewheel,
}

/// A backend with made-up devices and no hardware.
///
/// ```
/// use loopdeck::backend::{Backend, DeviceId, OfflineBackend};
///
/// let backend = OfflineBackend::new();
/// let info = backend.query_device(&DeviceId::Default).unwrap();
/// assert_eq!(info.max_output_channels, 2);
/// ```
#[derive(Clone)]
pub struct OfflineBackend {
    devices: Arc<HashMap<String, DeviceInfo>>,
    default_device: String,
    pacing: Pacing,
    capture: Arc<Mutex<Option<Producer<f32>>>>,
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineBackend {
    /// One stereo duplex device named [`OFFLINE_DEVICE`], real-time pacing.
    pub fn new() -> Self {
        let mut devices = HashMap::new();
        devices.insert(
            OFFLINE_DEVICE.to_string(),
            DeviceInfo {
                name: OFFLINE_DEVICE.to_string(),
                max_input_channels: 2,
                max_output_channels: 2,
                sample_rates: COMMON_RATES.to_vec(),
            },
        );

        Self {
            devices: Arc::new(devices),
            default_device: OFFLINE_DEVICE.to_string(),
            pacing: Pacing::default(),
            capture: Arc::new(Mutex::new(None)),
        }
    }

    /// Add or replace a device.
    pub fn with_device(mut self, info: DeviceInfo) -> Self {
        Arc::make_mut(&mut self.devices).insert(info.name.clone(), info);
        self
    }

    /// Choose which device [`DeviceId::Default`] resolves to.
    pub fn with_default_device(mut self, name: impl Into<String>) -> Self {
        self.default_device = name.into();
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Copy the output of the next stream opened into a ring buffer of
    /// `capacity` samples. Samples that do not fit are discarded.
    pub fn with_capture(self, capacity: usize) -> (Self, Consumer<f32>) {
        let (producer, consumer) = RingBuffer::new(capacity);
        if let Ok(mut slot) = self.capture.lock() {
            *slot = Some(producer);
        }
        (self, consumer)
    }

    fn resolve(&self, id: &DeviceId) -> Option<&DeviceInfo> {
        match id {
            DeviceId::Default => self.devices.get(&self.default_device),
            DeviceId::Name(name) => self.devices.get(name),
        }
    }

    fn supports(info: &DeviceInfo, max_channels: u16, params: &StreamParams) -> bool {
        params.channels > 0
            && params.channels <= max_channels
            && params.buffer_frames > 0
            && info.sample_rates.contains(&params.sample_rate)
    }
}

impl Backend for OfflineBackend {
    type Stream = OfflineStream;

    fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<_> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    fn query_device(&self, id: &DeviceId) -> DeviceResult<DeviceInfo> {
        self.resolve(id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))
    }

    fn probe_output(&self, id: &DeviceId, params: &StreamParams) -> bool {
        self.resolve(id)
            .map_or(false, |info| Self::supports(info, info.max_output_channels, params))
    }

    fn probe_input(&self, id: &DeviceId, params: &StreamParams) -> bool {
        self.resolve(id)
            .map_or(false, |info| Self::supports(info, info.max_input_channels, params))
    }

    fn open_stream<F>(&self, id: &DeviceId, params: &StreamParams, callback: F) -> DeviceResult<OfflineStream>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        if !self.probe_output(id, params) {
            return Err(DeviceError::StreamBuild(format!(
                "{} cannot play {} channel(s) at {} Hz",
                id, params.channels, params.sample_rate
            )));
        }

        let capture = self.capture.lock().ok().and_then(|mut slot| slot.take());
        let running = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            let params = *params;
            let pacing = self.pacing;
            thread::Builder::new()
                .name("loopdeck-offline".into())
                .spawn(move || run(callback, params, pacing, running, shutdown, capture))
                .map_err(|e| DeviceError::StreamBuild(e.to_string()))?
        };

        Ok(OfflineStream {
            running,
            shutdown,
            worker: Some(worker),
        })
    }
}

fn run<F: FnMut(&mut [f32])>(
    mut callback: F,
    params: StreamParams,
    pacing: Pacing,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    mut capture: Option<Producer<f32>>,
) {
    let mut buffer = vec![0.0f32; params.buffer_frames as usize * params.channels as usize];
    let period = Duration::from_secs_f64(params.buffer_frames as f64 / params.sample_rate as f64);

    while !shutdown.load(Ordering::Acquire) {
        if !running.load(Ordering::Acquire) {
            thread::park_timeout(Duration::from_millis(5));
            continue;
        }

        callback(&mut buffer);

        if let Some(producer) = capture.as_mut() {
            for &sample in &buffer {
                if producer.push(sample).is_err() {
                    break;
                }
            }
        }

        match pacing {
            Pacing::RealTime => thread::sleep(period),
            Pacing::Freewheel => thread::yield_now(),
        }
    }
}

/// Stream handle returned by [`OfflineBackend`]. Dropping it joins the
/// worker thread, which drops the callback.
pub struct OfflineStream {
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl OfflineStream {
    fn wake(&self) {
        if let Some(worker) = &self.worker {
            worker.thread().unpark();
        }
    }
}

impl OutputStream for OfflineStream {
    fn start(&self) -> DeviceResult<()> {
        self.running.store(true, Ordering::Release);
        self.wake();
        Ok(())
    }

    fn pause(&self) -> DeviceResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for OfflineStream {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("offline stream worker panicked");
            }
        }
    }
}
