//! Output devices and the stream lifecycle.
//!
//! A [`Device`] pairs a [`Backend`] device with a [`Mixer`] and moves the
//! mixer onto a dedicated stream thread while a stream is open:
//!
//! ```text
//! Closed --open--> Open --start--> Running --stop--> Stopped
//!    ^                                                  |
//!    +--------------------- close ----------------------+
//! ```
//!
//! The backend stream lives on that thread for its whole life, so backends
//! whose streams are not `Send` (cpal on most platforms) work unchanged.
//! Closing the stream hands the mixer back, heads and all, so a later
//! [`play`](Device::play) resumes where the last one left off.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use loopdeck::backend::OfflineBackend;
//! use loopdeck::{Clip, Device, DeviceConfig, ReadHead};
//!
//! let (mut device, mut control) = Device::new(OfflineBackend::new(), DeviceConfig::default())?;
//! let clip = Arc::new(Clip::load("loop.wav", None)?);
//! control.add(ReadHead::new(clip)).ok();
//! device.play()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::{Backend, DeviceId, DeviceInfo, OutputStream, StreamParams};
use crate::error::{DeviceError, DeviceResult};
use crate::handle::MixerHandle;
use crate::metrics::RenderMetrics;
use crate::mixer::{ClipPolicy, Mixer, MixerConfig};

/// Rates a device may be configured with.
pub const SAMPLE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

/// How long `close` waits for the stream to hand the mixer back.
const RECLAIM_TIMEOUT: Duration = Duration::from_secs(1);

/// Parameters of a [`Device`].
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceId,
    pub channels: u16,
    /// Sample rate in Hz, one of [`SAMPLE_RATES`].
    pub rate: u32,
    /// Frames per callback.
    pub length: u32,
    pub max_heads: usize,
    pub clip_policy: ClipPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: DeviceId::Default,
            channels: 2,
            rate: 48000,
            length: 512,
            max_heads: 64,
            clip_policy: ClipPolicy::default(),
        }
    }
}

impl DeviceConfig {
    pub fn new(channels: u16, rate: u32, length: u32) -> Self {
        Self {
            channels,
            rate,
            length,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    pub fn with_max_heads(mut self, max_heads: usize) -> Self {
        self.max_heads = max_heads;
        self
    }

    pub fn with_clip_policy(mut self, policy: ClipPolicy) -> Self {
        self.clip_policy = policy;
        self
    }

    fn params(&self) -> StreamParams {
        StreamParams {
            channels: self.channels,
            sample_rate: self.rate,
            buffer_frames: self.length,
        }
    }

    fn validate(&self) -> DeviceResult<()> {
        if !SAMPLE_RATES.contains(&self.rate) {
            return Err(DeviceError::UnsupportedRate(self.rate));
        }
        if self.channels == 0 {
            return Err(DeviceError::InvalidChannels(self.channels));
        }
        if self.length == 0 {
            return Err(DeviceError::InvalidLength(self.length));
        }
        Ok(())
    }
}

/// Where a [`Device`] is in its stream lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// No stream; the device owns the mixer.
    Closed,
    /// Stream built but never started.
    Open,
    Running,
    /// Stream paused by [`Device::stop`].
    Stopped,
}

/// Result of [`Device::can_start`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Support {
    pub record: bool,
    pub playback: bool,
}

/// Lets `stop` wait out a render that is already running.
///
/// The callback raises `busy` and then checks `open`; `close` lowers `open`
/// and then waits for `busy` to drop. Both sides use `SeqCst`, so at least
/// one of them sees the other's store.
#[derive(Debug, Default)]
struct RenderGate {
    open: AtomicBool,
    busy: AtomicBool,
}

impl RenderGate {
    fn enter(&self) -> bool {
        self.busy.store(true, Ordering::SeqCst);
        if self.open.load(Ordering::SeqCst) {
            true
        } else {
            self.busy.store(false, Ordering::SeqCst);
            false
        }
    }

    fn leave(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        while self.busy.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }
}

/// Holds the mixer inside the stream callback and sends it home when the
/// callback is dropped.
struct MixerSlot {
    mixer: Option<Mixer>,
    home: mpsc::Sender<Mixer>,
}

impl Drop for MixerSlot {
    fn drop(&mut self) {
        if let Some(mixer) = self.mixer.take() {
            let _ = self.home.send(mixer);
        }
    }
}

enum StreamCommand {
    Start,
    Pause,
    Close,
}

/// Control side of the stream thread.
struct StreamWorker {
    commands: mpsc::Sender<StreamCommand>,
    replies: mpsc::Receiver<DeviceResult<()>>,
    thread: JoinHandle<()>,
}

impl StreamWorker {
    fn request(&self, command: StreamCommand) -> DeviceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| DeviceError::Thread("stream thread exited".into()))?;
        self.replies
            .recv()
            .map_err(|_| DeviceError::Thread("stream thread exited".into()))?
    }

    fn shutdown(self) -> DeviceResult<()> {
        // The thread may already be gone; joining tells us how it ended.
        let _ = self.commands.send(StreamCommand::Close);
        self.thread
            .join()
            .map_err(|_| DeviceError::Thread("stream thread panicked".into()))
    }
}

fn run_stream<B, F>(
    backend: B,
    id: DeviceId,
    params: StreamParams,
    callback: F,
    commands: mpsc::Receiver<StreamCommand>,
    replies: mpsc::Sender<DeviceResult<()>>,
) where
    B: Backend,
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let stream = match backend.open_stream(&id, &params, callback) {
        Ok(stream) => {
            let _ = replies.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = replies.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        let result = match command {
            StreamCommand::Start => stream.start(),
            StreamCommand::Pause => stream.pause(),
            StreamCommand::Close => break,
        };
        let _ = replies.send(result);
    }

    drop(stream);
    tracing::debug!(device = %id, "output stream dropped");
}

/// An output device driving a [`Mixer`].
pub struct Device<B: Backend> {
    backend: B,
    config: DeviceConfig,
    info: DeviceInfo,
    state: StreamState,
    mixer: Option<Mixer>,
    metrics: Arc<RenderMetrics>,
    mixer_tx: mpsc::Sender<Mixer>,
    mixer_rx: mpsc::Receiver<Mixer>,
    gate: Arc<RenderGate>,
    worker: Option<StreamWorker>,
}

impl<B: Backend> Device<B> {
    /// Validate `config`, select its device and create the mixer.
    pub fn new(backend: B, config: DeviceConfig) -> DeviceResult<(Self, MixerHandle)> {
        config.validate()?;
        let info = Self::playback_info(&backend, &config.device)?;

        let mixer_config = MixerConfig::new(config.rate, config.channels as usize, config.length as usize)
            .with_max_heads(config.max_heads)
            .with_clip_policy(config.clip_policy);
        let (mixer, handle) = Mixer::new(mixer_config);
        let metrics = Arc::clone(mixer.metrics());
        let (mixer_tx, mixer_rx) = mpsc::channel();

        tracing::info!(
            device = %info.name,
            channels = config.channels,
            rate = config.rate,
            length = config.length,
            "device configured"
        );

        let device = Self {
            backend,
            config,
            info,
            state: StreamState::Closed,
            mixer: Some(mixer),
            metrics,
            mixer_tx,
            mixer_rx,
            gate: Arc::new(RenderGate::default()),
            worker: None,
        };
        Ok((device, handle))
    }

    fn playback_info(backend: &B, id: &DeviceId) -> DeviceResult<DeviceInfo> {
        let info = backend.query_device(id)?;
        if info.max_output_channels == 0 {
            return Err(DeviceError::NoPlayback(info.name));
        }
        Ok(info)
    }

    /// Select another device. Takes effect at the next [`open`](Self::open);
    /// on error the current device stays selected.
    pub fn set_device(&mut self, id: DeviceId) -> DeviceResult<()> {
        let info = Self::playback_info(&self.backend, &id)?;
        tracing::info!(device = %info.name, duplex = info.duplex(), "device selected");
        self.info = info;
        self.config.device = id;
        Ok(())
    }

    /// Whether the device can record and play with the configured channels
    /// and rate.
    pub fn can_start(&self) -> Support {
        let params = self.config.params();
        Support {
            record: self.backend.probe_input(&self.config.device, &params),
            playback: self.backend.probe_output(&self.config.device, &params),
        }
    }

    /// Build a paused stream on the stream thread and hand it the mixer.
    pub fn open(&mut self) -> DeviceResult<()> {
        if self.worker.is_some() {
            return Err(DeviceError::StreamActive);
        }
        self.reclaim(Duration::ZERO);
        let mixer = self.mixer.take().ok_or(DeviceError::MixerUnavailable)?;

        self.gate.close();
        let gate = Arc::clone(&self.gate);
        let mut slot = MixerSlot {
            mixer: Some(mixer),
            home: self.mixer_tx.clone(),
        };
        let callback = move |out: &mut [f32]| {
            if !gate.enter() {
                out.fill(0.0);
                return;
            }
            match slot.mixer.as_mut() {
                Some(mixer) => mixer.render(out),
                None => out.fill(0.0),
            }
            gate.leave();
        };

        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let backend = self.backend.clone();
        let id = self.config.device.clone();
        let params = self.config.params();

        let spawned = thread::Builder::new()
            .name("loopdeck-output".into())
            .spawn(move || run_stream(backend, id, params, callback, command_rx, reply_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.reclaim(RECLAIM_TIMEOUT);
                return Err(DeviceError::Thread(e.to_string()));
            }
        };

        let worker = StreamWorker {
            commands: command_tx,
            replies: reply_rx,
            thread,
        };
        let opened = worker
            .replies
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::Thread("stream thread exited".into())));

        if let Err(e) = opened {
            if let Err(join) = worker.shutdown() {
                tracing::error!("{}", join);
            }
            self.reclaim(RECLAIM_TIMEOUT);
            tracing::warn!(device = %self.info.name, "could not open output stream: {}", e);
            return Err(e);
        }

        self.worker = Some(worker);
        self.state = StreamState::Open;
        tracing::info!(device = %self.info.name, "output stream opened");
        Ok(())
    }

    /// Start (or resume) rendering.
    pub fn start(&mut self) -> DeviceResult<()> {
        match self.state {
            StreamState::Closed => return Err(DeviceError::StreamClosed),
            StreamState::Running => return Ok(()),
            StreamState::Open | StreamState::Stopped => {}
        }
        let worker = self.worker.as_ref().ok_or(DeviceError::StreamClosed)?;

        self.gate.open();
        if let Err(e) = worker.request(StreamCommand::Start) {
            self.gate.close();
            return Err(e);
        }

        self.state = StreamState::Running;
        tracing::info!(device = %self.info.name, "output stream started");
        Ok(())
    }

    /// Pause rendering. When this returns the mixer is not rendering and
    /// will not render again until [`start`](Self::start); the backend is
    /// fed silence in the meantime.
    pub fn stop(&mut self) -> DeviceResult<()> {
        match self.state {
            StreamState::Closed => return Err(DeviceError::StreamClosed),
            StreamState::Open | StreamState::Stopped => return Ok(()),
            StreamState::Running => {}
        }

        self.gate.close();
        self.state = StreamState::Stopped;

        let worker = self.worker.as_ref().ok_or(DeviceError::StreamClosed)?;
        worker.request(StreamCommand::Pause)?;
        tracing::info!(device = %self.info.name, "output stream stopped");
        Ok(())
    }

    /// Drop the stream, join its thread and take the mixer back. Closing a
    /// closed device does nothing.
    pub fn close(&mut self) -> DeviceResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.gate.close();
        self.state = StreamState::Closed;
        let joined = worker.shutdown();

        if !self.reclaim(RECLAIM_TIMEOUT) {
            tracing::error!(device = %self.info.name, "output stream did not release the mixer");
        }
        tracing::info!(device = %self.info.name, "output stream closed");
        joined
    }

    /// Close any open stream, then open and start a new one.
    pub fn play(&mut self) -> DeviceResult<()> {
        self.close()?;
        self.open()?;
        self.start()
    }

    /// Change the frames per callback. Only while closed.
    pub fn set_length(&mut self, length: u32) -> DeviceResult<()> {
        if self.worker.is_some() {
            return Err(DeviceError::StreamActive);
        }
        if length == 0 {
            return Err(DeviceError::InvalidLength(length));
        }

        self.reclaim(Duration::ZERO);
        let mixer = self.mixer.as_mut().ok_or(DeviceError::MixerUnavailable)?;
        mixer.set_block_size(length as usize);
        self.config.length = length;
        Ok(())
    }

    /// Take the mixer back from a dropped stream if it has arrived.
    fn reclaim(&mut self, timeout: Duration) -> bool {
        if self.mixer.is_some() {
            return true;
        }
        let received = if timeout.is_zero() {
            self.mixer_rx.try_recv().ok()
        } else {
            self.mixer_rx.recv_timeout(timeout).ok()
        };
        self.mixer = received;
        self.mixer.is_some()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The selected device as last queried.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Whether the selected device can record as well as play.
    pub fn duplex(&self) -> bool {
        self.info.duplex()
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn rate(&self) -> u32 {
        self.config.rate
    }

    pub fn length(&self) -> u32 {
        self.config.length
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    /// The mixer, while no stream owns it.
    pub fn mixer(&self) -> Option<&Mixer> {
        self.mixer.as_ref()
    }

    /// The mixer, while no stream owns it. Rendering through this drives
    /// the mixer by hand, e.g. to bounce audio to a file.
    pub fn mixer_mut(&mut self) -> Option<&mut Mixer> {
        self.mixer.as_mut()
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("closing device on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{OfflineBackend, Pacing};
    use crate::clip::Clip;
    use crate::head::ReadHead;
    use std::time::Instant;

    fn backend() -> OfflineBackend {
        OfflineBackend::new()
            .with_pacing(Pacing::Freewheel)
            .with_device(DeviceInfo {
                name: "mic".into(),
                max_input_channels: 1,
                max_output_channels: 0,
                sample_rates: vec![48000],
            })
            .with_device(DeviceInfo {
                name: "speaker".into(),
                max_input_channels: 0,
                max_output_channels: 2,
                sample_rates: vec![44100, 48000],
            })
    }

    fn config() -> DeviceConfig {
        DeviceConfig::new(2, 48000, 64).with_clip_policy(ClipPolicy::Passthrough)
    }

    fn wait_for_frames(device: &Device<OfflineBackend>, frames: u64) -> u64 {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let seen = device.metrics().snapshot().frames;
            if seen >= frames || Instant::now() > deadline {
                return seen;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        let unsupported = Device::new(backend(), DeviceConfig::new(2, 22050, 64));
        assert!(matches!(unsupported, Err(DeviceError::UnsupportedRate(22050))));

        let no_channels = Device::new(backend(), DeviceConfig::new(0, 48000, 64));
        assert!(matches!(no_channels, Err(DeviceError::InvalidChannels(0))));

        let no_length = Device::new(backend(), DeviceConfig::new(2, 48000, 0));
        assert!(matches!(no_length, Err(DeviceError::InvalidLength(0))));

        let input_only = Device::new(backend(), config().with_device(DeviceId::named("mic")));
        assert!(matches!(input_only, Err(DeviceError::NoPlayback(_))));
    }

    #[test]
    fn failed_device_change_keeps_the_previous_device() {
        let (mut device, _control) = Device::new(backend(), config()).unwrap();
        assert!(device.duplex());

        let err = device.set_device(DeviceId::named("mic")).unwrap_err();
        assert!(matches!(err, DeviceError::NoPlayback(_)));
        assert_eq!(device.device_info().name, "offline");

        device.set_device(DeviceId::named("speaker")).unwrap();
        assert_eq!(device.device_info().name, "speaker");
        assert!(!device.duplex());
    }

    #[test]
    fn can_start_probes_both_directions() {
        let (mut device, _control) = Device::new(backend(), config()).unwrap();
        assert_eq!(
            device.can_start(),
            Support {
                record: true,
                playback: true
            }
        );

        device.set_device(DeviceId::named("speaker")).unwrap();
        assert_eq!(
            device.can_start(),
            Support {
                record: false,
                playback: true
            }
        );

        let (wide, _control) = Device::new(backend(), DeviceConfig::new(8, 48000, 64)).unwrap();
        assert_eq!(wide.can_start(), Support::default());
    }

    #[test]
    fn lifecycle_moves_through_states() {
        let (mut device, _control) = Device::new(backend(), config()).unwrap();
        assert_eq!(device.state(), StreamState::Closed);
        assert!(matches!(device.start(), Err(DeviceError::StreamClosed)));

        device.open().unwrap();
        assert_eq!(device.state(), StreamState::Open);
        assert!(device.mixer().is_none());
        assert!(matches!(device.open(), Err(DeviceError::StreamActive)));
        assert!(matches!(device.set_length(128), Err(DeviceError::StreamActive)));

        device.start().unwrap();
        assert_eq!(device.state(), StreamState::Running);
        assert!(wait_for_frames(&device, 64) >= 64);

        device.stop().unwrap();
        assert_eq!(device.state(), StreamState::Stopped);

        device.start().unwrap();
        assert_eq!(device.state(), StreamState::Running);

        device.close().unwrap();
        assert_eq!(device.state(), StreamState::Closed);
        assert!(device.mixer().is_some());
        device.close().unwrap();
    }

    #[test]
    fn stop_waits_out_rendering() {
        let (mut device, _control) = Device::new(backend(), config()).unwrap();
        device.play().unwrap();
        wait_for_frames(&device, 640);

        device.stop().unwrap();
        let frozen = device.metrics().snapshot().frames;
        thread::sleep(Duration::from_millis(20));
        assert_eq!(device.metrics().snapshot().frames, frozen);
    }

    #[test]
    fn heads_survive_close_and_replay() {
        let (mut device, mut control) = Device::new(backend(), config()).unwrap();
        let clip = Arc::new(Clip::from_channels(48000, vec![vec![0.5; 480]]).unwrap());
        let head = control.add(ReadHead::new(clip)).ok().unwrap();

        device.play().unwrap();
        wait_for_frames(&device, 128);
        device.close().unwrap();

        let frame = head.frame();
        assert!(frame >= 128);
        let mixer = device.mixer().unwrap();
        assert_eq!(mixer.head_count(), 1);
        assert_eq!(mixer.head(head.id()).unwrap().frame(), frame);

        device.play().unwrap();
        wait_for_frames(&device, frame + 128);
        device.close().unwrap();
        assert!(head.frame() > frame);
    }

    #[test]
    fn play_replaces_an_open_stream() {
        let (mut device, _control) = Device::new(backend(), config()).unwrap();
        device.open().unwrap();
        device.play().unwrap();
        assert_eq!(device.state(), StreamState::Running);
        assert!(wait_for_frames(&device, 64) >= 64);
    }

    #[test]
    fn length_changes_while_closed() {
        let (mut device, _control) = Device::new(backend(), config()).unwrap();
        device.set_length(256).unwrap();
        assert_eq!(device.length(), 256);
        assert_eq!(device.mixer().unwrap().block_size(), 256);
        assert!(matches!(device.set_length(0), Err(DeviceError::InvalidLength(0))));
    }

    #[test]
    fn failed_open_returns_the_mixer() {
        let (mut device, _control) = Device::new(backend(), DeviceConfig::new(8, 48000, 64)).unwrap();
        assert!(matches!(device.open(), Err(DeviceError::StreamBuild(_))));
        assert_eq!(device.state(), StreamState::Closed);
        assert!(device.mixer().is_some());
    }
}
