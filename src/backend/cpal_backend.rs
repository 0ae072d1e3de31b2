//! The system audio host, through cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, HostId, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};

use super::{Backend, DeviceId, DeviceInfo, OutputStream, StreamParams, COMMON_RATES};
use crate::error::{DeviceError, DeviceResult};

/// Devices of one cpal host. Defaults to the platform's default host.
#[derive(Clone, Copy, Debug)]
pub struct CpalBackend {
    host: HostId,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host().id(),
        }
    }

    /// Use a specific host, e.g. JACK instead of ALSA.
    pub fn with_host(host: HostId) -> Self {
        Self { host }
    }

    pub fn host_id(&self) -> HostId {
        self.host
    }

    fn host(&self) -> DeviceResult<cpal::Host> {
        cpal::host_from_id(self.host).map_err(|e| DeviceError::Host(e.to_string()))
    }

    fn find(&self, id: &DeviceId) -> DeviceResult<cpal::Device> {
        let host = self.host()?;
        let found = match id {
            DeviceId::Default => host.default_output_device(),
            DeviceId::Name(name) => host
                .devices()
                .map_err(|e| DeviceError::Host(e.to_string()))?
                .find(|d| d.name().map_or(false, |n| &n == name)),
        };
        found.ok_or_else(|| DeviceError::NotFound(id.to_string()))
    }

    fn describe(device: &cpal::Device) -> DeviceInfo {
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        let outputs: Vec<_> = device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default();
        let inputs: Vec<_> = device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default();

        let max_channels = |configs: &[SupportedStreamConfigRange]| {
            configs.iter().map(|c| c.channels()).max().unwrap_or(0)
        };

        let sample_rates = COMMON_RATES
            .iter()
            .copied()
            .filter(|&rate| outputs.iter().chain(inputs.iter()).any(|c| in_range(c, rate)))
            .collect();

        DeviceInfo {
            name,
            max_input_channels: max_channels(&inputs[..]),
            max_output_channels: max_channels(&outputs[..]),
            sample_rates,
        }
    }
}

fn in_range(config: &SupportedStreamConfigRange, rate: u32) -> bool {
    rate >= config.min_sample_rate().0 && rate <= config.max_sample_rate().0
}

fn matches(config: &SupportedStreamConfigRange, params: &StreamParams) -> bool {
    config.sample_format() == SampleFormat::F32
        && config.channels() == params.channels
        && in_range(config, params.sample_rate)
}

impl Backend for CpalBackend {
    type Stream = CpalStream;

    fn devices(&self) -> Vec<DeviceInfo> {
        let host = match self.host() {
            Ok(host) => host,
            Err(e) => {
                tracing::debug!("could not open host {:?}: {}", self.host, e);
                return Vec::new();
            }
        };

        match host.devices() {
            Ok(devices) => devices.map(|d| Self::describe(&d)).collect(),
            Err(e) => {
                tracing::debug!("could not enumerate devices: {}", e);
                Vec::new()
            }
        }
    }

    fn query_device(&self, id: &DeviceId) -> DeviceResult<DeviceInfo> {
        self.find(id).map(|d| Self::describe(&d))
    }

    fn probe_output(&self, id: &DeviceId, params: &StreamParams) -> bool {
        self.find(id)
            .ok()
            .and_then(|d| d.supported_output_configs().ok())
            .map_or(false, |mut configs| configs.any(|c| matches(&c, params)))
    }

    fn probe_input(&self, id: &DeviceId, params: &StreamParams) -> bool {
        self.find(id)
            .ok()
            .and_then(|d| d.supported_input_configs().ok())
            .map_or(false, |mut configs| configs.any(|c| matches(&c, params)))
    }

    fn open_stream<F>(&self, id: &DeviceId, params: &StreamParams, mut callback: F) -> DeviceResult<CpalStream>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        let device = self.find(id)?;
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: SampleRate(params.sample_rate),
            buffer_size: BufferSize::Fixed(params.buffer_frames),
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                |err| tracing::error!("output stream error: {}", err),
                None,
            )
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

        tracing::debug!(
            device = %id,
            channels = params.channels,
            rate = params.sample_rate,
            frames = params.buffer_frames,
            "built cpal output stream"
        );
        Ok(CpalStream(stream))
    }
}

/// An open cpal output stream.
pub struct CpalStream(cpal::Stream);

impl OutputStream for CpalStream {
    fn start(&self) -> DeviceResult<()> {
        self.0.play().map_err(|e| DeviceError::StreamPlay(e.to_string()))
    }

    fn pause(&self) -> DeviceResult<()> {
        self.0.pause().map_err(|e| DeviceError::StreamPause(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SupportedBufferSize;

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    fn params(channels: u16, sample_rate: u32) -> StreamParams {
        StreamParams {
            channels,
            sample_rate,
            buffer_frames: 256,
        }
    }

    #[test]
    fn rate_range_is_inclusive() {
        let config = range(2, 44100, 96000, SampleFormat::F32);

        assert!(in_range(&config, 44100));
        assert!(in_range(&config, 96000));
        assert!(!in_range(&config, 22050));
        assert!(!in_range(&config, 192000));
    }

    #[test]
    fn probe_needs_f32_exact_channels_and_rate() {
        let stereo = range(2, 44100, 48000, SampleFormat::F32);

        assert!(matches(&stereo, &params(2, 48000)));
        assert!(!matches(&stereo, &params(1, 48000)));
        assert!(!matches(&stereo, &params(2, 96000)));
        assert!(!matches(&range(2, 44100, 48000, SampleFormat::I16), &params(2, 48000)));
    }
}
