use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use loopdeck::{
    Clip, ClipPolicy, Device, DeviceConfig, HeadMessage, Mixer, MixerConfig, OfflineBackend, Pacing,
    ReadHead, StreamState,
};
use rtrb::Consumer;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn constant(rate: u32, value: f32, len: usize) -> Arc<Clip> {
    Arc::new(Clip::from_channels(rate, vec![vec![value; len]]).unwrap())
}

fn ramp(rate: u32, len: usize) -> Arc<Clip> {
    Arc::new(Clip::from_channels(rate, vec![(0..len).map(|i| i as f32).collect()]).unwrap())
}

fn drain(captured: &mut Consumer<f32>, samples: usize) -> Vec<f32> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while captured.slots() < samples && Instant::now() < deadline {
        sleep(Duration::from_millis(1));
    }

    let mut out = Vec::with_capacity(samples);
    while out.len() < samples {
        match captured.pop() {
            Ok(sample) => out.push(sample),
            Err(_) => break,
        }
    }
    out
}

#[test]
fn heads_reach_their_device_channels() {
    init_tracing();
    let (backend, mut captured) = OfflineBackend::new()
        .with_pacing(Pacing::Freewheel)
        .with_capture(64 * 2 * 8);
    let config = DeviceConfig::new(2, 48000, 64).with_clip_policy(ClipPolicy::Passthrough);
    let (mut device, mut control) = Device::new(backend, config).unwrap();

    control.add(ReadHead::new(constant(48000, 0.25, 100))).ok().unwrap();
    control
        .add(ReadHead::new(constant(48000, 0.5, 37)).with_output(1))
        .ok()
        .unwrap();

    device.play().unwrap();
    let out = drain(&mut captured, 64 * 2 * 8);
    device.close().unwrap();

    assert_eq!(out.len(), 64 * 2 * 8);
    for frame in out.chunks_exact(2) {
        assert_eq!(frame, [0.25, 0.5]);
    }
}

#[test]
fn half_speed_holds_every_sample_for_two_frames() {
    init_tracing();
    let (backend, mut captured) = OfflineBackend::new()
        .with_pacing(Pacing::Freewheel)
        .with_capture(64);
    let config = DeviceConfig::new(1, 44100, 16).with_clip_policy(ClipPolicy::Passthrough);
    let (mut device, mut control) = Device::new(backend, config).unwrap();

    let head = control
        .add(ReadHead::new(ramp(44100, 8)).with_speed(0.5))
        .ok()
        .unwrap();

    device.play().unwrap();
    let out = drain(&mut captured, 32);
    device.close().unwrap();

    let expected: Vec<f32> = (0..32).map(|i| ((i / 2) % 8) as f32).collect();
    assert_eq!(out, expected);
    assert!(head.frame() >= 32);
}

#[test]
fn steering_a_head_while_the_device_runs() {
    init_tracing();
    let backend = OfflineBackend::new().with_pacing(Pacing::Freewheel);
    let config = DeviceConfig::new(2, 48000, 32).with_clip_policy(ClipPolicy::Passthrough);
    let (mut device, mut control) = Device::new(backend, config).unwrap();

    let mut head = control.add(ReadHead::new(ramp(48000, 1000))).ok().unwrap();
    device.play().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !head.is_attached() && Instant::now() < deadline {
        sleep(Duration::from_millis(1));
    }
    assert!(head.is_attached());

    head.send(HeadMessage::SetActive(false)).unwrap();
    head.seek(500.0).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while (head.is_active() || head.position() != 500.0) && Instant::now() < deadline {
        sleep(Duration::from_millis(1));
    }
    device.stop().unwrap();
    assert_eq!(device.state(), StreamState::Stopped);

    assert!(!head.is_active());
    assert_eq!(head.position(), 500.0);

    control.remove(head.id()).unwrap();
    device.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while head.is_attached() && Instant::now() < deadline {
        sleep(Duration::from_millis(1));
    }
    device.close().unwrap();

    assert!(!head.is_attached());
    assert_eq!(device.mixer().unwrap().head_count(), 0);
    assert_eq!(control.collect(), 1);
}

#[test]
fn bounce_a_mix_to_wav() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bounce.wav");

    let config = MixerConfig::new(48000, 1, 64).with_clip_policy(ClipPolicy::HardClip);
    let (mut mixer, mut control) = Mixer::new(config);
    control.add(ReadHead::new(constant(48000, 0.75, 10))).ok().unwrap();
    control.add(ReadHead::new(constant(48000, 0.75, 10))).ok().unwrap();

    let mut out = vec![0.0; 480];
    mixer.render(&mut out);
    assert!(out.iter().all(|&s| s == 1.0));

    let bounced = Clip::from_channels(48000, vec![out]).unwrap();
    bounced.save(&path).unwrap();

    let loaded = Clip::load(&path, None).unwrap();
    assert_eq!(loaded.rate(), 48000);
    assert_eq!(loaded.channels(), 1);
    assert_eq!(loaded.len(), 480);
    assert!(loaded.channel(0).unwrap().iter().all(|&s| (s - 1.0).abs() < 1e-6));
    assert_eq!(loaded.path(), Some(path.as_path()));
}
