//! Loop an audio file through the default output device
//!
//! Run with: cargo run --example play_clip --features cpal_output -- <file> [speed] [seconds]

use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use loopdeck::{Clip, CpalBackend, Device, DeviceConfig, ReadHead};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: play_clip <file> [speed] [seconds]")?;
    let speed: f64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(1.0);
    let seconds: f64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10.0);

    let clip = Arc::new(Clip::load(&path, None)?);
    println!(
        "{}: {} channel(s), {:.2} s at {} Hz",
        path,
        clip.channels(),
        clip.duration(),
        clip.rate()
    );

    let (mut device, mut control) = Device::new(CpalBackend::new(), DeviceConfig::default())?;
    let support = device.can_start();
    if !support.playback {
        return Err(format!("{} cannot play this configuration", device.device_info().name).into());
    }

    // one head per output channel, reading the matching clip channel
    let mut heads = Vec::new();
    for ch in 0..device.channels() as usize {
        let head = ReadHead::new(clip.clone()).with_channel(ch).with_output(ch).with_speed(speed);
        heads.push(control.add(head).map_err(|_| "command queue full")?);
    }

    device.play()?;
    println!("Playing for {seconds} s...");

    let start = Instant::now();
    while start.elapsed().as_secs_f64() < seconds {
        sleep(Duration::from_millis(250));
        control.check_overruns();
        if let Some(head) = heads.first() {
            print!("\rposition {:>10.1}", head.position());
        }
    }
    println!();

    device.close()?;
    let metrics = control.metrics();
    println!(
        "{} renders, {} overruns, peak load {:.2}",
        metrics.renders, metrics.overruns, metrics.peak_load
    );
    Ok(())
}
