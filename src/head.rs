//! Play heads: speed-scaled cursors over one channel of a clip.

use std::sync::Arc;

use crate::clip::Clip;
use crate::mixer::ProcessContext;

/// Messages to control a [`ReadHead`] that is registered with a mixer.
///
/// Send these via [`HeadHandle::send`](crate::HeadHandle::send). They are
/// applied at the start of the next render, before any sample is read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HeadMessage {
    /// Move to a sample position (wrapped into the clip).
    Seek(f64),
    /// Set the speed multiplier. Negative values play backwards.
    SetSpeed(f64),
    /// Start or freeze the head.
    SetActive(bool),
}

/// A play head over one channel of a [`Clip`].
///
/// Every render call the head advances its fractional `position` by
/// `speed * clip.rate / mixer.rate` per output sample and emits the sample at
/// `floor(position)`. Positions wrap around the clip, so a head loops forever
/// in either direction. An inactive head emits silence and keeps its position,
/// but its `frame` counter still advances with the transport.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use loopdeck::{Clip, ProcessContext, ReadHead};
///
/// let clip = Arc::new(Clip::from_channels(4, vec![vec![0.0, 1.0, 2.0, 3.0]]).unwrap());
/// let mut head = ReadHead::new(clip).with_speed(2.0);
///
/// let out = head.read(&ProcessContext { sample_rate: 4, buffer_size: 2 });
/// assert_eq!(out, vec![0.0, 2.0]);
/// assert_eq!(head.position(), 0.0);
/// ```
#[derive(Clone, Debug)]
pub struct ReadHead {
    clip: Arc<Clip>,
    channel: usize,
    output: usize,
    position: f64,
    speed: f64,
    active: bool,
    frame: u64,
}

impl ReadHead {
    /// Create an active head on channel 0 at position 0, normal speed.
    pub fn new(clip: Arc<Clip>) -> Self {
        Self {
            clip,
            channel: 0,
            output: 0,
            position: 0.0,
            speed: 1.0,
            active: true,
            frame: 0,
        }
    }

    /// Read from `channel` of the clip, wrapped modulo its channel count.
    ///
    /// Also routes the head to the mixer output channel with the same index;
    /// call [`with_output`](Self::with_output) afterwards to change that.
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel % self.clip.channels();
        self.output = self.channel;
        self
    }

    /// Mix into output channel `output`. Clamped to the mixer's channel
    /// count when rendering.
    pub fn with_output(mut self, output: usize) -> Self {
        self.output = output;
        self
    }

    pub fn with_position(mut self, position: f64) -> Self {
        self.seek(position);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Move the head, wrapping into `[0, len)`. Returns the new position,
    /// which differs from `position` when it was out of bounds.
    pub fn seek(&mut self, position: f64) -> f64 {
        self.position = wrap(position, self.clip.len());
        self.position
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        self.speed
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Samples produced so far, active or not.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn channel(&self) -> usize {
        self.channel
    }

    #[inline]
    pub fn output(&self) -> usize {
        self.output
    }

    pub fn clip(&self) -> &Arc<Clip> {
        &self.clip
    }

    /// Position increment per output sample at the given output rate.
    #[inline]
    pub fn step(&self, ctx: &ProcessContext) -> f64 {
        self.speed * self.clip.rate() as f64 / ctx.sample_rate as f64
    }

    /// Fill `out[..ctx.buffer_size]` and advance. Does not allocate.
    ///
    /// If `out` is shorter than the context's buffer size only `out.len()`
    /// samples are produced.
    pub fn read_into(&mut self, ctx: &ProcessContext, out: &mut [f32]) {
        let n = ctx.buffer_size.min(out.len());
        let out = &mut out[..n];

        self.frame += n as u64;

        if !self.active {
            out.iter_mut().for_each(|s| *s = 0.0);
            return;
        }

        let step = self.step(ctx);
        let data = self.clip.samples(self.channel);
        let length = data.len();
        let last = length - 1;
        let mut position = self.position;

        for sample in out.iter_mut() {
            // No interpolation: nearest lower neighbour.
            *sample = data[(position as usize).min(last)];
            position = wrap(position + step, length);
        }

        self.position = position;
    }

    /// Allocating variant of [`read_into`](Self::read_into), for use off the
    /// real-time thread.
    pub fn read(&mut self, ctx: &ProcessContext) -> Vec<f32> {
        let mut out = vec![0.0; ctx.buffer_size];
        self.read_into(ctx, &mut out);
        out
    }

    pub(crate) fn apply(&mut self, msg: HeadMessage) {
        match msg {
            HeadMessage::Seek(p) => {
                self.seek(p);
            }
            HeadMessage::SetSpeed(s) => self.speed = s,
            HeadMessage::SetActive(a) => self.active = a,
        }
    }
}

/// Euclidean modulo into `[0, length)`.
///
/// `rem_euclid` can round a tiny negative value up to exactly `length`;
/// that case folds back to zero.
#[inline]
fn wrap(position: f64, length: usize) -> f64 {
    let length = length as f64;
    let wrapped = position.rem_euclid(length);
    if wrapped >= length || !wrapped.is_finite() {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_clip(rate: u32) -> Arc<Clip> {
        Arc::new(Clip::from_channels(rate, vec![vec![0.0, 1.0, 2.0, 3.0]]).unwrap())
    }

    fn ctx(sample_rate: u32, buffer_size: usize) -> ProcessContext {
        ProcessContext {
            sample_rate,
            buffer_size,
        }
    }

    #[test]
    fn unit_speed_reads_every_sample_and_loops() {
        let mut head = ReadHead::new(ramp_clip(4));

        assert_eq!(head.read(&ctx(4, 4)), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(head.position(), 0.0);
        assert_eq!(head.frame(), 4);
    }

    #[test]
    fn double_speed_skips_samples() {
        let mut head = ReadHead::new(ramp_clip(4)).with_speed(2.0);

        assert_eq!(head.read(&ctx(4, 2)), vec![0.0, 2.0]);
        assert_eq!(head.position(), 0.0);
    }

    #[test]
    fn reverse_playback_wraps_below_zero() {
        let mut head = ReadHead::new(ramp_clip(4)).with_speed(-1.0);

        assert_eq!(head.read(&ctx(4, 4)), vec![0.0, 3.0, 2.0, 1.0]);
        assert_eq!(head.position(), 0.0);
    }

    #[test]
    fn position_follows_advance_law() {
        let len = 100;
        let clip = Arc::new(Clip::new(1, len).unwrap());
        let (p0, s, n) = (17.25, 0.75, 257usize);
        let c = ctx(48000, n);
        let mut head = ReadHead::new(clip.clone()).with_position(p0).with_speed(s);

        head.read(&c);

        let step = s * clip.rate() as f64 / 48000.0;
        let expected = (p0 + n as f64 * step).rem_euclid(len as f64);
        assert!((head.position() - expected).abs() < 1e-9);
    }

    #[test]
    fn rate_conversion_uses_clip_and_output_rates() {
        // 8 Hz clip rendered at 4 Hz: step of 2 at unit speed.
        let clip = Arc::new(
            Clip::from_channels(8, vec![vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]]).unwrap(),
        );
        let mut head = ReadHead::new(clip);

        assert_eq!(head.read(&ctx(4, 4)), vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn inactive_head_is_silent_and_frozen() {
        let mut head = ReadHead::new(ramp_clip(4))
            .with_position(2.5)
            .with_active(false);

        let out = head.read(&ctx(4, 16));

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(head.position(), 2.5);
        assert_eq!(head.frame(), 16);
    }

    #[test]
    fn seek_wraps_negative_and_overflowing_positions() {
        let mut head = ReadHead::new(ramp_clip(4));

        assert_eq!(head.seek(5.5), 1.5);
        assert_eq!(head.seek(-1.0), 3.0);
        assert_eq!(head.seek(-8.0), 0.0);
        assert_eq!(head.seek(-1e-18), 0.0);
    }

    #[test]
    fn channel_wraps_at_construction() {
        let clip = Arc::new(Clip::from_channels(4, vec![vec![1.0; 4], vec![2.0; 4]]).unwrap());
        let head = ReadHead::new(clip).with_channel(3);

        assert_eq!(head.channel(), 1);
        assert_eq!(head.output(), 1);
    }

    #[test]
    fn fractional_step_holds_samples() {
        let mut head = ReadHead::new(ramp_clip(4)).with_speed(0.5);

        assert_eq!(head.read(&ctx(4, 6)), vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        assert_eq!(head.position(), 3.0);
    }

    #[test]
    fn short_output_limits_read() {
        let mut head = ReadHead::new(ramp_clip(4));
        let mut out = [9.0; 2];

        head.read_into(&ctx(4, 4), &mut out);

        assert_eq!(out, [0.0, 1.0]);
        assert_eq!(head.frame(), 2);
        assert_eq!(head.position(), 2.0);
    }

    #[test]
    fn messages_apply_in_order() {
        let mut head = ReadHead::new(ramp_clip(4));

        head.apply(HeadMessage::Seek(6.0));
        head.apply(HeadMessage::SetSpeed(-2.0));
        head.apply(HeadMessage::SetActive(false));

        assert_eq!(head.position(), 2.0);
        assert_eq!(head.speed(), -2.0);
        assert!(!head.is_active());
    }
}
