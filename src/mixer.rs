//! The mixer: sums every registered head into one interleaved buffer.

use std::sync::Arc;
use std::time::Instant;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::handle::{HeadId, HeadSlot, MixerCommand, MixerHandle};
use crate::head::ReadHead;
use crate::metrics::RenderMetrics;

/// Information available while rendering.
///
/// Passed to every [`ReadHead::read_into`] call. Contains the output sample
/// rate and the number of samples to produce in this call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessContext {
    /// Output sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of samples to produce
    pub buffer_size: usize,
}

/// What happens to the summed signal before it leaves the mixer.
///
/// Heads are added with no gain compensation, so several loud heads can
/// exceed [-1, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClipPolicy {
    /// Leave the sum untouched; the device decides.
    Passthrough,
    /// Clamp every sample to [-1, 1].
    #[default]
    HardClip,
    /// `tanh` saturation.
    SoftClip,
}

impl ClipPolicy {
    pub fn apply(self, buffer: &mut [f32]) {
        match self {
            ClipPolicy::Passthrough => {}
            ClipPolicy::HardClip => buffer.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0)),
            ClipPolicy::SoftClip => buffer.iter_mut().for_each(|s| *s = s.tanh()),
        }
    }
}

/// Mixer parameters. Everything is sized here, up front, so rendering never
/// allocates.
#[derive(Clone, Debug, PartialEq)]
pub struct MixerConfig {
    /// Output rate in Hz.
    pub sample_rate: u32,
    /// Interleaved output channels.
    pub channels: usize,
    /// Largest number of frames a head reads in one go. Longer renders are
    /// split into chunks of this size.
    pub block_size: usize,
    /// Size of the head table.
    pub max_heads: usize,
    /// Depth of the head add/remove queue.
    pub command_capacity: usize,
    /// Depth of each head's message queue.
    pub message_capacity: usize,
    pub clip_policy: ClipPolicy,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            block_size: 512,
            max_heads: 64,
            command_capacity: 256,
            message_capacity: 64,
            clip_policy: ClipPolicy::default(),
        }
    }
}

impl MixerConfig {
    pub fn new(sample_rate: u32, channels: usize, block_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            block_size,
            ..Self::default()
        }
    }

    pub fn with_max_heads(mut self, max_heads: usize) -> Self {
        self.max_heads = max_heads;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    pub fn with_message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity;
        self
    }

    pub fn with_clip_policy(mut self, policy: ClipPolicy) -> Self {
        self.clip_policy = policy;
        self
    }
}

/// Sums registered [`ReadHead`]s into an interleaved output buffer.
///
/// The mixer is meant to be owned by the real-time thread. It is created
/// together with a [`MixerHandle`], which stays on the control thread and is
/// the only way to add or remove heads once rendering has started:
///
/// ```
/// use std::sync::Arc;
/// use loopdeck::{Clip, ClipPolicy, Mixer, MixerConfig, ReadHead};
///
/// let clip = Arc::new(Clip::from_channels(4, vec![vec![1.0; 4]]).unwrap());
/// let config = MixerConfig::new(4, 1, 2).with_clip_policy(ClipPolicy::Passthrough);
/// let (mut mixer, mut control) = Mixer::new(config);
///
/// control.add(ReadHead::new(clip.clone())).ok().unwrap();
/// control.add(ReadHead::new(clip)).ok().unwrap();
///
/// let mut out = [0.0; 2];
/// mixer.render(&mut out);
/// assert_eq!(out, [2.0, 2.0]);
/// ```
///
/// # Real-time contract
///
/// [`render`](Self::render) does not allocate, lock or block. Pending
/// commands and head messages are applied at its start, heads are read in
/// registration order, and head state carries over from one render to the
/// next without any reset.
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    block_size: usize,
    max_heads: usize,
    heads: Vec<Box<HeadSlot>>,
    scratch: Vec<f32>,
    commands: Consumer<MixerCommand>,
    retired: Producer<Box<HeadSlot>>,
    policy: ClipPolicy,
    metrics: Arc<RenderMetrics>,
}

impl Mixer {
    /// Create a mixer and the handle that controls it.
    pub fn new(config: MixerConfig) -> (Mixer, MixerHandle) {
        let channels = config.channels.max(1);
        let block_size = config.block_size.max(1);
        let max_heads = config.max_heads.max(1);
        let command_capacity = config.command_capacity.max(1);

        let (command_tx, command_rx) = RingBuffer::new(command_capacity);
        // Room for every head the mixer can hold plus every add still in flight,
        // so releasing a head never fails in practice.
        let (retired_tx, retired_rx) = RingBuffer::new(max_heads + command_capacity);
        let metrics = Arc::new(RenderMetrics::new());

        let mixer = Mixer {
            sample_rate: config.sample_rate,
            channels,
            block_size,
            max_heads,
            heads: Vec::with_capacity(max_heads),
            scratch: vec![0.0; block_size],
            commands: command_rx,
            retired: retired_tx,
            policy: config.clip_policy,
            metrics: Arc::clone(&metrics),
        };
        let handle = MixerHandle::new(command_tx, retired_rx, metrics, config.message_capacity);

        (mixer, handle)
    }

    /// Render `out.len() / channels` interleaved frames.
    ///
    /// Each head is read into scratch space and added to its output channel;
    /// the clip policy is applied to the total. Trailing samples that do not
    /// form a whole frame are zeroed.
    pub fn render(&mut self, out: &mut [f32]) {
        let started = Instant::now();

        self.apply_commands();
        for slot in self.heads.iter_mut() {
            slot.drain_messages();
        }

        out.iter_mut().for_each(|s| *s = 0.0);

        let channels = self.channels;
        let frames = out.len() / channels;
        let mut offset = 0;

        while offset < frames {
            let n = self.block_size.min(frames - offset);
            let ctx = ProcessContext {
                sample_rate: self.sample_rate,
                buffer_size: n,
            };
            let block = &mut out[offset * channels..(offset + n) * channels];

            for slot in self.heads.iter_mut() {
                let target = slot.head.output().min(channels - 1);
                let scratch = &mut self.scratch[..n];
                slot.head.read_into(&ctx, scratch);

                for (frame, &sample) in block.chunks_exact_mut(channels).zip(scratch.iter()) {
                    frame[target] += sample;
                }
            }

            offset += n;
        }

        self.policy.apply(&mut out[..frames * channels]);

        for slot in self.heads.iter() {
            slot.publish();
        }

        self.metrics.record(started.elapsed(), frames, self.sample_rate);
    }

    /// Allocating variant of [`render`](Self::render) returning `frames`
    /// interleaved frames, for use off the real-time thread.
    pub fn render_frames(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.channels];
        self.render(&mut out);
        out
    }

    fn apply_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                MixerCommand::Add(slot) => {
                    if self.heads.len() < self.max_heads {
                        slot.attach();
                        // within the preallocated capacity
                        self.heads.push(slot);
                    } else {
                        self.metrics.reject_head();
                        self.retire(slot);
                    }
                }
                MixerCommand::Remove(id) => {
                    if let Some(index) = self.heads.iter().position(|s| s.id == id) {
                        // `remove`, not `swap_remove`: keep registration order
                        let slot = self.heads.remove(index);
                        self.retire(slot);
                    }
                }
                MixerCommand::SetClipPolicy(policy) => self.policy = policy,
            }
        }
    }

    fn retire(&mut self, slot: Box<HeadSlot>) {
        slot.detach();
        // Only fails if the control side never collects; the slot is then
        // dropped here.
        let _ = self.retired.push(slot);
    }

    /// Context for a full block at the mixer's rate.
    pub fn context(&self) -> ProcessContext {
        ProcessContext {
            sample_rate: self.sample_rate,
            buffer_size: self.block_size,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn clip_policy(&self) -> ClipPolicy {
        self.policy
    }

    /// Heads currently rendered.
    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    /// Inspect a registered head. Only meaningful from the thread that owns
    /// the mixer.
    pub fn head(&self, id: HeadId) -> Option<&ReadHead> {
        self.heads.iter().find(|s| s.id == id).map(|s| &s.head)
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    /// Resize the scratch buffer. Only called while no stream owns the mixer.
    pub(crate) fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size.max(1);
        self.scratch.resize(self.block_size, 0.0);
    }
}
