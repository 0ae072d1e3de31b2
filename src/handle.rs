//! Control-side handles for a running [`Mixer`](crate::Mixer).
//!
//! Heads live on the real-time thread once registered. Everything here talks
//! to them through `rtrb` ring buffers (never a lock) and observes them
//! through atomics the mixer publishes after each render.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::head::{HeadMessage, ReadHead};
use crate::metrics::{MetricsSnapshot, RenderMetrics};
use crate::mixer::ClipPolicy;

/// Identifies a head registered with a mixer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HeadId(pub(crate) u64);

/// Head fields mirrored for other threads.
#[derive(Debug, Default)]
pub(crate) struct HeadState {
    /// f64 bits
    position: AtomicU64,
    frame: AtomicU64,
    active: AtomicBool,
    attached: AtomicBool,
    /// Set once the mixer lets go of the head; never cleared.
    released: AtomicBool,
}

impl HeadState {
    fn from_head(head: &ReadHead) -> Self {
        let state = Self::default();
        state.store(head);
        state
    }

    fn store(&self, head: &ReadHead) {
        self.position.store(head.position().to_bits(), Ordering::Relaxed);
        self.frame.store(head.frame(), Ordering::Relaxed);
        self.active.store(head.is_active(), Ordering::Relaxed);
    }
}

/// A head plus its message queue, as owned by the mixer.
pub(crate) struct HeadSlot {
    pub(crate) id: HeadId,
    pub(crate) head: ReadHead,
    messages: Consumer<HeadMessage>,
    state: Arc<HeadState>,
}

impl HeadSlot {
    /// Apply every pending message. No allocation.
    pub(crate) fn drain_messages(&mut self) {
        while let Ok(msg) = self.messages.pop() {
            self.head.apply(msg);
        }
    }

    pub(crate) fn publish(&self) {
        self.state.store(&self.head);
    }

    pub(crate) fn attach(&self) {
        self.state.attached.store(true, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.publish();
        self.state.attached.store(false, Ordering::Release);
        self.state.released.store(true, Ordering::Release);
    }
}

/// Head-set mutations queued for the real-time thread.
pub(crate) enum MixerCommand {
    /// Boxed so the queue moves a pointer, and so allocation stays on the
    /// control thread.
    Add(Box<HeadSlot>),
    Remove(HeadId),
    SetClipPolicy(ClipPolicy),
}

/// Handle for controlling one registered head from another thread.
///
/// Messages are applied at the start of the next render. If the head's
/// queue is full, or the mixer has removed or turned away the head,
/// [`send`](Self::send) returns the message back.
///
/// The getters report the state published after the most recent render,
/// so they lag the real-time thread by at most one callback.
pub struct HeadHandle {
    id: HeadId,
    sender: Producer<HeadMessage>,
    state: Arc<HeadState>,
}

impl HeadHandle {
    pub fn id(&self) -> HeadId {
        self.id
    }

    /// Queue a message for the head. Lock-free, safe to call from any thread
    /// that owns this handle.
    pub fn send(&mut self, msg: HeadMessage) -> Result<(), HeadMessage> {
        if self.state.released.load(Ordering::Acquire) || self.sender.is_abandoned() {
            return Err(msg);
        }
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    pub fn seek(&mut self, position: f64) -> Result<(), HeadMessage> {
        self.send(HeadMessage::Seek(position))
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<(), HeadMessage> {
        self.send(HeadMessage::SetSpeed(speed))
    }

    pub fn set_active(&mut self, active: bool) -> Result<(), HeadMessage> {
        self.send(HeadMessage::SetActive(active))
    }

    pub fn position(&self) -> f64 {
        f64::from_bits(self.state.position.load(Ordering::Relaxed))
    }

    pub fn frame(&self) -> u64 {
        self.state.frame.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Relaxed)
    }

    /// Whether the mixer currently renders this head. `false` until the
    /// first render after [`MixerHandle::add`], and again after removal.
    pub fn is_attached(&self) -> bool {
        self.state.attached.load(Ordering::Acquire)
    }
}

/// Control side of a [`Mixer`](crate::Mixer), returned by
/// [`Mixer::new`](crate::Mixer::new).
///
/// Registering and unregistering heads never blocks: commands go through a
/// fixed-size queue and are picked up by the next render. Heads the mixer lets
/// go of come back through a second queue and are dropped here, on the
/// control thread, by [`collect`](Self::collect).
pub struct MixerHandle {
    commands: Producer<MixerCommand>,
    retired: Consumer<Box<HeadSlot>>,
    metrics: Arc<RenderMetrics>,
    next_id: u64,
    message_capacity: usize,
    reported_overruns: u64,
}

impl MixerHandle {
    pub(crate) fn new(
        commands: Producer<MixerCommand>,
        retired: Consumer<Box<HeadSlot>>,
        metrics: Arc<RenderMetrics>,
        message_capacity: usize,
    ) -> Self {
        Self {
            commands,
            retired,
            metrics,
            next_id: 0,
            message_capacity: message_capacity.max(1),
            reported_overruns: 0,
        }
    }

    /// Register a head. It starts playing at the next render.
    ///
    /// Returns the head back if the command queue is full.
    pub fn add(&mut self, head: ReadHead) -> Result<HeadHandle, ReadHead> {
        self.collect();

        if self.commands.is_full() {
            return Err(head);
        }

        let id = HeadId(self.next_id);
        self.next_id += 1;

        let (sender, messages) = RingBuffer::new(self.message_capacity);
        let state = Arc::new(HeadState::from_head(&head));
        let slot = Box::new(HeadSlot {
            id,
            head,
            messages,
            state: Arc::clone(&state),
        });

        // Single producer: the fullness check above leaves room for this push.
        let _ = self.commands.push(MixerCommand::Add(slot));

        tracing::debug!(head = id.0, "queued head");
        Ok(HeadHandle { id, sender, state })
    }

    /// Unregister a head. Returns the id back if the command queue is full.
    pub fn remove(&mut self, id: HeadId) -> Result<(), HeadId> {
        self.collect();
        self.commands
            .push(MixerCommand::Remove(id))
            .map_err(|_| id)
    }

    /// Change how the mixed buffer is limited. Returns the policy back if
    /// the command queue is full.
    pub fn set_clip_policy(&mut self, policy: ClipPolicy) -> Result<(), ClipPolicy> {
        self.commands
            .push(MixerCommand::SetClipPolicy(policy))
            .map_err(|_| policy)
    }

    /// Drop heads the mixer has released. Returns how many were dropped.
    pub fn collect(&mut self) -> usize {
        let mut count = 0;
        while let Ok(slot) = self.retired.pop() {
            tracing::trace!(head = slot.id.0, "dropping released head");
            drop(slot);
            count += 1;
        }
        count
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared metrics, e.g. for a monitoring thread.
    pub fn metrics_ref(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    /// Log overruns that happened since the previous call.
    ///
    /// Returns the number of new overruns.
    pub fn check_overruns(&mut self) -> u64 {
        let snap = self.metrics.snapshot();
        let new = snap.overruns.saturating_sub(self.reported_overruns);
        self.reported_overruns = snap.overruns;

        if new > 0 {
            tracing::warn!(
                new,
                total = snap.overruns,
                peak_load = snap.peak_load,
                "render callback missed its deadline"
            );
            self.metrics.reset_peak();
        }
        new
    }
}
