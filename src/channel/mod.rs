//! Logical audio channels.
//!
//! A channel owns a set of clips and an optional live-stream attachment, and
//! is driven by its own mix tick (see [`mixer`]). Channels come from the
//! engine directly (ad-hoc) or from a [`ChannelPool`].

pub mod id_pool;
pub mod mixer;
pub mod pool;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::audio::clip::{Clip, PlayOptions};
use crate::storage::ClipSource;
use crate::stream::StreamSession;
use crate::transport::RecipientId;

pub use id_pool::{IdOwner, IdRegistry, OwnerToken};
pub use pool::{ChannelPool, PoolStats};

/// Delivery policy for a channel's packets, evaluated every tick.
///
/// Priority at dispatch time: a per-recipient validator wins over broadcast,
/// which wins over the explicit owner list.
#[derive(Clone)]
pub struct Audience {
    pub validator: Option<Arc<dyn Fn(RecipientId) -> bool + Send + Sync>>,
    pub broadcast: bool,
    pub owners: Vec<RecipientId>,
}

impl Default for Audience {
    fn default() -> Self {
        Self {
            validator: None,
            broadcast: true,
            owners: Vec::new(),
        }
    }
}

impl fmt::Debug for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Audience")
            .field("validator", &self.validator.is_some())
            .field("broadcast", &self.broadcast)
            .field("owners", &self.owners)
            .finish()
    }
}

/// A live-stream session attached to a channel, mixed at `volume`.
pub(crate) struct StreamAttachment {
    pub session: Arc<StreamSession>,
    pub volume: f32,
}

/// Mutable channel state, owned by the mix tick and guarded by one lock.
pub(crate) struct ChannelState {
    pub clips: HashMap<u32, Clip>,
    pub next_clip_id: u32,
    pub audience: Audience,
    pub stream: Option<StreamAttachment>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            clips: HashMap::new(),
            next_clip_id: 0,
            audience: Audience::default(),
            stream: None,
        }
    }
}

/// One logical audio output, identified by a small integer id.
pub struct Channel {
    id: u8,
    pooled: bool,
    pub(crate) name: Mutex<Option<String>>,
    pub(crate) state: Mutex<ChannelState>,
    destroy_when_empty: AtomicBool,
    destroyed: AtomicBool,
    pub(crate) drain_pending: AtomicBool,
    /// Bumped on every deactivation; lets a stale drain wait detect that its
    /// rental ended and the wrapper may already belong to someone else.
    pub(crate) rental_epoch: AtomicU64,
    pub(crate) tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    pub(crate) fn new(id: u8, name: Option<String>, destroy_when_empty: bool, pooled: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            pooled,
            name: Mutex::new(name),
            state: Mutex::new(ChannelState::new()),
            destroy_when_empty: AtomicBool::new(destroy_when_empty),
            destroyed: AtomicBool::new(false),
            drain_pending: AtomicBool::new(false),
            rental_epoch: AtomicU64::new(0),
            tick_task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// `true` for channels whose id belongs to a [`ChannelPool`].
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    pub(crate) fn take_name(&self) -> Option<String> {
        self.name.lock().take()
    }

    // ── Clips ────────────────────────────────────────────────────────────────

    /// Start playing `source` on this channel. Returns the clip id, unique
    /// within the channel while the clip lives.
    pub fn play(&self, source: Arc<ClipSource>, opts: PlayOptions) -> u32 {
        let mut state = self.state.lock();
        let mut id = state.next_clip_id;
        while state.clips.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_clip_id = id.wrapping_add(1);
        state.clips.insert(id, Clip::new(id, source, opts));
        id
    }

    /// Remove a clip immediately. Other clips' cursors are unaffected.
    pub fn remove_clip(&self, clip_id: u32) -> bool {
        self.state.lock().clips.remove(&clip_id).is_some()
    }

    pub fn set_clip_paused(&self, clip_id: u32, paused: bool) -> bool {
        let mut state = self.state.lock();
        match state.clips.get_mut(&clip_id) {
            Some(clip) => {
                clip.paused = paused;
                true
            }
            None => false,
        }
    }

    pub fn set_clip_volume(&self, clip_id: u32, volume: f32) -> bool {
        let mut state = self.state.lock();
        match state.clips.get_mut(&clip_id) {
            Some(clip) => {
                clip.volume = volume;
                true
            }
            None => false,
        }
    }

    pub fn set_clip_looping(&self, clip_id: u32, looping: bool) -> bool {
        let mut state = self.state.lock();
        match state.clips.get_mut(&clip_id) {
            Some(clip) => {
                clip.looping = looping;
                true
            }
            None => false,
        }
    }

    pub fn clip_count(&self) -> usize {
        self.state.lock().clips.len()
    }

    /// Cursor of a clip, if it exists (diagnostics and tests).
    pub fn clip_cursor(&self, clip_id: u32) -> Option<usize> {
        self.state.lock().clips.get(&clip_id).map(|c| c.cursor())
    }

    // ── Live stream ──────────────────────────────────────────────────────────

    /// Attach a live-stream session, replacing (and stopping) any previous
    /// attachment.
    pub fn attach_stream(&self, session: Arc<StreamSession>, volume: f32) {
        let previous = self
            .state
            .lock()
            .stream
            .replace(StreamAttachment { session, volume });
        if let Some(previous) = previous {
            previous.session.stop();
        }
    }

    /// Detach the current stream session without stopping it.
    pub fn detach_stream(&self) -> Option<Arc<StreamSession>> {
        self.state.lock().stream.take().map(|s| s.session)
    }

    pub fn has_stream(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    pub fn set_stream_volume(&self, volume: f32) -> bool {
        let mut state = self.state.lock();
        match state.stream.as_mut() {
            Some(attachment) => {
                attachment.volume = volume;
                true
            }
            None => false,
        }
    }

    // ── Audience ─────────────────────────────────────────────────────────────

    pub fn set_broadcast(&self, broadcast: bool) {
        self.state.lock().audience.broadcast = broadcast;
    }

    pub fn set_owners(&self, owners: Vec<RecipientId>) {
        self.state.lock().audience.owners = owners;
    }

    pub fn add_owner(&self, owner: RecipientId) {
        let mut state = self.state.lock();
        if !state.audience.owners.contains(&owner) {
            state.audience.owners.push(owner);
        }
    }

    pub fn remove_owner(&self, owner: RecipientId) {
        self.state.lock().audience.owners.retain(|o| *o != owner);
    }

    /// Install (or clear) the per-recipient validator. When set it overrides
    /// both broadcast and the owner list.
    pub fn set_validator(
        &self,
        validator: Option<Arc<dyn Fn(RecipientId) -> bool + Send + Sync>>,
    ) {
        self.state.lock().audience.validator = validator;
    }

    pub fn audience(&self) -> Audience {
        self.state.lock().audience.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn set_destroy_when_empty(&self, destroy: bool) {
        self.destroy_when_empty.store(destroy, Ordering::Release);
    }

    pub fn destroy_when_empty(&self) -> bool {
        self.destroy_when_empty.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn set_tick_task(&self, task: JoinHandle<()>) {
        *self.tick_task.lock() = Some(task);
    }

    /// Tear the channel down: mark it destroyed under the state lock (so no
    /// further tick can touch its buffers), stop any attached stream, clear
    /// state and cancel the tick task.
    pub(crate) fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if self.destroyed.swap(true, Ordering::AcqRel) {
                return;
            }
            state.clips.clear();
            if let Some(attachment) = state.stream.take() {
                attachment.session.stop();
            }
        }
        if let Some(task) = self.tick_task.lock().take() {
            task.abort();
        }
    }

    /// Reset the channel for pool reuse: clear clips and stream, restore the
    /// broadcast-to-all default audience.
    pub(crate) fn deactivate(&self) {
        let mut state = self.state.lock();
        state.clips.clear();
        if let Some(attachment) = state.stream.take() {
            attachment.session.stop();
        }
        state.audience = Audience::default();
        drop(state);
        self.destroy_when_empty.store(false, Ordering::Release);
        self.drain_pending.store(false, Ordering::Release);
        self.rental_epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Force every clip to finish naturally: looping clips stop looping,
    /// keep-alive clips become removable, paused clips resume, and clips
    /// already parked at end-of-buffer are dropped. Used by
    /// [`ChannelPool::release_when_drained`] so the drain wait terminates.
    pub(crate) fn finish_clips_for_drain(&self) {
        let mut state = self.state.lock();
        state.clips.retain(|_, clip| !clip.at_end());
        for clip in state.clips.values_mut() {
            clip.looping = false;
            clip.destroy_on_end = true;
            clip.paused = false;
        }
    }
}
