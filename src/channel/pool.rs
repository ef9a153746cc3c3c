//! Channel wrapper pool.
//!
//! A pool reserves a block of channel ids up front and recycles whole
//! channels: renting reactivates an idle wrapper instead of allocating a
//! fresh id and spawning a new tick task. Capacity and id exhaustion are
//! reported (as `None`), never thrown — a momentarily full pool is a normal
//! condition for callers under load.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::channel::id_pool::{IdOwner, OwnerToken};
use crate::engine::AudioEngine;

pub struct ChannelPool {
    name: String,
    capacity: usize,
    engine: Arc<AudioEngine>,
    token: OnceLock<OwnerToken>,
    inner: Mutex<PoolInner>,
    disposed: AtomicBool,
}

struct PoolInner {
    idle: VecDeque<Arc<Channel>>,
    active: HashMap<u8, Arc<Channel>>,
    /// Ids reserved for this pool and not currently bound to a wrapper.
    free_ids: VecDeque<u8>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub free_ids: usize,
    pub capacity: usize,
}

impl IdOwner for ChannelPool {
    fn held_ids(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        inner
            .free_ids
            .iter()
            .copied()
            .chain(inner.idle.iter().map(|c| c.id()))
            .chain(inner.active.keys().copied())
            .collect()
    }
}

impl ChannelPool {
    /// Create a pool and reserve up to `capacity` ids from the global space,
    /// scanning from `start_hint`. A tight id space yields a smaller usable
    /// pool, reported via [`ChannelPool::stats`], not an error.
    pub(crate) fn new(
        engine: Arc<AudioEngine>,
        name: &str,
        capacity: usize,
        start_hint: u8,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            name: name.to_string(),
            capacity,
            engine,
            token: OnceLock::new(),
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                active: HashMap::new(),
                free_ids: VecDeque::new(),
            }),
            disposed: AtomicBool::new(false),
        });

        let dyn_pool: Arc<dyn IdOwner> = pool.clone();
        let weak: Weak<dyn IdOwner> = Arc::downgrade(&dyn_pool);
        let _ = pool.token.set(pool.engine.ids().register_owner(weak));

        let mut free_ids = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            match pool.engine.ids().allocate_next(start_hint) {
                Ok(id) => free_ids.push_back(id),
                Err(_) => {
                    warn!(
                        pool = %pool.name,
                        reserved = free_ids.len(),
                        capacity,
                        "id space exhausted while reserving pool ids"
                    );
                    break;
                }
            }
        }
        info!(pool = %pool.name, capacity, reserved = free_ids.len(), "pool created");
        pool.inner.lock().free_ids = free_ids;
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn owner_token(&self) -> OwnerToken {
        *self
            .token
            .get()
            .expect("pool registered as id owner at construction")
    }

    /// Rent a channel.
    ///
    /// Reuses an idle wrapper when one exists; otherwise binds one of the
    /// pool's cached ids to a new wrapper, re-validating the id against the
    /// global registry first (reservations can be invalidated by components
    /// created outside the pool). Returns `None` on transient exhaustion.
    pub fn acquire(&self, name: Option<&str>) -> Option<Arc<Channel>> {
        if self.disposed.load(Ordering::Acquire) {
            return None;
        }

        let idle = { self.inner.lock().idle.pop_front() };
        if let Some(channel) = idle {
            if let Err(err) = self.engine.assign_name(&channel, name) {
                warn!(pool = %self.name, error = %err, "cannot reactivate wrapper");
                self.inner.lock().idle.push_front(channel);
                return None;
            }
            debug!(pool = %self.name, channel = channel.id(), "wrapper reactivated");
            self.inner.lock().active.insert(channel.id(), channel.clone());
            return Some(channel);
        }

        loop {
            let id = {
                let mut inner = self.inner.lock();
                if inner.active.len() + inner.idle.len() >= self.capacity {
                    return None;
                }
                inner.free_ids.pop_front()?
            };

            // Defensive re-check against the current global state.
            if self.engine.ids().held_elsewhere(id, self.owner_token()) {
                warn!(pool = %self.name, id, "pool id stolen by an external channel, discarding");
                continue;
            }

            match self.engine.create_pooled_channel(id, name) {
                Ok(channel) => {
                    debug!(pool = %self.name, channel = id, "wrapper created");
                    self.inner.lock().active.insert(id, channel.clone());
                    return Some(channel);
                }
                Err(err) => {
                    warn!(pool = %self.name, id, error = %err, "failed to activate pooled channel");
                    self.inner.lock().free_ids.push_back(id);
                    return None;
                }
            }
        }
    }

    /// Return a rented channel for reuse: deactivated (clips, stream and
    /// audience cleared) but keeping its channel object and id.
    pub fn release(&self, channel: &Arc<Channel>) -> bool {
        let removed = { self.inner.lock().active.remove(&channel.id()) };
        let Some(channel) = removed else {
            return false;
        };
        self.engine.deactivate_channel(&channel);
        self.inner.lock().idle.push_back(channel);
        true
    }

    /// Return a rented channel and destroy it; its id goes back to this
    /// pool's own free queue, not the global space.
    pub fn release_and_destroy(&self, channel: &Arc<Channel>) -> bool {
        let removed = { self.inner.lock().active.remove(&channel.id()) };
        let Some(channel) = removed else {
            return false;
        };
        let id = channel.id();
        self.engine.destroy_channel(id);
        self.inner.lock().free_ids.push_back(id);
        true
    }

    /// Defer a release until the channel has drained.
    ///
    /// Clips that would play forever are force-converted to finite ones,
    /// then a detached task polls until the channel is empty and performs
    /// the release (or destroy). Never blocks the caller; idempotent while a
    /// drain is already pending.
    pub fn release_when_drained(self: &Arc<Self>, channel: &Arc<Channel>, destroy: bool) {
        {
            let inner = self.inner.lock();
            if !inner.active.contains_key(&channel.id()) {
                return;
            }
        }
        if channel.drain_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        channel.finish_clips_for_drain();

        let pool = Arc::clone(self);
        let channel = Arc::clone(channel);
        let epoch = channel.rental_epoch.load(Ordering::Acquire);
        let poll = Duration::from_millis(self.engine.config().drain_poll_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                if channel.is_destroyed() || pool.disposed.load(Ordering::Acquire) {
                    break;
                }
                // The rental this wait was scheduled for is already over.
                if channel.rental_epoch.load(Ordering::Acquire) != epoch {
                    break;
                }
                if channel.clip_count() == 0 && !channel.has_stream() {
                    debug!(pool = %pool.name, channel = channel.id(), destroy, "drained, releasing");
                    if destroy {
                        pool.release_and_destroy(&channel);
                    } else {
                        pool.release(&channel);
                    }
                    break;
                }
            }
        });
    }

    /// Destroy every wrapper (idle and active) and release all reserved ids
    /// back to the global space.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (idle, active, free_ids) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.idle),
                std::mem::take(&mut inner.active),
                std::mem::take(&mut inner.free_ids),
            )
        };
        for channel in idle.iter().chain(active.values()) {
            let id = channel.id();
            self.engine.destroy_channel(id);
            self.engine.ids().release(id);
        }
        for id in free_ids {
            self.engine.ids().release(id);
        }
        self.engine.ids().unregister_owner(self.owner_token());
        info!(pool = %self.name, "pool disposed");
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            idle: inner.idle.len(),
            active: inner.active.len(),
            free_ids: inner.free_ids.len(),
            capacity: self.capacity,
        }
    }
}
