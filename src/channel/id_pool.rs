//! Global channel-identifier registry.
//!
//! Channel ids are drawn from a single 256-slot space shared by every
//! component that can own a channel: pools, ad-hoc channels, host-created
//! wrappers. The registry keeps the authoritative reservation table behind
//! one lock, and on top of it polls every registered owner for the ids it
//! currently holds, so components that came to hold an id outside
//! [`IdRegistry::allocate_next`] are still counted.
//!
//! Lock discipline: owners are polled with the registry lock held, so an
//! [`IdOwner::held_ids`] implementation must be self-contained — callers
//! must never invoke registry methods while holding the lock their own
//! `held_ids` takes.

use std::sync::Weak;

use parking_lot::Mutex;

use crate::audio::constants::ID_SPACE;
use crate::common::errors::EngineError;

/// Capability exposed by every channel-owning component: list the ids it
/// currently holds.
pub trait IdOwner: Send + Sync {
    fn held_ids(&self) -> Vec<u8>;
}

/// Identifies a registered owner, so a component can exclude itself from its
/// own re-validation polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerToken(usize);

struct RegistryInner {
    reserved: [bool; ID_SPACE],
    owners: Vec<(usize, Weak<dyn IdOwner>)>,
    next_token: usize,
}

impl RegistryInner {
    /// Union of every owner's held ids, pruning dropped owners.
    fn collect_held(&mut self, except: Option<OwnerToken>) -> [bool; ID_SPACE] {
        let mut held = [false; ID_SPACE];
        self.owners.retain(|(token, weak)| {
            let Some(owner) = weak.upgrade() else {
                return false;
            };
            if except != Some(OwnerToken(*token)) {
                for id in owner.held_ids() {
                    held[id as usize] = true;
                }
            }
            true
        });
        held
    }
}

/// The process-wide id allocator.
pub struct IdRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                reserved: [false; ID_SPACE],
                owners: Vec::new(),
                next_token: 0,
            }),
        }
    }

    /// Register a channel-owning component for held-id polling.
    pub fn register_owner(&self, owner: Weak<dyn IdOwner>) -> OwnerToken {
        let mut inner = self.inner.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.owners.push((token, owner));
        OwnerToken(token)
    }

    pub fn unregister_owner(&self, token: OwnerToken) {
        self.inner
            .lock()
            .owners
            .retain(|(t, _)| OwnerToken(*t) != token);
    }

    /// Allocate the lowest free id scanning circularly from `start_hint`,
    /// skipping reserved ids and ids held by any registered owner.
    pub fn allocate_next(&self, start_hint: u8) -> Result<u8, EngineError> {
        let mut inner = self.inner.lock();
        let held = inner.collect_held(None);
        for offset in 0..ID_SPACE {
            let id = (start_hint as usize + offset) % ID_SPACE;
            if inner.reserved[id] || held[id] {
                continue;
            }
            inner.reserved[id] = true;
            return Ok(id as u8);
        }
        Err(EngineError::ResourceExhausted("channel id space"))
    }

    /// Reserve a specific id. Returns `false` if it is already reserved or
    /// held by any owner.
    pub fn reserve(&self, id: u8) -> bool {
        let mut inner = self.inner.lock();
        let held = inner.collect_held(None);
        if inner.reserved[id as usize] || held[id as usize] {
            return false;
        }
        inner.reserved[id as usize] = true;
        true
    }

    /// Return a reservation to the free space.
    pub fn release(&self, id: u8) {
        self.inner.lock().reserved[id as usize] = false;
    }

    /// `true` if a component other than `except` currently holds `id`.
    ///
    /// Pools call this before binding one of their cached ids to a new
    /// wrapper: a reservation made long ago can have been taken over by a
    /// component created outside the pool.
    pub fn held_elsewhere(&self, id: u8, except: OwnerToken) -> bool {
        let mut inner = self.inner.lock();
        let held = inner.collect_held(Some(except));
        held[id as usize]
    }

    /// Number of currently reserved ids.
    pub fn reserved_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.reserved.iter().filter(|&&r| r).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use rand::Rng;

    struct FixedOwner(Vec<u8>);

    impl IdOwner for FixedOwner {
        fn held_ids(&self) -> Vec<u8> {
            self.0.clone()
        }
    }

    #[test]
    fn allocates_from_hint_and_wraps() {
        let registry = IdRegistry::new();
        assert_eq!(registry.allocate_next(250).unwrap(), 250);
        assert_eq!(registry.allocate_next(250).unwrap(), 251);
        for id in 252..=255u8 {
            assert_eq!(registry.allocate_next(250).unwrap(), id);
        }
        // Space above the hint is exhausted: wraps to 0.
        assert_eq!(registry.allocate_next(250).unwrap(), 0);
    }

    #[test]
    fn skips_ids_held_by_owners() {
        let registry = IdRegistry::new();
        let owner: Arc<dyn IdOwner> = Arc::new(FixedOwner(vec![0, 1, 2]));
        registry.register_owner(Arc::downgrade(&owner));
        assert_eq!(registry.allocate_next(0).unwrap(), 3);
        assert!(!registry.reserve(1));
    }

    #[test]
    fn dropped_owners_are_pruned() {
        let registry = IdRegistry::new();
        let owner: Arc<dyn IdOwner> = Arc::new(FixedOwner(vec![0]));
        registry.register_owner(Arc::downgrade(&owner));
        assert_eq!(registry.allocate_next(0).unwrap(), 1);
        drop(owner);
        assert_eq!(registry.allocate_next(0).unwrap(), 0);
    }

    #[test]
    fn exhaustion_is_reported_not_panicked() {
        let registry = IdRegistry::new();
        for _ in 0..ID_SPACE {
            registry.allocate_next(0).unwrap();
        }
        assert!(matches!(
            registry.allocate_next(0),
            Err(EngineError::ResourceExhausted(_))
        ));
        registry.release(17);
        assert_eq!(registry.allocate_next(0).unwrap(), 17);
    }

    #[test]
    fn held_elsewhere_excludes_the_asking_owner() {
        let registry = IdRegistry::new();
        let mine: Arc<dyn IdOwner> = Arc::new(FixedOwner(vec![5]));
        let other: Arc<dyn IdOwner> = Arc::new(FixedOwner(vec![6]));
        let my_token = registry.register_owner(Arc::downgrade(&mine));
        registry.register_owner(Arc::downgrade(&other));

        assert!(!registry.held_elsewhere(5, my_token));
        assert!(registry.held_elsewhere(6, my_token));
    }

    #[test]
    fn concurrent_allocation_never_duplicates() {
        let registry = Arc::new(IdRegistry::new());
        let threads = 4;
        let per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut got = Vec::with_capacity(per_thread);
                    for _ in 0..per_thread {
                        let hint: u8 = rng.r#gen();
                        got.push(registry.allocate_next(hint).unwrap());
                    }
                    got
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let unique: HashSet<u8> = all.iter().copied().collect();
        assert_eq!(unique.len(), threads * per_thread);

        for id in all {
            registry.release(id);
        }
        assert_eq!(registry.reserved_count(), 0);
    }
}
