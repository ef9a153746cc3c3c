//! Preloaded clip registry.
//!
//! Clip PCM lives in a name-keyed store, shared read-only between every clip
//! instance that plays it. The store is an external-collaborator boundary:
//! asset decoding/loading happens elsewhere, this only registers finished
//! buffers.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// An immutable PCM buffer registered under a unique name.
#[derive(Debug, Clone)]
pub struct ClipSource {
    pub name: String,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl ClipSource {
    /// Total sample count.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Name → buffer registry for preloaded clips.
#[derive(Default)]
pub struct ClipStore {
    clips: DashMap<String, Arc<ClipSource>>,
}

impl ClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a PCM buffer under `name`.
    ///
    /// Returns `false` if the name is already registered or `samples` is
    /// empty.
    pub fn load_clip(&self, name: &str, samples: Vec<f32>, sample_rate: u32, channels: u32) -> bool {
        if samples.is_empty() {
            return false;
        }
        match self.clips.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                debug!(clip = name, samples = samples.len(), "clip registered");
                entry.insert(Arc::new(ClipSource {
                    name: name.to_string(),
                    samples: samples.into(),
                    sample_rate,
                    channels,
                }));
                true
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ClipSource>> {
        self.clips.get(name).map(|entry| entry.value().clone())
    }

    /// Drop a registered clip. Instances already playing keep their buffer
    /// alive until they finish.
    pub fn remove(&self, name: &str) -> bool {
        self.clips.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}
