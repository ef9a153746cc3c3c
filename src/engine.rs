//! Process-wide engine context.
//!
//! One [`AudioEngine`] per host session owns every cross-component registry:
//! the channel-id space, the clip store, channel/name lookup and the
//! transcoder handle. It is passed by `Arc` to everything that needs lookup;
//! teardown is explicit via [`AudioEngine::shutdown`], tied to the host
//! session's lifetime rather than process statics.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::channel::id_pool::{IdOwner, IdRegistry};
use crate::channel::{Channel, ChannelPool, mixer};
use crate::common::errors::EngineError;
use crate::config::{Config, EngineConfig};
use crate::storage::ClipStore;
use crate::stream::{StreamSession, Transcoder};
use crate::transport::PacketSink;

/// Creation parameters for an ad-hoc channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    pub name: Option<String>,
    /// Request a specific id instead of scanning for a free one.
    pub id: Option<u8>,
    pub destroy_when_empty: bool,
    /// Where the circular id scan starts when no explicit id is given.
    pub start_hint: u8,
}

pub struct AudioEngine {
    config: EngineConfig,
    transcoder: Transcoder,
    ids: IdRegistry,
    clips: ClipStore,
    sink: Arc<dyn PacketSink>,
    channels: DashMap<u8, Arc<Channel>>,
    names: DashMap<String, u8>,
}

impl IdOwner for AudioEngine {
    fn held_ids(&self) -> Vec<u8> {
        self.channels.iter().map(|entry| *entry.key()).collect()
    }
}

impl AudioEngine {
    /// Build the engine. Must be called inside a tokio runtime: channel
    /// creation spawns tick tasks.
    pub fn new(config: Config, sink: Arc<dyn PacketSink>) -> Arc<Self> {
        let engine = Arc::new(Self {
            transcoder: Transcoder::new(&config.transcoder),
            config: config.engine,
            ids: IdRegistry::new(),
            clips: ClipStore::new(),
            sink,
            channels: DashMap::new(),
            names: DashMap::new(),
        });
        // The channel table itself is an id owner: ids held by channels that
        // were installed with an explicit id are visible to the allocator.
        let dyn_engine: Arc<dyn IdOwner> = engine.clone();
        let weak: Weak<dyn IdOwner> = Arc::downgrade(&dyn_engine);
        let _ = engine.ids.register_owner(weak);
        info!(
            sample_rate = engine.config.sample_rate,
            packet_samples = engine.config.packet_samples,
            "audio engine initialized"
        );
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clips(&self) -> &ClipStore {
        &self.clips
    }

    pub fn ids(&self) -> &IdRegistry {
        &self.ids
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    pub(crate) fn sink(&self) -> &Arc<dyn PacketSink> {
        &self.sink
    }

    // ── Channels ─────────────────────────────────────────────────────────────

    /// Create an ad-hoc channel outside any pool. Its tick starts
    /// immediately and repeats until the channel is destroyed.
    pub fn create_channel(self: &Arc<Self>, opts: ChannelOptions) -> Result<Arc<Channel>, EngineError> {
        let id = match opts.id {
            Some(id) => {
                if !self.ids.reserve(id) {
                    return Err(EngineError::DuplicateId(id));
                }
                id
            }
            None => self.ids.allocate_next(opts.start_hint)?,
        };
        if let Some(name) = &opts.name {
            if let Err(err) = self.register_name(name, id) {
                self.ids.release(id);
                return Err(err);
            }
        }
        let channel = self.install_channel(id, opts.name.clone(), opts.destroy_when_empty, false);
        info!(channel = id, name = ?opts.name, "channel created");
        Ok(channel)
    }

    /// Create a channel bound to a pool-owned id. The pool keeps the id's
    /// global reservation; the engine only tracks the live channel.
    pub(crate) fn create_pooled_channel(
        self: &Arc<Self>,
        id: u8,
        name: Option<&str>,
    ) -> Result<Arc<Channel>, EngineError> {
        if let Some(name) = name {
            self.register_name(name, id)?;
        }
        Ok(self.install_channel(id, name.map(str::to_string), false, true))
    }

    fn install_channel(
        self: &Arc<Self>,
        id: u8,
        name: Option<String>,
        destroy_when_empty: bool,
        pooled: bool,
    ) -> Arc<Channel> {
        let channel = Channel::new(id, name, destroy_when_empty, pooled);
        let task = mixer::spawn_tick(channel.clone(), Arc::downgrade(self), self.config.clone());
        channel.set_tick_task(task);
        self.channels.insert(id, channel.clone());
        channel
    }

    pub fn channel(&self, id: u8) -> Option<Arc<Channel>> {
        self.channels.get(&id).map(|entry| entry.value().clone())
    }

    pub fn channel_by_name(&self, name: &str) -> Option<Arc<Channel>> {
        let id = *self.names.get(name)?;
        self.channel(id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Destroy a channel: its tick is cancelled atomically with destruction
    /// and, for ad-hoc channels, the id returns to the global space.
    /// Pool-owned ids stay with their pool.
    pub fn destroy_channel(&self, id: u8) -> bool {
        let Some((_, channel)) = self.channels.remove(&id) else {
            return false;
        };
        if let Some(name) = channel.take_name() {
            self.names.remove(&name);
        }
        channel.destroy();
        if !channel.is_pooled() {
            self.ids.release(id);
        }
        debug!(channel = id, "channel destroyed");
        true
    }

    /// Reset a pooled channel for reuse and drop its name registration.
    pub(crate) fn deactivate_channel(&self, channel: &Arc<Channel>) {
        if let Some(name) = channel.take_name() {
            self.names.remove(&name);
        }
        channel.deactivate();
    }

    /// Re-register a wrapper under a new logical name (pool reactivation).
    pub(crate) fn assign_name(
        &self,
        channel: &Arc<Channel>,
        name: Option<&str>,
    ) -> Result<(), EngineError> {
        if let Some(old) = channel.take_name() {
            self.names.remove(&old);
        }
        if let Some(name) = name {
            self.register_name(name, channel.id())?;
            *channel.name.lock() = Some(name.to_string());
        }
        Ok(())
    }

    fn register_name(&self, name: &str, id: u8) -> Result<(), EngineError> {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateName(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(id);
                Ok(())
            }
        }
    }

    // ── Pools ────────────────────────────────────────────────────────────────

    /// Create a channel pool reserving up to `capacity` ids from
    /// `start_hint`.
    pub fn create_pool(self: &Arc<Self>, name: &str, capacity: usize, start_hint: u8) -> Arc<ChannelPool> {
        ChannelPool::new(self.clone(), name, capacity, start_hint)
    }

    // ── Live streams ─────────────────────────────────────────────────────────

    /// Start ingesting a live URL stream and attach it to `channel`.
    ///
    /// Blocks on the transcoder availability check before first use; spawn
    /// and availability failures come back classified.
    pub async fn start_stream(
        self: &Arc<Self>,
        url: &str,
        channel: &Arc<Channel>,
        volume: f32,
    ) -> Result<Arc<StreamSession>, EngineError> {
        self.transcoder.ensure_available().await?;
        let session = StreamSession::start(&self.transcoder, &self.config, url)?;
        channel.attach_stream(session.clone(), volume);
        Ok(session)
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Destroy every channel (streams included). Pools should be disposed by
    /// their owners first; wrappers they still hold are destroyed here too.
    pub fn shutdown(&self) {
        let ids: Vec<u8> = self.channels.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.destroy_channel(id);
        }
        info!("audio engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::audio::clip::PlayOptions;
    use crate::transport::RecipientId;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkEvent {
        Broadcast(u8, usize),
        To(RecipientId, u8, usize),
    }

    #[derive(Default)]
    struct CollectSink {
        ready: Vec<RecipientId>,
        events: Mutex<Vec<SinkEvent>>,
    }

    impl CollectSink {
        fn with_ready(ready: Vec<RecipientId>) -> Arc<Self> {
            Arc::new(Self {
                ready,
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().clone()
        }
    }

    impl PacketSink for CollectSink {
        fn ready_recipients(&self) -> Vec<RecipientId> {
            self.ready.clone()
        }

        fn send(&self, channel_id: u8, payload: &[u8]) {
            self.events
                .lock()
                .push(SinkEvent::Broadcast(channel_id, payload.len()));
        }

        fn send_to(&self, recipient: RecipientId, channel_id: u8, payload: &[u8]) {
            self.events
                .lock()
                .push(SinkEvent::To(recipient, channel_id, payload.len()));
        }
    }

    fn test_config() -> Config {
        Config {
            engine: EngineConfig {
                sample_rate: 48_000,
                // 2.5 ms packets keep the tests fast.
                packet_samples: 120,
                pipe_capacity: 64 * 1024,
                drain_poll_ms: 50,
            },
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ids_are_released_on_destroy() {
        let sink = CollectSink::with_ready(Vec::new());
        let engine = AudioEngine::new(test_config(), sink);

        let channel = engine
            .create_channel(ChannelOptions {
                name: Some("announcer".to_string()),
                start_hint: 5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(channel.id(), 5);
        assert!(engine.channel_by_name("announcer").is_some());

        assert!(engine.destroy_channel(5));
        assert!(engine.channel(5).is_none());

        // The id and name are reusable immediately.
        let again = engine
            .create_channel(ChannelOptions {
                name: Some("announcer".to_string()),
                start_hint: 5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(again.id(), 5);
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_names_and_ids_are_rejected() {
        let engine = AudioEngine::new(test_config(), CollectSink::with_ready(Vec::new()));

        engine
            .create_channel(ChannelOptions {
                name: Some("music".to_string()),
                id: Some(9),
                ..Default::default()
            })
            .unwrap();

        assert!(matches!(
            engine.create_channel(ChannelOptions {
                name: Some("music".to_string()),
                ..Default::default()
            }),
            Err(EngineError::DuplicateName(_))
        ));
        assert!(matches!(
            engine.create_channel(ChannelOptions {
                id: Some(9),
                ..Default::default()
            }),
            Err(EngineError::DuplicateId(9))
        ));
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_channel_dispatches_nothing() {
        let sink = CollectSink::with_ready(Vec::new());
        let engine = AudioEngine::new(test_config(), sink.clone());

        engine.create_channel(ChannelOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.events().is_empty());
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clip_playback_broadcasts_then_stops() {
        let sink = CollectSink::with_ready(Vec::new());
        let engine = AudioEngine::new(test_config(), sink.clone());

        let channel = engine.create_channel(ChannelOptions::default()).unwrap();
        assert!(engine.clips().load_clip("tone", vec![0.2; 360], 48_000, 1));
        let source = engine.clips().lookup("tone").unwrap();

        // Three packets worth of audio.
        channel.play(source, PlayOptions::default());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let events = sink.events();
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .all(|e| matches!(e, SinkEvent::Broadcast(id, n) if *id == channel.id() && *n > 0)));
        assert_eq!(channel.clip_count(), 0);

        // Once the clip is gone the channel goes quiet again.
        let count = sink.events().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.events().len(), count);
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn destroy_when_empty_reclaims_the_channel() {
        let engine = AudioEngine::new(test_config(), CollectSink::with_ready(Vec::new()));

        let channel = engine
            .create_channel(ChannelOptions {
                destroy_when_empty: true,
                ..Default::default()
            })
            .unwrap();
        assert!(engine.clips().load_clip("blip", vec![0.1; 120], 48_000, 1));
        channel.play(engine.clips().lookup("blip").unwrap(), PlayOptions::default());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine.channel(channel.id()).is_none());
        assert!(channel.is_destroyed());
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn owner_list_dispatch_targets_only_owners() {
        let sink = CollectSink::with_ready(vec![RecipientId(1), RecipientId(2), RecipientId(3)]);
        let engine = AudioEngine::new(test_config(), sink.clone());

        let channel = engine.create_channel(ChannelOptions::default()).unwrap();
        channel.set_broadcast(false);
        channel.set_owners(vec![RecipientId(7)]);

        assert!(engine.clips().load_clip("ping", vec![0.3; 1_200], 48_000, 1));
        channel.play(engine.clips().lookup("ping").unwrap(), PlayOptions::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = sink.events();
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .all(|e| matches!(e, SinkEvent::To(RecipientId(7), _, _))));
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn validator_overrides_broadcast() {
        let sink = CollectSink::with_ready(vec![RecipientId(1), RecipientId(2), RecipientId(3)]);
        let engine = AudioEngine::new(test_config(), sink.clone());

        let channel = engine.create_channel(ChannelOptions::default()).unwrap();
        channel.set_validator(Some(Arc::new(|r: RecipientId| r.0 % 2 == 1)));

        assert!(engine.clips().load_clip("ping", vec![0.3; 1_200], 48_000, 1));
        channel.play(engine.clips().lookup("ping").unwrap(), PlayOptions::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = sink.events();
        assert!(!events.is_empty());
        for event in &events {
            match event {
                SinkEvent::To(recipient, _, _) => assert!(recipient.0 % 2 == 1),
                SinkEvent::Broadcast(_, _) => panic!("validator must suppress broadcast"),
            }
        }
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_clips_mix_to_silence_but_still_dispatch() {
        let sink = CollectSink::with_ready(Vec::new());
        let engine = AudioEngine::new(test_config(), sink.clone());

        let channel = engine.create_channel(ChannelOptions::default()).unwrap();
        assert!(engine.clips().load_clip("mute", vec![0.8; 2_400], 48_000, 1));
        for _ in 0..3 {
            channel.play(
                engine.clips().lookup("mute").unwrap(),
                PlayOptions {
                    volume: 0.0,
                    looping: true,
                    ..Default::default()
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Non-empty channel: packets flow even though the mix is silence.
        assert!(!sink.events().is_empty());
        engine.shutdown();
    }
}
