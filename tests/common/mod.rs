#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lyre_session::error::NodeError;
use lyre_session::model::{ConnectionOptions, QueueSnapshot, Requester, Session, SessionSnapshot, Track};
use lyre_session::node::{
    ComputeNode, LiveNodeView, LiveTrack, NodeInfo, NodeRegistry, NodeStats, PlayerUpdate,
};
use lyre_session::{
    Config, EventBus, ManagerEvent, QueueStore, SessionManager, SessionStore, StorageHandle,
};
use serenity::all::{ChannelId, GuildId, UserId};
use tokio::sync::broadcast::error::TryRecvError;

pub const NODE: &str = "main";
pub const CLUSTER: u32 = 1;

pub fn track(id: &str, user: Option<u64>) -> Track {
    Track {
        encoded: format!("enc-{id}"),
        identifier: id.to_string(),
        uri: Some(format!("https://example.test/{id}")),
        title: id.to_uppercase(),
        author: "someone".to_string(),
        duration_ms: 60_000,
        is_stream: false,
        artwork_url: None,
        source_name: Some("http".to_string()),
        requester: user.map(|u| Requester::new(UserId::new(u), format!("user{u}"))),
    }
}

pub fn ids(tracks: &[Track]) -> Vec<&str> {
    tracks.iter().map(|t| t.identifier.as_str()).collect()
}

pub fn guild(id: u64) -> GuildId {
    GuildId::new(id)
}

/// Scripted compute node: reports whatever live players the test sets up
/// and records every player update it receives.
pub struct FakeNode {
    id: String,
    connected: AtomicBool,
    fail_live: AtomicBool,
    live: Mutex<Vec<LiveNodeView>>,
    decoded: Mutex<HashMap<String, Track>>,
    updates: Mutex<Vec<(GuildId, PlayerUpdate)>>,
    reject: Mutex<Vec<GuildId>>,
}

impl FakeNode {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            connected: AtomicBool::new(true),
            fail_live: AtomicBool::new(false),
            live: Mutex::new(Vec::new()),
            decoded: Mutex::new(HashMap::new()),
            updates: Mutex::new(Vec::new()),
            reject: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_live_sessions(&self) {
        self.fail_live.store(true, Ordering::SeqCst);
    }

    pub fn idle_player(&self, guild: GuildId) {
        self.live.lock().unwrap().push(LiveNodeView { guild_id: guild, track: None });
    }

    pub fn playing(&self, guild: GuildId, encoded: &str, uri: &str) {
        self.live.lock().unwrap().push(LiveNodeView {
            guild_id: guild,
            track: Some(LiveTrack {
                encoded: encoded.to_string(),
                uri: Some(uri.to_string()),
            }),
        });
    }

    pub fn decodes(&self, encoded: &str, track: Track) {
        self.decoded.lock().unwrap().insert(encoded.to_string(), track);
    }

    /// Player updates for `guild` fail from now on.
    pub fn reject(&self, guild: GuildId) {
        self.reject.lock().unwrap().push(guild);
    }

    pub fn updates(&self, guild: GuildId) -> Vec<PlayerUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(g, _)| *g == guild)
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Encoded tracks started for `guild`, in order.
    pub fn played(&self, guild: GuildId) -> Vec<String> {
        self.updates(guild)
            .into_iter()
            .filter_map(|u| u.track.map(|t| t.encoded))
            .collect()
    }
}

#[async_trait]
impl ComputeNode for FakeNode {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            identifier: self.id.clone(),
            connected: self.connected.load(Ordering::SeqCst),
            is_backup: false,
            priority: 0,
            stats: NodeStats {
                players: 0,
                playing_players: 0,
                cores: 4,
                load: 0.1,
            },
        }
    }

    async fn live_sessions(&self) -> Result<Vec<LiveNodeView>, NodeError> {
        if self.fail_live.load(Ordering::SeqCst) {
            return Err(NodeError::Other {
                node: self.id.clone(),
                message: "players unavailable".into(),
            });
        }
        Ok(self.live.lock().unwrap().clone())
    }

    async fn decode_track(&self, encoded: &str) -> Result<Track, NodeError> {
        self.decoded
            .lock()
            .unwrap()
            .get(encoded)
            .cloned()
            .ok_or_else(|| NodeError::Other {
                node: self.id.clone(),
                message: format!("cannot decode {encoded}"),
            })
    }

    async fn update_player(&self, guild: GuildId, update: &PlayerUpdate) -> Result<(), NodeError> {
        if self.reject.lock().unwrap().contains(&guild) {
            return Err(NodeError::Status {
                node: self.id.clone(),
                status: 500,
            });
        }
        self.updates.lock().unwrap().push((guild, update.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub node: Arc<FakeNode>,
    pub events: EventBus,
    pub queue: Arc<dyn QueueStore>,
    pub store: Arc<dyn SessionStore>,
    pub storage: StorageHandle,
}

pub fn config() -> Config {
    Config {
        cluster_id: CLUSTER,
        recovery_delay: Duration::ZERO,
        ..Config::default()
    }
}

pub fn harness() -> Harness {
    harness_on(StorageHandle::memory(), config())
}

pub fn harness_on(storage: StorageHandle, config: Config) -> Harness {
    let events = EventBus::new(1024);
    let queue = storage.queue_store(config.cluster_id, events.clone(), config.max_history);
    let store = storage.session_store();
    let node = FakeNode::new(NODE);
    let registry = Arc::new(NodeRegistry::new());
    registry.register(node.clone());
    let manager = SessionManager::new(&config, registry, queue.clone(), store.clone(), events.clone());
    Harness {
        manager,
        node,
        events,
        queue,
        store,
        storage,
    }
}

pub fn in_voice() -> ConnectionOptions {
    ConnectionOptions {
        voice_channel: Some(ChannelId::new(555)),
        text_channel: Some(ChannelId::new(556)),
        ..ConnectionOptions::default()
    }
}

/// A persisted snapshot as a previous process would have left it.
pub fn snapshot(guild: GuildId, node: &str, cluster: u32, queue: QueueSnapshot) -> SessionSnapshot {
    Session::new(guild, cluster, node, in_voice()).snapshot(queue)
}

pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
