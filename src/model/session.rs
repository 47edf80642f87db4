use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serenity::all::{ChannelId, GuildId};

use super::filters::FilterSet;
use super::track::{Requester, Track};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default)]
    pub text_channel: Option<ChannelId>,
    #[serde(default)]
    pub voice_channel: Option<ChannelId>,
    #[serde(default = "default_true")]
    pub self_deafen: bool,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default = "default_volume")]
    pub volume: u16,
}

fn default_true() -> bool {
    true
}

fn default_volume() -> u16 {
    100
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            text_channel: None,
            voice_channel: None,
            self_deafen: true,
            self_mute: false,
            volume: default_volume(),
        }
    }
}

/// Voice server credentials forwarded to the compute node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl VoiceState {
    pub fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.token.is_some() && self.endpoint.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatState {
    #[serde(default)]
    pub track: bool,
    #[serde(default)]
    pub queue: bool,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub dynamic_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoplayState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub user: Option<Requester>,
    #[serde(default)]
    pub tries: u32,
}

/// Live, in-memory playback context for one guild. Queue contents live in
/// the queue store, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub guild_id: GuildId,
    pub cluster_id: u32,
    pub node_id: String,
    pub options: ConnectionOptions,
    pub voice: VoiceState,
    pub paused: bool,
    pub repeat: RepeatState,
    pub autoplay: AutoplayState,
    pub data: Map<String, Value>,
    pub filters: FilterSet,
}

impl Session {
    pub fn new(
        guild_id: GuildId,
        cluster_id: u32,
        node_id: impl Into<String>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            guild_id,
            cluster_id,
            node_id: node_id.into(),
            options,
            voice: VoiceState::default(),
            paused: false,
            repeat: RepeatState::default(),
            autoplay: AutoplayState::default(),
            data: Map::new(),
            filters: FilterSet::default(),
        }
    }

    /// A session with nothing playing and no voice channel is not worth saving.
    pub fn is_persistable(&self, has_current: bool) -> bool {
        has_current || self.options.voice_channel.is_some()
    }

    pub fn snapshot(&self, queue: QueueSnapshot) -> SessionSnapshot {
        SessionSnapshot {
            cluster_id: self.cluster_id,
            node_id: self.node_id.clone(),
            guild_id: self.guild_id,
            options: self.options.clone(),
            voice: self.voice.clone(),
            paused: self.paused,
            repeat: self.repeat,
            autoplay: self.autoplay.clone(),
            data: self.data.clone(),
            filters: self.filters.clone(),
            queue,
            saved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    #[serde(default)]
    pub current: Option<Track>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub history: Vec<Track>,
}

/// The persisted form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub cluster_id: u32,
    pub node_id: String,
    pub guild_id: GuildId,
    #[serde(default)]
    pub options: ConnectionOptions,
    #[serde(default)]
    pub voice: VoiceState,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub repeat: RepeatState,
    #[serde(default)]
    pub autoplay: AutoplayState,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub filters: FilterSet,
    #[serde(default)]
    pub queue: QueueSnapshot,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Session fields only; the queue triple is restored separately.
    pub fn to_session(&self) -> Session {
        Session {
            guild_id: self.guild_id,
            cluster_id: self.cluster_id,
            node_id: self.node_id.clone(),
            options: self.options.clone(),
            voice: self.voice.clone(),
            paused: false,
            repeat: RepeatState::default(),
            autoplay: AutoplayState::default(),
            data: Map::new(),
            filters: FilterSet::default(),
        }
    }
}
