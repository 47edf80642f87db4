//! The compute-node seam.
//!
//! A compute node decodes and streams audio; this crate only relies on the
//! handful of calls in [`ComputeNode`]. [`rest::RestNode`] speaks them over
//! the Lavalink v4 REST API.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::all::GuildId;

use crate::error::NodeError;
use crate::model::{NodeFilters, Track, VoiceState};

pub mod rest;
pub mod selector;

pub use rest::RestNode;
pub use selector::{NodeSelector, NodeStrategy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    pub cores: u32,
    /// Node process CPU load, 0.0..=1.0 per the node's own report.
    pub load: f64,
}

impl NodeStats {
    pub fn load_per_core(&self) -> f64 {
        self.load / f64::from(self.cores.max(1))
    }
}

/// Point-in-time view of a node used for selection.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub identifier: String,
    pub connected: bool,
    pub is_backup: bool,
    pub priority: u32,
    pub stats: NodeStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTrack {
    pub encoded: String,
    pub uri: Option<String>,
}

/// What a node reports for one guild's player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveNodeView {
    pub guild_id: GuildId,
    pub track: Option<LiveTrack>,
}

impl LiveNodeView {
    pub fn is_playing(&self) -> bool {
        self.track.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePayload {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

impl VoicePayload {
    pub fn from_state(voice: &VoiceState) -> Option<Self> {
        Some(Self {
            token: voice.token.clone()?,
            endpoint: voice.endpoint.clone()?,
            session_id: voice.session_id.clone()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackUpdate {
    pub encoded: String,
}

/// Partial player update; unset fields are left alone by the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<NodeFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoicePayload>,
}

#[async_trait]
pub trait ComputeNode: Send + Sync {
    fn identifier(&self) -> &str;
    fn info(&self) -> NodeInfo;

    async fn live_sessions(&self) -> Result<Vec<LiveNodeView>, NodeError>;
    async fn decode_track(&self, encoded: &str) -> Result<Track, NodeError>;
    async fn update_player(&self, guild: GuildId, update: &PlayerUpdate)
    -> Result<(), NodeError>;

    async fn update_voice(&self, guild: GuildId, voice: &VoiceState) -> Result<(), NodeError> {
        let Some(voice) = VoicePayload::from_state(voice) else {
            return Err(NodeError::Other {
                node: self.identifier().to_string(),
                message: format!("incomplete voice credentials for guild {guild}"),
            });
        };
        let update = PlayerUpdate {
            voice: Some(voice),
            ..Default::default()
        };
        self.update_player(guild, &update).await
    }

    /// Starts `track`, replacing whatever the node was playing.
    async fn play(&self, guild: GuildId, track: &Track) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            track: Some(TrackUpdate {
                encoded: track.encoded.clone(),
            }),
            ..Default::default()
        };
        self.update_player(guild, &update).await
    }

    /// Tears down the node-side player. Nodes without explicit player
    /// lifetimes can keep the default.
    async fn destroy_player(&self, _guild: GuildId) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Known nodes in registration order. Order matters for weighted selection.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<Arc<dyn ComputeNode>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any node with the same identifier.
    pub fn register(&self, node: Arc<dyn ComputeNode>) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes
            .iter_mut()
            .find(|n| n.identifier() == node.identifier())
        {
            Some(slot) => *slot = node,
            None => nodes.push(node),
        }
    }

    pub fn remove(&self, identifier: &str) -> Option<Arc<dyn ComputeNode>> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let idx = nodes.iter().position(|n| n.identifier() == identifier)?;
        Some(nodes.remove(idx))
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn ComputeNode>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|n| n.identifier() == identifier)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn ComputeNode>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn infos(&self) -> Vec<NodeInfo> {
        self.all().iter().map(|n| n.info()).collect()
    }
}
