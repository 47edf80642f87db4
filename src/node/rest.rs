//! [`ComputeNode`] over the Lavalink v4 REST API.
//!
//! The websocket side (stats push, player events, the `ready` op that hands
//! out a session id) belongs to whatever drives the node connection; it feeds
//! this type through [`RestNode::set_session_id`], [`RestNode::set_connected`]
//! and [`RestNode::refresh_stats`].

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serenity::all::GuildId;
use tracing::{debug, warn};
use url::Url;

use super::{ComputeNode, LiveNodeView, LiveTrack, NodeInfo, NodeStats, PlayerUpdate};
use crate::config::NodeOptions;
use crate::error::NodeError;
use crate::model::Track;
use crate::storage::fs::parse_guild;

pub struct RestNode {
    identifier: String,
    password: String,
    base: Url,
    http: Client,
    session_id: RwLock<Option<String>>,
    info: RwLock<NodeInfo>,
}

impl RestNode {
    pub fn new(options: &NodeOptions, session_id: Option<String>) -> Result<Self, NodeError> {
        let scheme = if options.secure { "https" } else { "http" };
        let base = Url::parse(&format!("{scheme}://{}:{}/", options.host, options.port))
            .map_err(|_| NodeError::InvalidUrl(options.identifier.clone()))?;
        Ok(Self {
            identifier: options.identifier.clone(),
            password: options.password.clone(),
            base,
            http: Client::new(),
            session_id: RwLock::new(session_id),
            info: RwLock::new(NodeInfo {
                identifier: options.identifier.clone(),
                connected: false,
                is_backup: options.is_backup,
                priority: options.priority,
                stats: NodeStats::default(),
            }),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session_id(&self, id: impl Into<String>) {
        *self
            .session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(id.into());
    }

    pub fn set_connected(&self, connected: bool) {
        self.info
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connected = connected;
    }

    /// Polls `/v4/stats`. A node that answers is considered connected; one
    /// that does not is marked disconnected.
    pub async fn refresh_stats(&self) -> Result<NodeStats, NodeError> {
        let result = self
            .fetch::<WireStats>(self.http.get(self.url("v4/stats")?))
            .await;
        let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(wire) => {
                info.stats = wire.into();
                info.connected = true;
                Ok(info.stats)
            }
            Err(e) => {
                info.connected = false;
                Err(e)
            }
        }
    }

    fn url(&self, path: &str) -> Result<Url, NodeError> {
        self.base
            .join(path)
            .map_err(|_| NodeError::InvalidUrl(self.identifier.clone()))
    }

    fn session_path(&self) -> Result<String, NodeError> {
        self.session_id()
            .map(|sid| format!("v4/sessions/{sid}/players"))
            .ok_or_else(|| NodeError::NoSession(self.identifier.clone()))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, NodeError> {
        let resp = req
            .header(header::AUTHORIZATION, &self.password)
            .send()
            .await
            .map_err(|source| NodeError::Http {
                node: self.identifier.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(NodeError::Status {
                node: self.identifier.clone(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, NodeError> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|source| NodeError::Http {
                node: self.identifier.clone(),
                source,
            })
    }
}

#[async_trait]
impl ComputeNode for RestNode {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn info(&self) -> NodeInfo {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn live_sessions(&self) -> Result<Vec<LiveNodeView>, NodeError> {
        let url = self.url(&self.session_path()?)?;
        let players: Vec<WirePlayer> = self.fetch(self.http.get(url)).await?;
        Ok(players
            .into_iter()
            .filter_map(|p| {
                let Some(guild_id) = parse_guild(&p.guild_id) else {
                    warn!(node = %self.identifier, raw = %p.guild_id, "ignoring player with bad guild id");
                    return None;
                };
                Some(LiveNodeView {
                    guild_id,
                    track: p.track.map(|t| LiveTrack {
                        uri: t.info.uri,
                        encoded: t.encoded,
                    }),
                })
            })
            .collect())
    }

    async fn decode_track(&self, encoded: &str) -> Result<Track, NodeError> {
        let req = self
            .http
            .get(self.url("v4/decodetrack")?)
            .query(&[("encodedTrack", encoded)]);
        let wire: WireTrack = self.fetch(req).await?;
        Ok(wire.into_track())
    }

    async fn update_player(
        &self,
        guild: GuildId,
        update: &PlayerUpdate,
    ) -> Result<(), NodeError> {
        let url = self.url(&format!("{}/{guild}", self.session_path()?))?;
        debug!(node = %self.identifier, %guild, "patching player");
        let req = self
            .http
            .patch(url)
            .query(&[("noReplace", "false")])
            .json(update);
        self.send(req).await.map(|_| ())
    }

    async fn destroy_player(&self, guild: GuildId) -> Result<(), NodeError> {
        let url = self.url(&format!("{}/{guild}", self.session_path()?))?;
        self.send(self.http.delete(url)).await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStats {
    players: u32,
    playing_players: u32,
    cpu: WireCpu,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCpu {
    cores: u32,
    lavalink_load: f64,
}

impl From<WireStats> for NodeStats {
    fn from(w: WireStats) -> Self {
        NodeStats {
            players: w.players,
            playing_players: w.playing_players,
            cores: w.cpu.cores,
            load: w.cpu.lavalink_load,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlayer {
    guild_id: String,
    track: Option<WireTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrack {
    encoded: String,
    info: WireTrackInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrackInfo {
    identifier: String,
    author: String,
    length: u64,
    is_stream: bool,
    title: String,
    uri: Option<String>,
    artwork_url: Option<String>,
    source_name: String,
}

impl WireTrack {
    fn into_track(self) -> Track {
        let info = self.info;
        Track {
            encoded: self.encoded,
            identifier: info.identifier,
            uri: info.uri,
            title: info.title,
            author: info.author,
            duration_ms: info.length,
            is_stream: info.is_stream,
            artwork_url: info.artwork_url,
            source_name: Some(info.source_name),
            requester: None,
        }
    }
}
