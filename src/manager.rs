//! The in-memory set of active sessions and everything that mutates it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use serenity::all::GuildId;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SessionError;
use crate::events::{EventBus, ManagerEvent};
use crate::metrics::METRICS;
use crate::model::{
    ConnectionOptions, Filter, FilterKind, Requester, Session, SessionSnapshot, Track, VoiceState,
};
use crate::node::{ComputeNode, NodeRegistry, NodeSelector, PlayerUpdate};
use crate::queue::QueueStore;
use crate::session_store::SessionStore;
use crate::sweeper::LifecycleSweeper;

/// Outcome of saving every active session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: Vec<GuildId>,
    /// Sessions with nothing current and no voice channel.
    pub skipped: Vec<GuildId>,
    pub failed: Vec<GuildId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub save: SaveReport,
    pub swept: usize,
}

pub struct SessionManager {
    cluster_id: u32,
    selector: NodeSelector,
    sweep_on_shutdown: bool,
    nodes: Arc<NodeRegistry>,
    queue: Arc<dyn QueueStore>,
    store: Arc<dyn SessionStore>,
    events: EventBus,
    sessions: RwLock<HashMap<GuildId, Session>>,
    repeat_tasks: Mutex<HashMap<GuildId, JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        nodes: Arc<NodeRegistry>,
        queue: Arc<dyn QueueStore>,
        store: Arc<dyn SessionStore>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            cluster_id: config.cluster_id,
            selector: NodeSelector::new(config.selection.use_priority, config.selection.strategy),
            sweep_on_shutdown: config.sweep_on_shutdown,
            nodes,
            queue,
            store,
            events,
            sessions: RwLock::new(HashMap::new()),
            repeat_tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }
    pub fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.queue
    }
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the existing session for `guild`, or opens one on the node
    /// the selector picks.
    pub fn create(&self, guild: GuildId, options: ConnectionOptions) -> Result<Session, SessionError> {
        if let Some(existing) = self.get(guild) {
            return Ok(existing);
        }
        let infos = self.nodes.infos();
        let node = self
            .selector
            .select(&infos)
            .ok_or(SessionError::NoNodeAvailable)?;
        let session = Session::new(guild, self.cluster_id, node.identifier.clone(), options);
        self.insert(session.clone());
        info!(%guild, node = %session.node_id, "session created");
        self.events.emit(ManagerEvent::SessionCreated {
            guild_id: guild,
            node_id: session.node_id.clone(),
        });
        Ok(session)
    }

    pub fn get(&self, guild: GuildId) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&guild)
            .cloned()
    }

    pub fn active_guilds(&self) -> Vec<GuildId> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn is_active(&self, guild: GuildId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&guild)
    }

    fn insert(&self, session: Session) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.guild_id, session);
        METRICS.set_sessions_active(sessions.len());
    }

    fn take(&self, guild: GuildId) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let removed = sessions.remove(&guild);
        METRICS.set_sessions_active(sessions.len());
        removed
    }

    fn mutate<F>(&self, guild: GuildId, f: F) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(&guild).ok_or(SessionError::NotFound(guild))?;
        f(session);
        Ok(session.clone())
    }

    fn node_of(&self, session: &Session) -> Result<Arc<dyn ComputeNode>, SessionError> {
        self.nodes
            .get(&session.node_id)
            .ok_or_else(|| SessionError::UnknownNode(session.node_id.clone()))
    }

    /// Applies `f` to the session and persists the result.
    pub async fn update<F>(&self, guild: GuildId, f: F) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut Session),
    {
        let session = self.mutate(guild, f)?;
        self.persist(guild).await;
        Ok(session)
    }

    async fn push(&self, session: &Session, update: PlayerUpdate) -> Result<(), SessionError> {
        self.node_of(session)?
            .update_player(session.guild_id, &update)
            .await?;
        Ok(())
    }

    pub async fn set_paused(&self, guild: GuildId, paused: bool) -> Result<(), SessionError> {
        let session = self.update(guild, |s| s.paused = paused).await?;
        let update = PlayerUpdate {
            paused: Some(paused),
            ..Default::default()
        };
        self.push(&session, update).await
    }

    pub async fn set_volume(&self, guild: GuildId, volume: u16) -> Result<(), SessionError> {
        let session = self.update(guild, |s| s.options.volume = volume).await?;
        let update = PlayerUpdate {
            volume: Some(volume),
            ..Default::default()
        };
        self.push(&session, update).await
    }

    /// Enables `filter` with its parameters and sends the full filter set.
    pub async fn set_filter(&self, guild: GuildId, filter: Filter) -> Result<(), SessionError> {
        let session = self.update(guild, |s| s.filters.apply(filter)).await?;
        self.push_filters(&session).await
    }

    pub async fn disable_filter(&self, guild: GuildId, kind: FilterKind) -> Result<(), SessionError> {
        let session = self.update(guild, |s| s.filters.disable(kind)).await?;
        self.push_filters(&session).await
    }

    pub async fn clear_filters(&self, guild: GuildId) -> Result<(), SessionError> {
        let session = self.update(guild, |s| s.filters.clear()).await?;
        self.push_filters(&session).await
    }

    async fn push_filters(&self, session: &Session) -> Result<(), SessionError> {
        let update = PlayerUpdate {
            filters: Some(session.filters.to_payload()),
            ..Default::default()
        };
        self.push(session, update).await
    }

    /// Stores voice credentials and forwards them once all three are known.
    pub async fn set_voice(&self, guild: GuildId, voice: VoiceState) -> Result<(), SessionError> {
        let session = self.update(guild, |s| s.voice = voice).await?;
        if session.voice.is_complete() {
            self.node_of(&session)?
                .update_voice(guild, &session.voice)
                .await?;
        }
        Ok(())
    }

    pub async fn set_repeat_track(&self, guild: GuildId, on: bool) -> Result<(), SessionError> {
        self.update(guild, |s| s.repeat.track = on).await.map(|_| ())
    }

    pub async fn set_repeat_queue(&self, guild: GuildId, on: bool) -> Result<(), SessionError> {
        self.update(guild, |s| s.repeat.queue = on).await.map(|_| ())
    }

    /// `Some(interval)` reshuffles the pending queue every `interval`;
    /// `None` stops it.
    pub async fn set_dynamic_repeat(
        self: &Arc<Self>,
        guild: GuildId,
        interval: Option<Duration>,
    ) -> Result<(), SessionError> {
        self.update(guild, |s| {
            s.repeat.dynamic = interval.is_some();
            s.repeat.dynamic_interval_ms =
                interval.map(|i| u64::try_from(i.as_millis()).unwrap_or(u64::MAX));
        })
        .await?;
        match interval {
            Some(interval) => self.start_dynamic_repeat(guild, interval),
            None => self.stop_dynamic_repeat(guild),
        }
        Ok(())
    }

    fn start_dynamic_repeat(self: &Arc<Self>, guild: GuildId, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            // A period past the clock's range never elapses.
            let Some(start) = tokio::time::Instant::now().checked_add(period) else {
                return std::future::pending::<()>().await;
            };
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                match manager.get(guild) {
                    Some(s) if s.repeat.dynamic => {
                        debug!(%guild, "dynamic repeat reshuffle");
                        manager.queue.shuffle(guild).await;
                    }
                    _ => break,
                }
            }
        });
        let previous = self
            .repeat_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(guild, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_dynamic_repeat(&self, guild: GuildId) {
        let handle = self
            .repeat_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&guild);
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn has_dynamic_repeat(&self, guild: GuildId) -> bool {
        self.repeat_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&guild)
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn set_autoplay(
        &self,
        guild: GuildId,
        enabled: bool,
        user: Option<Requester>,
    ) -> Result<(), SessionError> {
        self.update(guild, |s| {
            s.autoplay.enabled = enabled;
            s.autoplay.user = user;
            s.autoplay.tries = 0;
        })
        .await
        .map(|_| ())
    }

    pub async fn set_data(
        &self,
        guild: GuildId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), SessionError> {
        let key = key.into();
        self.update(guild, |s| {
            s.data.insert(key, value);
        })
        .await
        .map(|_| ())
    }

    /// Places a recovered session skeleton in the active set without
    /// persisting it, and hands the node its voice credentials.
    pub async fn restore_session(&self, session: Session) -> Result<(), SessionError> {
        let guild = session.guild_id;
        self.insert(session.clone());
        if session.voice.is_complete() {
            self.node_of(&session)?
                .update_voice(guild, &session.voice)
                .await?;
        }
        Ok(())
    }

    /// Copies the non-queue state of `snapshot` onto the active session and
    /// re-sends pause, volume and filters to the node.
    pub async fn restore_state(
        self: &Arc<Self>,
        snapshot: &SessionSnapshot,
    ) -> Result<(), SessionError> {
        let guild = snapshot.guild_id;
        let session = self.mutate(guild, |s| {
            s.paused = snapshot.paused;
            s.repeat = snapshot.repeat;
            s.autoplay = snapshot.autoplay.clone();
            s.data = snapshot.data.clone();
            s.filters = snapshot.filters.clone();
        })?;

        let mut update = PlayerUpdate {
            volume: Some(session.options.volume),
            ..Default::default()
        };
        if session.paused {
            update.paused = Some(true);
        }
        if session.filters.enabled().next().is_some() {
            update.filters = Some(session.filters.to_payload());
        }
        self.push(&session, update).await?;

        if session.repeat.dynamic
            && let Some(ms) = session.repeat.dynamic_interval_ms
            && ms > 0
        {
            self.start_dynamic_repeat(guild, Duration::from_millis(ms));
        }
        self.events
            .emit(ManagerEvent::SessionRestored { guild_id: guild });
        Ok(())
    }

    /// Drops the in-memory session and its queue state without touching the
    /// node or the session store.
    pub async fn discard(&self, guild: GuildId) {
        self.stop_dynamic_repeat(guild);
        if self.take(guild).is_some() {
            debug!(%guild, "session discarded");
        }
        self.queue.destroy(guild).await;
    }

    /// Natural end of `finished`. Replays it under repeat-track, otherwise
    /// records it in history, re-queues it under repeat-queue and starts the
    /// next pending track. Returns what is now playing.
    pub async fn handle_track_end(
        &self,
        guild: GuildId,
        finished: Track,
    ) -> Result<Option<Track>, SessionError> {
        let session = self.get(guild).ok_or(SessionError::NotFound(guild))?;
        self.events.emit(ManagerEvent::TrackEnd {
            guild_id: guild,
            track: finished.clone(),
        });

        if session.repeat.track {
            self.queue.set_current(guild, Some(finished.clone())).await;
            self.start(&session, &finished).await?;
            return Ok(Some(finished));
        }

        self.queue.add_history(guild, vec![finished.clone()]).await;
        if session.repeat.queue {
            let len = self.queue.size(guild).await;
            self.queue
                .modify_at(guild, len, 0, vec![finished.clone()])
                .await;
        }

        let next = self.queue.dequeue(guild).await;
        self.queue.set_current(guild, next.clone()).await;
        match next {
            Some(track) => {
                self.start(&session, &track).await?;
                self.persist(guild).await;
                Ok(Some(track))
            }
            None => {
                info!(%guild, "queue ended");
                self.events.emit(ManagerEvent::QueueEnd {
                    guild_id: guild,
                    track: finished,
                    autoplay: session.autoplay.enabled,
                });
                self.persist(guild).await;
                Ok(None)
            }
        }
    }

    async fn start(&self, session: &Session, track: &Track) -> Result<(), SessionError> {
        self.node_of(session)?
            .play(session.guild_id, track)
            .await?;
        self.events.emit(ManagerEvent::TrackStart {
            guild_id: session.guild_id,
            track: track.clone(),
        });
        Ok(())
    }

    /// Writes the session snapshot. Returns `false` when the session was
    /// not worth saving.
    pub async fn save(&self, guild: GuildId) -> Result<bool, SessionError> {
        let session = self.get(guild).ok_or(SessionError::NotFound(guild))?;
        let queue = self.queue.snapshot(guild).await;
        if !session.is_persistable(queue.current.is_some()) {
            debug!(%guild, "skipping save of inactive session");
            return Ok(false);
        }
        match self.store.save(&session.snapshot(queue)).await {
            Ok(()) => {
                METRICS.session_saved();
                Ok(true)
            }
            Err(e) => {
                METRICS.session_save_failed();
                Err(e.into())
            }
        }
    }

    async fn persist(&self, guild: GuildId) {
        if let Err(e) = self.save(guild).await {
            warn!(%guild, error = %e, "session save failed");
        }
    }

    /// Saves every active session, each in its own task so that one failure
    /// or panic cannot stop the rest.
    pub async fn save_all(self: &Arc<Self>) -> SaveReport {
        let guilds = self.active_guilds();
        let handles: Vec<_> = guilds
            .iter()
            .map(|&guild| {
                let manager = Arc::clone(self);
                tokio::spawn(async move { manager.save(guild).await })
            })
            .collect();

        let mut report = SaveReport::default();
        for (guild, result) in guilds.into_iter().zip(join_all(handles).await) {
            match result {
                Ok(Ok(true)) => report.saved.push(guild),
                Ok(Ok(false)) => report.skipped.push(guild),
                Ok(Err(e)) => {
                    error!(%guild, error = %e, "failed to save session");
                    report.failed.push(guild);
                }
                Err(e) => {
                    error!(%guild, error = %e, "save task aborted");
                    report.failed.push(guild);
                }
            }
        }
        report
    }

    /// Ends the session: player, in-memory state, snapshot and queue state.
    pub async fn destroy(&self, guild: GuildId) -> Result<(), SessionError> {
        self.stop_dynamic_repeat(guild);
        let session = self.take(guild).ok_or(SessionError::NotFound(guild))?;
        if let Ok(node) = self.node_of(&session)
            && let Err(e) = node.destroy_player(guild).await
        {
            warn!(%guild, node = %session.node_id, error = %e, "failed to destroy player");
        }
        if let Err(e) = self.store.delete(guild).await {
            warn!(%guild, error = %e, "failed to delete session snapshot");
        }
        self.queue.destroy(guild).await;
        info!(%guild, "session destroyed");
        self.events
            .emit(ManagerEvent::SessionDestroyed { guild_id: guild });
        Ok(())
    }

    /// Phase one saves every session; phase two sweeps orphaned records
    /// when configured. Storage is closed by the caller afterwards.
    pub async fn shutdown(self: &Arc<Self>) -> ShutdownReport {
        METRICS.set_ready(false);
        let tasks: Vec<_> = self
            .repeat_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, h)| h)
            .collect();
        for task in tasks {
            task.abort();
        }

        let save = self.save_all().await;
        info!(
            saved = save.saved.len(),
            skipped = save.skipped.len(),
            failed = save.failed.len(),
            "sessions saved"
        );

        let swept = if self.sweep_on_shutdown {
            LifecycleSweeper::new(Arc::clone(self)).sweep().await
        } else {
            0
        };
        ShutdownReport { save, swept }
    }
}
