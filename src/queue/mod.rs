//! Per-guild track queues.
//!
//! [`QueueStore`] is the contract the rest of the crate talks to. There is a
//! single implementation, [`Queue`], generic over a [`QueueBackend`] that
//! only knows how to read and write the three documents a queue is made of
//! (current track, pending tracks, history). Memory, file and Redis backends
//! differ only in those primitives, so ordering semantics cannot drift
//! between them.
//!
//! Failure policy: reads that fail are logged and treated as empty, writes
//! that fail are logged and counted. Neither interrupts playback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serenity::all::GuildId;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::error::{QueueError, StorageError};
use crate::events::{EventBus, QueueAction};
use crate::metrics::METRICS;
use crate::model::{QueueSnapshot, Track};

pub mod file;
pub mod memory;
pub mod ops;
pub mod redis;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

pub type MemoryQueue = Queue<MemoryBackend>;
pub type FileQueue = Queue<FileBackend>;
pub type RedisQueue = Queue<RedisBackend>;

pub const DEFAULT_MAX_HISTORY: usize = 20;

#[async_trait]
pub trait QueueStore: Send + Sync {
    fn backend_name(&self) -> &'static str;
    fn max_history(&self) -> usize;

    async fn current(&self, guild: GuildId) -> Option<Track>;
    async fn set_current(&self, guild: GuildId, track: Option<Track>);

    async fn history(&self, guild: GuildId) -> Vec<Track>;
    /// Appends, skipping identifiers already in history, trimming the oldest.
    async fn add_history(&self, guild: GuildId, tracks: Vec<Track>);
    async fn set_history(&self, guild: GuildId, tracks: Vec<Track>);
    async fn clear_history(&self, guild: GuildId);

    /// All pending tracks, in play order.
    async fn tracks(&self, guild: GuildId) -> Vec<Track>;
    /// When nothing is current the first track becomes current; the rest go
    /// to `offset` or the end.
    async fn add(
        &self,
        guild: GuildId,
        tracks: Vec<Track>,
        offset: Option<usize>,
    ) -> Result<(), QueueError>;
    async fn remove(&self, guild: GuildId, position: usize) -> Result<Track, QueueError>;
    async fn remove_range(
        &self,
        guild: GuildId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Track>, QueueError>;
    async fn dequeue(&self, guild: GuildId) -> Option<Track>;
    async fn enqueue_front(&self, guild: GuildId, tracks: Vec<Track>);
    async fn modify_at(
        &self,
        guild: GuildId,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Vec<Track>;
    async fn slice(&self, guild: GuildId, start: usize, end: usize) -> Vec<Track>;
    async fn clear(&self, guild: GuildId);

    async fn size(&self, guild: GuildId) -> usize;
    /// Pending plus one when a track is current.
    async fn total_size(&self, guild: GuildId) -> usize;
    /// Pending plus current, in milliseconds.
    async fn duration(&self, guild: GuildId) -> u64;

    async fn shuffle(&self, guild: GuildId);
    async fn round_robin_shuffle(&self, guild: GuildId);
    async fn user_block_shuffle(&self, guild: GuildId);

    async fn snapshot(&self, guild: GuildId) -> QueueSnapshot;
    /// Guilds with any queue state in this store.
    async fn guilds(&self) -> Vec<GuildId>;
    /// Drops every document for the guild. Deleting nothing is fine.
    async fn destroy(&self, guild: GuildId);
}

/// Storage primitives a queue backend provides.
#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn read_current(&self, guild: GuildId) -> Result<Option<Track>, StorageError>;
    async fn write_current(&self, guild: GuildId, track: Option<&Track>)
    -> Result<(), StorageError>;
    async fn read_tracks(&self, guild: GuildId) -> Result<Vec<Track>, StorageError>;
    async fn write_tracks(&self, guild: GuildId, tracks: &[Track]) -> Result<(), StorageError>;
    async fn read_history(&self, guild: GuildId) -> Result<Vec<Track>, StorageError>;
    async fn write_history(
        &self,
        guild: GuildId,
        history: &[Track],
        max: usize,
    ) -> Result<(), StorageError>;
    async fn remove_guild(&self, guild: GuildId) -> Result<(), StorageError>;
    async fn list_guilds(&self) -> Result<Vec<GuildId>, StorageError>;

    async fn tracks_len(&self, guild: GuildId) -> Result<usize, StorageError> {
        Ok(self.read_tracks(guild).await?.len())
    }

    async fn read_slice(
        &self,
        guild: GuildId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Track>, StorageError> {
        Ok(ops::slice(&self.read_tracks(guild).await?, start, end))
    }

    async fn pop_front(&self, guild: GuildId) -> Result<Option<Track>, StorageError> {
        let mut tracks = self.read_tracks(guild).await?;
        if tracks.is_empty() {
            return Ok(None);
        }
        let first = tracks.remove(0);
        self.write_tracks(guild, &tracks).await?;
        Ok(Some(first))
    }

    async fn push_back(&self, guild: GuildId, tracks: &[Track]) -> Result<(), StorageError> {
        let mut all = self.read_tracks(guild).await?;
        all.extend_from_slice(tracks);
        self.write_tracks(guild, &all).await
    }
}

/// One async mutex per guild so that read-modify-write sequences on a
/// guild's documents never interleave.
#[derive(Debug, Default)]
pub(crate) struct GuildLocks {
    locks: Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
}

impl GuildLocks {
    pub(crate) async fn lock(&self, guild: GuildId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(guild).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub(crate) fn forget(&self, guild: GuildId) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = map.get(&guild)
            && Arc::strong_count(lock) == 1
        {
            map.remove(&guild);
        }
    }
}

pub struct Queue<B> {
    backend: B,
    locks: GuildLocks,
    events: EventBus,
    max_history: usize,
}

impl<B: QueueBackend> Queue<B> {
    pub fn new(backend: B, events: EventBus, max_history: usize) -> Self {
        Self {
            backend,
            locks: GuildLocks::default(),
            events,
            max_history: max_history.max(1),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn read_failed(&self, guild: GuildId, what: &str, err: StorageError) {
        METRICS.storage_read_failed();
        warn!(
            %guild,
            backend = self.backend.name(),
            error = %err,
            "queue {what} read failed, treating as empty"
        );
    }

    fn write_failed(&self, guild: GuildId, what: &str, err: StorageError) {
        METRICS.storage_write_failed();
        warn!(
            %guild,
            backend = self.backend.name(),
            error = %err,
            "queue {what} write failed, persisted state may be stale"
        );
    }

    async fn load_current(&self, guild: GuildId) -> Option<Track> {
        self.backend
            .read_current(guild)
            .await
            .unwrap_or_else(|e| {
                self.read_failed(guild, "current", e);
                None
            })
    }

    async fn load_tracks(&self, guild: GuildId) -> Vec<Track> {
        self.backend.read_tracks(guild).await.unwrap_or_else(|e| {
            self.read_failed(guild, "tracks", e);
            Vec::new()
        })
    }

    async fn load_history(&self, guild: GuildId) -> Vec<Track> {
        self.backend.read_history(guild).await.unwrap_or_else(|e| {
            self.read_failed(guild, "history", e);
            Vec::new()
        })
    }

    async fn store_current(&self, guild: GuildId, track: Option<&Track>) {
        if let Err(e) = self.backend.write_current(guild, track).await {
            self.write_failed(guild, "current", e);
        }
    }

    async fn store_tracks(&self, guild: GuildId, tracks: &[Track]) {
        if let Err(e) = self.backend.write_tracks(guild, tracks).await {
            self.write_failed(guild, "tracks", e);
        }
    }

    async fn store_history(&self, guild: GuildId, history: &[Track]) {
        if let Err(e) = self
            .backend
            .write_history(guild, history, self.max_history)
            .await
        {
            self.write_failed(guild, "history", e);
        }
    }

    /// Rewrites pending tracks after a reordering, emitting `action`.
    async fn reorder<F>(&self, guild: GuildId, action: QueueAction, f: F)
    where
        F: FnOnce(Vec<Track>) -> Vec<Track> + Send,
    {
        let _guard = self.locks.lock(guild).await;
        let tracks = self.load_tracks(guild).await;
        if tracks.len() < 2 {
            return;
        }
        let reordered = f(tracks);
        self.store_tracks(guild, &reordered).await;
        self.events.queue_changed(guild, action, reordered);
    }
}

#[async_trait]
impl<B: QueueBackend> QueueStore for Queue<B> {
    fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn max_history(&self) -> usize {
        self.max_history
    }

    async fn current(&self, guild: GuildId) -> Option<Track> {
        self.load_current(guild).await
    }

    async fn set_current(&self, guild: GuildId, track: Option<Track>) {
        let _guard = self.locks.lock(guild).await;
        self.store_current(guild, track.as_ref()).await;
        self.events
            .queue_changed(guild, QueueAction::SetCurrent, track.into_iter().collect());
    }

    async fn history(&self, guild: GuildId) -> Vec<Track> {
        self.load_history(guild).await
    }

    async fn add_history(&self, guild: GuildId, tracks: Vec<Track>) {
        let _guard = self.locks.lock(guild).await;
        let mut history = self.load_history(guild).await;
        let added = ops::push_history(&mut history, tracks, self.max_history);
        if added.is_empty() {
            return;
        }
        self.store_history(guild, &history).await;
        self.events
            .queue_changed(guild, QueueAction::AddHistory, added);
    }

    async fn set_history(&self, guild: GuildId, mut tracks: Vec<Track>) {
        let _guard = self.locks.lock(guild).await;
        ops::trim_history(&mut tracks, self.max_history);
        self.store_history(guild, &tracks).await;
        self.events
            .queue_changed(guild, QueueAction::SetHistory, tracks);
    }

    async fn clear_history(&self, guild: GuildId) {
        let _guard = self.locks.lock(guild).await;
        let cleared = self.load_history(guild).await;
        self.store_history(guild, &[]).await;
        self.events
            .queue_changed(guild, QueueAction::ClearHistory, cleared);
    }

    async fn tracks(&self, guild: GuildId) -> Vec<Track> {
        self.load_tracks(guild).await
    }

    async fn add(
        &self,
        guild: GuildId,
        tracks: Vec<Track>,
        offset: Option<usize>,
    ) -> Result<(), QueueError> {
        if tracks.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.lock(guild).await;
        let mut state = QueueSnapshot {
            current: self.load_current(guild).await,
            tracks: self.load_tracks(guild).await,
            history: Vec::new(),
        };
        let len_before = state.tracks.len();
        let promoted = ops::add(&mut state, tracks.clone(), offset)?;

        if promoted {
            self.store_current(guild, state.current.as_ref()).await;
        }
        if state.tracks.len() != len_before {
            let appended = offset.is_none_or(|at| at == len_before);
            if appended {
                // An unreadable document was taken as empty above; replace
                // it with what this call sees instead of dropping the add.
                if let Err(e) = self
                    .backend
                    .push_back(guild, &state.tracks[len_before..])
                    .await
                {
                    debug!(%guild, error = %e, "append failed, rewriting pending tracks");
                    self.store_tracks(guild, &state.tracks).await;
                }
            } else {
                self.store_tracks(guild, &state.tracks).await;
            }
        }
        debug!(%guild, added = tracks.len(), promoted, "tracks added");
        self.events.queue_changed(guild, QueueAction::Add, tracks);
        Ok(())
    }

    async fn remove(&self, guild: GuildId, position: usize) -> Result<Track, QueueError> {
        let mut removed = self
            .remove_range(guild, position, position.saturating_add(1))
            .await?;
        removed
            .pop()
            .ok_or(QueueError::InvalidRange {
                start: position,
                end: position.saturating_add(1),
                len: 0,
            })
    }

    async fn remove_range(
        &self,
        guild: GuildId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Track>, QueueError> {
        let _guard = self.locks.lock(guild).await;
        let mut tracks = self.load_tracks(guild).await;
        let removed = ops::remove_range(&mut tracks, start, end)?;
        self.store_tracks(guild, &tracks).await;
        self.events
            .queue_changed(guild, QueueAction::Remove, removed.clone());
        Ok(removed)
    }

    async fn dequeue(&self, guild: GuildId) -> Option<Track> {
        let _guard = self.locks.lock(guild).await;
        let track = self.backend.pop_front(guild).await.unwrap_or_else(|e| {
            self.read_failed(guild, "tracks", e);
            None
        });
        if let Some(track) = &track {
            self.events
                .queue_changed(guild, QueueAction::Dequeue, vec![track.clone()]);
        }
        track
    }

    async fn enqueue_front(&self, guild: GuildId, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        let _guard = self.locks.lock(guild).await;
        let mut all = self.load_tracks(guild).await;
        ops::splice(&mut all, 0, 0, tracks.clone());
        self.store_tracks(guild, &all).await;
        self.events
            .queue_changed(guild, QueueAction::EnqueueFront, tracks);
    }

    async fn modify_at(
        &self,
        guild: GuildId,
        start: usize,
        delete_count: usize,
        items: Vec<Track>,
    ) -> Vec<Track> {
        let _guard = self.locks.lock(guild).await;
        let mut all = self.load_tracks(guild).await;
        let removed = ops::splice(&mut all, start, delete_count, items.clone());
        if removed.is_empty() && items.is_empty() {
            return removed;
        }
        self.store_tracks(guild, &all).await;
        let affected = removed.iter().cloned().chain(items).collect();
        self.events
            .queue_changed(guild, QueueAction::Modify, affected);
        removed
    }

    async fn slice(&self, guild: GuildId, start: usize, end: usize) -> Vec<Track> {
        self.backend
            .read_slice(guild, start, end)
            .await
            .unwrap_or_else(|e| {
                self.read_failed(guild, "tracks", e);
                Vec::new()
            })
    }

    async fn clear(&self, guild: GuildId) {
        let _guard = self.locks.lock(guild).await;
        let cleared = self.load_tracks(guild).await;
        self.store_tracks(guild, &[]).await;
        self.events.queue_changed(guild, QueueAction::Clear, cleared);
    }

    async fn size(&self, guild: GuildId) -> usize {
        self.backend.tracks_len(guild).await.unwrap_or_else(|e| {
            self.read_failed(guild, "tracks", e);
            0
        })
    }

    async fn total_size(&self, guild: GuildId) -> usize {
        let _guard = self.locks.lock(guild).await;
        let pending = self.size(guild).await;
        pending + usize::from(self.load_current(guild).await.is_some())
    }

    async fn duration(&self, guild: GuildId) -> u64 {
        let _guard = self.locks.lock(guild).await;
        let state = QueueSnapshot {
            current: self.load_current(guild).await,
            tracks: self.load_tracks(guild).await,
            history: Vec::new(),
        };
        ops::duration(&state)
    }

    async fn shuffle(&self, guild: GuildId) {
        self.reorder(guild, QueueAction::Shuffle, |mut tracks| {
            ops::shuffle(&mut tracks, &mut rand::rng());
            tracks
        })
        .await
    }

    async fn round_robin_shuffle(&self, guild: GuildId) {
        self.reorder(guild, QueueAction::RoundRobinShuffle, |tracks| {
            ops::round_robin(tracks, &mut rand::rng())
        })
        .await
    }

    async fn user_block_shuffle(&self, guild: GuildId) {
        self.reorder(guild, QueueAction::UserBlockShuffle, ops::user_block)
            .await
    }

    async fn snapshot(&self, guild: GuildId) -> QueueSnapshot {
        let _guard = self.locks.lock(guild).await;
        QueueSnapshot {
            current: self.load_current(guild).await,
            tracks: self.load_tracks(guild).await,
            history: self.load_history(guild).await,
        }
    }

    async fn guilds(&self) -> Vec<GuildId> {
        self.backend.list_guilds().await.unwrap_or_else(|e| {
            METRICS.storage_read_failed();
            warn!(backend = self.backend.name(), error = %e, "listing queue guilds failed");
            Vec::new()
        })
    }

    async fn destroy(&self, guild: GuildId) {
        {
            let _guard = self.locks.lock(guild).await;
            if let Err(e) = self.backend.remove_guild(guild).await {
                self.write_failed(guild, "all", e);
            }
            self.events
                .queue_changed(guild, QueueAction::Destroy, Vec::new());
        }
        self.locks.forget(guild);
    }
}
