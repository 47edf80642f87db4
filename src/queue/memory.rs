use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serenity::all::GuildId;

use super::{QueueBackend, ops};
use crate::error::StorageError;
use crate::model::{QueueSnapshot, Track};

/// Keeps queues in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    queues: RwLock<HashMap<GuildId, QueueSnapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, guild: GuildId, f: impl FnOnce(&QueueSnapshot) -> T) -> Option<T> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        queues.get(&guild).map(f)
    }

    fn write(&self, guild: GuildId, f: impl FnOnce(&mut QueueSnapshot)) {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        f(queues.entry(guild).or_default());
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read_current(&self, guild: GuildId) -> Result<Option<Track>, StorageError> {
        Ok(self.read(guild, |q| q.current.clone()).flatten())
    }

    async fn write_current(
        &self,
        guild: GuildId,
        track: Option<&Track>,
    ) -> Result<(), StorageError> {
        self.write(guild, |q| q.current = track.cloned());
        Ok(())
    }

    async fn read_tracks(&self, guild: GuildId) -> Result<Vec<Track>, StorageError> {
        Ok(self.read(guild, |q| q.tracks.clone()).unwrap_or_default())
    }

    async fn write_tracks(&self, guild: GuildId, tracks: &[Track]) -> Result<(), StorageError> {
        self.write(guild, |q| q.tracks = tracks.to_vec());
        Ok(())
    }

    async fn read_history(&self, guild: GuildId) -> Result<Vec<Track>, StorageError> {
        Ok(self.read(guild, |q| q.history.clone()).unwrap_or_default())
    }

    async fn write_history(
        &self,
        guild: GuildId,
        history: &[Track],
        max: usize,
    ) -> Result<(), StorageError> {
        self.write(guild, |q| {
            q.history = history.to_vec();
            ops::trim_history(&mut q.history, max);
        });
        Ok(())
    }

    async fn remove_guild(&self, guild: GuildId) -> Result<(), StorageError> {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&guild);
        Ok(())
    }

    async fn list_guilds(&self) -> Result<Vec<GuildId>, StorageError> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        Ok(queues.keys().copied().collect())
    }

    async fn tracks_len(&self, guild: GuildId) -> Result<usize, StorageError> {
        Ok(self.read(guild, |q| q.tracks.len()).unwrap_or(0))
    }

    async fn pop_front(&self, guild: GuildId) -> Result<Option<Track>, StorageError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        Ok(queues
            .get_mut(&guild)
            .filter(|q| !q.tracks.is_empty())
            .map(|q| q.tracks.remove(0)))
    }
}
