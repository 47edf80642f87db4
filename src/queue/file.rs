use std::path::PathBuf;

use async_trait::async_trait;
use serenity::all::GuildId;

use super::{QueueBackend, ops};
use crate::error::StorageError;
use crate::model::Track;
use crate::storage::fs::{self as store_fs, FileRoot};

const CURRENT: &str = "current.json";
const TRACKS: &str = "tracks.json";
const HISTORY: &str = "history.json";

/// One directory per guild, under `queues/<cluster>/`, holding
/// `current.json`, `tracks.json` and `history.json`. The directory appears
/// on first write.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: FileRoot,
    cluster_id: u32,
}

impl FileBackend {
    pub fn new(root: FileRoot, cluster_id: u32) -> Self {
        Self { root, cluster_id }
    }

    fn doc(&self, guild: GuildId, name: &str) -> PathBuf {
        self.root.queue_dir(self.cluster_id, guild).join(name)
    }
}

#[async_trait]
impl QueueBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn read_current(&self, guild: GuildId) -> Result<Option<Track>, StorageError> {
        Ok(store_fs::read_json::<Option<Track>>(&self.doc(guild, CURRENT))
            .await?
            .flatten())
    }

    async fn write_current(
        &self,
        guild: GuildId,
        track: Option<&Track>,
    ) -> Result<(), StorageError> {
        store_fs::write_json(&self.doc(guild, CURRENT), &track).await
    }

    async fn read_tracks(&self, guild: GuildId) -> Result<Vec<Track>, StorageError> {
        Ok(store_fs::read_json(&self.doc(guild, TRACKS))
            .await?
            .unwrap_or_default())
    }

    async fn write_tracks(&self, guild: GuildId, tracks: &[Track]) -> Result<(), StorageError> {
        store_fs::write_json(&self.doc(guild, TRACKS), tracks).await
    }

    async fn read_history(&self, guild: GuildId) -> Result<Vec<Track>, StorageError> {
        Ok(store_fs::read_json(&self.doc(guild, HISTORY))
            .await?
            .unwrap_or_default())
    }

    async fn write_history(
        &self,
        guild: GuildId,
        history: &[Track],
        max: usize,
    ) -> Result<(), StorageError> {
        let mut history = history.to_vec();
        ops::trim_history(&mut history, max);
        store_fs::write_json(&self.doc(guild, HISTORY), &history).await
    }

    async fn remove_guild(&self, guild: GuildId) -> Result<(), StorageError> {
        store_fs::remove_dir(&self.root.queue_dir(self.cluster_id, guild)).await
    }

    async fn list_guilds(&self) -> Result<Vec<GuildId>, StorageError> {
        store_fs::list_guild_entries(&self.root.queues_dir(self.cluster_id), "").await
    }
}
