use async_trait::async_trait;
use serenity::all::GuildId;

use super::QueueBackend;
use crate::error::StorageError;
use crate::model::Track;
use crate::storage::RedisHandle;

/// Keys per guild:
/// - `<prefix>queue:<cluster>:<guild>:current`: JSON string
/// - `<prefix>queue:<cluster>:<guild>:tracks`: list of JSON tracks, head plays next
/// - `<prefix>queue:<cluster>:<guild>:history`: list trimmed to the history bound
#[derive(Debug, Clone)]
pub struct RedisBackend {
    handle: RedisHandle,
    cluster_id: u32,
}

impl RedisBackend {
    pub fn new(handle: RedisHandle, cluster_id: u32) -> Self {
        Self { handle, cluster_id }
    }

    fn key(&self, guild: GuildId, part: &str) -> String {
        self.handle.queue_key(self.cluster_id, guild, part)
    }

    async fn read_list(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Track>, StorageError> {
        let mut conn = self.handle.conn();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(StorageError::from))
            .collect()
    }

    /// Replaces a list in one MULTI block, optionally trimming it to the
    /// last `keep` entries.
    async fn replace_list(
        &self,
        key: &str,
        tracks: &[Track],
        keep: Option<usize>,
    ) -> Result<(), StorageError> {
        let values = encode(tracks)?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !values.is_empty() {
            pipe.cmd("RPUSH").arg(key).arg(&values).ignore();
            if let Some(keep) = keep {
                pipe.cmd("LTRIM")
                    .arg(key)
                    .arg(-(keep as i64))
                    .arg(-1)
                    .ignore();
            }
        }
        let mut conn = self.handle.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

fn encode(tracks: &[Track]) -> Result<Vec<String>, StorageError> {
    tracks
        .iter()
        .map(|t| serde_json::to_string(t).map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl QueueBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn read_current(&self, guild: GuildId) -> Result<Option<Track>, StorageError> {
        let mut conn = self.handle.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(guild, "current"))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn write_current(
        &self,
        guild: GuildId,
        track: Option<&Track>,
    ) -> Result<(), StorageError> {
        let key = self.key(guild, "current");
        let mut conn = self.handle.conn();
        match track {
            Some(track) => {
                let payload = serde_json::to_string(track)?;
                let _: () = redis::cmd("SET")
                    .arg(&key)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            }
        }
        Ok(())
    }

    async fn read_tracks(&self, guild: GuildId) -> Result<Vec<Track>, StorageError> {
        self.read_list(&self.key(guild, "tracks"), 0, -1).await
    }

    async fn write_tracks(&self, guild: GuildId, tracks: &[Track]) -> Result<(), StorageError> {
        self.replace_list(&self.key(guild, "tracks"), tracks, None)
            .await
    }

    async fn read_history(&self, guild: GuildId) -> Result<Vec<Track>, StorageError> {
        self.read_list(&self.key(guild, "history"), 0, -1).await
    }

    async fn write_history(
        &self,
        guild: GuildId,
        history: &[Track],
        max: usize,
    ) -> Result<(), StorageError> {
        self.replace_list(&self.key(guild, "history"), history, Some(max))
            .await
    }

    async fn remove_guild(&self, guild: GuildId) -> Result<(), StorageError> {
        let mut conn = self.handle.conn();
        let _: () = redis::cmd("DEL")
            .arg(self.key(guild, "current"))
            .arg(self.key(guild, "tracks"))
            .arg(self.key(guild, "history"))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_guilds(&self) -> Result<Vec<GuildId>, StorageError> {
        self.handle
            .scan_guilds(&RedisHandle::queue_namespace(self.cluster_id))
            .await
    }

    async fn tracks_len(&self, guild: GuildId) -> Result<usize, StorageError> {
        let mut conn = self.handle.conn();
        let len: usize = redis::cmd("LLEN")
            .arg(self.key(guild, "tracks"))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn read_slice(
        &self,
        guild: GuildId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Track>, StorageError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(end - 1).unwrap_or(isize::MAX);
        let start = isize::try_from(start).unwrap_or(isize::MAX);
        self.read_list(&self.key(guild, "tracks"), start, stop).await
    }

    async fn pop_front(&self, guild: GuildId) -> Result<Option<Track>, StorageError> {
        let mut conn = self.handle.conn();
        let raw: Option<String> = redis::cmd("LPOP")
            .arg(self.key(guild, "tracks"))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn push_back(&self, guild: GuildId, tracks: &[Track]) -> Result<(), StorageError> {
        if tracks.is_empty() {
            return Ok(());
        }
        let values = encode(tracks)?;
        let mut conn = self.handle.conn();
        let _: () = redis::cmd("RPUSH")
            .arg(self.key(guild, "tracks"))
            .arg(&values)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
