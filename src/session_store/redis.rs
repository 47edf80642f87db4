use std::collections::HashMap;

use async_trait::async_trait;
use serenity::all::GuildId;
use tracing::warn;

use super::SessionStore;
use crate::error::StorageError;
use crate::model::SessionSnapshot;
use crate::storage::RedisHandle;

/// `<prefix>session:<guild>` holds the JSON snapshot; node resume ids live
/// in the `<prefix>node_sessions` hash.
#[derive(Debug, Clone)]
pub struct RedisSessionStore {
    handle: RedisHandle,
}

impl RedisSessionStore {
    pub fn new(handle: RedisHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let payload = serde_json::to_string(snapshot)?;
        let mut conn = self.handle.conn();
        let _: () = redis::cmd("SET")
            .arg(self.handle.session_key(snapshot.guild_id))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn load(&self, guild: GuildId) -> Result<Option<SessionSnapshot>, StorageError> {
        let mut conn = self.handle.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.handle.session_key(guild))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn load_all(&self) -> Result<Vec<SessionSnapshot>, StorageError> {
        let mut out = Vec::new();
        for guild in self.guilds().await? {
            match self.load(guild).await {
                Ok(Some(snapshot)) => out.push(snapshot),
                Ok(None) => {}
                Err(e) => warn!(%guild, error = %e, "skipping unreadable session snapshot"),
            }
        }
        Ok(out)
    }

    async fn delete(&self, guild: GuildId) -> Result<(), StorageError> {
        let mut conn = self.handle.conn();
        let _: () = redis::cmd("DEL")
            .arg(self.handle.session_key(guild))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn guilds(&self) -> Result<Vec<GuildId>, StorageError> {
        self.handle.scan_guilds("session:").await
    }

    async fn load_node_sessions(&self) -> Result<HashMap<String, String>, StorageError> {
        let mut conn = self.handle.conn();
        let ids: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.handle.node_sessions_key())
            .query_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn save_node_session(
        &self,
        node_id: &str,
        session_id: &str,
    ) -> Result<(), StorageError> {
        let mut conn = self.handle.conn();
        let _: () = redis::cmd("HSET")
            .arg(self.handle.node_sessions_key())
            .arg(node_id)
            .arg(session_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
