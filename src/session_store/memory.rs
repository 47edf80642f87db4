use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serenity::all::GuildId;

use super::SessionStore;
use crate::error::StorageError;
use crate::model::SessionSnapshot;

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    snapshots: RwLock<HashMap<GuildId, SessionSnapshot>>,
    node_sessions: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.guild_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, guild: GuildId) -> Result<Option<SessionSnapshot>, StorageError> {
        Ok(self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&guild)
            .cloned())
    }

    async fn load_all(&self) -> Result<Vec<SessionSnapshot>, StorageError> {
        Ok(self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn delete(&self, guild: GuildId) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&guild);
        Ok(())
    }

    async fn guilds(&self) -> Result<Vec<GuildId>, StorageError> {
        Ok(self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect())
    }

    async fn load_node_sessions(&self) -> Result<HashMap<String, String>, StorageError> {
        Ok(self
            .node_sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save_node_session(
        &self,
        node_id: &str,
        session_id: &str,
    ) -> Result<(), StorageError> {
        self.node_sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.to_string(), session_id.to_string());
        Ok(())
    }
}
