use std::collections::HashMap;

use async_trait::async_trait;
use serenity::all::GuildId;
use tokio::sync::Mutex;
use tracing::warn;

use super::SessionStore;
use crate::error::StorageError;
use crate::model::SessionSnapshot;
use crate::storage::fs::{self as store_fs, FileRoot};

/// `<root>/sessions/<guild>.json` per session and `<root>/node_sessions.json`
/// for node resume ids.
#[derive(Debug)]
pub struct FileSessionStore {
    root: FileRoot,
    node_sessions_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(root: FileRoot) -> Self {
        Self {
            root,
            node_sessions_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        store_fs::write_json(&self.root.session_file(snapshot.guild_id), snapshot).await
    }

    async fn load(&self, guild: GuildId) -> Result<Option<SessionSnapshot>, StorageError> {
        store_fs::read_json(&self.root.session_file(guild)).await
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
        store_fs::remove_file(&self.root.session_file(guild)).await
    }

    async fn guilds(&self) -> Result<Vec<GuildId>, StorageError> {
        store_fs::list_guild_entries(&self.root.sessions_dir(), ".json").await
    }

    async fn load_node_sessions(&self) -> Result<HashMap<String, String>, StorageError> {
        Ok(store_fs::read_json(&self.root.node_sessions_file())
            .await?
            .unwrap_or_default())
    }

    async fn save_node_session(
        &self,
        node_id: &str,
        session_id: &str,
    ) -> Result<(), StorageError> {
        let _guard = self.node_sessions_lock.lock().await;
        let path = self.root.node_sessions_file();
        let mut ids: HashMap<String, String> =
            store_fs::read_json(&path).await?.unwrap_or_default();
        ids.insert(node_id.to_string(), session_id.to_string());
        store_fs::write_json(&path, &ids).await
    }
}
