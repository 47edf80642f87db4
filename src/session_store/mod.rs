//! Whole-session snapshots and node resume ids.

use std::collections::HashMap;

use async_trait::async_trait;
use serenity::all::GuildId;

use crate::error::StorageError;
use crate::model::SessionSnapshot;

pub mod file;
pub mod memory;
pub mod redis;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use redis::RedisSessionStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError>;
    async fn load(&self, guild: GuildId) -> Result<Option<SessionSnapshot>, StorageError>;
    /// Every snapshot that parses. Unreadable entries are logged and skipped.
    async fn load_all(&self) -> Result<Vec<SessionSnapshot>, StorageError>;
    /// Idempotent.
    async fn delete(&self, guild: GuildId) -> Result<(), StorageError>;
    async fn guilds(&self) -> Result<Vec<GuildId>, StorageError>;

    /// Node identifier → resume session id.
    async fn load_node_sessions(&self) -> Result<HashMap<String, String>, StorageError>;
    async fn save_node_session(&self, node_id: &str, session_id: &str)
    -> Result<(), StorageError>;
}
