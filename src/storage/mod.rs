//! The process-wide persistence handle.
//!
//! Opened once at startup from configuration, handed to the stores that
//! need it, closed at shutdown. Which backend is in play is decided here and
//! nowhere else.

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::events::EventBus;
use crate::queue::{FileBackend, MemoryBackend, Queue, QueueStore, RedisBackend};
use crate::session_store::{
    FileSessionStore, MemorySessionStore, RedisSessionStore, SessionStore,
};

pub mod fs;
pub mod redis;

pub use self::fs::FileRoot;
pub use self::redis::RedisHandle;

#[derive(Debug, Clone)]
pub enum StorageHandle {
    Memory(Arc<MemorySessionStore>),
    File(FileRoot),
    Redis(RedisHandle),
}

impl StorageHandle {
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let handle = match config {
            StorageConfig::Memory => StorageHandle::memory(),
            StorageConfig::File { dir } => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| StorageError::io(dir, e))?;
                StorageHandle::File(FileRoot::new(dir))
            }
            StorageConfig::Redis { url, prefix } => {
                let handle = RedisHandle::connect(url, prefix.clone()).await?;
                handle.ping().await?;
                StorageHandle::Redis(handle)
            }
        };
        info!(backend = handle.kind(), "storage opened");
        Ok(handle)
    }

    pub fn memory() -> Self {
        StorageHandle::Memory(Arc::new(MemorySessionStore::default()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageHandle::Memory(_) => "memory",
            StorageHandle::File(_) => "file",
            StorageHandle::Redis(_) => "redis",
        }
    }

    /// Queue store for one cluster. Persistent backends keep each cluster's
    /// queue state in its own namespace.
    pub fn queue_store(
        &self,
        cluster_id: u32,
        events: EventBus,
        max_history: usize,
    ) -> Arc<dyn QueueStore> {
        match self {
            StorageHandle::Memory(_) => {
                Arc::new(Queue::new(MemoryBackend::new(), events, max_history))
            }
            StorageHandle::File(root) => Arc::new(Queue::new(
                FileBackend::new(root.clone(), cluster_id),
                events,
                max_history,
            )),
            StorageHandle::Redis(handle) => Arc::new(Queue::new(
                RedisBackend::new(handle.clone(), cluster_id),
                events,
                max_history,
            )),
        }
    }

    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        match self {
            StorageHandle::Memory(store) => store.clone() as Arc<dyn SessionStore>,
            StorageHandle::File(root) => Arc::new(FileSessionStore::new(root.clone())),
            StorageHandle::Redis(handle) => Arc::new(RedisSessionStore::new(handle.clone())),
        }
    }

    /// Releases the handle. Stores built from it keep working until dropped,
    /// but nothing new should be opened afterwards.
    pub async fn close(self) {
        info!(backend = self.kind(), "storage closed");
        drop(self);
    }
}
