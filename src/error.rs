use serenity::all::GuildId;
use thiserror::Error;

/// Invalid startup options. Raised before any session exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown storage backend {0:?}, expected memory, file or redis")]
    UnknownStorage(String),
    #[error("redis storage selected but no LYRE_REDIS_URL or REDIS_URL is set")]
    MissingRedisUrl,
    #[error("no storage directory available on this system; set LYRE_STORAGE_DIR")]
    MissingStorageDir,
    #[error("LYRE_NODES must list at least one compute node")]
    NoNodes,
    #[error("LYRE_NODES is not valid JSON: {0}")]
    InvalidNodes(#[from] serde_json::Error),
    #[error("duplicate compute node identifier {0:?}")]
    DuplicateNode(String),
    #[error("max history must be at least 1")]
    ZeroHistory,
}

/// Persistence read/write failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Bad queue index or offset arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid range {start}..{end} for queue of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },
    #[error("offset {offset} is past the end of a queue of length {len}")]
    InvalidOffset { offset: usize, len: usize },
}

/// Failure talking to a compute node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {0} has no session id yet")]
    NoSession(String),
    #[error("node {node} request failed: {source}")]
    Http {
        node: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("node {node} rejected the request with status {status}")]
    Status { node: String, status: u16 },
    #[error("node {0} returned an invalid base url")]
    InvalidUrl(String),
    #[error("node {node}: {message}")]
    Other { node: String, message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no connected compute node is available")]
    NoNodeAvailable,
    #[error("compute node {0:?} is not registered")]
    UnknownNode(String),
    #[error("no active session for guild {0}")]
    NotFound(GuildId),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure while reconciling one persisted session. Never propagated past
/// the recovery loop.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("guild {guild}: could not list live sessions: {source}")]
    LiveSessions {
        guild: GuildId,
        #[source]
        source: NodeError,
    },
    #[error("guild {guild}: {source}")]
    Session {
        guild: GuildId,
        #[source]
        source: SessionError,
    },
    #[error("guild {guild}: recovery task aborted: {message}")]
    Aborted { guild: GuildId, message: String },
}
