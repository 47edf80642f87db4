use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serenity::all::GuildId;
use tokio::fs;

use crate::error::StorageError;

/// Root of the file-backed storage.
#[derive(Debug, Clone)]
pub struct FileRoot {
    root: PathBuf,
}

impl FileRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Queue state is partitioned by cluster so that processes sharing one
    /// root never see each other's guilds.
    pub fn queues_dir(&self, cluster_id: u32) -> PathBuf {
        self.root.join("queues").join(cluster_id.to_string())
    }

    pub fn queue_dir(&self, cluster_id: u32, guild: GuildId) -> PathBuf {
        self.queues_dir(cluster_id).join(guild.to_string())
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn session_file(&self, guild: GuildId) -> PathBuf {
        self.sessions_dir().join(format!("{guild}.json"))
    }

    pub fn node_sessions_file(&self) -> PathBuf {
        self.root.join("node_sessions.json")
    }
}

/// Missing files read as `None`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Replaces the file wholesale: write a sibling temp file, then rename over
/// the target, so readers never observe a half-written document.
pub(crate) async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::io(dir, e))?;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}-{nanos}.tmp", std::process::id()));
    fs::write(&tmp, &bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

pub(crate) async fn remove_file(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

pub(crate) async fn remove_dir(path: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Directory entries whose name (minus `suffix`) is a guild id. Anything
/// else in the directory is ignored.
pub(crate) async fn list_guild_entries(
    dir: &Path,
    suffix: &str,
) -> Result<Vec<GuildId>, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut guilds = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(guild) = parse_guild(name.strip_suffix(suffix).unwrap_or(name)) {
            guilds.push(guild);
        }
    }
    Ok(guilds)
}

pub(crate) fn parse_guild(raw: &str) -> Option<GuildId> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(GuildId::new)
}
