use redis::aio::ConnectionManager;
use serenity::all::GuildId;

use super::fs::parse_guild;
use crate::error::StorageError;

const SCAN_COUNT: usize = 200;

/// Shared Redis connection plus the key prefix every store writes under.
/// Cloning is cheap; all clones multiplex one connection.
#[derive(Clone)]
pub struct RedisHandle {
    conn: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHandle")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisHandle {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    pub fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespace under which one cluster's queue keys live, relative to the
    /// prefix.
    pub fn queue_namespace(cluster_id: u32) -> String {
        format!("queue:{cluster_id}:")
    }

    pub fn queue_key(&self, cluster_id: u32, guild: GuildId, part: &str) -> String {
        format!(
            "{}{}{guild}:{part}",
            self.prefix,
            Self::queue_namespace(cluster_id)
        )
    }

    pub fn session_key(&self, guild: GuildId) -> String {
        format!("{}session:{guild}", self.prefix)
    }

    pub fn node_sessions_key(&self) -> String {
        format!("{}node_sessions", self.prefix)
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Walks the keyspace with SCAN. Never issues KEYS, which blocks the
    /// server for the whole enumeration.
    pub async fn scan(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    /// Distinct guild ids among keys shaped `<prefix><namespace><guild>[:...]`.
    pub async fn scan_guilds(&self, namespace: &str) -> Result<Vec<GuildId>, StorageError> {
        let pattern = format!("{}{namespace}*", self.prefix);
        let keys = self.scan(&pattern).await?;
        let lead = format!("{}{namespace}", self.prefix);
        let mut guilds: Vec<GuildId> = keys
            .iter()
            .filter_map(|key| guild_from_key(key, &lead))
            .collect();
        guilds.sort_unstable();
        guilds.dedup();
        Ok(guilds)
    }
}

fn guild_from_key(key: &str, lead: &str) -> Option<GuildId> {
    let rest = key.strip_prefix(lead)?;
    parse_guild(rest.split(':').next()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_ids_are_read_back_from_keys() {
        assert_eq!(
            guild_from_key("lyre:queue:4:123:tracks", "lyre:queue:4:"),
            Some(GuildId::new(123))
        );
        assert_eq!(
            guild_from_key("lyre:session:9", "lyre:session:"),
            Some(GuildId::new(9))
        );
        assert_eq!(guild_from_key("lyre:queue:4:abc:tracks", "lyre:queue:4:"), None);
        assert_eq!(guild_from_key("lyre:queue:5:123:tracks", "lyre:queue:4:"), None);
        assert_eq!(guild_from_key("other:queue:4:1:tracks", "lyre:queue:4:"), None);
    }
}
