//! Startup configuration, read from the environment once.
//!
//! [`Config::from_lookup`] does all the parsing against an arbitrary key
//! lookup so it can be exercised without mutating the process environment.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::env::{parse_flag, read_first};
use crate::error::ConfigError;
use crate::node::NodeStrategy;
use crate::queue::DEFAULT_MAX_HISTORY;

pub const DEFAULT_REDIS_PREFIX: &str = "lyre:";
pub const DEFAULT_RECOVERY_DELAY_MS: u64 = 1000;
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(DEFAULT_RECOVERY_DELAY_MS);
pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    File { dir: PathBuf },
    Redis { url: String, prefix: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionConfig {
    pub use_priority: bool,
    pub strategy: NodeStrategy,
}

/// One compute node as listed in `LYRE_NODES`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOptions {
    pub identifier: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub is_backup: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_id: u32,
    pub storage: StorageConfig,
    pub max_history: usize,
    pub recovery_delay: Duration,
    /// `None` disables the periodic sweeper.
    pub sweep_interval: Option<Duration>,
    pub sweep_on_shutdown: bool,
    pub selection: SelectionConfig,
    pub nodes: Vec<NodeOptions>,
    pub http_bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_id: 0,
            storage: StorageConfig::Memory,
            max_history: DEFAULT_MAX_HISTORY,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            sweep_interval: None,
            sweep_on_shutdown: true,
            selection: SelectionConfig::default(),
            nodes: Vec::new(),
            http_bind: DEFAULT_HTTP_BIND.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let cluster_id = parse_or(&lookup, "LYRE_CLUSTER_ID", &["LYRE_CLUSTER_ID", "CLUSTER_ID"], 0)?;
        let storage = storage_from(&lookup)?;

        let max_history = parse_or(
            &lookup,
            "LYRE_MAX_HISTORY",
            &["LYRE_MAX_HISTORY"],
            DEFAULT_MAX_HISTORY,
        )?;
        if max_history == 0 {
            return Err(ConfigError::ZeroHistory);
        }

        let recovery_delay = Duration::from_millis(parse_or(
            &lookup,
            "LYRE_RECOVERY_DELAY_MS",
            &["LYRE_RECOVERY_DELAY_MS"],
            DEFAULT_RECOVERY_DELAY_MS,
        )?);
        let sweep_secs: u64 = parse_or(
            &lookup,
            "LYRE_SWEEP_INTERVAL_SECS",
            &["LYRE_SWEEP_INTERVAL_SECS"],
            0,
        )?;
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let sweep_on_shutdown = flag_or(
            &lookup,
            "LYRE_SWEEP_ON_SHUTDOWN",
            defaults.sweep_on_shutdown,
        )?;
        let use_priority = flag_or(&lookup, "LYRE_USE_PRIORITY", false)?;
        let strategy = match read_first(&lookup, &["LYRE_NODE_STRATEGY"]) {
            None => NodeStrategy::default(),
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
                .map_err(|_| ConfigError::InvalidValue {
                    key: "LYRE_NODE_STRATEGY",
                    value: raw,
                })?,
        };

        let nodes = nodes_from(&lookup)?;
        let http_bind =
            read_first(&lookup, &["LYRE_HTTP_BIND"]).unwrap_or(defaults.http_bind);

        Ok(Self {
            cluster_id,
            storage,
            max_history,
            recovery_delay,
            sweep_interval,
            sweep_on_shutdown,
            selection: SelectionConfig {
                use_priority,
                strategy,
            },
            nodes,
            http_bind,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, candidates: &[&str], default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match read_first(lookup, candidates) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn flag_or<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_first(lookup, &[key]) {
        None => Ok(default),
        Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidValue { key, value: raw }),
    }
}

fn storage_from<F>(lookup: &F) -> Result<StorageConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let kind = read_first(lookup, &["LYRE_STORAGE"]).unwrap_or_else(|| "memory".to_string());
    match kind.to_ascii_lowercase().as_str() {
        "memory" => Ok(StorageConfig::Memory),
        "file" => {
            let dir = match read_first(lookup, &["LYRE_STORAGE_DIR"]) {
                Some(dir) => PathBuf::from(dir),
                None => dirs::data_dir()
                    .map(|d| d.join("lyre").join("sessions"))
                    .ok_or(ConfigError::MissingStorageDir)?,
            };
            Ok(StorageConfig::File { dir })
        }
        "redis" => {
            let url = read_first(lookup, &["LYRE_REDIS_URL", "REDIS_URL"])
                .ok_or(ConfigError::MissingRedisUrl)?;
            url::Url::parse(&url).map_err(|_| ConfigError::InvalidValue {
                key: "LYRE_REDIS_URL",
                value: url.clone(),
            })?;
            let prefix = read_first(lookup, &["LYRE_REDIS_PREFIX"])
                .unwrap_or_else(|| DEFAULT_REDIS_PREFIX.to_string());
            Ok(StorageConfig::Redis { url, prefix })
        }
        _ => Err(ConfigError::UnknownStorage(kind)),
    }
}

fn nodes_from<F>(lookup: &F) -> Result<Vec<NodeOptions>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read_first(lookup, &["LYRE_NODES"]).ok_or(ConfigError::NoNodes)?;
    let nodes: Vec<NodeOptions> = serde_json::from_str(&raw)?;
    if nodes.is_empty() {
        return Err(ConfigError::NoNodes);
    }
    let mut seen = HashSet::new();
    for node in &nodes {
        if !seen.insert(node.identifier.as_str()) {
            return Err(ConfigError::DuplicateNode(node.identifier.clone()));
        }
    }
    Ok(nodes)
}
