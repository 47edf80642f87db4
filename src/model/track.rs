use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serenity::all::UserId;
use thiserror::Error;
use tracing::warn;

/// A playable track as handed out by a compute node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Opaque node-encoded identifier; this is what gets sent back to play it.
    pub encoded: String,
    /// Source-side identifier (video id, track id). History dedup keys on it.
    pub identifier: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    /// An unreadable requester reads as `None` so the track itself survives.
    #[serde(default, deserialize_with = "lenient_requester")]
    pub requester: Option<Requester>,
}

fn lenient_requester<'de, D>(de: D) -> Result<Option<Requester>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<Value>::deserialize(de)? else {
        return Ok(None);
    };
    match serde_json::from_value::<Requester>(raw) {
        Ok(requester) => Ok(Some(requester)),
        Err(e) => {
            warn!(error = %e, "dropping unreadable requester");
            Ok(None)
        }
    }
}

impl Track {
    pub fn requester_id(&self) -> Option<UserId> {
        self.requester.as_ref().map(|r| r.id)
    }

    /// Takes display metadata from `fresh` and keeps this track's requester.
    pub fn refreshed_from(&self, fresh: Track) -> Track {
        Track {
            requester: self.requester.clone(),
            ..fresh
        }
    }
}

/// Who queued a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequester", into = "RawRequester")]
pub struct Requester {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

impl Requester {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar: None,
        }
    }
}

/// The loosely typed shape a requester takes on disk or in Redis. Older
/// snapshots carry numeric ids, newer ones strings; some only a `tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequester {
    pub id: Value,
    #[serde(default, alias = "tag", alias = "globalName")]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequesterError {
    #[error("requester id {0} is not a discord snowflake")]
    InvalidId(String),
}

impl TryFrom<RawRequester> for Requester {
    type Error = RequesterError;

    fn try_from(raw: RawRequester) -> Result<Self, Self::Error> {
        let id = match &raw.id {
            Value::String(s) => s.trim().parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
        .filter(|id| *id != 0)
        .ok_or_else(|| RequesterError::InvalidId(raw.id.to_string()))?;

        Ok(Requester {
            id: UserId::new(id),
            username: raw.username.unwrap_or_default(),
            avatar: raw.avatar,
        })
    }
}

impl From<Requester> for RawRequester {
    fn from(r: Requester) -> Self {
        RawRequester {
            id: Value::String(r.id.get().to_string()),
            username: Some(r.username),
            avatar: r.avatar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requester_restores_from_numeric_or_string_ids() {
        let a: Requester = serde_json::from_value(json!({"id": 42, "username": "ana"})).unwrap();
        let b: Requester = serde_json::from_value(json!({"id": "42", "tag": "ana"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, UserId::new(42));
    }

    #[test]
    fn requester_rejects_garbage_ids() {
        let res: Result<Requester, _> = serde_json::from_value(json!({"id": "nope"}));
        assert!(res.is_err());
        let res: Result<Requester, _> = serde_json::from_value(json!({"id": 0}));
        assert!(res.is_err());
    }

    #[test]
    fn bad_requester_does_not_sink_the_track() {
        let track: Track = serde_json::from_value(json!({
            "encoded": "e",
            "identifier": "a",
            "requester": {"id": "not-a-snowflake"}
        }))
        .unwrap();
        assert_eq!(track.identifier, "a");
        assert!(track.requester.is_none());

        let track: Track = serde_json::from_value(json!({
            "encoded": "e",
            "identifier": "b",
            "requester": "someone"
        }))
        .unwrap();
        assert!(track.requester.is_none());

        let track: Track = serde_json::from_value(json!({
            "encoded": "e",
            "identifier": "c",
            "requester": {"id": "12", "username": "cy"}
        }))
        .unwrap();
        assert_eq!(track.requester_id(), Some(UserId::new(12)));
    }

    #[test]
    fn refresh_keeps_requester() {
        let old = Track {
            encoded: "old".into(),
            identifier: "a".into(),
            uri: Some("A".into()),
            title: "stale".into(),
            author: String::new(),
            duration_ms: 1,
            is_stream: false,
            artwork_url: None,
            source_name: None,
            requester: Some(Requester::new(UserId::new(7), "bo")),
        };
        let fresh = Track {
            encoded: "new".into(),
            title: "fresh".into(),
            requester: None,
            ..old.clone()
        };
        let merged = old.refreshed_from(fresh);
        assert_eq!(merged.title, "fresh");
        assert_eq!(merged.encoded, "new");
        assert_eq!(merged.requester_id(), Some(UserId::new(7)));
    }
}
