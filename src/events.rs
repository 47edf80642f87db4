use serde::Serialize;
use serenity::all::GuildId;
use tokio::sync::broadcast;

use crate::model::Track;
use crate::recovery::RecoveryReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueAction {
    Add,
    Remove,
    Clear,
    Dequeue,
    EnqueueFront,
    Modify,
    SetCurrent,
    AddHistory,
    SetHistory,
    ClearHistory,
    Shuffle,
    RoundRobinShuffle,
    UserBlockShuffle,
    Destroy,
}

/// Emitted after every mutating queue operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueChange {
    pub guild_id: GuildId,
    pub action: QueueAction,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ManagerEvent {
    QueueChanged(QueueChange),
    SessionCreated {
        guild_id: GuildId,
        node_id: String,
    },
    SessionDestroyed {
        guild_id: GuildId,
    },
    SessionRestored {
        guild_id: GuildId,
    },
    TrackEnd {
        guild_id: GuildId,
        track: Track,
    },
    TrackStart {
        guild_id: GuildId,
        track: Track,
    },
    QueueEnd {
        guild_id: GuildId,
        track: Track,
        autoplay: bool,
    },
    RecoveryComplete {
        node_id: String,
        report: RecoveryReport,
    },
}

pub type EventReceiver = broadcast::Receiver<ManagerEvent>;

/// Fan-out of manager and queue notifications. Emitting with no
/// subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ManagerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn queue_changed(&self, guild_id: GuildId, action: QueueAction, tracks: Vec<Track>) {
        self.emit(ManagerEvent::QueueChanged(QueueChange {
            guild_id,
            action,
            tracks,
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
