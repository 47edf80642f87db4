//! Rebuilds sessions after a compute node (re)connects.
//!
//! Each persisted snapshot owned by the node and this cluster is compared
//! against what the node reports as live:
//!
//! | live player | playing | persisted current | history | pending | action |
//! |---|---|---|---|---|---|
//! | no  |     |      |       |       | discard local state |
//! | yes | yes |      |       |       | restore current (refresh metadata on URI match), re-queue pending |
//! | yes | no  | some |       |       | restore current and pending, then advance past current |
//! | yes | no  | none | some  | empty | advance using the last history entry |
//! | yes | no  | none | some  | some  | re-queue pending, no advance |
//!
//! Session state (history, pause, repeat, autoplay, data, filters) is then
//! restored on top. Sessions are handled one at a time with a pacing delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serenity::all::GuildId;
use tracing::{debug, error, info, warn};

use crate::error::{RecoveryError, SessionError};
use crate::events::ManagerEvent;
use crate::manager::SessionManager;
use crate::metrics::METRICS;
use crate::model::{SessionSnapshot, Track};
use crate::node::{ComputeNode, LiveTrack};
use crate::queue::ops;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub restored: Vec<GuildId>,
    pub discarded: Vec<GuildId>,
    pub failed: Vec<GuildId>,
}

/// How one snapshot was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The node had no player for the guild.
    Discarded,
    /// Still streaming; queue restored around the live track.
    Resumed,
    /// Idle with a persisted current; advanced past it.
    Advanced,
    /// Idle with only history; advanced from the last history entry.
    AdvancedFromHistory,
    /// Idle with history and pending; pending restored, nothing started.
    Requeued,
}

#[derive(Clone)]
pub struct RecoveryCoordinator {
    manager: Arc<SessionManager>,
    delay: Duration,
}

impl RecoveryCoordinator {
    pub fn new(manager: Arc<SessionManager>, delay: Duration) -> Self {
        Self { manager, delay }
    }

    /// Feeds one connectivity observation through `tracker` and runs
    /// [`recover`](Self::recover) when it marks a (re)connection.
    pub async fn observe(
        &self,
        tracker: &mut ReconnectTracker,
        node_id: &str,
        connected: bool,
        session_id: Option<&str>,
    ) -> Option<RecoveryReport> {
        if !tracker.observe(node_id, connected, session_id) {
            return None;
        }
        info!(node = node_id, "node connected, recovering sessions");
        Some(self.recover(node_id).await)
    }

    /// Reconciles every snapshot claimed by `node_id`, purges them, and emits
    /// [`ManagerEvent::RecoveryComplete`]. Never fails as a whole.
    pub async fn recover(&self, node_id: &str) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let candidates = self.candidates(node_id).await;
        let node = self.manager.nodes().get(node_id);

        match node {
            None if !candidates.is_empty() => {
                error!(node = node_id, "recovery requested for unregistered node");
                report.failed = candidates.iter().map(|s| s.guild_id).collect();
            }
            None => {}
            Some(node) => {
                info!(node = node_id, sessions = candidates.len(), "recovering sessions");
                for (i, snapshot) in candidates.iter().enumerate() {
                    if i > 0 && !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    let guild = snapshot.guild_id;
                    match self.reconcile_isolated(Arc::clone(&node), snapshot.clone()).await {
                        Ok(Reconciled::Discarded) => report.discarded.push(guild),
                        Ok(outcome) => {
                            debug!(%guild, ?outcome, "session recovered");
                            METRICS.recovered();
                            report.restored.push(guild);
                        }
                        Err(e) => {
                            error!(%guild, node = node_id, error = %e, "session recovery failed");
                            METRICS.recovery_failed();
                            report.failed.push(guild);
                        }
                    }
                }
            }
        }

        for snapshot in &candidates {
            if let Err(e) = self.manager.store().delete(snapshot.guild_id).await {
                warn!(guild = %snapshot.guild_id, error = %e, "failed to purge recovered snapshot");
            }
        }

        info!(
            node = node_id,
            restored = report.restored.len(),
            discarded = report.discarded.len(),
            failed = report.failed.len(),
            "recovery complete"
        );
        self.manager.events().emit(ManagerEvent::RecoveryComplete {
            node_id: node_id.to_string(),
            report: report.clone(),
        });
        report
    }

    async fn candidates(&self, node_id: &str) -> Vec<SessionSnapshot> {
        let cluster = self.manager.cluster_id();
        match self.manager.store().load_all().await {
            Ok(all) => all
                .into_iter()
                .filter(|s| s.node_id == node_id && s.cluster_id == cluster)
                .collect(),
            Err(e) => {
                error!(node = node_id, error = %e, "could not load persisted sessions");
                Vec::new()
            }
        }
    }

    /// Runs one reconciliation in its own task so a panic is contained.
    async fn reconcile_isolated(
        &self,
        node: Arc<dyn ComputeNode>,
        snapshot: SessionSnapshot,
    ) -> Result<Reconciled, RecoveryError> {
        let guild = snapshot.guild_id;
        let this = self.clone();
        tokio::spawn(async move { this.reconcile(node.as_ref(), &snapshot).await })
            .await
            .map_err(|e| RecoveryError::Aborted {
                guild,
                message: e.to_string(),
            })?
    }

    pub async fn reconcile(
        &self,
        node: &dyn ComputeNode,
        snapshot: &SessionSnapshot,
    ) -> Result<Reconciled, RecoveryError> {
        let guild = snapshot.guild_id;
        let live = node
            .live_sessions()
            .await
            .map_err(|source| RecoveryError::LiveSessions { guild, source })?;
        let Some(view) = live.into_iter().find(|v| v.guild_id == guild) else {
            self.manager.discard(guild).await;
            return Ok(Reconciled::Discarded);
        };

        let wrap = |source: SessionError| RecoveryError::Session { guild, source };
        let queue = self.manager.queue();
        let persisted = &snapshot.queue;

        queue.destroy(guild).await;
        self.manager
            .restore_session(snapshot.to_session())
            .await
            .map_err(wrap)?;

        let outcome = match (view.track, persisted.current.clone()) {
            (Some(live_track), current) => {
                if let Some(current) = current {
                    let current = self.refresh(node, guild, current, &live_track).await;
                    queue.set_current(guild, Some(current)).await;
                }
                self.requeue(guild, persisted.tracks.clone()).await.map_err(wrap)?;
                Reconciled::Resumed
            }
            (None, Some(current)) => {
                queue.set_current(guild, Some(current.clone())).await;
                self.requeue(guild, persisted.tracks.clone()).await.map_err(wrap)?;
                self.manager
                    .handle_track_end(guild, current)
                    .await
                    .map_err(wrap)?;
                Reconciled::Advanced
            }
            (None, None) => match persisted.history.last() {
                Some(last) if persisted.tracks.is_empty() => {
                    self.manager
                        .handle_track_end(guild, last.clone())
                        .await
                        .map_err(wrap)?;
                    Reconciled::AdvancedFromHistory
                }
                _ => {
                    self.requeue(guild, persisted.tracks.clone()).await.map_err(wrap)?;
                    Reconciled::Requeued
                }
            },
        };

        let recent = queue.history(guild).await;
        let history = ops::merge_history(persisted.history.clone(), recent, queue.max_history());
        queue.set_history(guild, history).await;

        self.manager.restore_state(snapshot).await.map_err(wrap)?;
        Ok(outcome)
    }

    async fn requeue(&self, guild: GuildId, tracks: Vec<Track>) -> Result<(), SessionError> {
        if tracks.is_empty() {
            return Ok(());
        }
        self.manager.queue().add(guild, tracks, None).await?;
        Ok(())
    }

    /// Takes fresh metadata for `current` from the node when it is the track
    /// the node is streaming. Decoding failures keep the persisted copy.
    async fn refresh(
        &self,
        node: &dyn ComputeNode,
        guild: GuildId,
        current: Track,
        live: &LiveTrack,
    ) -> Track {
        if current.uri.is_none() || current.uri != live.uri {
            return current;
        }
        match node.decode_track(&live.encoded).await {
            Ok(fresh) => current.refreshed_from(fresh),
            Err(e) => {
                warn!(%guild, error = %e, "could not decode live track, keeping persisted metadata");
                current
            }
        }
    }
}

/// Per-node connectivity as of the last observation, used to run recovery
/// once per (re)connection rather than once per process.
#[derive(Debug, Default)]
pub struct ReconnectTracker {
    nodes: HashMap<String, Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    connected: bool,
    recovered_session: Option<String>,
}

impl ReconnectTracker {
    /// True when recovery should run for `node_id`: it is connected with a
    /// resume session, and it was not connected at the previous observation
    /// or its session changed since the last recovery. A node never seen
    /// before counts as previously disconnected.
    pub fn observe(&mut self, node_id: &str, connected: bool, session_id: Option<&str>) -> bool {
        let seen = self.nodes.entry(node_id.to_string()).or_default();
        let was_connected = std::mem::replace(&mut seen.connected, connected);
        let Some(session) = session_id.filter(|_| connected) else {
            return false;
        };
        if was_connected && seen.recovered_session.as_deref() == Some(session) {
            return false;
        }
        seen.recovered_session = Some(session.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_on_each_reconnect_only() {
        let mut tracker = ReconnectTracker::default();
        assert!(!tracker.observe("a", false, Some("s1")));
        assert!(tracker.observe("a", true, Some("s1")));
        assert!(!tracker.observe("a", true, Some("s1")));
        assert!(!tracker.observe("a", false, Some("s1")));
        assert!(tracker.observe("a", true, Some("s1")));
    }

    #[test]
    fn a_new_session_triggers_recovery_while_connected() {
        let mut tracker = ReconnectTracker::default();
        assert!(!tracker.observe("a", true, None));
        assert!(tracker.observe("a", true, Some("s1")));
        assert!(tracker.observe("a", true, Some("s2")));
        assert!(!tracker.observe("a", true, Some("s2")));
    }

    #[test]
    fn nodes_are_tracked_independently() {
        let mut tracker = ReconnectTracker::default();
        assert!(tracker.observe("a", true, Some("s")));
        assert!(tracker.observe("b", true, Some("s")));
        assert!(!tracker.observe("a", true, Some("s")));
    }
}
