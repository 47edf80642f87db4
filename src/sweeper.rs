use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serenity::all::GuildId;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;
use crate::metrics::METRICS;

/// Removes persisted session snapshots and queue state for guilds of this
/// cluster that have no active session in this process. Snapshots written by
/// other clusters are left alone; queue state is already partitioned by
/// cluster in the store.
#[derive(Clone)]
pub struct LifecycleSweeper {
    manager: Arc<SessionManager>,
}

impl LifecycleSweeper {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// One pass. Returns how many guilds were cleaned up.
    pub async fn sweep(&self) -> usize {
        let cluster = self.manager.cluster_id();
        let owned: BTreeSet<GuildId> = match self.manager.store().load_all().await {
            Ok(snapshots) => snapshots
                .into_iter()
                .filter(|s| s.cluster_id == cluster)
                .map(|s| s.guild_id)
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not list persisted sessions");
                BTreeSet::new()
            }
        };
        let mut guilds: BTreeSet<GuildId> = self.manager.queue().guilds().await.into_iter().collect();
        guilds.extend(owned.iter().copied());

        let mut swept = 0;
        for guild in guilds {
            // Sessions can be created while the pass is running.
            if self.manager.is_active(guild) {
                continue;
            }
            if owned.contains(&guild)
                && let Err(e) = self.manager.store().delete(guild).await
            {
                warn!(%guild, error = %e, "failed to delete orphaned snapshot");
            }
            if self.manager.is_active(guild) {
                continue;
            }
            self.manager.queue().destroy(guild).await;
            debug!(%guild, cluster, "swept");
            swept += 1;
        }
        if swept > 0 {
            info!(swept, cluster, "lifecycle sweep removed orphaned state");
        }
        METRICS.swept(swept);
        swept
    }

    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
