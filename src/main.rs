use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use lyre_session::metrics::METRICS;
use lyre_session::node::{ComputeNode, NodeRegistry, RestNode};
use lyre_session::{
    Config, EventBus, LifecycleSweeper, ReconnectTracker, RecoveryCoordinator, SessionManager,
    StorageHandle, web,
};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        cluster = config.cluster_id,
        nodes = config.nodes.len(),
        "starting session layer"
    );

    let storage = StorageHandle::open(&config.storage)
        .await
        .context("opening storage")?;
    let events = EventBus::default();
    let queue = storage.queue_store(config.cluster_id, events.clone(), config.max_history);
    let store = storage.session_store();

    let resume_ids = store.load_node_sessions().await.unwrap_or_else(|e| {
        warn!(error = %e, "could not load node resume ids");
        Default::default()
    });

    let registry = Arc::new(NodeRegistry::new());
    let mut rest_nodes = Vec::with_capacity(config.nodes.len());
    for options in &config.nodes {
        let node = Arc::new(RestNode::new(
            options,
            resume_ids.get(&options.identifier).cloned(),
        )?);
        registry.register(node.clone());
        rest_nodes.push(node);
    }

    let manager = SessionManager::new(
        &config,
        registry.clone(),
        queue,
        store.clone(),
        events.clone(),
    );

    let server = web::serve(&config.http_bind)?;
    let server_handle = server.handle();
    tokio::spawn(server);
    info!(bind = %config.http_bind, "probe server listening");

    let coordinator = RecoveryCoordinator::new(manager.clone(), config.recovery_delay);
    let mut tracker = ReconnectTracker::default();
    for node in &rest_nodes {
        let connected = match node.refresh_stats().await {
            Ok(_) => true,
            Err(e) => {
                warn!(node = node.identifier(), error = %e, "node unreachable at startup");
                false
            }
        };
        if connected && node.session_id().is_none() {
            info!(node = node.identifier(), "no resume session id yet, recovery deferred");
        }
        let session = node.session_id();
        coordinator
            .observe(&mut tracker, node.identifier(), connected, session.as_deref())
            .await;
    }
    METRICS.set_ready(true);

    // Nodes that come back, or receive a new session, are recovered on the
    // poll that first sees them.
    let poller = {
        let nodes = rest_nodes.clone();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + STATS_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, STATS_INTERVAL);
            loop {
                ticker.tick().await;
                for node in &nodes {
                    let connected = match node.refresh_stats().await {
                        Ok(_) => true,
                        Err(e) => {
                            warn!(node = node.identifier(), error = %e, "stats refresh failed");
                            false
                        }
                    };
                    let session = node.session_id();
                    coordinator
                        .observe(&mut tracker, node.identifier(), connected, session.as_deref())
                        .await;
                }
            }
        })
    };
    let sweeper = config
        .sweep_interval
        .map(|every| LifecycleSweeper::new(manager.clone()).spawn(every));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    poller.abort();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    let report = manager.shutdown().await;
    if !report.save.failed.is_empty() {
        error!(failed = report.save.failed.len(), "some sessions were not saved");
    }
    info!(swept = report.swept, "sessions persisted");

    for node in &rest_nodes {
        if let Some(sid) = node.session_id()
            && let Err(e) = store.save_node_session(node.identifier(), &sid).await
        {
            warn!(node = node.identifier(), error = %e, "failed to save node resume id");
        }
    }

    server_handle.stop(true).await;
    storage.close().await;
    Ok(())
}
