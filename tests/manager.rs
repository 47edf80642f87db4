mod common;

use std::time::Duration;

use common::*;
use lyre_session::model::{ConnectionOptions, Filter, FilterKind, VoiceState};
use lyre_session::{ManagerEvent, SessionError};
use serde_json::json;

#[tokio::test]
async fn create_picks_a_node_and_is_idempotent() {
    let h = harness();
    let g = guild(1);
    let mut rx = h.events.subscribe();

    let session = h.manager.create(g, in_voice()).unwrap();
    assert_eq!(session.node_id, NODE);
    assert_eq!(session.cluster_id, CLUSTER);
    let again = h.manager.create(g, ConnectionOptions::default()).unwrap();
    assert_eq!(again, session);

    let created = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ManagerEvent::SessionCreated { .. }))
        .count();
    assert_eq!(created, 1);
    assert_eq!(h.manager.active_guilds(), vec![g]);
}

#[tokio::test]
async fn create_without_connected_nodes_fails() {
    let h = harness();
    h.node.set_connected(false);
    assert!(matches!(
        h.manager.create(guild(2), in_voice()),
        Err(SessionError::NoNodeAvailable)
    ));
    assert!(!h.manager.is_active(guild(2)));
}

#[tokio::test]
async fn track_end_advances_and_records_history() {
    let h = harness();
    let g = guild(3);
    h.manager.create(g, in_voice()).unwrap();
    h.queue
        .add(g, vec![track("a", None), track("b", None)], None)
        .await
        .unwrap();

    let next = h.manager.handle_track_end(g, track("a", None)).await.unwrap();
    assert_eq!(next.unwrap().identifier, "b");
    assert_eq!(h.queue.current(g).await.unwrap().identifier, "b");
    assert_eq!(ids(&h.queue.history(g).await), vec!["a"]);
    assert_eq!(h.node.played(g), vec!["enc-b"]);

    let mut rx = h.events.subscribe();
    let next = h.manager.handle_track_end(g, track("b", None)).await.unwrap();
    assert!(next.is_none());
    assert!(h.queue.current(g).await.is_none());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        ManagerEvent::QueueEnd { track, autoplay: false, .. } if track.identifier == "b"
    )));
}

#[tokio::test]
async fn repeat_modes_shape_the_advance() {
    let h = harness();
    let g = guild(4);
    h.manager.create(g, in_voice()).unwrap();
    h.queue
        .add(g, vec![track("a", None), track("b", None)], None)
        .await
        .unwrap();

    h.manager.set_repeat_track(g, true).await.unwrap();
    let next = h.manager.handle_track_end(g, track("a", None)).await.unwrap();
    assert_eq!(next.unwrap().identifier, "a");
    assert_eq!(ids(&h.queue.tracks(g).await), vec!["b"]);
    assert!(h.queue.history(g).await.is_empty());

    h.manager.set_repeat_track(g, false).await.unwrap();
    h.manager.set_repeat_queue(g, true).await.unwrap();
    h.manager.handle_track_end(g, track("a", None)).await.unwrap();
    assert_eq!(h.queue.current(g).await.unwrap().identifier, "b");
    assert_eq!(ids(&h.queue.tracks(g).await), vec!["a"]);
    assert_eq!(h.node.played(g), vec!["enc-a", "enc-b"]);
}

#[tokio::test]
async fn mutations_are_saved_and_forwarded() {
    let h = harness();
    let g = guild(5);
    h.manager.create(g, in_voice()).unwrap();

    h.manager.set_paused(g, true).await.unwrap();
    h.manager.set_filter(g, Filter::vaporwave()).await.unwrap();
    h.manager.set_data(g, "dj", json!(42)).await.unwrap();
    h.manager
        .set_voice(
            g,
            VoiceState {
                session_id: Some("s".into()),
                token: Some("t".into()),
                endpoint: Some("e".into()),
            },
        )
        .await
        .unwrap();

    let saved = h.store.load(g).await.unwrap().unwrap();
    assert!(saved.paused);
    assert!(saved.filters.is_enabled(FilterKind::Vaporwave));
    assert_eq!(saved.data.get("dj"), Some(&json!(42)));
    assert_eq!(saved.voice.token.as_deref(), Some("t"));

    let updates = h.node.updates(g);
    assert_eq!(updates[0].paused, Some(true));
    assert!(updates[1].filters.as_ref().unwrap().timescale.is_some());
    assert!(updates[2].voice.is_some());

    h.manager.clear_filters(g).await.unwrap();
    let cleared = h.node.updates(g).pop().unwrap();
    assert_eq!(cleared.filters, Some(Default::default()));
}

#[tokio::test]
async fn save_skips_sessions_with_nothing_to_resume() {
    let h = harness();
    let g = guild(6);
    h.manager.create(g, ConnectionOptions::default()).unwrap();

    assert!(!h.manager.save(g).await.unwrap());
    assert!(h.store.load(g).await.unwrap().is_none());

    h.queue.add(g, vec![track("a", None)], None).await.unwrap();
    assert!(h.manager.save(g).await.unwrap());
    let saved = h.store.load(g).await.unwrap().unwrap();
    assert_eq!(saved.queue.current.unwrap().identifier, "a");
    assert_eq!(saved.node_id, NODE);
}

#[tokio::test]
async fn destroy_removes_every_trace() {
    let h = harness();
    let g = guild(7);
    h.manager.create(g, in_voice()).unwrap();
    h.queue.add(g, vec![track("a", None)], None).await.unwrap();
    h.manager.save(g).await.unwrap();

    h.manager.destroy(g).await.unwrap();

    assert!(!h.manager.is_active(g));
    assert!(h.store.load(g).await.unwrap().is_none());
    assert_eq!(h.queue.total_size(g).await, 0);
    assert!(matches!(
        h.manager.destroy(g).await,
        Err(SessionError::NotFound(_))
    ));
}

#[tokio::test]
async fn dynamic_repeat_task_follows_the_flag() {
    let h = harness();
    let g = guild(8);
    h.manager.create(g, in_voice()).unwrap();

    h.manager
        .set_dynamic_repeat(g, Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(h.manager.has_dynamic_repeat(g));
    assert_eq!(
        h.manager.get(g).unwrap().repeat.dynamic_interval_ms,
        Some(30_000)
    );

    h.manager.set_dynamic_repeat(g, None).await.unwrap();
    assert!(!h.manager.has_dynamic_repeat(g));
    assert!(!h.manager.get(g).unwrap().repeat.dynamic);
}

#[tokio::test]
async fn oversized_repeat_interval_saturates() {
    let h = harness();
    let g = guild(9);
    h.manager.create(g, in_voice()).unwrap();

    h.manager
        .set_dynamic_repeat(g, Some(Duration::MAX))
        .await
        .unwrap();

    assert_eq!(
        h.manager.get(g).unwrap().repeat.dynamic_interval_ms,
        Some(u64::MAX)
    );
    assert!(h.manager.has_dynamic_repeat(g));
}
