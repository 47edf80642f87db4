mod common;

use std::time::Duration;

use common::*;
use lyre_session::model::{Filter, FilterKind, QueueSnapshot, VoiceState};
use lyre_session::{ManagerEvent, ReconnectTracker, RecoveryCoordinator};
use serde_json::json;

fn coordinator(h: &Harness) -> RecoveryCoordinator {
    RecoveryCoordinator::new(h.manager.clone(), Duration::ZERO)
}

fn track_ends(events: &[ManagerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ManagerEvent::TrackEnd { track, .. } => Some(track.identifier.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn no_live_player_discards_local_state() {
    let h = harness();
    let g = guild(10);
    h.manager.create(g, in_voice()).unwrap();
    h.queue.add(g, vec![track("a", None), track("b", None)], None).await.unwrap();
    h.store
        .save(&snapshot(g, NODE, CLUSTER, QueueSnapshot::default()))
        .await
        .unwrap();

    let report = coordinator(&h).recover(NODE).await;

    assert_eq!(report.discarded, vec![g]);
    assert!(report.restored.is_empty());
    assert!(!h.manager.is_active(g));
    assert_eq!(h.queue.total_size(g).await, 0);
    assert!(h.store.load(g).await.unwrap().is_none());
}

#[tokio::test]
async fn playing_player_keeps_current_with_fresh_metadata() {
    let h = harness();
    let g = guild(11);
    let a = track("a", Some(7));
    let mut fresh = track("a", None);
    fresh.title = "A (remastered)".into();
    fresh.encoded = "live-a".into();
    h.node.playing(g, "live-a", a.uri.as_deref().unwrap());
    h.node.decodes("live-a", fresh);
    h.store
        .save(&snapshot(
            g,
            NODE,
            CLUSTER,
            QueueSnapshot {
                current: Some(a),
                tracks: vec![track("b", Some(8)), track("c", Some(7))],
                history: vec![],
            },
        ))
        .await
        .unwrap();

    let report = coordinator(&h).recover(NODE).await;

    assert_eq!(report.restored, vec![g]);
    let current = h.queue.current(g).await.unwrap();
    assert_eq!(current.title, "A (remastered)");
    assert_eq!(current.encoded, "live-a");
    assert_eq!(current.requester_id().map(|u| u.get()), Some(7));
    assert_eq!(ids(&h.queue.tracks(g).await), vec!["b", "c"]);
    assert!(h.node.played(g).is_empty());
}

#[tokio::test]
async fn playing_a_different_uri_keeps_persisted_current() {
    let h = harness();
    let g = guild(12);
    let a = track("a", Some(7));
    h.node.playing(g, "other", "https://example.test/other");
    h.store
        .save(&snapshot(
            g,
            NODE,
            CLUSTER,
            QueueSnapshot {
                current: Some(a.clone()),
                tracks: vec![track("b", None)],
                history: vec![],
            },
        ))
        .await
        .unwrap();

    coordinator(&h).recover(NODE).await;

    assert_eq!(h.queue.current(g).await, Some(a));
    assert_eq!(ids(&h.queue.tracks(g).await), vec!["b"]);
}

#[tokio::test]
async fn idle_player_with_current_advances_exactly_once() {
    let h = harness();
    let g = guild(13);
    h.node.idle_player(g);
    h.store
        .save(&snapshot(
            g,
            NODE,
            CLUSTER,
            QueueSnapshot {
                current: Some(track("a", None)),
                tracks: vec![track("b", None), track("c", None)],
                history: vec![track("z", None)],
            },
        ))
        .await
        .unwrap();
    let mut rx = h.events.subscribe();

    let report = coordinator(&h).recover(NODE).await;
    let events = drain(&mut rx);

    assert_eq!(report.restored, vec![g]);
    assert_eq!(track_ends(&events), vec!["a"]);
    assert_eq!(h.queue.current(g).await.unwrap().identifier, "b");
    assert_eq!(ids(&h.queue.tracks(g).await), vec!["c"]);
    assert_eq!(h.node.played(g), vec!["enc-b"]);
    assert_eq!(ids(&h.queue.history(g).await), vec!["z", "a"]);
}

#[tokio::test]
async fn idle_player_with_only_history_advances_from_last_entry() {
    let h = harness();
    let g = guild(14);
    h.node.idle_player(g);
    h.store
        .save(&snapshot(
            g,
            NODE,
            CLUSTER,
            QueueSnapshot {
                current: None,
                tracks: vec![],
                history: vec![track("x", None), track("y", None)],
            },
        ))
        .await
        .unwrap();
    let mut rx = h.events.subscribe();

    coordinator(&h).recover(NODE).await;
    let events = drain(&mut rx);

    assert_eq!(track_ends(&events), vec!["y"]);
    assert!(events.iter().any(|e| matches!(
        e,
        ManagerEvent::QueueEnd { track, .. } if track.identifier == "y"
    )));
    assert!(h.queue.current(g).await.is_none());
    assert_eq!(ids(&h.queue.history(g).await), vec!["x", "y"]);
    assert!(h.node.played(g).is_empty());
}

#[tokio::test]
async fn idle_player_with_history_and_pending_only_requeues() {
    let h = harness();
    let g = guild(15);
    h.node.idle_player(g);
    h.store
        .save(&snapshot(
            g,
            NODE,
            CLUSTER,
            QueueSnapshot {
                current: None,
                tracks: vec![track("b", None), track("c", None)],
                history: vec![track("x", None)],
            },
        ))
        .await
        .unwrap();
    let mut rx = h.events.subscribe();

    let report = coordinator(&h).recover(NODE).await;
    let events = drain(&mut rx);

    assert_eq!(report.restored, vec![g]);
    assert!(track_ends(&events).is_empty());
    assert!(h.node.played(g).is_empty());
    assert_eq!(h.queue.total_size(g).await, 2);
    assert_eq!(ids(&h.queue.history(g).await), vec!["x"]);
}

#[tokio::test]
async fn session_state_is_restored_and_pushed_to_the_node() {
    let h = harness();
    let g = guild(16);
    h.node.playing(g, "enc-a", "https://example.test/a");
    let mut snap = snapshot(
        g,
        NODE,
        CLUSTER,
        QueueSnapshot {
            current: Some(track("a", None)),
            tracks: vec![],
            history: vec![],
        },
    );
    snap.paused = true;
    snap.repeat.queue = true;
    snap.repeat.dynamic = true;
    snap.repeat.dynamic_interval_ms = Some(60_000);
    snap.autoplay.enabled = true;
    snap.autoplay.tries = 2;
    snap.data.insert("locale".into(), json!("de"));
    snap.filters.apply(Filter::nightcore());
    snap.filters.apply(Filter::eight_d());
    snap.filters.disable(FilterKind::EightD);
    snap.voice = VoiceState {
        session_id: Some("voice-session".into()),
        token: Some("token".into()),
        endpoint: Some("endpoint".into()),
    };
    h.store.save(&snap).await.unwrap();

    coordinator(&h).recover(NODE).await;

    let session = h.manager.get(g).unwrap();
    assert!(session.paused);
    assert!(session.repeat.queue);
    assert!(session.autoplay.enabled);
    assert_eq!(session.autoplay.tries, 2);
    assert_eq!(session.data.get("locale"), Some(&json!("de")));
    assert!(session.filters.is_enabled(FilterKind::Nightcore));
    assert!(!session.filters.is_enabled(FilterKind::EightD));
    assert_eq!(session.filters.states().len(), 2);
    assert!(h.manager.has_dynamic_repeat(g));

    let updates = h.node.updates(g);
    assert!(updates.iter().any(|u| u.voice.is_some()));
    let state = updates.iter().find(|u| u.filters.is_some()).unwrap();
    assert_eq!(state.paused, Some(true));
    assert!(state.filters.as_ref().unwrap().timescale.is_some());
    assert!(state.filters.as_ref().unwrap().rotation.is_none());
}

#[tokio::test]
async fn only_snapshots_for_this_node_and_cluster_are_touched() {
    let h = harness();
    let mine = guild(20);
    let other_node = guild(21);
    let other_cluster = guild(22);
    h.node.idle_player(mine);
    h.node.idle_player(other_node);
    h.node.idle_player(other_cluster);
    let queue = QueueSnapshot {
        current: None,
        tracks: vec![track("b", None)],
        history: vec![],
    };
    h.store.save(&snapshot(mine, NODE, CLUSTER, queue.clone())).await.unwrap();
    h.store
        .save(&snapshot(other_node, "backup", CLUSTER, queue.clone()))
        .await
        .unwrap();
    h.store
        .save(&snapshot(other_cluster, NODE, CLUSTER + 1, queue))
        .await
        .unwrap();

    let report = coordinator(&h).recover(NODE).await;

    assert_eq!(report.restored, vec![mine]);
    assert!(h.store.load(mine).await.unwrap().is_none());
    assert!(h.store.load(other_node).await.unwrap().is_some());
    assert!(h.store.load(other_cluster).await.unwrap().is_some());
    assert!(!h.manager.is_active(other_node));
    assert!(!h.manager.is_active(other_cluster));
}

#[tokio::test]
async fn one_failing_guild_does_not_stop_the_rest() {
    let h = harness();
    let bad = guild(30);
    let good = guild(31);
    h.node.idle_player(bad);
    h.node.idle_player(good);
    h.node.reject(bad);
    let queue = QueueSnapshot {
        current: Some(track("a", None)),
        tracks: vec![track("b", None)],
        history: vec![],
    };
    h.store.save(&snapshot(bad, NODE, CLUSTER, queue.clone())).await.unwrap();
    h.store.save(&snapshot(good, NODE, CLUSTER, queue)).await.unwrap();
    let mut rx = h.events.subscribe();

    let report = coordinator(&h).recover(NODE).await;

    assert_eq!(report.failed, vec![bad]);
    assert_eq!(report.restored, vec![good]);
    assert!(h.store.load(bad).await.unwrap().is_none());
    assert!(h.store.load(good).await.unwrap().is_none());
    assert_eq!(h.node.played(good), vec!["enc-b"]);

    let complete = drain(&mut rx).into_iter().find_map(|e| match e {
        ManagerEvent::RecoveryComplete { node_id, report } => Some((node_id, report)),
        _ => None,
    });
    let (node_id, emitted) = complete.unwrap();
    assert_eq!(node_id, NODE);
    assert_eq!(emitted, report);
}

#[tokio::test]
async fn unreachable_player_list_fails_every_candidate() {
    let h = harness();
    let g = guild(40);
    h.node.fail_live_sessions();
    h.store
        .save(&snapshot(g, NODE, CLUSTER, QueueSnapshot::default()))
        .await
        .unwrap();

    let report = coordinator(&h).recover(NODE).await;

    assert_eq!(report.failed, vec![g]);
    assert!(h.store.load(g).await.unwrap().is_none());
}

#[tokio::test]
async fn nothing_to_recover_still_signals_completion() {
    let h = harness();
    let mut rx = h.events.subscribe();

    let report = coordinator(&h).recover(NODE).await;

    assert_eq!(report, Default::default());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, ManagerEvent::RecoveryComplete { .. })));
}

#[tokio::test]
async fn node_that_comes_back_later_is_recovered_once() {
    let h = harness();
    let g = guild(50);
    h.node.idle_player(g);
    h.store
        .save(&snapshot(
            g,
            NODE,
            CLUSTER,
            QueueSnapshot {
                current: None,
                tracks: vec![track("b", None)],
                history: vec![],
            },
        ))
        .await
        .unwrap();
    let coordinator = coordinator(&h);
    let mut tracker = ReconnectTracker::default();

    assert!(coordinator
        .observe(&mut tracker, NODE, false, Some("resume-1"))
        .await
        .is_none());
    assert!(h.store.load(g).await.unwrap().is_some());
    assert!(!h.manager.is_active(g));

    let report = coordinator
        .observe(&mut tracker, NODE, true, Some("resume-1"))
        .await
        .unwrap();
    assert_eq!(report.restored, vec![g]);
    assert_eq!(h.queue.current(g).await.unwrap().identifier, "b");

    assert!(coordinator
        .observe(&mut tracker, NODE, true, Some("resume-1"))
        .await
        .is_none());
}
