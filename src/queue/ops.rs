//! Backend-independent queue algorithms.
//!
//! Every backend loads the documents it needs, runs one of these functions,
//! and writes back what changed. Keeping the logic here is what makes the
//! three backends order things identically.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use serenity::all::UserId;

use crate::error::QueueError;
use crate::model::{QueueSnapshot, Track};

/// `start..end` must be a non-empty range starting inside the queue.
pub fn check_range(start: usize, end: usize, len: usize) -> Result<(), QueueError> {
    if start >= end || start >= len {
        return Err(QueueError::InvalidRange { start, end, len });
    }
    Ok(())
}

pub fn check_offset(offset: Option<usize>, len: usize) -> Result<(), QueueError> {
    match offset {
        Some(offset) if offset > len => Err(QueueError::InvalidOffset { offset, len }),
        _ => Ok(()),
    }
}

/// Adds tracks, promoting the first one to current when nothing is playing.
/// Returns whether `current` changed.
pub fn add(
    state: &mut QueueSnapshot,
    mut tracks: Vec<Track>,
    offset: Option<usize>,
) -> Result<bool, QueueError> {
    check_offset(offset, state.tracks.len())?;
    if tracks.is_empty() {
        return Ok(false);
    }

    let mut promoted = false;
    if state.current.is_none() {
        state.current = Some(tracks.remove(0));
        promoted = true;
    }

    match offset {
        Some(at) => {
            let tail = state.tracks.split_off(at);
            state.tracks.extend(tracks);
            state.tracks.extend(tail);
        }
        None => state.tracks.extend(tracks),
    }
    Ok(promoted)
}

/// Removes `start..end` (end clamped to the queue length).
pub fn remove_range(
    tracks: &mut Vec<Track>,
    start: usize,
    end: usize,
) -> Result<Vec<Track>, QueueError> {
    check_range(start, end, tracks.len())?;
    let end = end.min(tracks.len());
    Ok(tracks.drain(start..end).collect())
}

/// Array-splice: removes `delete_count` items at `start`, inserts `items`
/// there, returns the removed ones. `start` is clamped to the length.
pub fn splice(
    tracks: &mut Vec<Track>,
    start: usize,
    delete_count: usize,
    items: Vec<Track>,
) -> Vec<Track> {
    let start = start.min(tracks.len());
    let end = start.saturating_add(delete_count).min(tracks.len());
    tracks.splice(start..end, items).collect()
}

pub fn slice(tracks: &[Track], start: usize, end: usize) -> Vec<Track> {
    let end = end.min(tracks.len());
    if start >= end {
        return Vec::new();
    }
    tracks[start..end].to_vec()
}

/// Appends to history, skipping identifiers already present and trimming the
/// oldest entries past `max`. Returns the tracks that were actually added.
pub fn push_history(history: &mut Vec<Track>, incoming: Vec<Track>, max: usize) -> Vec<Track> {
    let mut seen: HashSet<String> = history.iter().map(|t| t.identifier.clone()).collect();
    let mut added = Vec::new();
    for track in incoming {
        if seen.insert(track.identifier.clone()) {
            history.push(track.clone());
            added.push(track);
        }
    }
    trim_history(history, max);
    added
}

/// Keeps the most recent `max` entries.
pub fn trim_history(history: &mut Vec<Track>, max: usize) {
    if history.len() > max {
        let excess = history.len() - max;
        history.drain(..excess);
    }
}

/// Older persisted history first, then whatever was pushed since, deduplicated.
pub fn merge_history(persisted: Vec<Track>, recent: Vec<Track>, max: usize) -> Vec<Track> {
    let mut merged = Vec::with_capacity(persisted.len() + recent.len());
    push_history(&mut merged, persisted, usize::MAX);
    push_history(&mut merged, recent, max);
    merged
}

pub fn duration(state: &QueueSnapshot) -> u64 {
    state
        .current
        .iter()
        .chain(state.tracks.iter())
        .map(|t| t.duration_ms)
        .sum()
}

pub fn shuffle<R: Rng + ?Sized>(tracks: &mut [Track], rng: &mut R) {
    tracks.shuffle(rng);
}

/// Shuffles each requester's tracks, then deals one per requester per round.
pub fn round_robin<R: Rng + ?Sized>(tracks: Vec<Track>, rng: &mut R) -> Vec<Track> {
    let mut groups = group_by_requester(tracks);
    for group in &mut groups {
        group.shuffle(rng);
    }
    interleave(groups)
}

/// Deals one track per requester per round, keeping each requester's order.
pub fn user_block(tracks: Vec<Track>) -> Vec<Track> {
    interleave(group_by_requester(tracks))
}

/// Groups in order of each requester's first appearance. Tracks without a
/// requester form one group of their own.
fn group_by_requester(tracks: Vec<Track>) -> Vec<Vec<Track>> {
    let mut keys: Vec<Option<UserId>> = Vec::new();
    let mut groups: Vec<Vec<Track>> = Vec::new();
    for track in tracks {
        let key = track.requester_id();
        match keys.iter().position(|k| *k == key) {
            Some(idx) => groups[idx].push(track),
            None => {
                keys.push(key);
                groups.push(vec![track]);
            }
        }
    }
    groups
}

fn interleave(groups: Vec<Vec<Track>>) -> Vec<Track> {
    let total = groups.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = groups.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        for it in &mut iters {
            if let Some(track) = it.next() {
                out.push(track);
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::Requester;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    pub(crate) fn track(id: &str, user: Option<u64>) -> Track {
        Track {
            encoded: format!("enc-{id}"),
            identifier: id.to_string(),
            uri: Some(id.to_string()),
            title: id.to_uppercase(),
            author: String::new(),
            duration_ms: 1_000,
            is_stream: false,
            artwork_url: None,
            source_name: None,
            requester: user.map(|u| Requester::new(UserId::new(u), format!("user{u}"))),
        }
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|t| t.identifier.as_str()).collect()
    }

    fn sorted_ids(tracks: &[Track]) -> Vec<String> {
        let mut v: Vec<String> = tracks.iter().map(|t| t.identifier.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn add_promotes_first_track_when_idle() {
        let mut state = QueueSnapshot::default();
        let promoted = add(&mut state, vec![track("a", None), track("b", None)], None).unwrap();
        assert!(promoted);
        assert_eq!(state.current.as_ref().unwrap().identifier, "a");
        assert_eq!(ids(&state.tracks), ["b"]);

        let promoted = add(&mut state, vec![track("c", None)], Some(0)).unwrap();
        assert!(!promoted);
        assert_eq!(ids(&state.tracks), ["c", "b"]);
    }

    #[test]
    fn add_rejects_offset_past_end() {
        let mut state = QueueSnapshot {
            current: Some(track("a", None)),
            ..Default::default()
        };
        let before = state.clone();
        let err = add(&mut state, vec![track("b", None)], Some(2)).unwrap_err();
        assert_eq!(err, QueueError::InvalidOffset { offset: 2, len: 0 });
        assert_eq!(state, before);
    }

    #[test]
    fn remove_range_validates_before_touching() {
        let mut tracks = vec![track("a", None), track("b", None), track("c", None)];
        assert!(remove_range(&mut tracks, 2, 2).is_err());
        assert!(remove_range(&mut tracks, 3, 5).is_err());
        assert_eq!(tracks.len(), 3);

        let removed = remove_range(&mut tracks, 1, 10).unwrap();
        assert_eq!(ids(&removed), ["b", "c"]);
        assert_eq!(ids(&tracks), ["a"]);
    }

    #[test]
    fn splice_behaves_like_array_splice() {
        let mut tracks = vec![track("a", None), track("b", None), track("c", None)];
        let removed = splice(&mut tracks, 1, 1, vec![track("x", None), track("y", None)]);
        assert_eq!(ids(&removed), ["b"]);
        assert_eq!(ids(&tracks), ["a", "x", "y", "c"]);

        let removed = splice(&mut tracks, 10, 3, vec![track("z", None)]);
        assert!(removed.is_empty());
        assert_eq!(ids(&tracks), ["a", "x", "y", "c", "z"]);
    }

    #[test]
    fn history_trims_oldest_and_skips_duplicates() {
        let mut history = Vec::new();
        push_history(
            &mut history,
            vec![track("a", None), track("b", None), track("c", None)],
            2,
        );
        assert_eq!(ids(&history), ["b", "c"]);

        let added = push_history(&mut history, vec![track("c", None)], 2);
        assert!(added.is_empty());
        assert_eq!(ids(&history), ["b", "c"]);
    }

    #[test]
    fn merge_history_puts_persisted_first() {
        let merged = merge_history(
            vec![track("a", None), track("b", None)],
            vec![track("b", None), track("c", None)],
            10,
        );
        assert_eq!(ids(&merged), ["a", "b", "c"]);
    }

    #[test]
    fn round_robin_deals_one_per_requester_per_round() {
        let tracks = vec![
            track("a1", Some(1)),
            track("a2", Some(1)),
            track("a3", Some(1)),
            track("b1", Some(2)),
            track("c1", Some(3)),
            track("c2", Some(3)),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let out = round_robin(tracks.clone(), &mut rng);

        assert_eq!(sorted_ids(&out), sorted_ids(&tracks));
        let requesters: Vec<u64> = out.iter().map(|t| t.requester_id().unwrap().get()).collect();
        assert_eq!(requesters, [1, 2, 3, 1, 3, 1]);
    }

    #[test]
    fn user_block_keeps_each_requesters_order() {
        let tracks = vec![
            track("a1", Some(1)),
            track("a2", Some(1)),
            track("b1", Some(2)),
            track("a3", Some(1)),
            track("n1", None),
            track("b2", Some(2)),
        ];
        let out = user_block(tracks);
        assert_eq!(ids(&out), ["a1", "b1", "n1", "a2", "b2", "a3"]);
    }

    #[test]
    fn duration_counts_current_and_pending() {
        let state = QueueSnapshot {
            current: Some(track("a", None)),
            tracks: vec![track("b", None), track("c", None)],
            history: vec![track("h", None)],
        };
        assert_eq!(duration(&state), 3_000);
    }
}
