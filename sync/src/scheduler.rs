//! Peer and byte-range selection for the sync loop.
//!
//! Pure decision logic: the engine feeds it the current sync record and the
//! freshest peer records, and gets back which peer to ask and which window
//! of offsets to fetch. All randomness comes through the caller's `Rng` so
//! the choices are testable.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use loom_types::{
    PeerAddr, CONSULT_PEER_RECORDS_COUNT, MAX_SHARED_SYNCED_INTERVALS_COUNT,
    PICK_PEERS_OUT_OF_RANDOM_N,
};

use crate::interval_set::IntervalSet;

/// A window of offsets to fetch from one peer.
///
/// All five fields are absolute weave offsets; the window covers
/// `(left_bound, right_bound]`. `right_cursor` is the next offset fetched
/// going right, `left_cursor` the next going left; the window is done when
/// `right_cursor > right_bound` and `left_cursor <= left_bound`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub peer: PeerAddr,
    pub left_bound: u64,
    pub left_cursor: u64,
    pub right_cursor: u64,
    pub right_bound: u64,
}

impl FetchWindow {
    /// A window that fetches exactly the chunk containing `offset`.
    pub fn single(peer: PeerAddr, offset: u64) -> Self {
        Self {
            peer,
            left_bound: offset,
            left_cursor: offset,
            right_cursor: offset,
            right_bound: offset,
        }
    }

    pub fn is_done(&self) -> bool {
        self.right_cursor > self.right_bound && self.left_cursor <= self.left_bound
    }

    /// The next offset to fetch, right side first.
    pub fn next_probe(&self) -> Option<u64> {
        if self.right_cursor <= self.right_bound {
            Some(self.right_cursor)
        } else if self.left_cursor > self.left_bound {
            Some(self.left_cursor)
        } else {
            None
        }
    }

    /// Advance past a stored chunk spanning `(chunk_start, chunk_end]`.
    pub fn advance(&mut self, chunk_start: u64, chunk_end: u64) {
        if self.right_cursor <= self.right_bound && chunk_end >= self.right_cursor {
            self.right_cursor = chunk_end + 1;
        }
        if chunk_start < self.left_cursor {
            self.left_cursor = chunk_start;
        }
    }

    /// Skip one offset (blacklisted byte) on whichever side is active.
    pub fn skip_probe(&mut self) {
        if self.right_cursor <= self.right_bound {
            self.right_cursor += 1;
        } else if self.left_cursor > self.left_bound {
            self.left_cursor -= 1;
        }
    }
}

/// Sample up to `CONSULT_PEER_RECORDS_COUNT` peers out of a random
/// `PICK_PEERS_OUT_OF_RANDOM_N`-sized subset of all peers.
pub fn sample_peers(mut peers: Vec<PeerAddr>, rng: &mut impl Rng) -> Vec<PeerAddr> {
    peers.shuffle(rng);
    peers.truncate(PICK_PEERS_OUT_OF_RANDOM_N);
    peers.shuffle(rng);
    peers.truncate(CONSULT_PEER_RECORDS_COUNT);
    peers
}

/// Pick a peer and a fetch window: sample a random byte uniformly across
/// everything the consulted peers have that we lack, then clamp a window
/// of `SyncSize` bytes around it inside the containing interval.
pub fn pick_interval(
    peer_records: &HashMap<PeerAddr, IntervalSet>,
    sync_record: &IntervalSet,
    weave_size: u64,
    excluded: &[PeerAddr],
    rng: &mut impl Rng,
) -> Option<FetchWindow> {
    let mut candidates: Vec<(&PeerAddr, IntervalSet)> = Vec::new();
    for (peer, record) in peer_records {
        if excluded.contains(peer) {
            continue;
        }
        let mut bounded = record.clone();
        bounded.cut(weave_size);
        let need = sync_record.outer_join(&bounded);
        if !need.is_empty() {
            candidates.push((peer, need));
        }
    }
    if candidates.is_empty() {
        return None;
    }
    // Deterministic order so equal RNG seeds make equal choices.
    candidates.sort_by(|a, b| a.0.cmp(b.0));

    let total: u64 = candidates.iter().map(|(_, need)| need.sum()).sum();
    let mut target = rng.gen_range(0..total);
    for (peer, need) in &candidates {
        let sum = need.sum();
        if target >= sum {
            target -= sum;
            continue;
        }
        for (start, end) in need.iter() {
            let len = end - start;
            if target >= len {
                target -= len;
                continue;
            }
            let byte = start + 1 + target;
            return Some(window_around(
                (*peer).clone(),
                byte,
                start,
                end,
                weave_size,
            ));
        }
    }
    unreachable!("target is within the total interval sum")
}

/// Clamp a `SyncSize` window around `byte` within the interval
/// `(interval_start, interval_end]`.
fn window_around(
    peer: PeerAddr,
    byte: u64,
    interval_start: u64,
    interval_end: u64,
    weave_size: u64,
) -> FetchWindow {
    let sync_size = (weave_size / MAX_SHARED_SYNCED_INTERVALS_COUNT as u64).max(1);
    let left_bound = interval_start.max(byte.saturating_sub(sync_size / 2 + 1));
    let right_bound = interval_end.min(left_bound + sync_size);
    let byte = byte.clamp(left_bound + 1, right_bound);
    FetchWindow {
        peer,
        left_bound,
        left_cursor: byte,
        right_cursor: byte,
        right_bound,
    }
}

/// Pick a fresh probe offset inside the missing interval
/// `(start, end]`: within the first `MISSING_PROBE_STEP` bytes so a hit on
/// an existing chunk splits the interval close to its left edge.
pub fn missing_probe(start: u64, end: u64, rng: &mut impl Rng) -> u64 {
    let span = (end - start).min(loom_types::MISSING_PROBE_STEP).max(1);
    start + rng.gen_range(1..=span)
}
