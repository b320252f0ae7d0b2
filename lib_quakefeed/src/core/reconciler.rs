//! # Reconciler
//!
//! Folds batches of `EventRecord`s into a single snapshot keyed by `id`.
//!
//! The snapshot is sorted newest-first (instant comparison of `occurred_at`,
//! then `id` ascending) and truncated to a fixed capacity, so the oldest events
//! fall off the end once the set is full. Merging is pure: same inputs, same
//! output, no I/O and no failure path.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::quakes::event_record::{newest_first, EventRecord};

/// Default number of events kept in a working set.
pub const DEFAULT_CAPACITY: usize = 100;

/// What happens when an incoming record carries an id already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollisionPolicy {
    /// The incoming copy replaces the held one only if its `occurred_at` is
    /// the same instant or later. A stale copy replayed from another channel
    /// cannot roll a corrected event back.
    #[default]
    NewerOrEqual,
    /// The incoming copy always replaces the held one.
    LastWriteWins,
}

impl CollisionPolicy {
    fn accepts(&self, held: &EventRecord, incoming: &EventRecord) -> bool {
        match self {
            CollisionPolicy::NewerOrEqual => incoming.occurred_at >= held.occurred_at,
            CollisionPolicy::LastWriteWins => true,
        }
    }
}

/// # Working Set
///
/// Immutable, ordered snapshot of at most `capacity` events with unique ids.
/// Instances are only produced by a [`Reconciler`] and published as
/// `Arc<WorkingSet>`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSet {
    events: Vec<EventRecord>,
    capacity: usize,
}

impl WorkingSet {
    /// An empty snapshot.
    pub fn empty(capacity: usize) -> Self {
        Self { events: Vec::new(), capacity }
    }

    /// Events, newest first.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the snapshot holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Upper bound on `len()`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Looks an event up by id.
    pub fn get(&self, id: &str) -> Option<&EventRecord> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Whether an event with this id is held.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The most recent event, if any.
    pub fn newest(&self) -> Option<&EventRecord> {
        self.events.first()
    }

    /// Iterates newest first.
    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a WorkingSet {
    type Item = &'a EventRecord;
    type IntoIter = std::slice::Iter<'a, EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// # Reconciler
///
/// Stateless merge engine configured with a capacity and a collision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    capacity: usize,
    policy: CollisionPolicy,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, CollisionPolicy::default())
    }
}

impl Reconciler {
    /// Creates a reconciler keeping at most `capacity` events.
    pub fn new(capacity: usize, policy: CollisionPolicy) -> Self {
        Self { capacity, policy }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured collision policy.
    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// # Merge
    ///
    /// Seeds an id map from `existing`, applies every `incoming` record in
    /// order under the collision policy, sorts newest-first and truncates.
    ///
    /// `merge(&merge(s, b), b) == merge(s, b)` for any `s` and `b`.
    pub fn merge(&self, existing: &[EventRecord], incoming: &[EventRecord]) -> Vec<EventRecord> {
        let mut by_id: HashMap<&str, &EventRecord> =
            HashMap::with_capacity(existing.len() + incoming.len());

        for record in existing.iter().chain(incoming.iter()) {
            match by_id.get(record.id.as_str()) {
                Some(held) if !self.policy.accepts(held, record) => {
                    log::debug!("Kept held copy of {} over an older incoming one", record.id);
                }
                _ => {
                    by_id.insert(record.id.as_str(), record);
                }
            }
        }

        let mut merged: Vec<EventRecord> = by_id.into_values().cloned().collect();
        merged.sort_by(newest_first);
        merged.truncate(self.capacity);
        merged
    }

    /// Builds a snapshot from a full fetch, discarding whatever was held.
    pub fn replace(&self, events: &[EventRecord]) -> Vec<EventRecord> {
        self.merge(&[], events)
    }

    /// Merges `incoming` on top of a published snapshot.
    pub fn apply(&self, current: &WorkingSet, incoming: &[EventRecord]) -> Arc<WorkingSet> {
        Arc::new(WorkingSet {
            events: self.merge(&current.events, incoming),
            capacity: self.capacity,
        })
    }

    /// Snapshot of a full fetch.
    pub fn rebuild(&self, events: &[EventRecord]) -> Arc<WorkingSet> {
        Arc::new(WorkingSet {
            events: self.replace(events),
            capacity: self.capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn ev(id: &str, at: &str, magnitude: f64) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            occurred_at: DateTime::parse_from_rfc3339(at).unwrap(),
            latitude: 17.0,
            longitude: -99.0,
            magnitude,
            depth_km: 10.0,
            place: format!("{} km de ACAPULCO, GRO", magnitude),
            source: "SSN".into(),
        }
    }

    fn ids(events: &[EventRecord]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn merge_is_idempotent() {
        let rec = Reconciler::new(3, CollisionPolicy::default());
        let held = vec![
            ev("a", "2024-05-01T10:00:00Z", 4.0),
            ev("b", "2024-05-01T09:00:00Z", 4.1),
        ];
        let batch = vec![
            ev("c", "2024-05-01T11:00:00Z", 4.2),
            ev("d", "2024-05-01T08:00:00Z", 4.3),
            ev("a", "2024-05-01T10:00:00Z", 4.4),
        ];
        let once = rec.merge(&held, &batch);
        let twice = rec.merge(&once, &batch);
        assert_eq!(once, twice);
        assert_eq!(ids(&once), vec!["c", "a", "b"]);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let rec = Reconciler::default();
        let batch = vec![
            ev("x", "2024-05-01T10:00:00Z", 4.0),
            ev("x", "2024-05-01T10:00:00Z", 4.5),
            ev("y", "2024-05-01T09:00:00Z", 3.0),
        ];
        let merged = rec.merge(&[ev("y", "2024-05-01T09:00:00Z", 3.1)], &batch);
        assert_eq!(merged.len(), 2);
        // Equal instants: the later copy wins.
        assert_eq!(merged[0].magnitude, 4.5);
        assert_eq!(merged[1].magnitude, 3.0);
    }

    #[test]
    fn capacity_bounds_the_set() {
        let rec = Reconciler::new(100, CollisionPolicy::default());
        let held: Vec<EventRecord> = (0..100)
            .map(|i| ev(&format!("old-{i:03}"), &format!("2024-01-01T00:{:02}:{:02}Z", i / 60, i % 60), 3.0))
            .collect();
        let batch: Vec<EventRecord> = (0..5)
            .map(|i| ev(&format!("new-{i}"), &format!("2024-02-01T00:00:0{i}Z"), 4.0))
            .collect();

        let merged = rec.merge(&held, &batch);
        assert_eq!(merged.len(), 100);
        assert!(merged.iter().take(5).all(|e| e.id.starts_with("new-")));
        // The five oldest fell off.
        for i in 0..5 {
            assert!(!merged.iter().any(|e| e.id == format!("old-{i:03}")));
        }
    }

    #[test]
    fn output_is_sorted_across_offsets() {
        let rec = Reconciler::default();
        let merged = rec.merge(
            &[],
            &[
                ev("utc", "2024-03-10T12:00:00Z", 1.0),
                ev("cdmx", "2024-03-10T07:00:00-06:00", 1.0), // 13:00Z
                ev("tie-b", "2024-03-10T11:00:00Z", 1.0),
                ev("tie-a", "2024-03-10T05:00:00-06:00", 1.0), // 11:00Z
            ],
        );
        assert_eq!(ids(&merged), vec!["cdmx", "utc", "tie-a", "tie-b"]);
        assert!(merged.windows(2).all(|w| newest_first(&w[0], &w[1]).is_lt()));
    }

    #[test]
    fn newer_or_equal_refuses_stale_copies() {
        let held = vec![ev("q", "2024-05-01T10:05:00Z", 5.1)];
        let stale = vec![ev("q", "2024-05-01T10:00:00Z", 4.9)];

        let guarded = Reconciler::new(10, CollisionPolicy::NewerOrEqual).merge(&held, &stale);
        assert_eq!(guarded[0].magnitude, 5.1);

        let plain = Reconciler::new(10, CollisionPolicy::LastWriteWins).merge(&held, &stale);
        assert_eq!(plain[0].magnitude, 4.9);
    }

    #[test]
    fn replace_discards_previous_snapshot() {
        let rec = Reconciler::new(2, CollisionPolicy::default());
        let first = rec.rebuild(&[ev("a", "2024-05-01T10:00:00Z", 3.0)]);
        let merged = rec.apply(&first, &[ev("b", "2024-05-01T11:00:00Z", 3.0)]);
        assert_eq!(ids(merged.events()), vec!["b", "a"]);

        let fetched = rec.rebuild(&[ev("c", "2024-05-01T09:00:00Z", 3.0)]);
        assert_eq!(fetched.len(), 1);
        assert!(fetched.contains("c") && !fetched.contains("a"));
        assert_eq!(fetched.capacity(), 2);
    }

    /// Ids come from a small pool so copies collide often. Half the records
    /// carry a UTC-6 offset.
    fn arb_event() -> impl Strategy<Value = EventRecord> {
        (0..6u8, 0..30i64, any::<bool>()).prop_map(|(id, minutes, local)| {
            let offset = FixedOffset::west_opt(if local { 6 * 3600 } else { 0 }).unwrap();
            let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes);
            let mut event = ev(&format!("e{id}"), "2024-05-01T10:00:00Z", 0.0);
            event.occurred_at = at.with_timezone(&offset);
            event
        })
    }

    /// Every copy gets a distinct magnitude, starting at `first_tag`, so the
    /// surviving copy can be told apart.
    fn arb_batch(first_tag: usize) -> impl Strategy<Value = Vec<EventRecord>> {
        prop::collection::vec(arb_event(), 0..12).prop_map(move |mut batch| {
            for (i, event) in batch.iter_mut().enumerate() {
                event.magnitude = (first_tag + i) as f64;
            }
            batch
        })
    }

    fn arb_policy() -> impl Strategy<Value = CollisionPolicy> {
        prop_oneof![Just(CollisionPolicy::NewerOrEqual), Just(CollisionPolicy::LastWriteWins)]
    }

    proptest! {
        #[test]
        fn merging_the_same_batch_twice_changes_nothing(
            policy in arb_policy(),
            capacity in 1..8usize,
            held in arb_batch(0),
            batch in arb_batch(100),
        ) {
            let rec = Reconciler::new(capacity, policy);
            let once = rec.merge(&held, &batch);
            let twice = rec.merge(&once, &batch);
            prop_assert_eq!(twice, once);
        }

        /// Under `NewerOrEqual`, truncating between steps loses nothing that
        /// would have survived a single unbounded merge.
        #[test]
        fn capped_steps_match_truncated_unbounded_merge(
            capacity in 1..8usize,
            held in arb_batch(0),
            first in arb_batch(100),
            second in arb_batch(200),
        ) {
            let capped = Reconciler::new(capacity, CollisionPolicy::NewerOrEqual);
            let unbounded = Reconciler::new(usize::MAX, CollisionPolicy::NewerOrEqual);

            let stepwise = capped.merge(&capped.merge(&held, &first), &second);
            let mut whole = unbounded.merge(&unbounded.merge(&held, &first), &second);
            whole.truncate(capacity);
            prop_assert_eq!(stepwise, whole);
        }

        #[test]
        fn merged_set_is_sorted_bounded_and_keeps_the_winning_copy(
            policy in arb_policy(),
            capacity in 1..8usize,
            held in arb_batch(0),
            batch in arb_batch(100),
        ) {
            let merged = Reconciler::new(capacity, policy).merge(&held, &batch);

            let distinct: HashSet<&str> = held.iter().chain(&batch).map(|e| e.id.as_str()).collect();
            prop_assert_eq!(merged.len(), distinct.len().min(capacity));
            prop_assert!(merged.windows(2).all(|w| newest_first(&w[0], &w[1]).is_lt()));

            for event in &merged {
                let copies: Vec<&EventRecord> = held.iter().chain(&batch).filter(|c| c.id == event.id).collect();
                // max_by_key keeps the last of several equal maxima.
                let winner = match policy {
                    CollisionPolicy::LastWriteWins => copies.last().copied(),
                    CollisionPolicy::NewerOrEqual => copies.iter().copied().max_by_key(|c| c.occurred_at),
                };
                prop_assert_eq!(Some(event.magnitude), winner.map(|c| c.magnitude));
            }
        }
    }
}
