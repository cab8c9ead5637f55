//! Session tracker: remembers which source-side events were already emitted.

use crate::fingerprint::{EventSignature, Fingerprint};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Opaque identity of a rendered node in the source view.
///
/// Node identity is only a fast-path cache: the same logical event can be
/// re-rendered under a new node after a virtualized list re-mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Outcome of [`SessionTracker::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// First sighting of this fingerprint; the event should be emitted.
    New(Fingerprint),
    /// Already emitted (same node, or same fingerprint under another node).
    Duplicate,
    /// Nothing to identify the event by; suppressed and not recorded.
    Noise,
}

impl Observation {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// Tuning knobs for the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// How long a fingerprint is remembered. `None` keeps it for the
    /// lifetime of the process.
    pub retention: Option<Duration>,
    /// Number of time buckets the retention window is split into.
    pub buckets: usize,
    /// Maximum number of node identities kept in the fast-path cache.
    pub node_cache_capacity: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            retention: None,
            buckets: 12,
            node_cache_capacity: 4_096,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    opened_at: Instant,
    members: Vec<Fingerprint>,
}

/// Per-process memory of emitted events.
///
/// Fingerprints live in a ring of time buckets. With no retention window the
/// ring holds a single bucket that is never evicted; with a window, whole
/// buckets are dropped once their newest possible member has aged out.
#[derive(Debug)]
pub struct SessionTracker {
    settings: TrackerSettings,
    fingerprints: HashSet<Fingerprint>,
    buckets: VecDeque<Bucket>,
    nodes: HashSet<NodeId>,
    node_order: VecDeque<NodeId>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl SessionTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            fingerprints: HashSet::new(),
            buckets: VecDeque::new(),
            nodes: HashSet::new(),
            node_order: VecDeque::new(),
        }
    }

    /// Records a sighting of an event and reports whether it is new.
    pub fn observe(&mut self, node: Option<NodeId>, signature: &EventSignature) -> Observation {
        self.observe_at(node, signature, Instant::now())
    }

    /// Like [`observe`](Self::observe) with an explicit clock reading.
    pub fn observe_at(
        &mut self,
        node: Option<NodeId>,
        signature: &EventSignature,
        now: Instant,
    ) -> Observation {
        self.evict_expired(now);

        if let Some(node) = node {
            if self.nodes.contains(&node) {
                return Observation::Duplicate;
            }
        }

        let Some(fingerprint) = Fingerprint::derive(signature) else {
            tracing::trace!("suppressing empty source event");
            return Observation::Noise;
        };

        if let Some(node) = node {
            self.remember_node(node);
        }

        if self.fingerprints.contains(&fingerprint) {
            tracing::trace!(fingerprint = %fingerprint, "duplicate source event");
            return Observation::Duplicate;
        }

        self.insert(fingerprint.clone(), now);
        Observation::New(fingerprint)
    }

    /// Returns `true` if the fingerprint is currently remembered.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Number of remembered fingerprints.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Drops every bucket whose members are all older than the retention
    /// window. Returns the number of fingerprints evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let Some(retention) = self.settings.retention else {
            return 0;
        };
        let span = self.bucket_span(retention);
        let mut evicted = 0;
        while let Some(front) = self.buckets.front() {
            let newest_possible = front.opened_at + span;
            if now.saturating_duration_since(newest_possible) < retention {
                break;
            }
            if let Some(bucket) = self.buckets.pop_front() {
                for fingerprint in &bucket.members {
                    self.fingerprints.remove(fingerprint);
                }
                evicted += bucket.members.len();
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.fingerprints.len(), "evicted expired fingerprints");
        }
        evicted
    }

    fn bucket_span(&self, retention: Duration) -> Duration {
        let buckets = u32::try_from(self.settings.buckets.max(1)).unwrap_or(u32::MAX);
        retention / buckets
    }

    fn insert(&mut self, fingerprint: Fingerprint, now: Instant) {
        let needs_bucket = match (self.buckets.back(), self.settings.retention) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(back), Some(retention)) => now >= back.opened_at + self.bucket_span(retention),
        };
        if needs_bucket {
            self.buckets.push_back(Bucket {
                opened_at: now,
                members: Vec::new(),
            });
        }
        if let Some(back) = self.buckets.back_mut() {
            back.members.push(fingerprint.clone());
        }
        self.fingerprints.insert(fingerprint);
    }

    fn remember_node(&mut self, node: NodeId) {
        if self.settings.node_cache_capacity == 0 {
            return;
        }
        if self.nodes.insert(node) {
            self.node_order.push_back(node);
        }
        while self.node_order.len() > self.settings.node_cache_capacity {
            if let Some(oldest) = self.node_order.pop_front() {
                self.nodes.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> EventSignature {
        EventSignature {
            text: text.to_string(),
            ..EventSignature::default()
        }
    }

    #[test]
    fn same_event_under_new_node_is_duplicate() {
        let mut tracker = SessionTracker::default();
        assert!(tracker.observe(Some(NodeId(1)), &event("hello")).is_new());
        assert_eq!(
            tracker.observe(Some(NodeId(2)), &event("hello")),
            Observation::Duplicate
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn seen_node_short_circuits() {
        let mut tracker = SessionTracker::default();
        assert!(tracker.observe(Some(NodeId(7)), &event("first")).is_new());
        // Same node re-scanned after its text changed is still skipped.
        assert_eq!(
            tracker.observe(Some(NodeId(7)), &event("second")),
            Observation::Duplicate
        );
    }

    #[test]
    fn empty_event_is_noise_and_not_recorded() {
        let mut tracker = SessionTracker::default();
        assert_eq!(
            tracker.observe(Some(NodeId(3)), &EventSignature::default()),
            Observation::Noise
        );
        assert!(tracker.is_empty());
        // The node was not remembered, so real content rendered into it later
        // is still emitted.
        assert!(tracker.observe(Some(NodeId(3)), &event("late text")).is_new());
    }

    #[test]
    fn distinct_events_are_both_new() {
        let mut tracker = SessionTracker::default();
        assert!(tracker.observe(None, &event("a")).is_new());
        assert!(tracker.observe(None, &event("b")).is_new());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn unbounded_tracker_never_evicts() {
        let mut tracker = SessionTracker::default();
        let start = Instant::now();
        tracker.observe_at(None, &event("a"), start);
        let later = start + Duration::from_secs(365 * 24 * 3600);
        assert_eq!(tracker.evict_expired(later), 0);
        assert_eq!(tracker.observe_at(None, &event("a"), later), Observation::Duplicate);
    }

    #[test]
    fn retention_window_evicts_whole_buckets() {
        let mut tracker = SessionTracker::new(TrackerSettings {
            retention: Some(Duration::from_secs(60)),
            buckets: 6,
            node_cache_capacity: 16,
        });
        let start = Instant::now();
        tracker.observe_at(None, &event("old"), start);
        tracker.observe_at(None, &event("newer"), start + Duration::from_secs(30));
        assert_eq!(tracker.len(), 2);

        // "old" sits in a bucket spanning [0s, 10s); it expires at 70s.
        let at = start + Duration::from_secs(71);
        assert_eq!(tracker.evict_expired(at), 1);
        assert!(tracker.observe_at(None, &event("old"), at).is_new());
        assert_eq!(
            tracker.observe_at(None, &event("newer"), at),
            Observation::Duplicate
        );
    }

    #[test]
    fn node_cache_is_bounded() {
        let mut tracker = SessionTracker::new(TrackerSettings {
            node_cache_capacity: 2,
            ..TrackerSettings::default()
        });
        tracker.observe(Some(NodeId(1)), &event("one"));
        tracker.observe(Some(NodeId(2)), &event("two"));
        tracker.observe(Some(NodeId(3)), &event("three"));
        // Node 1 fell out of the cache; the fingerprint still catches it.
        assert_eq!(
            tracker.observe(Some(NodeId(1)), &event("one")),
            Observation::Duplicate
        );
        assert_eq!(tracker.len(), 3);
    }
}
