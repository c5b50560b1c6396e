use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::detection::DetectionRecord;
use crate::gate::GateRegion;

/// Seconds a track may go unseen before its transient state is evicted.
pub const DEFAULT_TTL_SEC: f64 = 2.0;

/// Upper bound on the durable counted-id set. The source of record
/// never shrinks this set except on reset, which is unbounded over a
/// long session; we cap it and drop the oldest-counted ids first.
/// Upstream trackers hand out ids monotonically, so the oldest entries
/// are the least likely to reappear.
pub const DEFAULT_COUNTED_CAP: usize = 100_000;

/// One row of the audit trail: every evaluated detection produces an
/// event, not only actual crossings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub timestamp: f64,
    pub track_id: i64,
    pub class_id: i32,
    pub center_x: f32,
    pub center_y: f32,
    pub crossed: bool,
}

/// Transient per-track state. The counted latch deliberately lives
/// outside this struct so TTL eviction cannot erase it.
#[derive(Debug, Clone, Copy)]
struct TrackState {
    last_seen: f64,
    inside_prev: bool,
}

/// Per-identity state owned and exclusively mutated by the tick loop.
#[derive(Debug, Default)]
struct TrackStateStore {
    transient: HashMap<i64, TrackState>,
    counted: HashSet<i64>,
    counted_order: VecDeque<i64>,
}

impl TrackStateStore {
    /// Get-or-create: a first-seen id starts outside the gate and
    /// uncounted.
    fn observe(&mut self, id: i64, now: f64) -> &mut TrackState {
        self.transient.entry(id).or_insert(TrackState {
            last_seen: now,
            inside_prev: false,
        })
    }

    fn is_counted(&self, id: i64) -> bool {
        self.counted.contains(&id)
    }

    fn mark_counted(&mut self, id: i64, cap: usize) {
        if self.counted.insert(id) {
            self.counted_order.push_back(id);
            while self.counted_order.len() > cap {
                if let Some(old) = self.counted_order.pop_front() {
                    self.counted.remove(&old);
                }
            }
        }
    }

    fn sweep(&mut self, now: f64, ttl_sec: f64) -> usize {
        let before = self.transient.len();
        self.transient.retain(|_, st| now - st.last_seen <= ttl_sec);
        before - self.transient.len()
    }

    fn clear(&mut self) {
        self.transient.clear();
        self.counted.clear();
        self.counted_order.clear();
    }
}

/// The counting core: hysteresis crossing detection over a track state
/// store, plus TTL eviction of idle transient state.
///
/// An id must be observed inside the gate before a later outside
/// observation counts, so a fast pass-through never registered inside
/// is never counted. That is a documented limitation of the exit-edge
/// rule, not a bug to patch here.
#[derive(Debug)]
pub struct GateCounter {
    store: TrackStateStore,
    total: u64,
    ttl_sec: f64,
    counted_cap: usize,
    dropped_malformed: u64,
}

impl GateCounter {
    pub fn new(ttl_sec: f64, counted_cap: usize) -> Self {
        GateCounter {
            store: TrackStateStore::default(),
            total: 0,
            ttl_sec,
            counted_cap,
            dropped_malformed: 0,
        }
    }

    /// Evaluate one batch against the gate snapshot.
    ///
    /// Emits one event per evaluated detection. Duplicate ids within a
    /// batch are evaluated in arrival order; the last write for an id
    /// wins. Records with malformed geometry are dropped and tallied.
    pub fn process(
        &mut self,
        gate: &GateRegion,
        detections: &[DetectionRecord],
        now: f64,
    ) -> Vec<CrossingEvent> {
        let mut events = Vec::with_capacity(detections.len());
        for det in detections {
            if !Self::well_formed(&det.bbox) {
                self.dropped_malformed += 1;
                debug!(track_id = det.track_id, bbox = ?det.bbox, "dropping malformed detection");
                continue;
            }

            let (cx, cy) = det.center();
            let inside_now = gate.contains(cx, cy);
            let counted = self.store.is_counted(det.track_id);

            let state = self.store.observe(det.track_id, now);
            let crossed = state.inside_prev && !inside_now && !counted;
            state.inside_prev = inside_now;
            state.last_seen = now;

            if crossed {
                self.store.mark_counted(det.track_id, self.counted_cap);
                self.total += 1;
            }

            events.push(CrossingEvent {
                timestamp: now,
                track_id: det.track_id,
                class_id: det.class_id,
                center_x: cx,
                center_y: cy,
                crossed,
            });
        }
        events
    }

    /// Evict transient state for tracks idle longer than the TTL. The
    /// counted latch survives, so a reappearing id starts outside but
    /// stays recognized as already counted.
    pub fn sweep(&mut self, now: f64) -> usize {
        self.store.sweep(now, self.ttl_sec)
    }

    /// Clear all counting state. Idempotent; gate geometry is owned
    /// elsewhere and untouched.
    pub fn reset(&mut self) {
        self.store.clear();
        self.total = 0;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn active_tracks(&self) -> usize {
        self.store.transient.len()
    }

    pub fn counted_ids(&self) -> usize {
        self.store.counted.len()
    }

    pub fn dropped_malformed(&self) -> u64 {
        self.dropped_malformed
    }

    fn well_formed(bbox: &[f32; 4]) -> bool {
        bbox.iter().all(|v| v.is_finite()) && bbox[0] < bbox[2] && bbox[1] < bbox[3]
    }
}

impl Default for GateCounter {
    fn default() -> Self {
        GateCounter::new(DEFAULT_TTL_SEC, DEFAULT_COUNTED_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> GateRegion {
        GateRegion { x1: 100, y1: 100, x2: 300, y2: 300 }
    }

    fn det(id: i64, cx: f32, cy: f32, ts: f64) -> DetectionRecord {
        DetectionRecord {
            track_id: id,
            class_id: 2,
            confidence: 0.9,
            bbox: [cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0],
            timestamp: ts,
        }
    }

    #[test]
    fn test_exit_edge_counts_once() {
        // Inside, exit (count), re-enter, exit again.
        let mut counter = GateCounter::default();
        let g = gate();

        let ev = counter.process(&g, &[det(7, 200.0, 200.0, 0.0)], 0.0);
        assert!(!ev[0].crossed);
        assert_eq!(counter.total(), 0);

        let ev = counter.process(&g, &[det(7, 400.0, 400.0, 1.0)], 1.0);
        assert!(ev[0].crossed);
        assert_eq!(counter.total(), 1);

        let ev = counter.process(&g, &[det(7, 200.0, 200.0, 2.0)], 2.0);
        assert!(!ev[0].crossed);

        let ev = counter.process(&g, &[det(7, 400.0, 400.0, 3.0)], 3.0);
        assert!(!ev[0].crossed, "latched id must not count twice");
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_never_inside_never_counts() {
        let mut counter = GateCounter::default();
        let g = gate();
        for t in 0..20 {
            let ev = counter.process(&g, &[det(3, 500.0, 500.0, t as f64)], t as f64);
            assert!(!ev[0].crossed);
        }
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_event_per_evaluated_detection() {
        let mut counter = GateCounter::default();
        let g = gate();
        let batch = vec![det(1, 200.0, 200.0, 0.0), det(2, 500.0, 500.0, 0.0)];
        let events = counter.process(&g, &batch, 0.0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].track_id, 1);
        assert_eq!(events[1].track_id, 2);
        assert!(events.iter().all(|e| !e.crossed));
    }

    #[test]
    fn test_duplicate_ids_in_batch_last_write_wins() {
        let mut counter = GateCounter::default();
        let g = gate();
        // Same id seen inside then outside within one batch: the outside
        // observation sees inside_prev=true and counts.
        let batch = vec![det(5, 200.0, 200.0, 0.0), det(5, 400.0, 400.0, 0.0)];
        let events = counter.process(&g, &batch, 0.0);
        assert!(!events[0].crossed);
        assert!(events[1].crossed);
        assert_eq!(counter.total(), 1);
        // Last write wins: state is now outside.
        let ev = counter.process(&g, &[det(5, 400.0, 400.0, 1.0)], 1.0);
        assert!(!ev[0].crossed);
    }

    #[test]
    fn test_malformed_dropped_batch_continues() {
        let mut counter = GateCounter::default();
        let g = gate();
        let mut bad = det(9, 200.0, 200.0, 0.0);
        bad.bbox = [f32::NAN, 0.0, 10.0, 10.0];
        let mut inverted = det(10, 200.0, 200.0, 0.0);
        inverted.bbox = [50.0, 50.0, 10.0, 10.0];
        let batch = vec![bad, inverted, det(11, 200.0, 200.0, 0.0)];

        let events = counter.process(&g, &batch, 0.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, 11);
        assert_eq!(counter.dropped_malformed(), 2);
    }

    #[test]
    fn test_ttl_evicts_transient_but_not_latch() {
        let mut counter = GateCounter::new(2.0, DEFAULT_COUNTED_CAP);
        let g = gate();

        counter.process(&g, &[det(7, 200.0, 200.0, 0.0)], 0.0);
        counter.process(&g, &[det(7, 400.0, 400.0, 1.0)], 1.0);
        assert_eq!(counter.total(), 1);
        assert_eq!(counter.active_tracks(), 1);

        // Idle past the TTL.
        assert_eq!(counter.sweep(10.0), 1);
        assert_eq!(counter.active_tracks(), 0);
        assert_eq!(counter.counted_ids(), 1);

        // Reappears: starts outside (so entering is not an exit), and
        // stays latched through a full re-transit.
        counter.process(&g, &[det(7, 200.0, 200.0, 11.0)], 11.0);
        let ev = counter.process(&g, &[det(7, 400.0, 400.0, 12.0)], 12.0);
        assert!(!ev[0].crossed);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_sweep_keeps_fresh_tracks() {
        let mut counter = GateCounter::new(2.0, DEFAULT_COUNTED_CAP);
        let g = gate();
        counter.process(&g, &[det(1, 200.0, 200.0, 0.0), det(2, 200.0, 200.0, 0.0)], 0.0);
        counter.process(&g, &[det(2, 210.0, 210.0, 1.5)], 1.5);
        assert_eq!(counter.sweep(2.5), 1);
        assert_eq!(counter.active_tracks(), 1);
    }

    #[test]
    fn test_reset_idempotent() {
        let mut counter = GateCounter::default();
        let g = gate();
        counter.process(&g, &[det(7, 200.0, 200.0, 0.0)], 0.0);
        counter.process(&g, &[det(7, 400.0, 400.0, 1.0)], 1.0);
        assert_eq!(counter.total(), 1);

        counter.reset();
        assert_eq!(counter.total(), 0);
        assert_eq!(counter.active_tracks(), 0);
        assert_eq!(counter.counted_ids(), 0);

        counter.reset();
        assert_eq!(counter.total(), 0);
        assert_eq!(counter.active_tracks(), 0);
        assert_eq!(counter.counted_ids(), 0);

        // The same id counts again after a reset.
        counter.process(&g, &[det(7, 200.0, 200.0, 2.0)], 2.0);
        let ev = counter.process(&g, &[det(7, 400.0, 400.0, 3.0)], 3.0);
        assert!(ev[0].crossed);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_counted_cap_drops_oldest_first() {
        let mut counter = GateCounter::new(DEFAULT_TTL_SEC, 2);
        let g = gate();
        for id in 1..=3 {
            counter.process(&g, &[det(id, 200.0, 200.0, id as f64)], id as f64);
            counter.process(&g, &[det(id, 400.0, 400.0, id as f64 + 0.5)], id as f64 + 0.5);
        }
        assert_eq!(counter.total(), 3);
        assert_eq!(counter.counted_ids(), 2);

        // Id 1 was evicted from the latch set: a full re-transit counts again.
        counter.process(&g, &[det(1, 200.0, 200.0, 10.0)], 10.0);
        let ev = counter.process(&g, &[det(1, 400.0, 400.0, 11.0)], 11.0);
        assert!(ev[0].crossed);
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn test_total_monotonic_between_resets() {
        let mut counter = GateCounter::default();
        let g = gate();
        let mut last = 0;
        for t in 0..50 {
            let id = (t % 5) as i64;
            let cx = if t % 2 == 0 { 200.0 } else { 400.0 };
            counter.process(&g, &[det(id, cx, cx, t as f64)], t as f64);
            counter.sweep(t as f64);
            assert!(counter.total() >= last);
            last = counter.total();
        }
    }
}
