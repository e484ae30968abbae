//! Binary min-heap timer engine: O(log n) activate/deactivate/collect,
//! independent of how far out a timer's delay is (unlike the wheel, which
//! trades that for O(1) typical-case behaviour at a fixed granularity).
//!
//! A hand-rolled array heap rather than `std::collections::BinaryHeap`: the
//! standard heap has no decrease-key/arbitrary-removal operation, which
//! `deactivate`/`reschedule` need. Each heap slot tracks its occupant's
//! position so removal-by-id is a direct index lookup rather than a scan.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ChainResult;
use crate::timer::{in_processing_err, not_deactivated_err, TimerAction, TimerEngine, TimerEngineConfig, TimerId, TimerStatus};

struct Entry {
    status: TimerStatus,
    fire_at: Instant,
    period: Option<Duration>,
    action: Option<TimerAction>,
    /// Index into `heap` while `Active`/`PendingExec` is about to place it;
    /// meaningless once the entry has settled back to `Inactive`.
    heap_pos: Option<usize>,
}

pub struct HeapEngine {
    entries: HashMap<u64, Entry>,
    /// Array-backed binary min-heap of ids, ordered by `fire_at`.
    heap: Vec<u64>,
}

impl HeapEngine {
    pub fn new(config: TimerEngineConfig) -> Self {
        HeapEngine {
            entries: HashMap::new(),
            heap: Vec::with_capacity(config.heap_initial_capacity),
        }
    }

    fn fire_at(&self, id: u64) -> Instant {
        self.entries[&id].fire_at
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        let a = self.heap[i];
        let b = self.heap[j];
        if let Some(entry) = self.entries.get_mut(&a) {
            entry.heap_pos = Some(i);
        }
        if let Some(entry) = self.entries.get_mut(&b) {
            entry.heap_pos = Some(j);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.fire_at(self.heap[i]) < self.fire_at(self.heap[parent]) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < len && self.fire_at(self.heap[left]) < self.fire_at(self.heap[smallest]) {
                smallest = left;
            }
            if right < len && self.fire_at(self.heap[right]) < self.fire_at(self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn push_heap(&mut self, id: u64) {
        let pos = self.heap.len();
        self.heap.push(id);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.heap_pos = Some(pos);
        }
        self.sift_up(pos);
    }

    fn remove_heap(&mut self, id: u64) {
        let Some(pos) = self.entries.get(&id).and_then(|e| e.heap_pos) else {
            return;
        };
        let last = self.heap.len() - 1;
        if pos != last {
            self.swap(pos, last);
        }
        self.heap.pop();
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.heap_pos = None;
        }
        if pos < self.heap.len() {
            self.sift_down(pos);
            self.sift_up(pos);
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<u64> {
        let top = *self.heap.first()?;
        if self.fire_at(top) > now {
            return None;
        }
        self.remove_heap(top);
        Some(top)
    }
}

impl TimerEngine for HeapEngine {
    fn allocate(&mut self) -> TimerId {
        let id = TimerId::next();
        self.entries.insert(
            id.0,
            Entry {
                status: TimerStatus::Inactive,
                fire_at: Instant::now(),
                period: None,
                action: None,
                heap_pos: None,
            },
        );
        id
    }

    fn activate(&mut self, id: TimerId, pause: Duration, period: Duration, action: TimerAction) -> ChainResult<()> {
        let key = id.0;
        let status = self.entries.get(&key).map(|e| e.status).unwrap_or(TimerStatus::Inactive);
        if status != TimerStatus::Inactive {
            return Err(not_deactivated_err());
        }
        let fire_at = Instant::now() + pause;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.status = TimerStatus::Active;
            entry.fire_at = fire_at;
            entry.period = if period.is_zero() { None } else { Some(period) };
            entry.action = Some(action);
        }
        self.push_heap(key);
        Ok(())
    }

    fn reschedule(&mut self, id: TimerId, pause: Duration, period: Duration) -> ChainResult<()> {
        let key = id.0;
        let status = self.entries.get(&key).map(|e| e.status).unwrap_or(TimerStatus::Inactive);
        match status {
            TimerStatus::PendingExec | TimerStatus::PendingDeactivation => Err(in_processing_err()),
            TimerStatus::Active => {
                let action = self.entries.get_mut(&key).and_then(|e| e.action.take());
                self.remove_heap(key);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.status = TimerStatus::Inactive;
                }
                match action {
                    Some(action) => self.activate(id, pause, period, action),
                    None => Err(not_deactivated_err()),
                }
            }
            TimerStatus::Inactive => Err(not_deactivated_err()),
        }
    }

    fn deactivate(&mut self, id: TimerId) -> ChainResult<()> {
        let key = id.0;
        let Some(entry) = self.entries.get_mut(&key) else {
            return Ok(());
        };
        match entry.status {
            TimerStatus::Inactive => Ok(()),
            TimerStatus::Active => {
                entry.status = TimerStatus::Inactive;
                entry.action = None;
                self.remove_heap(key);
                Ok(())
            }
            TimerStatus::PendingExec => {
                entry.status = TimerStatus::PendingDeactivation;
                Ok(())
            }
            TimerStatus::PendingDeactivation => Ok(()),
        }
    }

    fn status(&self, id: TimerId) -> TimerStatus {
        self.entries.get(&id.0).map(|e| e.status).unwrap_or(TimerStatus::Inactive)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn nearest_fire_time(&self) -> Option<Instant> {
        self.heap.first().map(|id| self.fire_at(*id))
    }

    fn clear_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.status = TimerStatus::Inactive;
            entry.action = None;
            entry.heap_pos = None;
        }
        self.heap.clear();
    }

    fn collect_due(&mut self, now: Instant) -> Vec<(TimerId, TimerAction)> {
        let mut due = Vec::new();
        while let Some(key) = self.pop_due(now) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.status = TimerStatus::PendingExec;
                if let Some(action) = entry.action.take() {
                    due.push((TimerId(key), action));
                }
            }
        }
        due
    }

    fn finish_exec(&mut self, id: TimerId, now: Instant) {
        let key = id.0;
        let Some(entry) = self.entries.get_mut(&key) else { return };
        match entry.status {
            TimerStatus::PendingExec => {
                if let Some(period) = entry.period {
                    entry.fire_at = now + period;
                    entry.status = TimerStatus::Active;
                    self.push_heap(key);
                } else {
                    entry.status = TimerStatus::Inactive;
                }
            }
            TimerStatus::PendingDeactivation => {
                entry.status = TimerStatus::Inactive;
                entry.action = None;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_earliest_first() {
        let mut e = HeapEngine::new(TimerEngineConfig::default());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let a = e.allocate();
        let b = e.allocate();
        let c = e.allocate();
        for (id, ms, tag) in [(a, 30, 'a'), (b, 10, 'b'), (c, 20, 'c')] {
            let order = order.clone();
            e.activate(id, Duration::from_millis(ms), Duration::ZERO, Box::new(move || order.lock().push(tag)))
                .unwrap();
        }
        let due = e.collect_due(Instant::now() + Duration::from_millis(100));
        for (id, mut action) in due {
            action();
            e.finish_exec(id, Instant::now());
        }
        assert_eq!(*order.lock(), vec!['b', 'c', 'a']);
    }

    #[test]
    fn deactivate_removes_from_heap_without_disturbing_others() {
        let mut e = HeapEngine::new(TimerEngineConfig::default());
        let fired = Arc::new(AtomicU32::new(0));
        let a = e.allocate();
        let b = e.allocate();
        e.activate(a, Duration::from_millis(5), Duration::ZERO, Box::new(|| panic!("must not run"))).unwrap();
        let fired2 = fired.clone();
        e.activate(b, Duration::from_millis(10), Duration::ZERO, Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        e.deactivate(a).unwrap();

        let due = e.collect_due(Instant::now() + Duration::from_millis(50));
        assert_eq!(due.len(), 1);
        for (id, mut action) in due {
            action();
            e.finish_exec(id, Instant::now());
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nearest_fire_time_matches_heap_top() {
        let mut e = HeapEngine::new(TimerEngineConfig::default());
        let a = e.allocate();
        let b = e.allocate();
        e.activate(a, Duration::from_millis(50), Duration::ZERO, Box::new(|| {})).unwrap();
        e.activate(b, Duration::from_millis(5), Duration::ZERO, Box::new(|| {})).unwrap();
        let nearest = e.nearest_fire_time().unwrap();
        assert_eq!(nearest, e.fire_at(b.0));
    }
}
