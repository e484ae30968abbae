//! Ordered-list timer engine: entries kept sorted by absolute fire time in a
//! flat `Vec`, with a tail-optimized insert (new timer later than every
//! existing one — the common case when most timers share a similar delay —
//! appends in O(1); otherwise a linear scan finds the insertion point).
//!
//! Simpler and lower-overhead than the wheel for small timer counts, and
//! exact (no granularity rounding) unlike the wheel.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ChainResult;
use crate::timer::{in_processing_err, not_deactivated_err, TimerAction, TimerEngine, TimerEngineConfig, TimerId, TimerStatus};

struct Entry {
    status: TimerStatus,
    fire_at: Instant,
    period: Option<Duration>,
    action: Option<TimerAction>,
}

pub struct ListEngine {
    entries: HashMap<u64, Entry>,
    /// Ids of `Active` entries, sorted ascending by `fire_at`.
    order: Vec<u64>,
}

impl ListEngine {
    pub fn new(_config: TimerEngineConfig) -> Self {
        ListEngine {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn insert_ordered(&mut self, id: u64, fire_at: Instant) {
        match self.order.last() {
            Some(&last) if self.entries[&last].fire_at <= fire_at => {
                self.order.push(id);
            }
            _ => {
                let pos = self.order.partition_point(|other| self.entries[other].fire_at <= fire_at);
                self.order.insert(pos, id);
            }
        }
    }

    fn remove_ordered(&mut self, id: u64) {
        if let Some(pos) = self.order.iter().position(|x| *x == id) {
            self.order.remove(pos);
        }
    }
}

impl TimerEngine for ListEngine {
    fn allocate(&mut self) -> TimerId {
        let id = TimerId::next();
        self.entries.insert(
            id.0,
            Entry {
                status: TimerStatus::Inactive,
                fire_at: Instant::now(),
                period: None,
                action: None,
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
        self.insert_ordered(key, fire_at);
        Ok(())
    }

    fn reschedule(&mut self, id: TimerId, pause: Duration, period: Duration) -> ChainResult<()> {
        let key = id.0;
        let status = self.entries.get(&key).map(|e| e.status).unwrap_or(TimerStatus::Inactive);
        match status {
            TimerStatus::PendingExec | TimerStatus::PendingDeactivation => Err(in_processing_err()),
            TimerStatus::Active => {
                let action = self.entries.get_mut(&key).and_then(|e| e.action.take());
                self.remove_ordered(key);
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
                self.remove_ordered(key);
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
        self.order.is_empty()
    }

    fn nearest_fire_time(&self) -> Option<Instant> {
        self.order.first().map(|id| self.entries[id].fire_at)
    }

    fn clear_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.status = TimerStatus::Inactive;
            entry.action = None;
        }
        self.order.clear();
    }

    fn collect_due(&mut self, now: Instant) -> Vec<(TimerId, TimerAction)> {
        let mut due = Vec::new();
        let cut = self.order.partition_point(|id| self.entries[id].fire_at <= now);
        let due_ids: Vec<u64> = self.order.drain(..cut).collect();
        for key in due_ids {
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
                    let fire_at = now + period;
                    entry.fire_at = fire_at;
                    entry.status = TimerStatus::Active;
                    self.insert_ordered(key, fire_at);
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
