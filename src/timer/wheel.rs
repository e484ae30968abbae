//! Fixed-size timing wheel: O(1) activate/collect in the common case, at the
//! cost of a fixed granularity and a bounded number of slots.
//!
//! Grounded on the reference timer engine's wheel: a ring of buckets, one
//! tick per `granularity`, with timers further out than one full revolution
//! tracked by a `rounds_left` counter on their bucket entry instead of a
//! separate data structure.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::error::ChainResult;
use crate::timer::{in_processing_err, not_deactivated_err, ticks_for, TimerAction, TimerEngine, TimerEngineConfig, TimerId, TimerStatus};

struct Entry {
    status: TimerStatus,
    slot: usize,
    rounds_left: u32,
    period_ticks: Option<u64>,
    action: Option<TimerAction>,
}

pub struct WheelEngine {
    granularity: Duration,
    wheel_size: usize,
    origin: Instant,
    current_tick: u64,
    slots: Vec<VecDeque<u64>>,
    entries: HashMap<u64, Entry>,
    active_count: usize,
}

impl WheelEngine {
    pub fn new(config: TimerEngineConfig) -> Self {
        let wheel_size = config.wheel_size.max(1);
        WheelEngine {
            granularity: config.granularity,
            wheel_size,
            origin: Instant::now(),
            current_tick: 0,
            slots: (0..wheel_size).map(|_| VecDeque::new()).collect(),
            entries: HashMap::new(),
            active_count: 0,
        }
    }

    fn tick_index(&self, at: Instant) -> u64 {
        let elapsed = at.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.granularity.as_nanos().max(1)) as u64
    }

    fn place(&mut self, id: u64, pause: Duration) -> (usize, u32) {
        let ticks = ticks_for(self.granularity, pause);
        let target = self.current_tick + ticks;
        let slot = (target % self.wheel_size as u64) as usize;
        // `ticks` is the tick distance to the due tick; the bucket is visited
        // on every multiple of `wheel_size` ticks from now, so the entry
        // needs to survive exactly `(ticks - 1) / wheel_size` earlier visits
        // before the visit that lands on `target` fires it. Using
        // `ticks / wheel_size` instead overcounts by one revolution whenever
        // `ticks` is an exact multiple of `wheel_size`.
        let rounds_left = ((ticks - 1) / self.wheel_size as u64) as u32;
        self.slots[slot].push_back(id);
        (slot, rounds_left)
    }

    fn remove_from_bucket(&mut self, id: u64, slot: usize) {
        if let Some(pos) = self.slots[slot].iter().position(|x| *x == id) {
            self.slots[slot].remove(pos);
        }
    }
}

impl TimerEngine for WheelEngine {
    fn allocate(&mut self) -> TimerId {
        let id = TimerId::next();
        self.entries.insert(
            id_of(id),
            Entry {
                status: TimerStatus::Inactive,
                slot: 0,
                rounds_left: 0,
                period_ticks: None,
                action: None,
            },
        );
        id
    }

    fn activate(&mut self, id: TimerId, pause: Duration, period: Duration, action: TimerAction) -> ChainResult<()> {
        let key = id_of(id);
        let status = self.entries.get(&key).map(|e| e.status).unwrap_or(TimerStatus::Inactive);
        if status != TimerStatus::Inactive {
            return Err(not_deactivated_err());
        }
        let (slot, rounds_left) = self.place(key, pause);
        let period_ticks = if period.is_zero() { None } else { Some(ticks_for(self.granularity, period)) };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.status = TimerStatus::Active;
            entry.slot = slot;
            entry.rounds_left = rounds_left;
            entry.period_ticks = period_ticks;
            entry.action = Some(action);
        }
        self.active_count += 1;
        Ok(())
    }

    fn reschedule(&mut self, id: TimerId, pause: Duration, period: Duration) -> ChainResult<()> {
        let key = id_of(id);
        let status = self.entries.get(&key).map(|e| e.status).unwrap_or(TimerStatus::Inactive);
        match status {
            TimerStatus::PendingExec | TimerStatus::PendingDeactivation => Err(in_processing_err()),
            TimerStatus::Active => {
                let action = self.entries.get_mut(&key).and_then(|e| e.action.take());
                self.remove_from_bucket(key, self.entries[&key].slot);
                self.active_count -= 1;
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
        let key = id_of(id);
        let Some(entry) = self.entries.get_mut(&key) else {
            return Ok(());
        };
        match entry.status {
            TimerStatus::Inactive => Ok(()),
            TimerStatus::Active => {
                let slot = entry.slot;
                entry.status = TimerStatus::Inactive;
                entry.action = None;
                self.remove_from_bucket(key, slot);
                self.active_count -= 1;
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
        self.entries.get(&id_of(id)).map(|e| e.status).unwrap_or(TimerStatus::Inactive)
    }

    fn is_empty(&self) -> bool {
        self.active_count == 0
    }

    fn nearest_fire_time(&self) -> Option<Instant> {
        if self.active_count == 0 {
            return None;
        }
        let mut best: Option<u64> = None;
        for entry in self.entries.values() {
            if entry.status != TimerStatus::Active {
                continue;
            }
            let ticks_ahead = if (entry.slot as u64) >= (self.current_tick % self.wheel_size as u64) {
                entry.slot as u64 - (self.current_tick % self.wheel_size as u64)
            } else {
                self.wheel_size as u64 - (self.current_tick % self.wheel_size as u64) + entry.slot as u64
            } + entry.rounds_left as u64 * self.wheel_size as u64;
            let target_tick = self.current_tick + ticks_ahead;
            best = Some(best.map_or(target_tick, |b| b.min(target_tick)));
        }
        best.map(|tick| self.origin + self.granularity * tick as u32)
    }

    fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        for entry in self.entries.values_mut() {
            entry.status = TimerStatus::Inactive;
            entry.action = None;
        }
        self.active_count = 0;
    }

    fn collect_due(&mut self, now: Instant) -> Vec<(TimerId, TimerAction)> {
        let target_tick = self.tick_index(now);
        let mut due = Vec::new();
        while self.current_tick < target_tick {
            self.current_tick += 1;
            let slot_idx = (self.current_tick % self.wheel_size as u64) as usize;
            let bucket = std::mem::take(&mut self.slots[slot_idx]);
            for key in bucket {
                let fire_now = match self.entries.get_mut(&key) {
                    Some(entry) if entry.rounds_left == 0 => true,
                    Some(entry) => {
                        entry.rounds_left -= 1;
                        false
                    }
                    None => false,
                };
                if fire_now {
                    if let Some(entry) = self.entries.get_mut(&key) {
                        entry.status = TimerStatus::PendingExec;
                        if let Some(action) = entry.action.take() {
                            due.push((TimerId(key), action));
                        }
                    }
                } else {
                    self.slots[slot_idx].push_back(key);
                }
            }
        }
        due
    }

    fn finish_exec(&mut self, id: TimerId, _now: Instant) {
        let key = id_of(id);
        let Some(entry) = self.entries.get_mut(&key) else { return };
        match entry.status {
            TimerStatus::PendingExec => {
                if let Some(period_ticks) = entry.period_ticks {
                    let slot = (self.current_tick + period_ticks) % self.wheel_size as u64;
                    let rounds_left = (period_ticks - 1) / self.wheel_size as u64;
                    entry.slot = slot as usize;
                    entry.rounds_left = rounds_left as u32;
                    entry.status = TimerStatus::Active;
                    self.slots[slot as usize].push_back(key);
                } else {
                    entry.status = TimerStatus::Inactive;
                    self.active_count -= 1;
                }
            }
            TimerStatus::PendingDeactivation => {
                entry.status = TimerStatus::Inactive;
                entry.action = None;
                self.active_count -= 1;
            }
            _ => {}
        }
    }
}

fn id_of(id: TimerId) -> u64 {
    id.0
}
