use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct WindowEntry {
    pub window_start: Instant,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub window_start: Instant,
    pub count: u32,
}

impl From<&WindowEntry> for EntrySnapshot {
    fn from(entry: &WindowEntry) -> Self {
        Self {
            window_start: entry.window_start,
            count: entry.count,
        }
    }
}

impl EntrySnapshot {
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        is_expired(self.window_start, now, ttl)
    }
}

/// Change to apply to one entry while the store holds exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Insert(Instant),
    Reset(Instant),
    Increment,
    Keep,
}

pub trait WindowStore: Send + Sync {
    fn lookup(&self, fingerprint: u64) -> Option<EntrySnapshot>;

    fn insert_new(&self, fingerprint: u64, now: Instant);

    fn reset_window(&self, fingerprint: u64, now: Instant);

    fn increment_count(&self, fingerprint: u64);

    /// Reads, plans and writes one entry as a single step. No other mutation of
    /// the entry can interleave between the snapshot handed to `plan` and the
    /// returned transition being applied.
    fn apply(
        &self,
        fingerprint: u64,
        plan: &mut dyn FnMut(Option<EntrySnapshot>) -> Transition,
    ) -> Transition;

    fn sweep_expired(&self, now: Instant, ttl: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct CountingCache {
    entries: RwLock<HashMap<u64, WindowEntry>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for CountingCache {
    fn lookup(&self, fingerprint: u64) -> Option<EntrySnapshot> {
        self.entries.read().get(&fingerprint).map(EntrySnapshot::from)
    }

    fn insert_new(&self, fingerprint: u64, now: Instant) {
        self.entries.write().insert(
            fingerprint,
            WindowEntry {
                window_start: now,
                count: 1,
            },
        );
    }

    fn reset_window(&self, fingerprint: u64, now: Instant) {
        if let Some(entry) = self.entries.write().get_mut(&fingerprint) {
            reset_entry(entry, now);
        }
    }

    fn increment_count(&self, fingerprint: u64) {
        if let Some(entry) = self.entries.write().get_mut(&fingerprint) {
            entry.count = entry.count.saturating_add(1);
        }
    }

    fn apply(
        &self,
        fingerprint: u64,
        plan: &mut dyn FnMut(Option<EntrySnapshot>) -> Transition,
    ) -> Transition {
        let mut entries = self.entries.write();
        let snapshot = entries.get(&fingerprint).map(EntrySnapshot::from);
        let transition = plan(snapshot);

        match transition {
            Transition::Insert(now) => {
                entries.insert(
                    fingerprint,
                    WindowEntry {
                        window_start: now,
                        count: 1,
                    },
                );
            }
            Transition::Reset(now) => {
                if let Some(entry) = entries.get_mut(&fingerprint) {
                    reset_entry(entry, now);
                }
            }
            Transition::Increment => {
                if let Some(entry) = entries.get_mut(&fingerprint) {
                    entry.count = entry.count.saturating_add(1);
                }
            }
            Transition::Keep => {}
        }

        transition
    }

    fn sweep_expired(&self, now: Instant, ttl: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !is_expired(entry.window_start, now, ttl));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

fn reset_entry(entry: &mut WindowEntry, now: Instant) {
    // window_start never moves backwards, even for a caller holding a stale `now`
    entry.window_start = entry.window_start.max(now);
    entry.count = 1;
}

pub fn is_expired(window_start: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(window_start) >= ttl
}
