use crate::domain::ports::ClockHandle;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// STANs are unique per terminal per day only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub terminal_id: String,
    pub stan: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRecord {
    pub first_seen_at: DateTime<Utc>,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayCheck {
    pub is_duplicate: bool,
    pub info: SequenceRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayStats {
    pub tracked: usize,
    pub capacity: usize,
    pub duplicates_detected: u64,
    pub evicted: u64,
    pub expired_purged: u64,
}

struct Inner {
    records: HashMap<SequenceKey, SequenceRecord>,
    stats: ReplayStats,
}

/// Time-windowed sequence deduplication with bounded memory.
///
/// A record younger than the window marks a repeat as a duplicate. Older
/// records are logically expired and are replaced on lookup. When the cache
/// is full, expired records are purged first; if the cache is still at or
/// above 90% of capacity, the oldest fifth is evicted by first-seen time.
pub struct ReplayGuard {
    inner: Mutex<Inner>,
    window: Duration,
    capacity: usize,
    clock: ClockHandle,
}

impl ReplayGuard {
    pub fn new(window: Duration, capacity: usize, clock: ClockHandle) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::with_capacity(capacity.min(4096)),
                stats: ReplayStats {
                    capacity,
                    ..ReplayStats::default()
                },
            }),
            window,
            capacity,
            clock,
        }
    }

    /// Checks and records a sequence in one critical section, so two
    /// concurrent requests with the same key can never both be admitted.
    pub fn check(&self, terminal_id: &str, stan: &str, timestamp: DateTime<Utc>) -> ReplayCheck {
        let now = self.clock.now();
        let key = SequenceKey {
            terminal_id: terminal_id.trim().to_string(),
            stan: stan.to_string(),
            date: timestamp.date_naive(),
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(record) = inner.records.get_mut(&key) {
            if now - record.first_seen_at < self.window {
                record.attempt_count += 1;
                let info = *record;
                inner.stats.duplicates_detected += 1;
                warn!(
                    target: "audit",
                    terminal_id = %key.terminal_id,
                    stan = %key.stan,
                    attempts = info.attempt_count,
                    "duplicate sequence"
                );
                return ReplayCheck {
                    is_duplicate: true,
                    info,
                };
            }
            // outside the window: STAN reuse is legitimate
            inner.records.remove(&key);
        }

        if inner.records.len() >= self.capacity {
            self.force_cleanup(inner, now);
        }

        let info = SequenceRecord {
            first_seen_at: now,
            attempt_count: 1,
        };
        inner.records.insert(key, info);
        inner.stats.tracked = inner.records.len();
        ReplayCheck {
            is_duplicate: false,
            info,
        }
    }

    fn force_cleanup(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let purged = Self::purge_expired(inner, now, self.window);

        let high_water = self.capacity * 9 / 10;
        let mut evicted = 0;
        if inner.records.len() >= high_water {
            let count = (inner.records.len() / 5).max(1);
            let mut by_age: Vec<(DateTime<Utc>, SequenceKey)> = inner
                .records
                .iter()
                .map(|(key, record)| (record.first_seen_at, key.clone()))
                .collect();
            by_age.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, key) in by_age.into_iter().take(count) {
                inner.records.remove(&key);
            }
            evicted = count;
            inner.stats.evicted += count as u64;
        }

        debug!(purged, evicted, remaining = inner.records.len(), "replay cache cleanup");
    }

    fn purge_expired(inner: &mut Inner, now: DateTime<Utc>, window: Duration) -> usize {
        let before = inner.records.len();
        inner
            .records
            .retain(|_, record| now - record.first_seen_at < window);
        let purged = before - inner.records.len();
        inner.stats.expired_purged += purged as u64;
        purged
    }

    /// Drops every logically expired record. Callers may run this
    /// periodically; correctness does not depend on it.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let purged = Self::purge_expired(&mut inner, now, self.window);
        inner.stats.tracked = inner.records.len();
        purged
    }

    pub fn stats(&self) -> ReplayStats {
        let inner = self.inner.lock();
        ReplayStats {
            tracked: inner.records.len(),
            ..inner.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use crate::domain::ports::Clock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn guard(capacity: usize) -> (ReplayGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 12, 14, 0, 0).unwrap(),
        ));
        (
            ReplayGuard::new(Duration::minutes(5), capacity, clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_duplicate_within_window_then_fresh_after() {
        let (guard, clock) = guard(100);
        let ts = clock.now();

        assert!(!guard.check("T1", "000001", ts).is_duplicate);
        let second = guard.check("T1", "000001", ts);
        assert!(second.is_duplicate);
        assert_eq!(second.info.attempt_count, 2);

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        let third = guard.check("T1", "000001", ts);
        assert!(!third.is_duplicate);
        assert_eq!(third.info.attempt_count, 1);
    }

    #[test]
    fn test_key_includes_terminal_and_day() {
        let (guard, clock) = guard(100);
        let ts = clock.now();
        assert!(!guard.check("T1", "000001", ts).is_duplicate);
        assert!(!guard.check("T2", "000001", ts).is_duplicate);
        assert!(!guard.check("T1", "000001", ts + Duration::days(1)).is_duplicate);
        // padding on the terminal id is not significant
        assert!(guard.check("T1      ", "000001", ts).is_duplicate);
    }

    #[test]
    fn test_capacity_purges_expired_before_evicting() {
        let (guard, clock) = guard(10);
        let ts = clock.now();
        for i in 0..10 {
            guard.check("T1", &format!("{i:06}"), ts);
        }
        clock.advance(Duration::minutes(6));
        guard.check("T1", "000100", ts);

        let stats = guard.stats();
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.expired_purged, 10);
        assert_eq!(stats.evicted, 0);
    }

    #[test]
    fn test_capacity_evicts_oldest_fifth_when_nothing_expired() {
        let (guard, clock) = guard(10);
        let ts = clock.now();
        for i in 0..10 {
            guard.check("T1", &format!("{i:06}"), ts);
            clock.advance(Duration::seconds(1));
        }
        guard.check("T1", "000100", ts);

        let stats = guard.stats();
        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.tracked, 9);
        // the two oldest are gone, so they are no longer duplicates
        assert!(!guard.check("T1", "000000", ts).is_duplicate);
        assert!(guard.check("T1", "000009", ts).is_duplicate);
    }

    #[test]
    fn test_sweep() {
        let (guard, clock) = guard(100);
        let ts = clock.now();
        guard.check("T1", "000001", ts);
        guard.check("T1", "000002", ts);
        clock.advance(Duration::minutes(10));
        assert_eq!(guard.sweep(), 2);
        assert_eq!(guard.stats().tracked, 0);
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_one() {
        let (guard, clock) = guard(1000);
        let guard = Arc::new(guard);
        let ts = clock.now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.check("T1", "000777", ts).is_duplicate)
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|duplicate| !duplicate)
            .count();
        assert_eq!(admitted, 1);
    }
}
