//! Stats Module - Manager Statistics
//!
//! Counters kept by each manager core. Reset and printed on request, the
//! way the hardware monitor manager exposes its counters.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one manager core
#[derive(Debug, Default)]
pub struct ManagerStats {
    lock_requests: AtomicU64,
    lock_grants: AtomicU64,
    lock_denials: AtomicU64,
    lock_queued: AtomicU64,
    lock_releases: AtomicU64,
    stray_releases: AtomicU64,
    monitor_enters: AtomicU64,
    monitor_contended: AtomicU64,
    monitor_waits: AtomicU64,
    monitor_notifies: AtomicU64,
    monitor_errors: AtomicU64,
    spawns: AtomicU64,
}

/// Point-in-time copy of [`ManagerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lock_requests: u64,
    pub lock_grants: u64,
    pub lock_denials: u64,
    pub lock_queued: u64,
    pub lock_releases: u64,
    pub stray_releases: u64,
    pub monitor_enters: u64,
    pub monitor_contended: u64,
    pub monitor_waits: u64,
    pub monitor_notifies: u64,
    pub monitor_errors: u64,
    pub spawns: u64,
}

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        impl ManagerStats {
            $(
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }

            pub fn reset(&self) {
                $(self.$field.store(0, Ordering::Relaxed);)*
            }
        }

        impl std::ops::Add for StatsSnapshot {
            type Output = StatsSnapshot;

            fn add(self, other: StatsSnapshot) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field + other.$field,)*
                }
            }
        }
    };
}

counters! {
    lock_requests => record_lock_request,
    lock_grants => record_lock_grant,
    lock_denials => record_lock_denial,
    lock_queued => record_lock_queued,
    lock_releases => record_lock_release,
    stray_releases => record_stray_release,
    monitor_enters => record_monitor_enter,
    monitor_contended => record_monitor_contended,
    monitor_waits => record_monitor_wait,
    monitor_notifies => record_monitor_notify,
    monitor_errors => record_monitor_error,
    spawns => record_spawn,
}

impl ManagerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::iter::Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = StatsSnapshot>>(iter: I) -> Self {
        iter.fold(StatsSnapshot::default(), |a, b| a + b)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "locks:    {} requests, {} granted, {} denied, {} queued, {} released ({} stray)",
            self.lock_requests,
            self.lock_grants,
            self.lock_denials,
            self.lock_queued,
            self.lock_releases,
            self.stray_releases
        )?;
        writeln!(
            f,
            "monitors: {} enters ({} contended), {} waits, {} notifies, {} errors",
            self.monitor_enters, self.monitor_contended, self.monitor_waits, self.monitor_notifies, self.monitor_errors
        )?;
        write!(f, "threads:  {} spawned", self.spawns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let stats = ManagerStats::new();
        stats.record_lock_request();
        stats.record_lock_request();
        stats.record_lock_grant();
        stats.record_spawn();

        let snap = stats.snapshot();
        assert_eq!(snap.lock_requests, 2);
        assert_eq!(snap.lock_grants, 1);
        assert_eq!(snap.spawns, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_sum_and_display() {
        let a = StatsSnapshot {
            lock_requests: 3,
            ..Default::default()
        };
        let b = StatsSnapshot {
            lock_requests: 4,
            monitor_waits: 1,
            ..Default::default()
        };
        let total: StatsSnapshot = [a, b].into_iter().sum();
        assert_eq!(total.lock_requests, 7);
        assert!(total.to_string().contains("7 requests"));
        assert!(total.to_string().contains("1 waits"));
    }
}
