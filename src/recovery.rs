use std::sync::Arc;

use log::{error, info};

use crate::{error::Result, scheduler::Scheduler, store::AlarmStore};

/// What [`RestartRecovery::recover`] found in the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub armed: usize,
    /// armed alarms whose time already passed, they fire right away
    pub overdue: usize,
    pub disabled: usize,
    /// records that failed validation and were left unscheduled
    pub rejected: usize,
}

/// Re-arms every enabled alarm when the process starts.
///
/// Overdue alarms go through the scheduler like any other and fire as soon as
/// it runs, so nothing that came due while the process was down is lost.
#[derive(Debug)]
pub struct RestartRecovery {
    store: Arc<AlarmStore>,
    scheduler: Arc<Scheduler>,
}

impl RestartRecovery {
    #[must_use]
    pub const fn new(store: Arc<AlarmStore>, scheduler: Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    pub fn recover(&self) -> Result<RecoveryReport> {
        let txn = self.store.begin()?;
        let now = self.scheduler.clock().now();
        let mut report = RecoveryReport::default();
        for record in txn.list() {
            if !record.enabled {
                report.disabled += 1;
                continue;
            }
            if let Err(e) = self.scheduler.arm(&record) {
                error!("not scheduling stored alarm {}: {e}", record.id);
                report.rejected += 1;
                continue;
            }
            report.armed += 1;
            if record.fire_at <= now {
                report.overdue += 1;
            }
        }
        info!(
            "recovered {} alarms from {} ({} overdue, {} disabled, {} rejected)",
            report.armed,
            self.store.path().display(),
            report.overdue,
            report.disabled,
            report.rejected
        );
        Ok(report)
    }

    /// Bring the scheduler in line with alarms another process added, changed
    /// or removed while this one was running.
    pub fn resync(&self) -> Result<RecoveryReport> {
        let txn = self.store.begin()?;
        for id in self.scheduler.armed_ids() {
            if !txn.contains(&id) {
                self.scheduler.disarm(&id);
            }
        }
        drop(txn);
        let report = self.recover()?;
        info!("picked up changes to {}", self.store.path().display());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::{alarm::AlarmRecord, clock::ManualClock};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap()
    }

    fn alarm(id: &str, fire_at: DateTime<Utc>) -> AlarmRecord {
        AlarmRecord::new(id, "", fire_at)
    }

    #[test]
    fn arms_enabled_alarms_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AlarmStore::open(dir.path().join("alarms.toml")).unwrap());
        store.put(alarm("future", start() + Duration::hours(1))).unwrap();
        store.put(alarm("past", start() - Duration::hours(1))).unwrap();
        let mut off = alarm("off", start() + Duration::hours(1));
        off.enabled = false;
        store.put(off).unwrap();
        let mut broken = alarm("broken", start());
        broken.repeat_interval = Some(Duration::zero());
        store.put(broken).unwrap();

        let scheduler = Arc::new(Scheduler::new(Arc::new(ManualClock::new(start()))));
        let report = RestartRecovery::new(store.clone(), scheduler.clone())
            .recover()
            .unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                armed: 2,
                overdue: 1,
                disabled: 1,
                rejected: 1,
            }
        );
        assert!(scheduler.is_armed("future"));
        assert!(scheduler.is_armed("past"));
        assert!(!scheduler.is_armed("off"));
        // rejected records stay in the store
        assert!(store.get("broken").is_ok());
        assert_eq!(scheduler.next_deadline(), Some(start() - Duration::hours(1)));
    }

    #[test]
    fn resync_follows_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarms.toml");
        let store = Arc::new(AlarmStore::open(&path).unwrap());
        store.put(alarm("kept", start() + Duration::hours(1))).unwrap();
        store.put(alarm("removed", start() + Duration::hours(2))).unwrap();
        let scheduler = Arc::new(Scheduler::new(Arc::new(ManualClock::new(start()))));
        let recovery = RestartRecovery::new(store.clone(), scheduler.clone());
        recovery.recover().unwrap();

        let other = AlarmStore::open(&path).unwrap();
        other.delete("removed").unwrap();
        other.put(alarm("added", start() + Duration::minutes(5))).unwrap();
        assert!(store.sync().unwrap());

        let report = recovery.resync().unwrap();
        assert_eq!(report.armed, 2);
        assert!(scheduler.is_armed("kept"));
        assert!(scheduler.is_armed("added"));
        assert!(!scheduler.is_armed("removed"));
        assert_eq!(scheduler.next_deadline(), Some(start() + Duration::minutes(5)));
    }
}
