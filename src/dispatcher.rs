use std::{fmt, sync::Arc};

use log::{debug, error, info, warn};

use crate::{
    clock::Clock,
    communication::{Notification, Notifier},
    error::Result,
    scheduler::{FireEvent, Scheduler},
    store::AlarmStore,
};

/// Turns a [`FireEvent`] into a notification and moves the alarm on to its
/// next occurrence, or retires it.
pub struct FireDispatcher {
    store: Arc<AlarmStore>,
    scheduler: Arc<Scheduler>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    default_label: String,
    time_format: String,
}

impl fmt::Debug for FireDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireDispatcher")
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .field("default_label", &self.default_label)
            .field("time_format", &self.time_format)
            .finish_non_exhaustive()
    }
}

impl FireDispatcher {
    #[must_use]
    pub fn new(
        store: Arc<AlarmStore>,
        scheduler: Arc<Scheduler>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
            clock,
            default_label: "Alarm".to_string(),
            time_format: "%l:%M %p".to_string(),
        }
    }

    #[must_use]
    pub fn with_presentation(
        mut self,
        default_label: impl Into<String>,
        time_format: impl Into<String>,
    ) -> Self {
        self.default_label = default_label.into();
        self.time_format = time_format.into();
        self
    }

    /// Handle one due occurrence.
    ///
    /// The store is re-read first, so an alarm deleted, disabled or
    /// rescheduled after its occurrence left the queue is left alone. The
    /// notifier runs without any lock held and before the store is updated:
    /// it may use the caller API, and a crash in between fires the occurrence
    /// again after restart instead of losing it.
    pub fn on_fire(&self, event: &FireEvent) -> Result<()> {
        let now = self.clock.now();
        let record = {
            let txn = self.store.begin()?;
            let Some(record) = txn.get(&event.id).cloned() else {
                debug!("alarm {} was deleted before it fired", event.id);
                return Ok(());
            };
            if !record.enabled {
                debug!("alarm {} was disabled before it fired", event.id);
                return Ok(());
            }
            if record.fire_at > now {
                debug!(
                    "alarm {} was moved to {} before it fired",
                    record.id, record.fire_at
                );
                return self.scheduler.arm(&record);
            }
            record
        };

        let notification = Notification::new(&record, &self.default_label, &self.time_format);
        info!("alarm fired: {}, label: {}", record.id, notification.label);
        if let Err(e) = self.notifier.notify(&notification) {
            warn!("couldn't deliver notification for alarm {}: {e}", record.id);
        }

        let mut txn = self.store.begin()?;
        // the notifier or another caller may have changed the alarm meanwhile
        let Some(current) = txn.get(&record.id).cloned() else {
            return Ok(());
        };
        if current.fire_at != record.fire_at {
            debug!("alarm {} was rescheduled while it rang", record.id);
            return Ok(());
        }
        match current.next_fire_after(now) {
            Ok(Some(next)) => {
                let mut next_record = current;
                next_record.fire_at = next;
                if let Err(e) = txn.put(next_record.clone()) {
                    error!("couldn't reschedule alarm {}: {e}", next_record.id);
                    return Err(e);
                }
                self.scheduler.arm(&next_record)?;
                debug!("alarm {} repeats at {next}", next_record.id);
            }
            Ok(None) => {
                if let Err(e) = txn.delete(&record.id) {
                    error!("couldn't retire alarm {}: {e}", record.id);
                    return Err(e);
                }
                self.scheduler.disarm(&record.id);
                debug!("one-shot alarm {} retired", record.id);
            }
            Err(e) => {
                // keeping it enabled would ring it again on every start
                error!("disabling alarm {}: {e}", record.id);
                let mut disabled = current;
                disabled.enabled = false;
                txn.put(disabled)?;
                self.scheduler.disarm(&record.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::{
        alarm::{AlarmBuilder, AlarmEdit, AlarmRecord},
        clock::ManualClock,
        error::Error,
        service::AlarmService,
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        store: Arc<AlarmStore>,
        scheduler: Arc<Scheduler>,
        seen: Arc<Mutex<Vec<Notification>>>,
        dispatcher: FireDispatcher,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(AlarmStore::open(dir.path().join("alarms.toml")).unwrap());
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        let seen = Arc::new(Mutex::new(vec![]));
        let notifier = {
            let seen = seen.clone();
            move |n: &Notification| -> Result<()> {
                seen.lock().unwrap().push(n.clone());
                Ok(())
            }
        };
        let dispatcher = FireDispatcher::new(
            store.clone(),
            scheduler.clone(),
            Arc::new(notifier),
            clock.clone(),
        );
        Fixture {
            _dir: dir,
            clock,
            store,
            scheduler,
            seen,
            dispatcher,
        }
    }

    fn alarm(id: &str, fire_at: DateTime<Utc>, repeat: Option<Duration>) -> AlarmRecord {
        AlarmRecord {
            repeat_interval: repeat,
            ..AlarmRecord::new(id, format!("{id} label"), fire_at)
        }
    }

    impl Fixture {
        fn add(&self, record: &AlarmRecord) {
            self.store.put(record.clone()).unwrap();
            self.scheduler.arm(record).unwrap();
        }

        fn fire(&self) -> usize {
            self.scheduler
                .fire_due(|event| self.dispatcher.on_fire(&event).unwrap())
        }

        fn seen_ids(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|n| n.id.clone()).collect()
        }
    }

    #[test]
    fn one_shot_is_removed_after_firing() {
        let f = fixture();
        f.add(&alarm("once", start() + Duration::minutes(1), None));
        f.clock.advance(Duration::minutes(1));
        assert_eq!(f.fire(), 1);

        assert_eq!(f.seen_ids(), ["once"]);
        assert_eq!(f.seen.lock().unwrap()[0].label, "once label");
        assert!(matches!(f.store.get("once"), Err(Error::NotFound(_))));
        assert!(!f.scheduler.is_armed("once"));
    }

    #[test]
    fn repeating_alarm_advances_by_its_interval() {
        let f = fixture();
        f.add(&alarm("hourly", start(), Some(Duration::hours(1))));
        f.clock.advance(Duration::seconds(2));
        f.fire();

        let stored = f.store.get("hourly").unwrap();
        assert_eq!(stored.fire_at, start() + Duration::hours(1));
        assert!(stored.fire_at > f.clock.now());
        assert_eq!(f.scheduler.next_deadline(), Some(stored.fire_at));
        assert_eq!(f.seen_ids(), ["hourly"]);
    }

    #[test]
    fn repeating_alarm_catches_up_with_one_notification() {
        let f = fixture();
        f.add(&alarm("every10", start(), Some(Duration::minutes(10))));
        // host asleep for 45 minutes
        f.clock.advance(Duration::minutes(45));
        assert_eq!(f.fire(), 1);

        assert_eq!(f.seen_ids(), ["every10"]);
        assert_eq!(
            f.store.get("every10").unwrap().fire_at,
            start() + Duration::minutes(50)
        );
    }

    #[test]
    fn deleted_alarm_is_a_no_op() {
        let f = fixture();
        let record = alarm("gone", start(), None);
        f.add(&record);
        f.store.delete("gone").unwrap();
        f.fire();
        assert!(f.seen_ids().is_empty());
    }

    #[test]
    fn disabled_alarm_is_not_notified() {
        let f = fixture();
        let mut record = alarm("off", start(), None);
        f.add(&record);
        record.enabled = false;
        f.store.put(record).unwrap();
        f.fire();
        assert!(f.seen_ids().is_empty());
        assert!(f.store.get("off").is_ok());
    }

    #[test]
    fn rescheduled_alarm_is_rearmed_instead_of_fired() {
        let f = fixture();
        f.add(&alarm("moved", start(), None));
        // the store moved on while the old occurrence was still queued
        f.store
            .put(alarm("moved", start() + Duration::hours(2), None))
            .unwrap();
        f.fire();

        assert!(f.seen_ids().is_empty());
        assert_eq!(
            f.scheduler.next_deadline(),
            Some(start() + Duration::hours(2))
        );
    }

    #[test]
    fn notifier_failure_still_retires_the_alarm() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(AlarmStore::open(dir.path().join("alarms.toml")).unwrap());
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        let failing =
            |_: &Notification| -> Result<()> { Err(Error::Notify("no display".to_string())) };
        let dispatcher =
            FireDispatcher::new(store.clone(), scheduler.clone(), Arc::new(failing), clock);

        let record = alarm("a", start(), None);
        store.put(record.clone()).unwrap();
        scheduler.arm(&record).unwrap();
        scheduler.fire_due(|event| dispatcher.on_fire(&event).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn notifier_may_snooze_through_the_caller_api() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(AlarmStore::open(dir.path().join("alarms.toml")).unwrap());
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        let service = AlarmService::new(store.clone(), scheduler.clone());
        let snoozer = {
            let service = service.clone();
            move |n: &Notification| -> Result<()> {
                service.snooze(n)?;
                Ok(())
            }
        };
        let dispatcher =
            FireDispatcher::new(store.clone(), scheduler.clone(), Arc::new(snoozer), clock.clone());

        service
            .create(AlarmBuilder::new("wake").id("wake").fire_at(start()))
            .unwrap();
        scheduler.fire_due(|event| dispatcher.on_fire(&event).unwrap());

        assert!(matches!(store.get("wake"), Err(Error::NotFound(_))));
        let snoozed = service.list().unwrap();
        assert_eq!(snoozed.len(), 1);
        assert_eq!(snoozed[0].label, "wake");
        assert_eq!(snoozed[0].fire_at, start() + Duration::minutes(5));
        assert!(scheduler.is_armed(&snoozed[0].id));
    }

    #[test]
    fn change_made_while_ringing_wins() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(AlarmStore::open(dir.path().join("alarms.toml")).unwrap());
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        let service = AlarmService::new(store.clone(), scheduler.clone());
        let later = start() + Duration::hours(3);
        let mover = {
            let service = service.clone();
            move |n: &Notification| -> Result<()> {
                service.update(&n.id, [AlarmEdit::FireAt(later)]).map(drop)
            }
        };
        let dispatcher =
            FireDispatcher::new(store.clone(), scheduler.clone(), Arc::new(mover), clock.clone());

        service
            .create(
                AlarmBuilder::new("hourly")
                    .id("hourly")
                    .fire_at(start())
                    .repeat_every(Duration::hours(1)),
            )
            .unwrap();
        assert_eq!(scheduler.fire_due(|event| dispatcher.on_fire(&event).unwrap()), 1);

        assert_eq!(store.get("hourly").unwrap().fire_at, later);
        assert_eq!(scheduler.next_deadline(), Some(later));
    }

    #[test]
    fn alarm_without_a_next_occurrence_is_disabled() {
        let f = fixture();
        // written by hand, it never went through validation
        let record = alarm("edge", start(), Some(Duration::seconds(9_000_000_000_000)));
        f.store.put(record.clone()).unwrap();
        f.dispatcher
            .on_fire(&FireEvent {
                id: record.id.clone(),
                due: record.fire_at,
            })
            .unwrap();

        assert_eq!(f.seen_ids(), ["edge"]);
        assert!(!f.store.get("edge").unwrap().enabled);
        assert!(!f.scheduler.is_armed("edge"));
    }
}
