use std::sync::Arc;

use log::info;

use crate::{
    alarm::{AlarmBuilder, AlarmEdit, AlarmRecord},
    clock::Clock,
    communication::Notification,
    error::{Error, Result},
    scheduler::Scheduler,
    store::AlarmStore,
};

/// Create, change and remove alarms.
///
/// Each call holds the store lock across the durable write and the matching
/// scheduler update, so the two see changes to an id in the same order. When
/// the write fails the scheduler is not touched.
#[derive(Debug, Clone)]
pub struct AlarmService {
    store: Arc<AlarmStore>,
    scheduler: Arc<Scheduler>,
}

impl AlarmService {
    #[must_use]
    pub const fn new(store: Arc<AlarmStore>, scheduler: Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.scheduler.clock()
    }

    pub fn create(&self, alarm: AlarmBuilder) -> Result<AlarmRecord> {
        let record = alarm.build(self.clock().now())?;
        let mut txn = self.store.begin()?;
        if txn.contains(&record.id) {
            return Err(Error::invalid(format!(
                "an alarm with id {} already exists",
                record.id
            )));
        }
        txn.put(record.clone())?;
        self.scheduler.arm(&record)?;
        info!("created alarm {record}");
        Ok(record)
    }

    pub fn update(
        &self,
        id: &str,
        edits: impl IntoIterator<Item = AlarmEdit>,
    ) -> Result<AlarmRecord> {
        let mut txn = self.store.begin()?;
        let mut record = txn
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        edits.into_iter().for_each(|edit| record.apply(edit));
        record.updated_at = self.clock().now();
        record.validate()?;
        txn.put(record.clone())?;
        self.scheduler.arm(&record)?;
        info!("updated alarm {record}");
        Ok(record)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<AlarmRecord> {
        self.update(id, [AlarmEdit::Enable(enabled)])
    }

    pub fn delete(&self, id: &str) -> Result<AlarmRecord> {
        let mut txn = self.store.begin()?;
        let removed = txn
            .delete(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.scheduler.disarm(id);
        info!("deleted alarm {id}");
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Result<AlarmRecord> {
        self.store.get(id)
    }

    /// Every alarm, soonest first.
    pub fn list(&self) -> Result<Vec<AlarmRecord>> {
        let mut alarms = self.store.list()?;
        alarms.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        Ok(alarms)
    }

    /// Ring again after the alarm's snooze length, as a new one-shot alarm
    /// with the same label, sound and vibration.
    pub fn snooze(&self, fired: &Notification) -> Result<AlarmRecord> {
        let snooze = fired
            .snooze
            .ok_or_else(|| Error::invalid(format!("alarm {} can't be snoozed", fired.id)))?;
        let record = self.create(
            AlarmBuilder::new(fired.label.clone())
                .fire_at(self.clock().now() + snooze)
                .sound(fired.sound.clone())
                .vibrate(fired.vibrate)
                .snooze_minutes(u32::try_from(snooze.num_minutes()).ok()),
        )?;
        info!("snoozed alarm {} until {}", fired.id, record.fire_at);
        Ok(record)
    }
}
