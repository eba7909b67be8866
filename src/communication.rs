use std::fmt::Write;

use chrono::{DateTime, Duration, Local, Utc};
use crossbeam_channel::Sender;
use log::{info, warn};

use crate::{
    alarm::AlarmRecord,
    error::{Error, Result},
};

/// What the host is asked to show when an alarm fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub label: String,
    /// the occurrence that fired
    pub fired_at: DateTime<Utc>,
    /// `fired_at` in local time, formatted for people
    pub body: String,
    pub sound: String,
    pub vibrate: bool,
    /// how long a snooze lasts, `None` if the alarm can't be snoozed
    pub snooze: Option<Duration>,
}

impl Notification {
    #[must_use]
    pub fn new(record: &AlarmRecord, default_label: &str, time_format: &str) -> Self {
        Self {
            id: record.id.clone(),
            label: record.display_label(default_label).to_string(),
            fired_at: record.fire_at,
            body: local_time(record.fire_at, time_format),
            sound: record.sound.clone(),
            vibrate: record.vibrate,
            snooze: record.snooze(),
        }
    }
}

/// `at` in local time, RFC 3339 when `time_format` can't be used.
fn local_time(at: DateTime<Utc>, time_format: &str) -> String {
    let local = at.with_timezone(&Local);
    let mut formatted = String::new();
    if write!(formatted, "{}", local.format(time_format)).is_err() {
        warn!("invalid time format {time_format:?}");
        return local.to_rfc3339();
    }
    formatted
}

/// Renders notifications. This crate only ever calls it.
///
/// Any `Fn(&Notification) -> Result<()>` closure is a notifier, so a host can
/// register a plain callback.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

impl<F> Notifier for F
where
    F: Fn(&Notification) -> Result<()> + Send + Sync,
{
    fn notify(&self, notification: &Notification) -> Result<()> {
        self(notification)
    }
}

/// Writes notifications to the log and stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            "alarm fired: {}, label: {}",
            notification.id, notification.label
        );
        println!(
            "⏰ {} ({}) [{}]",
            notification.label,
            notification.body.trim(),
            notification.id
        );
        Ok(())
    }
}

/// Hands notifications to another thread, e.g. one that plays a sound.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<Notification>,
}

impl ChannelNotifier {
    #[must_use]
    pub const fn new(sender: Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.sender
            .send(notification.clone())
            .map_err(|_| Error::Notify("notification receiver hung up".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(label: &str) -> AlarmRecord {
        AlarmRecord::new("a", label, Utc.with_ymd_and_hms(2024, 3, 1, 7, 5, 0).unwrap())
    }

    #[test]
    fn notification_uses_label_or_default() {
        let named = Notification::new(&record("wake up"), "Alarm", "%H:%M");
        assert_eq!(named.id, "a");
        assert_eq!(named.label, "wake up");
        let unnamed = Notification::new(&record(""), "Alarm", "%H:%M");
        assert_eq!(unnamed.label, "Alarm");
    }

    #[test]
    fn body_is_local_time() {
        let record = record("x");
        let notification = Notification::new(&record, "Alarm", "%l:%M %p");
        let expected = record
            .fire_at
            .with_timezone(&Local)
            .format("%l:%M %p")
            .to_string();
        assert_eq!(notification.body, expected);
    }

    #[test]
    fn invalid_time_format_falls_back_to_rfc3339() {
        let record = record("x");
        let notification = Notification::new(&record, "Alarm", "%Q");
        assert_eq!(
            notification.body,
            record.fire_at.with_timezone(&Local).to_rfc3339()
        );
    }

    #[test]
    fn sound_vibration_and_snooze_are_passed_on() {
        let mut record = record("x");
        record.sound = "rooster".to_string();
        record.vibrate = false;
        record.snooze_minutes = Some(10);
        let notification = Notification::new(&record, "Alarm", "%H:%M");
        assert_eq!(notification.sound, "rooster");
        assert!(!notification.vibrate);
        assert_eq!(notification.snooze, Some(Duration::minutes(10)));

        record.snooze_minutes = None;
        assert_eq!(Notification::new(&record, "Alarm", "%H:%M").snooze, None);
    }

    #[test]
    fn channel_notifier_forwards_and_reports_hang_up() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let notifier = ChannelNotifier::new(tx);
        let notification = Notification::new(&record("x"), "Alarm", "%H:%M");
        notifier.notify(&notification).unwrap();
        assert_eq!(rx.recv().unwrap(), notification);

        drop(rx);
        assert!(matches!(
            notifier.notify(&notification),
            Err(Error::Notify(_))
        ));
    }

    #[test]
    fn closures_are_notifiers() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let notifier = move |n: &Notification| {
            tx.send(n.id.clone())
                .map_err(|e| Error::Notify(e.to_string()))
        };
        notifier
            .notify(&Notification::new(&record("x"), "Alarm", "%H:%M"))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), "a");
    }
}
