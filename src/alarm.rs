use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

fn default_sound() -> String {
    "default".to_string()
}

const fn default_snooze_minutes() -> Option<u32> {
    Some(DEFAULT_SNOOZE_MINUTES)
}

pub const DEFAULT_SNOOZE_MINUTES: u32 = 5;

/// Longest repeat interval an alarm may have.
#[must_use]
pub fn max_repeat_interval() -> Duration {
    Duration::days(366 * 100)
}

/// A single alarm as it is persisted.
/// contains the next time it should go off at, and optionally how often it repeats
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AlarmRecord {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(with = "toml_datetime_compat")]
    pub fire_at: DateTime<Utc>,
    /// absent means one-shot
    #[serde(
        default,
        rename = "repeat_interval_secs",
        with = "interval_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat_interval: Option<Duration>,
    #[serde(default = "always_true")]
    pub enabled: bool,
    /// name of the sound the notifier should play
    #[serde(default = "default_sound")]
    pub sound: String,
    #[serde(default = "always_true")]
    pub vibrate: bool,
    /// how long a snooze lasts, `None` when snoozing is off
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: Option<u32>,
    #[serde(default, with = "toml_datetime_compat")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "toml_datetime_compat")]
    pub updated_at: DateTime<Utc>,
}

impl AlarmRecord {
    /// An enabled one-shot alarm with the default sound, vibration and snooze.
    /// Its timestamps are left unset.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            fire_at,
            repeat_interval: None,
            enabled: true,
            sound: default_sound(),
            vibrate: true,
            snooze_minutes: default_snooze_minutes(),
            created_at: DateTime::default(),
            updated_at: DateTime::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::invalid("alarm id must not be empty"));
        }
        if let Some(interval) = self.repeat_interval {
            if interval < Duration::seconds(1) {
                return Err(Error::invalid(format!(
                    "repeat interval of alarm {} must be at least one second",
                    self.id
                )));
            }
            if Duration::seconds(interval.num_seconds()) != interval {
                return Err(Error::invalid(format!(
                    "repeat interval of alarm {} must be a whole number of seconds",
                    self.id
                )));
            }
            if interval > max_repeat_interval()
                || self.fire_at.checked_add_signed(interval).is_none()
            {
                return Err(Error::invalid(format!(
                    "repeat interval of alarm {} is too long",
                    self.id
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn is_repeating(&self) -> bool {
        self.repeat_interval.is_some()
    }

    /// The occurrence that follows `fire_at` once the alarm has fired at `now`.
    ///
    /// Intervals missed while the host was away are skipped rather than replayed,
    /// so the result is the first `fire_at + k * interval` (with `k >= 1`) that is
    /// strictly after `now`. One-shot alarms have no next occurrence, and one
    /// that would land outside the representable range is an invalid record.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(interval) = self.repeat_interval else {
            return Ok(None);
        };
        let out_of_range =
            || Error::invalid(format!("alarm {} has no next occurrence in range", self.id));
        let next = self
            .fire_at
            .checked_add_signed(interval)
            .ok_or_else(out_of_range)?;
        if next > now {
            return Ok(Some(next));
        }
        let step = interval.num_milliseconds();
        let missed = (now - next)
            .num_milliseconds()
            .checked_div(step)
            .ok_or_else(out_of_range)?
            + 1;
        step.checked_mul(missed)
            .and_then(Duration::try_milliseconds)
            .and_then(|skip| next.checked_add_signed(skip))
            .map(Some)
            .ok_or_else(out_of_range)
    }

    /// The label shown to the user, falling back to `default` when none was given.
    #[must_use]
    pub fn display_label<'a>(&'a self, default: &'a str) -> &'a str {
        if self.label.trim().is_empty() {
            default
        } else {
            &self.label
        }
    }

    /// How long a snooze of this alarm lasts, if it can be snoozed.
    #[must_use]
    pub fn snooze(&self) -> Option<Duration> {
        self.snooze_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::minutes(minutes.into()))
    }

    /// Apply one edit, the id never changes.
    pub fn apply(&mut self, edit: AlarmEdit) {
        match edit {
            AlarmEdit::Label(label) => self.label = label,
            AlarmEdit::FireAt(fire_at) => self.fire_at = fire_at,
            AlarmEdit::Repeat(interval) => self.repeat_interval = interval,
            AlarmEdit::Enable(enabled) => self.enabled = enabled,
            AlarmEdit::Sound(sound) => self.sound = sound,
            AlarmEdit::Vibrate(vibrate) => self.vibrate = vibrate,
            AlarmEdit::Snooze(minutes) => self.snooze_minutes = minutes,
        }
    }
}

impl fmt::Display for AlarmRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] at {}", self.id, self.label, self.fire_at.to_rfc3339())?;
        if let Some(interval) = self.repeat_interval {
            write!(f, " every {}s", interval.num_seconds())?;
        }
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

/// A change to one field of an existing alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmEdit {
    Label(String),
    FireAt(DateTime<Utc>),
    Repeat(Option<Duration>),
    Enable(bool),
    Sound(String),
    Vibrate(bool),
    /// snooze length in minutes, `None` turns snoozing off
    Snooze(Option<u32>),
}

/// An alarm that hasn't been created yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmBuilder {
    id: Option<String>,
    label: String,
    fire_at: Option<DateTime<Utc>>,
    repeat_interval: Option<Duration>,
    sound: String,
    vibrate: bool,
    snooze_minutes: Option<u32>,
}

impl Default for AlarmBuilder {
    fn default() -> Self {
        Self {
            id: None,
            label: String::new(),
            fire_at: None,
            repeat_interval: None,
            sound: default_sound(),
            vibrate: true,
            snooze_minutes: default_snooze_minutes(),
        }
    }
}

impl AlarmBuilder {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn fire_at(mut self, fire_at: DateTime<Utc>) -> Self {
        self.fire_at = Some(fire_at);
        self
    }

    #[must_use]
    pub fn repeat_every(mut self, interval: Duration) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = sound.into();
        self
    }

    #[must_use]
    pub fn vibrate(mut self, vibrate: bool) -> Self {
        self.vibrate = vibrate;
        self
    }

    #[must_use]
    pub fn snooze_minutes(mut self, minutes: Option<u32>) -> Self {
        self.snooze_minutes = minutes;
        self
    }

    /// Turn the draft into an enabled record, generating an id if none was set.
    pub fn build(self, now: DateTime<Utc>) -> Result<AlarmRecord> {
        let fire_at = self
            .fire_at
            .ok_or_else(|| Error::invalid("alarm has no fire time"))?;
        let record = AlarmRecord {
            id: self.id.unwrap_or_else(|| generate_id(now)),
            label: self.label,
            fire_at,
            repeat_interval: self.repeat_interval,
            enabled: true,
            sound: self.sound,
            vibrate: self.vibrate,
            snooze_minutes: self.snooze_minutes,
            created_at: now,
            updated_at: now,
        };
        record.validate()?;
        Ok(record)
    }
}

/// `alarm_<unix millis>_<9 random lowercase alphanumerics>`
#[must_use]
pub fn generate_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("alarm_{}_{suffix}", now.timestamp_millis())
}

/// (de)serializes an optional interval as whole seconds
mod interval_secs {
    use chrono::Duration;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        interval: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match interval {
            Some(interval) => serializer.serialize_some(&interval.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<i64>::deserialize(deserializer)?
            .map(|secs| {
                Duration::try_seconds(secs)
                    .ok_or_else(|| D::Error::custom(format!("interval of {secs}s is out of range")))
            })
            .transpose()
    }
}
