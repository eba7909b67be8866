#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms, missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

//! Durable alarm scheduling.
//!
//! Alarms live in an [`AlarmStore`] on disk. The [`Scheduler`] keeps the next
//! occurrence of every enabled alarm and raises a fire event when it comes
//! due, the [`FireDispatcher`] turns that into a [`Notification`] and moves the
//! alarm on. [`RestartRecovery`] re-arms everything when the process starts.

pub mod alarm;
pub mod clock;
pub mod communication;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod store;

pub use alarm::{AlarmBuilder, AlarmEdit, AlarmRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use communication::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use config::Config;
pub use dispatcher::FireDispatcher;
pub use engine::Engine;
pub use error::{Error, Result};
pub use recovery::{RecoveryReport, RestartRecovery};
pub use scheduler::{FireEvent, Scheduler};
pub use service::AlarmService;
pub use store::AlarmStore;
