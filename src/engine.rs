use std::sync::Arc;

use log::{error, warn};

use crate::{
    clock::Clock,
    communication::Notifier,
    config::Config,
    dispatcher::FireDispatcher,
    error::Result,
    recovery::{RecoveryReport, RestartRecovery},
    scheduler::{FireEvent, Scheduler},
    service::AlarmService,
    store::AlarmStore,
};

/// Everything a host process needs: call [`recover`](Self::recover) once at
/// start, then [`run`](Self::run) on a thread of its own.
#[derive(Debug)]
pub struct Engine {
    store: Arc<AlarmStore>,
    scheduler: Arc<Scheduler>,
    dispatcher: FireDispatcher,
    recovery: RestartRecovery,
    service: AlarmService,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<AlarmStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let scheduler =
            Arc::new(Scheduler::new(clock.clone()).with_max_sleep(config.max_sleep()));
        let dispatcher = FireDispatcher::new(store.clone(), scheduler.clone(), notifier, clock)
            .with_presentation(config.default_label.clone(), config.time_format.clone());
        Self {
            recovery: RestartRecovery::new(store.clone(), scheduler.clone()),
            service: AlarmService::new(store.clone(), scheduler.clone()),
            store,
            scheduler,
            dispatcher,
        }
    }

    pub fn recover(&self) -> Result<RecoveryReport> {
        self.recovery.recover()
    }

    /// Fire alarms until [`stop`](Self::stop) is called, picking up changes
    /// other processes make to the store along the way.
    pub fn run(&self) {
        self.scheduler
            .run_with(|event| self.dispatch(&event), || self.follow_store());
    }

    /// Fire whatever is due right now without waiting.
    pub fn fire_due(&self) -> usize {
        self.scheduler.fire_due(|event| self.dispatch(&event))
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    #[must_use]
    pub const fn service(&self) -> &AlarmService {
        &self.service
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn follow_store(&self) {
        match self.store.sync() {
            Ok(false) => {}
            Ok(true) => {
                if let Err(e) = self.recovery.resync() {
                    error!("couldn't pick up changes to the alarm store: {e}");
                }
            }
            Err(e) => warn!("couldn't check the alarm store for changes: {e}"),
        }
    }

    fn dispatch(&self, event: &FireEvent) {
        // the record stays on disk, the next recovery picks it up again
        if let Err(e) = self.dispatcher.on_fire(event) {
            error!("firing alarm {} failed: {e}", event.id);
        }
    }
}
