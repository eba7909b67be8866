use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration as StdDuration,
};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace};

use crate::{alarm::AlarmRecord, clock::Clock, error::Result};

pub const DEFAULT_MAX_SLEEP: StdDuration = StdDuration::from_secs(30);

/// Raised once per due occurrence of an armed alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub id: String,
    /// the `fire_at` the alarm was armed with
    pub due: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    fire_at: DateTime<Utc>,
    seq: u64,
    id: String,
}

/// Min-heap of pending occurrences.
///
/// Re-arming or disarming an id leaves its old heap entry behind; `live` maps
/// each armed id to the sequence number of its current entry, and anything
/// else is dropped when it reaches the top.
#[derive(Debug, Default)]
struct WaitQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashMap<String, u64>,
    next_seq: u64,
}

impl WaitQueue {
    fn insert(&mut self, id: &str, fire_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(id.to_string(), seq);
        self.heap.push(Reverse(Entry {
            fire_at,
            seq,
            id: id.to_string(),
        }));
    }

    fn remove(&mut self, id: &str) -> bool {
        self.live.remove(id).is_some()
    }

    fn is_live(&self, entry: &Entry) -> bool {
        self.live.get(&entry.id) == Some(&entry.seq)
    }

    fn prune(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn peek(&mut self) -> Option<&Entry> {
        self.prune();
        self.heap.peek().map(|Reverse(entry)| entry)
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<FireEvent> {
        if self.peek()?.fire_at > now {
            return None;
        }
        let Reverse(entry) = self.heap.pop()?;
        self.live.remove(&entry.id);
        Some(FireEvent {
            id: entry.id,
            due: entry.fire_at,
        })
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}

/// Keeps track of when every enabled alarm next fires and raises a
/// [`FireEvent`] when that time comes.
///
/// `arm`, `disarm`, `wake` and `stop` may be called from any thread while
/// another thread sits in [`run`](Self::run).
#[derive(Debug)]
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    queue: Mutex<WaitQueue>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    stopped: AtomicBool,
    max_sleep: StdDuration,
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        // one pending wake-up is as good as many
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            clock,
            queue: Mutex::default(),
            wake_tx,
            wake_rx,
            stopped: AtomicBool::new(false),
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }

    /// Upper bound on a single wait, so jumps of the clock are noticed.
    #[must_use]
    pub fn with_max_sleep(mut self, max_sleep: StdDuration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Schedule `record` at its `fire_at`, replacing any earlier entry for its id.
    ///
    /// A disabled record is disarmed instead. A `fire_at` in the past fires on
    /// the next round of the loop.
    pub fn arm(&self, record: &AlarmRecord) -> Result<()> {
        record.validate()?;
        if !record.enabled {
            self.disarm(&record.id);
            return Ok(());
        }
        self.lock().insert(&record.id, record.fire_at);
        debug!("armed alarm {} for {}", record.id, record.fire_at);
        self.wake();
        Ok(())
    }

    pub fn disarm(&self, id: &str) {
        if self.lock().remove(id) {
            debug!("disarmed alarm {id}");
            self.wake();
        }
    }

    #[must_use]
    pub fn is_armed(&self, id: &str) -> bool {
        self.lock().live.contains_key(id)
    }

    #[must_use]
    pub fn armed_ids(&self) -> Vec<String> {
        self.lock().live.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock().peek().map(|entry| entry.fire_at)
    }

    /// Interrupt the current wait of [`run`](Self::run), if any.
    pub fn wake(&self) {
        // a full channel already has a wake-up pending
        let _ = self.wake_tx.try_send(());
    }

    /// Make [`run`](Self::run) return after the occurrence it is handling.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake();
    }

    /// Emit every occurrence due at the clock's current time, earliest first.
    ///
    /// The queue is not locked while `on_fire` runs, so it may arm or disarm.
    pub fn fire_due(&self, mut on_fire: impl FnMut(FireEvent)) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now();
            let Some(event) = self.lock().pop_due(now) else {
                return fired;
            };
            info!("alarm {} is due (scheduled for {})", event.id, event.due);
            on_fire(event);
            fired += 1;
        }
    }

    /// Sleep until the earliest alarm is due, fire it, repeat until [`stop`](Self::stop).
    pub fn run(&self, on_fire: impl FnMut(FireEvent)) {
        self.run_with(on_fire, || {});
    }

    /// Like [`run`](Self::run), calling `on_wake` every time the loop wakes up,
    /// at least once per `max_sleep`.
    pub fn run_with(&self, mut on_fire: impl FnMut(FireEvent), mut on_wake: impl FnMut()) {
        info!("scheduler running with {} armed alarms", self.len());
        while !self.stopped.load(Ordering::Acquire) {
            on_wake();
            self.fire_due(&mut on_fire);
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            let timeout = self.next_deadline().map_or(self.max_sleep, |deadline| {
                (deadline - self.clock.now())
                    .to_std()
                    .unwrap_or_default()
                    .min(self.max_sleep)
            });
            trace!("sleeping for up to {timeout:?}");
            match self.wake_rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                // we hold a sender ourselves, so this never happens
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.stopped.store(false, Ordering::Release);
        info!("scheduler stopped");
    }

    fn lock(&self) -> MutexGuard<'_, WaitQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
