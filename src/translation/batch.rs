/*!
 * Shared state of one batch run.
 *
 * Every worker of a run, including hot-added ones, shares one `BatchState`:
 * - a monotonic cursor over the unit list (each index is claimed once)
 * - outcome counters with a monotonic progress feed
 * - the set of live worker identities (api slots and credential keys)
 * - the stop flag and the run status
 *
 * All counters sit behind a single mutex that is never held across an
 * await. The stop flag is flipped under the same lock, so once `stop`
 * returns no further claim can succeed.
 */

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::book::Unit;
use crate::providers::Channel;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
}

/// How a claimed unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Result written
    Completed,
    /// Retries exhausted or permanent failure
    Abandoned,
    /// Correlation mismatch or result dropped after stop
    Discarded,
}

/// Progress snapshot; every field only grows during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub discarded: usize,
}

impl BatchProgress {
    /// Units with a final outcome in this run
    pub fn accounted(&self) -> usize {
        self.completed + self.abandoned + self.discarded
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.accounted() >= self.total
    }
}

/// Telemetry for a unit currently being translated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingEntry {
    pub unit_id: String,
    pub start_time: DateTime<Utc>,
    pub worker_id: String,
    pub channel: Channel,
}

/// A unit handed to a worker
#[derive(Debug, Clone)]
pub struct ClaimedUnit {
    pub index: usize,
    pub unit: Unit,
    /// First claim of the whole run
    pub first: bool,
}

#[derive(Debug)]
struct BatchInner {
    cursor: usize,
    completed: usize,
    abandoned: usize,
    discarded: usize,
    first_unit_taken: bool,
    live: HashSet<String>,
    reserved: HashSet<String>,
    processing: HashMap<String, ProcessingEntry>,
}

/// Cursor, counters and live-worker registry of a run
#[derive(Debug)]
pub struct BatchState {
    run_id: Uuid,
    units: Vec<Unit>,
    inner: Mutex<BatchInner>,
    stop_tx: watch::Sender<bool>,
    status_tx: watch::Sender<RunStatus>,
    progress_tx: watch::Sender<BatchProgress>,
    started: Instant,
}

impl BatchState {
    /// Create the state of a new run over `units`; the run starts `Running`
    pub fn new(units: Vec<Unit>) -> Self {
        let total = units.len();
        let (stop_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(RunStatus::Running);
        let (progress_tx, _) = watch::channel(BatchProgress {
            total,
            ..Default::default()
        });

        Self {
            run_id: Uuid::new_v4(),
            units,
            inner: Mutex::new(BatchInner {
                cursor: 0,
                completed: 0,
                abandoned: 0,
                discarded: 0,
                first_unit_taken: false,
                live: HashSet::new(),
                reserved: HashSet::new(),
                processing: HashMap::new(),
            }),
            stop_tx,
            status_tx,
            progress_tx,
            started: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn total(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current cursor value
    pub fn cursor(&self) -> usize {
        self.inner.lock().cursor
    }

    /// Claim the next unit in list order.
    ///
    /// Returns `None` once the cursor is exhausted or the run is stopped.
    pub fn claim_next(&self) -> Option<ClaimedUnit> {
        let mut inner = self.inner.lock();
        if *self.stop_tx.borrow() || inner.cursor >= self.units.len() {
            return None;
        }

        let index = inner.cursor;
        inner.cursor += 1;
        let first = !inner.first_unit_taken;
        inner.first_unit_taken = true;

        Some(ClaimedUnit {
            index,
            unit: self.units[index].clone(),
            first,
        })
    }

    /// Units left to claim, zero once stopped
    pub fn has_remaining(&self) -> bool {
        let inner = self.inner.lock();
        !*self.stop_tx.borrow() && inner.cursor < self.units.len()
    }

    /// Record the outcome of a claimed unit and publish progress
    pub fn record(&self, outcome: UnitOutcome) -> BatchProgress {
        let mut inner = self.inner.lock();
        match outcome {
            UnitOutcome::Completed => inner.completed += 1,
            UnitOutcome::Abandoned => inner.abandoned += 1,
            UnitOutcome::Discarded => inner.discarded += 1,
        }

        let progress = self.progress_locked(&inner);
        // Published under the lock so observers never see a counter go back
        self.progress_tx.send_replace(progress);
        self.finish_if_complete(&inner);
        progress
    }

    pub fn progress(&self) -> BatchProgress {
        let inner = self.inner.lock();
        self.progress_locked(&inner)
    }

    /// Progress feed, updated after every unit
    pub fn subscribe_progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress_tx.subscribe()
    }

    fn progress_locked(&self, inner: &BatchInner) -> BatchProgress {
        BatchProgress {
            total: self.units.len(),
            completed: inner.completed,
            abandoned: inner.abandoned,
            discarded: inner.discarded,
        }
    }

    /// Hold `key` for a worker that starts later.
    ///
    /// Fails when the key is already live or reserved.
    pub fn reserve(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.live.contains(key) || inner.reserved.contains(key) {
            return false;
        }
        inner.reserved.insert(key.to_string())
    }

    /// Register `key` as a running worker.
    ///
    /// A reservation for the key is consumed. Fails when another worker
    /// already runs under the key or the run is no longer active.
    pub fn activate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if *self.status_tx.borrow() == RunStatus::Idle || inner.live.contains(key) {
            inner.reserved.remove(key);
            return false;
        }
        inner.reserved.remove(key);
        inner.live.insert(key.to_string());
        debug!("Worker {} registered ({} live)", key, inner.live.len());
        true
    }

    /// Remove `key` from the live and reserved sets
    pub fn release(&self, key: &str) {
        let mut inner = self.inner.lock();
        let was_live = inner.live.remove(key);
        inner.reserved.remove(key);
        if was_live {
            debug!("Worker {} released ({} live)", key, inner.live.len());
        }
        self.finish_if_complete(&inner);
    }

    /// Whether `key` is live or reserved
    pub fn is_bound(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.live.contains(key) || inner.reserved.contains(key)
    }

    pub fn live_workers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().live.iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn begin_processing(&self, entry: ProcessingEntry) {
        self.inner.lock().processing.insert(entry.unit_id.clone(), entry);
    }

    pub fn end_processing(&self, unit_id: &str) {
        self.inner.lock().processing.remove(unit_id);
    }

    /// Units in flight, oldest first
    pub fn processing(&self) -> Vec<ProcessingEntry> {
        let mut entries: Vec<ProcessingEntry> = self.inner.lock().processing.values().cloned().collect();
        entries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.unit_id.cmp(&b.unit_id)));
        entries
    }

    /// Set the stop flag. Returns false when it was already set.
    pub fn stop(&self) -> bool {
        let _inner = self.inner.lock();
        if *self.stop_tx.borrow() {
            return false;
        }
        self.stop_tx.send_replace(true);
        self.status_tx.send_replace(RunStatus::Idle);
        info!("Batch run {} stopped", self.run_id);
        true
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Receiver that flips to `true` on stop
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn status(&self) -> RunStatus {
        *self.status_tx.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// Resolve once the run is idle (stopped or complete)
    pub async fn wait_idle(&self) {
        wait_until_idle(&mut self.status_tx.subscribe()).await;
    }

    fn finish_if_complete(&self, inner: &BatchInner) {
        if *self.status_tx.borrow() == RunStatus::Idle {
            return;
        }

        let total = self.units.len();
        let all_done = inner.completed >= total;
        let drained = inner.cursor >= total && inner.live.is_empty();
        if all_done || drained {
            self.status_tx.send_replace(RunStatus::Idle);
            info!(
                "Batch run {} finished: {}/{} completed, {} abandoned, {} discarded",
                self.run_id, inner.completed, total, inner.abandoned, inner.discarded
            );
        }
    }
}

/// Resolve once `rx` reports `Idle` (or its sender is gone)
pub async fn wait_until_idle(rx: &mut watch::Receiver<RunStatus>) {
    while *rx.borrow_and_update() != RunStatus::Idle {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
