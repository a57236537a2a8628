use super::state::{BulkProgress, BulkRunState, RUN_STATE_KEY};
use crate::store::ResultStore;
use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::info;

/// Cross-process changes to the run record are noticed at least this often
/// while waiting.
const POLL_SLICE: Duration = Duration::from_millis(250);

/// Single-writer access to the persisted [`BulkRunState`].
///
/// Every mutation is one store-level read-modify-write followed by a notify,
/// under one mutex, so a progress read never sees counters from one update
/// and a queue from another.
pub struct RunLedger {
    store: Arc<dyn ResultStore>,
    lock: Mutex<()>,
    changed: Condvar,
}

impl RunLedger {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| anyhow!("run state lock poisoned"))
    }

    fn load(&self) -> Result<BulkRunState> {
        decode(self.store.get_scalar(RUN_STATE_KEY)?)
    }

    pub fn read(&self) -> Result<BulkRunState> {
        let _guard = self.lock()?;
        self.load()
    }

    /// Applies `f` to the stored run as one store-level read-modify-write,
    /// so a cancel written by another ledger (or process) is never
    /// overwritten with a stale copy.
    pub fn update<T>(&self, f: impl FnOnce(&mut BulkRunState) -> T) -> Result<T> {
        let _guard = self.lock()?;
        let mut f = Some(f);
        let mut out = None;
        self.store
            .update_scalar(RUN_STATE_KEY, &mut |current| {
                let mut st = decode(current)?;
                let apply = f.take().ok_or_else(|| anyhow!("run state update applied twice"))?;
                out = Some(apply(&mut st));
                Ok(serde_json::to_value(&st)?)
            })
            .context("persisting bulk run state")?;
        self.changed.notify_all();
        out.ok_or_else(|| anyhow!("run state update was not applied"))
    }

    pub fn progress(&self) -> Result<BulkProgress> {
        Ok(self.read()?.progress())
    }

    /// Stops a running run and drops its queue. Returns whether anything was
    /// cancelled; calling it on a stopped run is fine.
    pub fn cancel(&self) -> Result<bool> {
        let cancelled = self.update(|st| st.cancel())?;
        if cancelled {
            info!("bulk check cancelled");
        }
        Ok(cancelled)
    }

    /// Sleeps up to `dur`. Returns false early if the run stops meanwhile.
    pub fn sleep_while_running(&self, dur: Duration) -> Result<bool> {
        let deadline = Instant::now() + dur;
        let progress = self.wait_while_running(Some(deadline))?;
        Ok(progress.status == super::RunStatus::Running)
    }

    /// Blocks until the run is no longer running or `timeout` elapses.
    pub fn wait_until_stopped(&self, timeout: Option<Duration>) -> Result<BulkProgress> {
        self.wait_while_running(timeout.map(|t| Instant::now() + t))
    }

    fn wait_while_running(&self, deadline: Option<Instant>) -> Result<BulkProgress> {
        let mut guard = self.lock()?;
        loop {
            let st = self.load()?;
            if !st.is_running() {
                return Ok(st.progress());
            }
            let mut slice = POLL_SLICE;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(st.progress());
                }
                slice = slice.min(deadline - now);
            }
            guard = self
                .changed
                .wait_timeout(guard, slice)
                .map_err(|_| anyhow!("run state lock poisoned"))?
                .0;
        }
    }
}

fn decode(value: Option<serde_json::Value>) -> Result<BulkRunState> {
    match value {
        Some(v) => serde_json::from_value(v).context("decoding bulk run state"),
        None => Ok(BulkRunState::default()),
    }
}
