//! Bulk-check scheduler.
//!
//! A run drains a FIFO snapshot of unchecked images, one item per tick, never
//! enqueueing more items than the provider reports it will serve and never
//! issuing two searches closer together than the configured rate limit.
//!
//! The run record lives in the [`ResultStore`] under [`RUN_STATE_KEY`] and is
//! only mutated through a [`RunLedger`]. Ticks are serialised by `tick`, so
//! at most one [`BulkChecker::process_next`] executes at a time no matter how
//! many threads call it.

pub mod ledger;
pub mod state;
pub mod worker;

use crate::config::Config;
use crate::library::{ImageResolver, ResolveError};
use crate::model::{ImageId, ListOrder};
use crate::provider::{ProviderError, SearchProvider};
use crate::recording::{RecordOptions, SkipReason, record_outcome, record_skip};
use crate::risk::{RiskPolicy, default_policy};
use crate::store::ResultStore;
use crate::util::now_utc;
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use ledger::RunLedger;
pub use state::{BulkProgress, BulkRunState, ItemOutcome, RUN_STATE_KEY, RunStatus};
pub use worker::{BulkCheckService, Worker};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("no remaining searches available")]
    NoQuota,
    #[error("no unchecked images found")]
    EmptyBacklog,
    #[error("a bulk check is already running; cancel it first")]
    AlreadyRunning,
    #[error("quota lookup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct CheckerSettings {
    pub rate_limit: Duration,
    pub record: RecordOptions,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_millis(500),
            record: RecordOptions::default(),
        }
    }
}

impl CheckerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            rate_limit: cfg.scheduler.rate_limit(),
            record: RecordOptions {
                auto_mark_low_risk_safe: cfg.scheduler.auto_mark_low_risk_safe,
            },
        }
    }
}

/// What one call to [`BulkChecker::process_next`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No run was active; nothing happened.
    Idle,
    /// An item was accounted for and more remain.
    Continue,
    /// The run left `Running` during this tick.
    Finished(RunStatus),
}

pub struct BulkChecker {
    ledger: RunLedger,
    store: Arc<dyn ResultStore>,
    provider: Arc<dyn SearchProvider>,
    resolver: Arc<dyn ImageResolver>,
    policy: Arc<dyn RiskPolicy>,
    settings: CheckerSettings,
    tick: Mutex<()>,
}

impl BulkChecker {
    pub fn new(
        settings: CheckerSettings,
        store: Arc<dyn ResultStore>,
        provider: Arc<dyn SearchProvider>,
        resolver: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            ledger: RunLedger::new(Arc::clone(&store)),
            store,
            provider,
            resolver,
            policy: default_policy(),
            settings,
            tick: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RiskPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Starts a run over the store's unchecked backlog, newest first.
    pub fn start(&self) -> Result<u64, StartError> {
        let backlog = self.store.list_unchecked_image_ids(ListOrder::NewestFirst)?;
        self.start_with(backlog)
    }

    /// Starts a run over `candidates`, truncated to the remaining quota.
    /// Returns the number of accepted items.
    pub fn start_with(&self, candidates: Vec<ImageId>) -> Result<u64, StartError> {
        if self.ledger.read()?.is_running() {
            return Err(StartError::AlreadyRunning);
        }

        let quota = self.provider.get_remaining_quota()?;
        if quota <= 0 {
            return Err(StartError::NoQuota);
        }
        if candidates.is_empty() {
            return Err(StartError::EmptyBacklog);
        }

        let mut queue = candidates;
        queue.truncate(usize::try_from(quota).unwrap_or(usize::MAX));

        // Re-checked inside the update: another caller may have started meanwhile.
        let begun = self.ledger.update(|st| {
            if st.is_running() {
                return None;
            }
            *st = BulkRunState::begin(queue, now_utc());
            Some(st.total)
        })?;
        let total = begun.ok_or(StartError::AlreadyRunning)?;
        info!("bulk check started total={} quota={}", total, quota);
        Ok(total)
    }

    /// Idempotent; see [`RunLedger::cancel`].
    pub fn cancel(&self) -> Result<bool> {
        self.ledger.cancel()
    }

    pub fn progress(&self) -> Result<BulkProgress> {
        self.ledger.progress()
    }

    pub fn wait_until_stopped(&self, timeout: Option<Duration>) -> Result<BulkProgress> {
        self.ledger.wait_until_stopped(timeout)
    }

    /// Prepares a persisted run for processing after a restart. Returns
    /// whether a run is active.
    pub fn resume(&self) -> Result<bool> {
        let _tick = self.lock_tick()?;
        self.ledger.update(|st| {
            if let Some(id) = st.requeue_in_flight() {
                debug!("requeued interrupted image={}", id);
            }
            st.is_running()
        })
    }

    fn lock_tick(&self) -> Result<MutexGuard<'_, ()>> {
        self.tick.lock().map_err(|_| anyhow!("tick lock poisoned"))
    }

    /// One unit of work: at most one image and at most one search.
    pub fn process_next(&self) -> Result<Tick> {
        let _tick = self.lock_tick()?;

        let st = self.ledger.read()?;
        if !st.is_running() {
            return Ok(Tick::Idle);
        }

        if let Some(last) = st.last_run_at {
            let elapsed = Duration::try_from(now_utc() - last).unwrap_or(Duration::ZERO);
            let wait = self.settings.rate_limit.saturating_sub(elapsed);
            if !wait.is_zero() && !self.ledger.sleep_while_running(wait)? {
                return Ok(Tick::Idle);
            }
        }

        match self.provider.get_remaining_quota() {
            Ok(n) if n > 0 => {}
            Ok(n) => {
                info!("remaining searches exhausted ({}); stopping bulk check", n);
                self.cancel()?;
                return Ok(Tick::Finished(RunStatus::Cancelled));
            }
            Err(err) => {
                warn!("quota lookup failed: {}; stopping bulk check", err);
                self.cancel()?;
                return Ok(Tick::Finished(RunStatus::Cancelled));
            }
        }

        let popped = self.ledger.update(|st| {
            if !st.is_running() {
                return Err(st.status);
            }
            match st.pop_next() {
                Some(id) => Ok(id),
                None => {
                    st.complete();
                    Err(st.status)
                }
            }
        })?;
        let id = match popped {
            Ok(id) => id,
            Err(status) => return Ok(Tick::Finished(status)),
        };

        let outcome = self.check_item(id);

        let (accounted, progress) = self.ledger.update(|st| {
            let accounted = st.finish_item(id, outcome, now_utc());
            (accounted, st.progress())
        })?;
        if !accounted {
            debug!("image={} finished after run stopped; counters unchanged", id);
            return Ok(Tick::Finished(progress.status));
        }

        info!(
            "bulk item image={} outcome={:?} completed={} failed={} total={} remaining={}",
            id, outcome, progress.completed, progress.failed, progress.total, progress.remaining
        );
        if progress.status == RunStatus::Running {
            Ok(Tick::Continue)
        } else {
            info!(
                "bulk check finished status={:?} completed={} failed={}",
                progress.status, progress.completed, progress.failed
            );
            Ok(Tick::Finished(progress.status))
        }
    }

    /// Checks one image; every error is absorbed into the returned outcome.
    fn check_item(&self, id: ImageId) -> ItemOutcome {
        match self.store.get_record(id) {
            Ok(Some(existing)) if existing.is_checked() => {
                debug!("image={} already checked; skipping", id);
                return ItemOutcome::Completed;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("image={} record lookup failed: {:#}", id, err);
                return ItemOutcome::Failed;
            }
        }

        let url = match self.resolver.resolve_checkable_url(id) {
            Ok(url) => url,
            Err(ResolveError::NotFound(_)) => {
                return self.skip(id, None, SkipReason::NotFound);
            }
        };
        if !self.resolver.is_supported_format(id) {
            return self.skip(id, Some(&url), SkipReason::UnsupportedFormat);
        }

        let result = match self.provider.check_image(&url) {
            Ok(result) => result,
            Err(err) => {
                warn!("image={} search failed: {}", id, err);
                return ItemOutcome::Failed;
            }
        };

        // Persisted even when the run was cancelled during the search: the
        // search already cost quota. Run counters are left alone in that case.
        match record_outcome(
            self.store.as_ref(),
            self.policy.as_ref(),
            self.settings.record,
            id,
            &url,
            &result,
        ) {
            Ok(_) => ItemOutcome::Completed,
            Err(err) => {
                warn!("image={} storing result failed: {:#}", id, err);
                ItemOutcome::Failed
            }
        }
    }

    fn skip(&self, id: ImageId, url: Option<&str>, reason: SkipReason) -> ItemOutcome {
        match record_skip(self.store.as_ref(), id, url, reason) {
            Ok(_) => ItemOutcome::Completed,
            Err(err) => {
                warn!("image={} storing skip failed: {:#}", id, err);
                ItemOutcome::Failed
            }
        }
    }
}
