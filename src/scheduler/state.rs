use crate::model::ImageId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use time::OffsetDateTime;

/// Scalar key holding the whole run record.
pub const RUN_STATE_KEY: &str = "bulk_run";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// The single bulk run. Persisted as one record and only ever replaced
/// whole, so readers never see a half-applied update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkRunState {
    pub status: RunStatus,
    /// Front is processed next.
    pub queue: VecDeque<ImageId>,
    /// Popped from `queue`, not yet accounted for.
    #[serde(default)]
    pub in_flight: Option<ImageId>,
    pub total: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Failed,
}

impl BulkRunState {
    pub fn begin(queue: Vec<ImageId>, now: OffsetDateTime) -> Self {
        Self {
            status: RunStatus::Running,
            total: queue.len() as u64,
            queue: queue.into(),
            in_flight: None,
            completed_count: 0,
            failed_count: 0,
            last_run_at: None,
            started_at: Some(now),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn pop_next(&mut self) -> Option<ImageId> {
        let next = self.queue.pop_front();
        self.in_flight = next;
        next
    }

    /// Accounts for the in-flight item. Returns false when `id` is no longer
    /// the in-flight item of a running run (cancelled meanwhile).
    pub fn finish_item(&mut self, id: ImageId, outcome: ItemOutcome, now: OffsetDateTime) -> bool {
        if !self.is_running() || self.in_flight != Some(id) {
            return false;
        }
        self.in_flight = None;
        match outcome {
            ItemOutcome::Completed => self.completed_count += 1,
            ItemOutcome::Failed => self.failed_count += 1,
        }
        self.last_run_at = Some(now);
        if self.queue.is_empty() {
            self.complete();
        }
        true
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.queue.clear();
        self.in_flight = None;
        self.last_run_at = None;
    }

    /// No-op unless running.
    pub fn cancel(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = RunStatus::Cancelled;
        self.queue.clear();
        self.in_flight = None;
        self.last_run_at = None;
        true
    }

    /// Puts an item orphaned by a crash back at the front of the queue.
    pub fn requeue_in_flight(&mut self) -> Option<ImageId> {
        let id = self.in_flight.take()?;
        if self.is_running() {
            self.queue.push_front(id);
        }
        Some(id)
    }

    pub fn progress(&self) -> BulkProgress {
        BulkProgress {
            status: self.status,
            total: self.total,
            completed: self.completed_count,
            failed: self.failed_count,
            remaining: self.queue.len() as u64 + u64::from(self.in_flight.is_some()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub status: RunStatus,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub remaining: u64,
}

impl BulkProgress {
    /// `completed + failed`, never above `total`.
    pub fn current(&self) -> u64 {
        (self.completed + self.failed).min(self.total)
    }
}
