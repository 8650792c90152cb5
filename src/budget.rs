//! Cooperative, budget-driven early termination.
//!
//! Bounded operations thread a [`BudgetGuard`] through every loop and call a checkpoint before
//! each sub-step (per file, per line, per result). A checkpoint never interrupts a sub-step that
//! is already running; once a limit trips, the operation stops and reports a truncated result.
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::AirGapConfig;

/// Per-call limits, read-only for the duration of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationBudget {
    pub max_file_size_bytes: u64,
    pub max_response_bytes: usize,
    pub max_results: usize,
    pub max_files_scanned: usize,
    pub timeout: Duration,
}

impl OperationBudget {
    pub fn from_config(config: &AirGapConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_bytes,
            max_response_bytes: config.max_response_bytes,
            max_results: config.max_results,
            max_files_scanned: config.max_files_scanned,
            timeout: config.timeout(),
        }
    }

    /// Same budget with `max_results` lowered to a caller-requested value (never raised).
    pub fn with_max_results(mut self, requested: Option<usize>) -> Self {
        if let Some(requested) = requested {
            self.max_results = requested.clamp(1, self.max_results);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ScanLimitReason {
    Time,
    Files,
    Results,
    ResponseBytes,
}

/// Operation-local counters checked against an [`OperationBudget`].
#[derive(Debug)]
pub struct BudgetGuard {
    budget: OperationBudget,
    started: Instant,
    files_scanned: u64,
    results: usize,
    response_bytes: usize,
    limit_reason: Option<ScanLimitReason>,
}

impl BudgetGuard {
    pub fn start(budget: OperationBudget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            files_scanned: 0,
            results: 0,
            response_bytes: 0,
            limit_reason: None,
        }
    }

    pub fn budget(&self) -> &OperationBudget {
        &self.budget
    }

    // Records the first observed limit; later reasons are ignored.
    fn trip(&mut self, reason: ScanLimitReason) -> ControlFlow<ScanLimitReason> {
        let reason = *self.limit_reason.get_or_insert(reason);
        ControlFlow::Break(reason)
    }

    /// Time checkpoint. Once any limit has tripped, every later checkpoint breaks too.
    pub fn checkpoint(&mut self) -> ControlFlow<ScanLimitReason> {
        if let Some(reason) = self.limit_reason {
            return ControlFlow::Break(reason);
        }
        if self.started.elapsed() >= self.budget.timeout {
            return self.trip(ScanLimitReason::Time);
        }
        ControlFlow::Continue(())
    }

    /// Checkpoint before opening the next file; counts it against `max_files_scanned`.
    pub fn begin_file(&mut self) -> ControlFlow<ScanLimitReason> {
        self.checkpoint()?;
        if self.files_scanned >= self.budget.max_files_scanned as u64 {
            return self.trip(ScanLimitReason::Files);
        }
        self.files_scanned = self.files_scanned.saturating_add(1);
        ControlFlow::Continue(())
    }

    /// Admits one more result of `bytes` payload bytes, or breaks if it would exceed the result
    /// count or the response-size budget. Not time-checked.
    pub fn admit_result(&mut self, bytes: usize) -> ControlFlow<ScanLimitReason> {
        if let Some(reason) = self.limit_reason {
            return ControlFlow::Break(reason);
        }
        if self.results >= self.budget.max_results {
            return self.trip(ScanLimitReason::Results);
        }
        let next_bytes = self.response_bytes.saturating_add(bytes);
        if next_bytes > self.budget.max_response_bytes {
            return self.trip(ScanLimitReason::ResponseBytes);
        }
        self.results += 1;
        self.response_bytes = next_bytes;
        ControlFlow::Continue(())
    }

    /// Time left before the timeout, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.budget.timeout.saturating_sub(self.started.elapsed())
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn files_scanned(&self) -> u64 {
        self.files_scanned
    }

    pub fn results(&self) -> usize {
        self.results
    }

    pub fn limit_reason(&self) -> Option<ScanLimitReason> {
        self.limit_reason
    }

    pub fn limit_reached(&self) -> bool {
        self.limit_reason.is_some()
    }

    pub fn timed_out(&self) -> bool {
        self.limit_reason == Some(ScanLimitReason::Time)
    }

    /// Marks the operation as timed out from outside a checkpoint (e.g. a child process wait).
    pub fn mark_timed_out(&mut self) {
        let _ = self.trip(ScanLimitReason::Time);
    }

    /// Records that files past `max_files_scanned` were left unscanned, for backends that list
    /// candidates before scanning them.
    pub fn mark_files_exhausted(&mut self) {
        let _ = self.trip(ScanLimitReason::Files);
    }
}
