use std::sync::atomic::{AtomicU64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    // Transaction metrics
    pub transactions_submitted: u64,
    pub transactions_confirmed: u64,
    pub transactions_failed: u64,
    pub transactions_pending: u64,
    pub idempotent_skips: u64,
    pub rewards_issued: u64,

    // Confirmation latency
    pub average_confirm_ms: f64,
    pub min_confirm_ms: u64,
    pub max_confirm_ms: u64,

    // Error metrics
    pub validation_errors: u64,
    pub transient_errors: u64,
    pub fatal_errors: u64,
    pub signing_declined: u64,

    // Health metrics
    pub uptime_seconds: u64,
    pub last_confirmed: Option<u64>,
    pub consecutive_failures: u32,
}

/// Outcome of one submit-and-confirm round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionResult {
    Confirmed,
    Failed,
    Pending,
}

#[derive(Debug)]
pub struct MetricsCollector {
    transactions_submitted: AtomicU64,
    transactions_confirmed: AtomicU64,
    transactions_failed: AtomicU64,
    transactions_pending: AtomicU64,
    idempotent_skips: AtomicU64,
    rewards_issued: AtomicU64,
    validation_errors: AtomicU64,
    transient_errors: AtomicU64,
    fatal_errors: AtomicU64,
    signing_declined: AtomicU64,
    consecutive_failures: AtomicU32,

    // Timing data
    start_time: Instant,
    last_confirm_time: Arc<std::sync::Mutex<Option<Instant>>>,

    total_confirm_ms: AtomicU64,
    min_confirm_ms: AtomicU64,
    max_confirm_ms: AtomicU64,
    confirm_count: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            transactions_submitted: AtomicU64::new(0),
            transactions_confirmed: AtomicU64::new(0),
            transactions_failed: AtomicU64::new(0),
            transactions_pending: AtomicU64::new(0),
            idempotent_skips: AtomicU64::new(0),
            rewards_issued: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            signing_declined: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            start_time: Instant::now(),
            last_confirm_time: Arc::new(std::sync::Mutex::new(None)),
            total_confirm_ms: AtomicU64::new(0),
            min_confirm_ms: AtomicU64::new(u64::MAX),
            max_confirm_ms: AtomicU64::new(0),
            confirm_count: AtomicU64::new(0),
        }
    }

    pub fn record_submission(&self, elapsed_ms: u64, result: SubmissionResult) {
        self.transactions_submitted.fetch_add(1, Ordering::Relaxed);

        match result {
            SubmissionResult::Confirmed => {
                self.transactions_confirmed.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                if let Ok(mut last) = self.last_confirm_time.lock() {
                    *last = Some(Instant::now());
                }
                self.record_confirm_latency(elapsed_ms);
            }
            SubmissionResult::Failed => {
                self.transactions_failed.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            }
            SubmissionResult::Pending => {
                self.transactions_pending.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_confirm_latency(&self, elapsed_ms: u64) {
        self.total_confirm_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.confirm_count.fetch_add(1, Ordering::Relaxed);

        let mut current_min = self.min_confirm_ms.load(Ordering::Relaxed);
        while elapsed_ms < current_min {
            match self.min_confirm_ms.compare_exchange_weak(
                current_min, elapsed_ms, Ordering::Relaxed, Ordering::Relaxed
            ) {
                Ok(_) => break,
                Err(new_min) => current_min = new_min,
            }
        }

        let mut current_max = self.max_confirm_ms.load(Ordering::Relaxed);
        while elapsed_ms > current_max {
            match self.max_confirm_ms.compare_exchange_weak(
                current_max, elapsed_ms, Ordering::Relaxed, Ordering::Relaxed
            ) {
                Ok(_) => break,
                Err(new_max) => current_max = new_max,
            }
        }
    }

    /// An operation that found its target state already in place.
    pub fn record_idempotent_skip(&self) {
        self.idempotent_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reward(&self, amount: u64) {
        self.rewards_issued.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn record_error(&self, error_type: ErrorType) {
        match error_type {
            ErrorType::Validation => self.validation_errors.fetch_add(1, Ordering::Relaxed),
            ErrorType::Transient => self.transient_errors.fetch_add(1, Ordering::Relaxed),
            ErrorType::Fatal => self.fatal_errors.fetch_add(1, Ordering::Relaxed),
            ErrorType::SigningDeclined => self.signing_declined.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn get_metrics(&self) -> Metrics {
        let confirm_count = self.confirm_count.load(Ordering::Relaxed);
        let total_confirm_ms = self.total_confirm_ms.load(Ordering::Relaxed);
        let min_confirm_ms = self.min_confirm_ms.load(Ordering::Relaxed);

        let average_confirm_ms = if confirm_count > 0 {
            total_confirm_ms as f64 / confirm_count as f64
        } else {
            0.0
        };

        let last_confirmed = if let Ok(last) = self.last_confirm_time.lock() {
            last.map(|time| time.duration_since(self.start_time).as_secs())
        } else {
            None
        };

        Metrics {
            transactions_submitted: self.transactions_submitted.load(Ordering::Relaxed),
            transactions_confirmed: self.transactions_confirmed.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            transactions_pending: self.transactions_pending.load(Ordering::Relaxed),
            idempotent_skips: self.idempotent_skips.load(Ordering::Relaxed),
            rewards_issued: self.rewards_issued.load(Ordering::Relaxed),
            average_confirm_ms,
            min_confirm_ms: if min_confirm_ms == u64::MAX { 0 } else { min_confirm_ms },
            max_confirm_ms: self.max_confirm_ms.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            signing_declined: self.signing_declined.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_confirmed,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);
        let submitted = self.transactions_submitted.load(Ordering::Relaxed);
        let failed = self.transactions_failed.load(Ordering::Relaxed);

        let failure_rate = if submitted > 0 {
            failed as f64 / submitted as f64
        } else {
            0.0
        };

        if consecutive_failures >= 10 {
            HealthStatus::Critical
        } else if consecutive_failures >= 5 || failure_rate > 0.5 {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= 2 || failure_rate > 0.2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Validation,
    Transient,
    Fatal,
    SigningDeclined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}
