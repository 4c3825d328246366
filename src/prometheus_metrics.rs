use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

use crate::metrics::{ErrorType, Metrics, SubmissionResult};

pub struct PrometheusMetrics {
    registry: Registry,

    // Counters
    transactions_submitted: Counter,
    transactions_confirmed: Counter,
    transactions_failed: Counter,
    transactions_pending: Counter,
    validation_errors: Counter,
    transient_errors: Counter,
    fatal_errors: Counter,
    signing_declined: Counter,

    // Gauges
    uptime_seconds: Gauge<i64>,
    consecutive_failures: Gauge<i64>,
    rewards_issued: Gauge<i64>,
    idempotent_skips: Gauge<i64>,

    // Histograms
    confirm_duration_ms: Histogram,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let transactions_submitted = Counter::default();
        let transactions_confirmed = Counter::default();
        let transactions_failed = Counter::default();
        let transactions_pending = Counter::default();
        let validation_errors = Counter::default();
        let transient_errors = Counter::default();
        let fatal_errors = Counter::default();
        let signing_declined = Counter::default();

        let uptime_seconds = Gauge::default();
        let consecutive_failures = Gauge::default();
        let rewards_issued = Gauge::default();
        let idempotent_skips = Gauge::default();

        let confirm_duration_ms = Histogram::new(
            [100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0].into_iter()
        );

        registry.register(
            "academy_ledger_transactions_submitted",
            "Transactions sent to the ledger",
            transactions_submitted.clone(),
        );
        registry.register(
            "academy_ledger_transactions_confirmed",
            "Transactions confirmed by the ledger",
            transactions_confirmed.clone(),
        );
        registry.register(
            "academy_ledger_transactions_failed",
            "Transactions rejected or failed",
            transactions_failed.clone(),
        );
        registry.register(
            "academy_ledger_transactions_pending",
            "Transactions submitted but not confirmed in time",
            transactions_pending.clone(),
        );
        registry.register(
            "academy_ledger_validation_errors",
            "Requests refused before submission",
            validation_errors.clone(),
        );
        registry.register(
            "academy_ledger_transient_errors",
            "Retryable ledger errors",
            transient_errors.clone(),
        );
        registry.register(
            "academy_ledger_fatal_errors",
            "Non-retryable errors",
            fatal_errors.clone(),
        );
        registry.register(
            "academy_ledger_signing_declined",
            "Transactions the signer declined",
            signing_declined.clone(),
        );
        registry.register(
            "academy_ledger_uptime_seconds",
            "Uptime in seconds",
            uptime_seconds.clone(),
        );
        registry.register(
            "academy_ledger_consecutive_failures",
            "Number of consecutive failed transactions",
            consecutive_failures.clone(),
        );
        registry.register(
            "academy_ledger_rewards_issued",
            "Reward points issued by confirmed completions",
            rewards_issued.clone(),
        );
        registry.register(
            "academy_ledger_idempotent_skips",
            "Operations whose target state already existed",
            idempotent_skips.clone(),
        );
        registry.register(
            "academy_ledger_confirm_duration_ms",
            "Submit-to-confirmation time in milliseconds",
            confirm_duration_ms.clone(),
        );

        Self {
            registry,
            transactions_submitted,
            transactions_confirmed,
            transactions_failed,
            transactions_pending,
            validation_errors,
            transient_errors,
            fatal_errors,
            signing_declined,
            uptime_seconds,
            consecutive_failures,
            rewards_issued,
            idempotent_skips,
            confirm_duration_ms,
        }
    }

    pub fn update_from_metrics(&self, metrics: &Metrics) {
        self.uptime_seconds.set(metrics.uptime_seconds as i64);
        self.consecutive_failures.set(metrics.consecutive_failures as i64);
        self.rewards_issued.set(metrics.rewards_issued as i64);
        self.idempotent_skips.set(metrics.idempotent_skips as i64);
    }

    pub fn record_submission(&self, elapsed_ms: u64, result: SubmissionResult) {
        self.transactions_submitted.inc();

        match result {
            SubmissionResult::Confirmed => {
                self.transactions_confirmed.inc();
                self.confirm_duration_ms.observe(elapsed_ms as f64);
            }
            SubmissionResult::Failed => {
                self.transactions_failed.inc();
            }
            SubmissionResult::Pending => {
                self.transactions_pending.inc();
            }
        }
    }

    pub fn record_error(&self, error_type: ErrorType) {
        match error_type {
            ErrorType::Validation => self.validation_errors.inc(),
            ErrorType::Transient => self.transient_errors.inc(),
            ErrorType::Fatal => self.fatal_errors.inc(),
            ErrorType::SigningDeclined => self.signing_declined.inc(),
        };
    }

    pub fn export_metrics(&self) -> anyhow::Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    pub fn get_registry(&self) -> &Registry {
        &self.registry
    }
}
