use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::Config;

/// Errors that say whether repeating the same request may succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.get_retry_delay(),
            ..Self::default()
        }
    }

    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_retry_delay.as_secs_f64()),
        )
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Arc<Mutex<CircuitBreakerState>>,
}

#[derive(Debug, Clone)]
enum CircuitBreakerState {
    Closed { failure_count: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            state: Arc::new(Mutex::new(CircuitBreakerState::Closed { failure_count: 0 })),
        }
    }

    /// An open breaker lets one probe through once the recovery timeout passes.
    pub fn can_execute(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match &*state {
            CircuitBreakerState::Closed { .. } | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.recovery_timeout {
                    *state = CircuitBreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = CircuitBreakerState::Closed { failure_count: 0 };
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            match &mut *state {
                CircuitBreakerState::Closed { failure_count } => {
                    *failure_count += 1;
                    if *failure_count >= self.failure_threshold {
                        warn!(failures = *failure_count, "ledger circuit breaker opened");
                        *state = CircuitBreakerState::Open { opened_at: Instant::now() };
                    }
                }
                CircuitBreakerState::Open { .. } => {}
                CircuitBreakerState::HalfOpen => {
                    *state = CircuitBreakerState::Open { opened_at: Instant::now() };
                }
            }
        }
    }

    pub fn get_state(&self) -> String {
        if let Ok(state) = self.state.lock() {
            match &*state {
                CircuitBreakerState::Closed { failure_count } => {
                    format!("closed (failures: {})", failure_count)
                }
                CircuitBreakerState::Open { opened_at } => {
                    format!("open (elapsed: {:?})", opened_at.elapsed())
                }
                CircuitBreakerState::HalfOpen => "half-open".to_string(),
            }
        } else {
            "unknown".to_string()
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the retry budget is spent. Only for requests that are safe to repeat.
pub async fn retry_transient<T, E, F, Fut>(config: &RetryConfig, what: &str, operation: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.retry_delay;
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                debug!(%error, attempt, "{what} failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                delay = config.next_delay(delay);
            }
            Err(error) => return Err(error),
        }
    }
}
