use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Pubkey;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Rpc,
    Local,
}

impl FromStr for BackendMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpc" | "network" => Ok(BackendMode::Rpc),
            "local" | "fallback" => Ok(BackendMode::Local),
            other => Err(format!("unknown backend {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Ledger network
    pub backend: BackendMode,
    pub rpc_url: String,
    pub program_id: String,
    pub commitment: String,

    // Confirmation and transport
    pub confirm_timeout_ms: u64,
    pub confirm_poll_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_recovery_ms: u64,

    // Local fallback
    pub local_store_path: Option<PathBuf>,
    pub local_reward_mint: String,

    // Monitoring and logging
    pub log_level: String,
    pub metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendMode::Rpc,
            rpc_url: "https://api.devnet.solana.com".to_string(),
            program_id: "ACADBRCB3zGvo1KSCbkztS33ZNzeBv2d7bqGceti3ucf".to_string(),
            commitment: "confirmed".to_string(),

            confirm_timeout_ms: 30_000,
            confirm_poll_ms: 500,
            request_timeout_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 500,
            circuit_breaker_threshold: 5,
            circuit_breaker_recovery_ms: 30_000,

            local_store_path: None,
            local_reward_mint: "11111111111111111111111111111111".to_string(),

            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, val: String) -> Result<T, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidEnvVar(name.to_string(), val))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same rules as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(val) = lookup("ACADEMY_BACKEND") {
            config.backend = parse_var("ACADEMY_BACKEND", val)?;
        }

        if let Some(val) = lookup("ACADEMY_RPC_URL") {
            config.rpc_url = val;
        }

        if let Some(val) = lookup("ACADEMY_PROGRAM_ID") {
            config.program_id = val;
        }

        if let Some(val) = lookup("ACADEMY_COMMITMENT") {
            config.commitment = val;
        }

        if let Some(val) = lookup("ACADEMY_CONFIRM_TIMEOUT_MS") {
            config.confirm_timeout_ms = parse_var("ACADEMY_CONFIRM_TIMEOUT_MS", val)?;
        }

        if let Some(val) = lookup("ACADEMY_CONFIRM_POLL_MS") {
            config.confirm_poll_ms = parse_var("ACADEMY_CONFIRM_POLL_MS", val)?;
        }

        if let Some(val) = lookup("ACADEMY_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("ACADEMY_REQUEST_TIMEOUT_MS", val)?;
        }

        // Error handling
        if let Some(val) = lookup("MAX_RETRIES") {
            config.max_retries = parse_var("MAX_RETRIES", val)?;
        }

        if let Some(val) = lookup("RETRY_DELAY_MS") {
            config.retry_delay_ms = parse_var("RETRY_DELAY_MS", val)?;
        }

        if let Some(val) = lookup("CIRCUIT_BREAKER_THRESHOLD") {
            config.circuit_breaker_threshold = parse_var("CIRCUIT_BREAKER_THRESHOLD", val)?;
        }

        if let Some(val) = lookup("CIRCUIT_BREAKER_RECOVERY_MS") {
            config.circuit_breaker_recovery_ms = parse_var("CIRCUIT_BREAKER_RECOVERY_MS", val)?;
        }

        // Local fallback
        if let Some(val) = lookup("ACADEMY_LOCAL_STORE") {
            config.local_store_path = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("ACADEMY_LOCAL_REWARD_MINT") {
            config.local_reward_mint = val;
        }

        // Debug and logging
        if let Some(val) = lookup("LOG_LEVEL") {
            config.log_level = val;
        }

        if let Some(val) = lookup("METRICS_ENABLED") {
            config.metrics_enabled = val == "1";
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendMode::Rpc && !self.rpc_url.starts_with("http") {
            return Err(ConfigError::ValidationError("ACADEMY_RPC_URL must be a valid HTTP URL".to_string()));
        }

        if !matches!(self.commitment.as_str(), "processed" | "confirmed" | "finalized") {
            return Err(ConfigError::ValidationError(
                "ACADEMY_COMMITMENT must be processed, confirmed or finalized".to_string(),
            ));
        }

        if self.confirm_timeout_ms == 0 || self.confirm_poll_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError("timeouts must be greater than 0".to_string()));
        }

        self.program_id()?;
        self.local_reward_mint()?;
        Ok(())
    }

    pub fn program_id(&self) -> Result<Pubkey, ConfigError> {
        self.program_id
            .parse()
            .map_err(|e| ConfigError::InvalidEnvVar("ACADEMY_PROGRAM_ID".to_string(), format!("{}: {e}", self.program_id)))
    }

    pub fn local_reward_mint(&self) -> Result<Pubkey, ConfigError> {
        self.local_reward_mint.parse().map_err(|e| {
            ConfigError::InvalidEnvVar("ACADEMY_LOCAL_REWARD_MINT".to_string(), format!("{}: {e}", self.local_reward_mint))
        })
    }

    pub fn get_retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn get_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn get_confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn get_request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn get_circuit_breaker_recovery(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_recovery_ms)
    }
}
