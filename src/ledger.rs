//! The seam between the progress orchestrator and whatever holds the ledger:
//! a JSON-RPC node or the client-side fallback store.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::AddressError;
use crate::config::{BackendMode, Config, ConfigError};
use crate::error_handling::Transient;
use crate::local::LocalLedger;
use crate::records::Course;
use crate::rpc::RpcLedger;
use crate::store::{FileStore, KeyValueStore, MemoryStore, StoreError};
use crate::transaction::Transaction;
use crate::types::{Hash, Pubkey, TxSignature};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("ledger unavailable: {0}")]
    CircuitOpen(String),
    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(_) | LedgerError::Timeout | LedgerError::Rpc { .. } | LedgerError::CircuitOpen(_)
        )
    }
}

/// Raw account as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Failed(String),
    /// Not observed within the wait budget. It may still land.
    Pending,
}

#[async_trait]
pub trait LedgerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError>;

    /// Accounts owned by `program_id` whose data starts with `discriminator`.
    async fn program_accounts(&self, program_id: &Pubkey, discriminator: [u8; 8]) -> Result<Vec<(Pubkey, Account)>, LedgerError>;

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Sends a signed transaction once. Never retried by the backend.
    async fn submit_transaction(&self, transaction: &Transaction) -> Result<TxSignature, LedgerError>;

    async fn await_confirmation(&self, signature: &TxSignature) -> Result<Confirmation, LedgerError>;
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("http client: {0}")]
    Client(String),
}

/// Builds the backend selected by `config.backend`. `learner` and `catalog`
/// seed the local fallback, which has no network to read them from.
pub fn backend_from_config(config: &Config, learner: Pubkey, catalog: Vec<Course>) -> Result<Arc<dyn LedgerBackend>, BackendError> {
    config.validate()?;
    match config.backend {
        BackendMode::Rpc => Ok(Arc::new(RpcLedger::new(config)?)),
        BackendMode::Local => {
            let store: Arc<dyn KeyValueStore> = match &config.local_store_path {
                Some(path) => Arc::new(FileStore::open(path)?),
                None => Arc::new(MemoryStore::new()),
            };
            let program_id = config.program_id()?;
            let reward_mint = config.local_reward_mint()?;
            Ok(Arc::new(LocalLedger::new(store, program_id, learner, reward_mint, catalog)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LedgerError::Timeout.is_transient());
        assert!(LedgerError::Transport("reset".into()).is_transient());
        assert!(LedgerError::Rpc { code: -32005, message: "busy".into() }.is_transient());
        assert!(!LedgerError::Rejected("custom program error".into()).is_transient());
        assert!(!LedgerError::Malformed("bad base64".into()).is_transient());
    }

    #[test]
    fn local_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            backend: BackendMode::Local,
            local_store_path: Some(dir.path().join("progress.json")),
            ..Config::default()
        };
        let backend = backend_from_config(&config, Pubkey::new_from_array([4u8; 32]), Vec::new()).unwrap();
        assert_eq!(backend.name(), "local");
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = Config { commitment: "soon".into(), ..Config::default() };
        assert!(matches!(
            backend_from_config(&config, Pubkey::default(), Vec::new()),
            Err(BackendError::Config(_))
        ));
    }
}
