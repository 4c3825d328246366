use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error_handling::{CircuitBreaker, RetryConfig, Transient, retry_transient};
use crate::ledger::{Account, BackendError, Confirmation, LedgerBackend, LedgerError};
use crate::transaction::Transaction;
use crate::types::{Hash, Pubkey, TxSignature};

/// JSON-RPC code for a transaction that failed simulation before broadcast.
const PREFLIGHT_FAILURE: i64 = -32002;

/// Ledger reached over a Solana-compatible JSON-RPC endpoint.
pub struct RpcLedger {
    client: reqwest::Client,
    url: String,
    commitment: String,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    confirm_timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.get_request_timeout())
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            commitment: config.commitment.clone(),
            retry: RetryConfig::from_config(config),
            breaker: CircuitBreaker::new(config.circuit_breaker_threshold, config.get_circuit_breaker_recovery()),
            confirm_timeout: config.get_confirm_timeout(),
            poll_interval: config.get_confirm_poll_interval(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn circuit_state(&self) -> String {
        self.breaker.get_state()
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, LedgerError> {
        if !self.breaker.can_execute() {
            return Err(LedgerError::CircuitOpen(self.breaker.get_state()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = match self.client.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                self.breaker.record_failure();
                return Err(if e.is_timeout() { LedgerError::Timeout } else { LedgerError::Transport(e.to_string()) });
            }
        };
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            self.breaker.record_failure();
            return Err(LedgerError::Transport(format!("{method}: http {status}")));
        }
        let value: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                self.breaker.record_failure();
                return Err(if e.is_timeout() { LedgerError::Timeout } else { LedgerError::Malformed(e.to_string()) });
            }
        };
        self.breaker.record_success();
        parse_rpc_response(value)
    }

    async fn read(&self, method: &'static str, params: Value) -> Result<Value, LedgerError> {
        retry_transient(&self.retry, method, || self.call(method, params.clone())).await
    }
}

#[async_trait]
impl LedgerBackend for RpcLedger {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        let params = json!([address.to_string(), { "encoding": "base64", "commitment": self.commitment }]);
        let result = self.read("getAccountInfo", params).await?;
        parse_account_info(&result)
    }

    async fn program_accounts(&self, program_id: &Pubkey, discriminator: [u8; 8]) -> Result<Vec<(Pubkey, Account)>, LedgerError> {
        let params = json!([
            program_id.to_string(),
            {
                "encoding": "base64",
                "commitment": self.commitment,
                "filters": [{ "memcmp": { "offset": 0, "bytes": bs58::encode(discriminator).into_string() } }],
            }
        ]);
        let result = self.read("getProgramAccounts", params).await?;
        parse_program_accounts(&result)
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        let params = json!([{ "commitment": self.commitment }]);
        let result = self.read("getLatestBlockhash", params).await?;
        parse_blockhash(&result)
    }

    async fn submit_transaction(&self, transaction: &Transaction) -> Result<TxSignature, LedgerError> {
        let params = json!([
            STANDARD.encode(transaction.serialize()),
            { "encoding": "base64", "preflightCommitment": self.commitment }
        ]);
        let result = self.call("sendTransaction", params).await?;
        result
            .as_str()
            .ok_or_else(|| LedgerError::Malformed("sendTransaction result is not a string".into()))?
            .parse()
            .map_err(|e| LedgerError::Malformed(format!("signature: {e}")))
    }

    async fn await_confirmation(&self, signature: &TxSignature) -> Result<Confirmation, LedgerError> {
        let deadline = Instant::now() + self.confirm_timeout;
        let params = json!([[signature.to_string()], { "searchTransactionHistory": true }]);
        loop {
            match self.call("getSignatureStatuses", params.clone()).await {
                Ok(result) => {
                    if let Some(confirmation) = parse_signature_status(&result, &self.commitment)? {
                        return Ok(confirmation);
                    }
                }
                Err(e) if e.is_transient() => debug!(%e, %signature, "status poll failed"),
                Err(e) => return Err(e),
            }
            if Instant::now() + self.poll_interval > deadline {
                warn!(%signature, timeout_ms = self.confirm_timeout.as_millis() as u64, "confirmation not observed in time");
                return Ok(Confirmation::Pending);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

pub fn parse_rpc_response(value: Value) -> Result<Value, LedgerError> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_string();
        if code == PREFLIGHT_FAILURE {
            return Err(LedgerError::Rejected(message));
        }
        return Err(LedgerError::Rpc { code, message });
    }
    match value {
        Value::Object(mut map) => map.remove("result").ok_or_else(|| LedgerError::Malformed("response without result".into())),
        _ => Err(LedgerError::Malformed("response is not an object".into())),
    }
}

fn parse_key(value: &Value, field: &str) -> Result<Pubkey, LedgerError> {
    value
        .as_str()
        .ok_or_else(|| LedgerError::Malformed(format!("{field} missing")))?
        .parse()
        .map_err(|e| LedgerError::Malformed(format!("{field}: {e}")))
}

fn parse_account(value: &Value) -> Result<Account, LedgerError> {
    let owner = parse_key(&value["owner"], "owner")?;
    let lamports = value["lamports"].as_u64().ok_or_else(|| LedgerError::Malformed("lamports missing".into()))?;
    let encoded = value["data"][0].as_str().ok_or_else(|| LedgerError::Malformed("data missing".into()))?;
    if value["data"][1].as_str() != Some("base64") {
        return Err(LedgerError::Malformed("data is not base64".into()));
    }
    let data = STANDARD.decode(encoded).map_err(|e| LedgerError::Malformed(format!("data: {e}")))?;
    Ok(Account { owner, lamports, data })
}

pub fn parse_account_info(result: &Value) -> Result<Option<Account>, LedgerError> {
    match &result["value"] {
        Value::Null => Ok(None),
        account => parse_account(account).map(Some),
    }
}

pub fn parse_program_accounts(result: &Value) -> Result<Vec<(Pubkey, Account)>, LedgerError> {
    // some nodes wrap the list in a context object
    let list = result.get("value").unwrap_or(result);
    list.as_array()
        .ok_or_else(|| LedgerError::Malformed("program accounts is not a list".into()))?
        .iter()
        .map(|entry| Ok((parse_key(&entry["pubkey"], "pubkey")?, parse_account(&entry["account"])?)))
        .collect()
}

pub fn parse_blockhash(result: &Value) -> Result<Hash, LedgerError> {
    result["value"]["blockhash"]
        .as_str()
        .ok_or_else(|| LedgerError::Malformed("blockhash missing".into()))?
        .parse()
        .map_err(|e| LedgerError::Malformed(format!("blockhash: {e}")))
}

fn commitment_rank(level: &str) -> u8 {
    match level {
        "finalized" => 2,
        "confirmed" => 1,
        _ => 0,
    }
}

/// `None` while the signature is unknown or below the required commitment.
pub fn parse_signature_status(result: &Value, commitment: &str) -> Result<Option<Confirmation>, LedgerError> {
    let status = &result["value"][0];
    if status.is_null() {
        return Ok(None);
    }
    if !status["err"].is_null() {
        return Ok(Some(Confirmation::Failed(status["err"].to_string())));
    }
    let reached = status["confirmationStatus"].as_str().unwrap_or("processed");
    if commitment_rank(reached) >= commitment_rank(commitment) {
        Ok(Some(Confirmation::Confirmed))
    } else {
        Ok(None)
    }
}
