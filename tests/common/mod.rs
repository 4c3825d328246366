#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use academy_ledger::address::{ACADEMY_PROGRAM_ID, AddressDeriver};
use academy_ledger::ledger::{Account, Confirmation, LedgerBackend, LedgerError};
use academy_ledger::local::LocalLedger;
use academy_ledger::records::Course;
use academy_ledger::signing::{KeypairSigner, SignerError, TransactionSigner};
use academy_ledger::store::MemoryStore;
use academy_ledger::transaction::Transaction;
use academy_ledger::types::{Hash, Pubkey, TxSignature};
use academy_ledger::ProgressOrchestrator;

pub const REWARD_MINT: Pubkey = Pubkey::new_from_array([9u8; 32]);

/// What the mock does with the next submitted transaction.
#[derive(Debug, Clone)]
pub enum Submit {
    Accept,
    Reject(&'static str),
    /// Another writer got there first: the state lands, this submission is refused.
    LandThenReject,
    /// Lost before reaching the ledger.
    Timeout,
    /// Applied, but confirmation is never observed.
    LandUnconfirmed,
}

/// Ledger that follows the program's rules (through a [`LocalLedger`]) and
/// lets tests script failures around them.
pub struct MockLedger {
    inner: LocalLedger,
    config_address: Pubkey,
    pub hide_config: AtomicBool,
    script: Mutex<VecDeque<Submit>>,
    read_error: Mutex<Option<LedgerError>>,
    unconfirmed: Mutex<HashSet<TxSignature>>,
    pub submissions: AtomicUsize,
    pub last_instruction_count: AtomicUsize,
}

impl MockLedger {
    pub fn new(learner: Pubkey) -> Self {
        let inner = LocalLedger::new(Arc::new(MemoryStore::new()), ACADEMY_PROGRAM_ID, learner, REWARD_MINT, catalog())
            .expect("catalog derives");
        Self {
            inner,
            config_address: AddressDeriver::default().config().expect("config address").0,
            hide_config: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            read_error: Mutex::new(None),
            unconfirmed: Mutex::new(HashSet::new()),
            submissions: AtomicUsize::new(0),
            last_instruction_count: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, next: Submit) {
        self.script.lock().unwrap().push_back(next);
    }

    pub fn fail_reads_with(&self, error: Option<LedgerError>) {
        *self.read_error.lock().unwrap() = error;
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn injected_read_error(&self) -> Result<(), LedgerError> {
        match self.read_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerBackend for MockLedger {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        self.injected_read_error()?;
        if *address == self.config_address && self.hide_config.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.read_account(address).await
    }

    async fn program_accounts(&self, program_id: &Pubkey, discriminator: [u8; 8]) -> Result<Vec<(Pubkey, Account)>, LedgerError> {
        self.injected_read_error()?;
        self.inner.program_accounts(program_id, discriminator).await
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.injected_read_error()?;
        Ok(Hash([1u8; 32]))
    }

    async fn submit_transaction(&self, transaction: &Transaction) -> Result<TxSignature, LedgerError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.last_instruction_count.store(transaction.message.instructions.len(), Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Submit::Accept);
        match next {
            Submit::Accept => self.inner.submit_transaction(transaction).await,
            Submit::Reject(reason) => Err(LedgerError::Rejected(reason.to_string())),
            Submit::LandThenReject => {
                self.inner.submit_transaction(transaction).await?;
                Err(LedgerError::Rejected("account state changed".into()))
            }
            Submit::Timeout => Err(LedgerError::Timeout),
            Submit::LandUnconfirmed => {
                let signature = self.inner.submit_transaction(transaction).await?;
                self.unconfirmed.lock().unwrap().insert(signature);
                Ok(signature)
            }
        }
    }

    async fn await_confirmation(&self, signature: &TxSignature) -> Result<Confirmation, LedgerError> {
        let unconfirmed = self.unconfirmed.lock().unwrap().contains(signature);
        if unconfirmed {
            return Ok(Confirmation::Pending);
        }
        self.inner.await_confirmation(signature).await
    }
}

pub fn course(id: &str, lesson_count: u16, xp_per_lesson: u32, is_active: bool) -> Course {
    Course {
        course_id: id.to_string(),
        creator: Pubkey::new_from_array([2u8; 32]),
        lesson_count,
        difficulty: 1,
        xp_per_lesson,
        track_id: 1,
        track_level: 1,
        is_active,
        created_at: 1_717_000_000,
        bump: 0,
    }
}

pub fn catalog() -> Vec<Course> {
    vec![
        course("rust-101", 5, 50, true),
        course("solana-201", 3, 100, true),
        course("legacy", 2, 10, false),
    ]
}

pub struct Harness {
    pub signer: KeypairSigner,
    pub ledger: Arc<MockLedger>,
    pub orchestrator: ProgressOrchestrator,
}

pub fn harness(seed: u8) -> Harness {
    let signer = KeypairSigner::from_seed([seed; 32]);
    let ledger = Arc::new(MockLedger::new(signer.pubkey()));
    let orchestrator = ProgressOrchestrator::new(ledger.clone(), AddressDeriver::default());
    Harness { signer, ledger, orchestrator }
}

/// Signer that takes a while to approve, like a person at a wallet prompt.
pub struct SlowSigner {
    pub inner: KeypairSigner,
    pub delay: Duration,
}

#[async_trait]
impl TransactionSigner for SlowSigner {
    fn pubkey(&self) -> Pubkey {
        self.inner.pubkey()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<TxSignature, SignerError> {
        tokio::time::sleep(self.delay).await;
        self.inner.sign_message(message).await
    }
}

pub struct DecliningSigner(pub Pubkey);

#[async_trait]
impl TransactionSigner for DecliningSigner {
    fn pubkey(&self) -> Pubkey {
        self.0
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<TxSignature, SignerError> {
        Err(SignerError::Declined("user closed the prompt".into()))
    }
}
