//! Client-side stand-in for the ledger, used when no network program is
//! reachable. Academy instructions in a signed transaction are replayed against
//! a key-value store under the same rules the program enforces, so the
//! orchestrator drives both backends through one code path.
//!
//! State for one learner lives under two keys:
//! `academy:<learner>:lessons:<course_id>` holds the enrollment as JSON and
//! `academy:<learner>:xp` holds the reward balance in decimal. The reward
//! account exists once the xp key does.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::{AddressDeriver, AddressError, ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID};
use crate::bitmap::LessonBitmap;
use crate::instruction::{AcademyInstruction, CREATE_IDEMPOTENT, Instruction};
use crate::ledger::{Account, Confirmation, LedgerBackend, LedgerError};
use crate::records::{Course, Enrollment, LedgerConfig, Record, TokenAccount};
use crate::store::KeyValueStore;
use crate::transaction::Transaction;
use crate::types::{Hash, Pubkey, TxSignature};

/// Rent-exempt balance reported for every synthesized account.
const SYNTHETIC_LAMPORTS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LessonRecord {
    lesson_flags: Vec<u64>,
    enrolled_at: i64,
    completed_at: Option<i64>,
}

struct CatalogEntry {
    course: Course,
    address: Pubkey,
    enrollment: Pubkey,
    enrollment_bump: u8,
}

pub struct LocalLedger {
    store: Arc<dyn KeyValueStore>,
    deriver: AddressDeriver,
    learner: Pubkey,
    reward_mint: Pubkey,
    config_address: (Pubkey, u8),
    reward_account: Pubkey,
    catalog: Vec<CatalogEntry>,
    outcomes: Mutex<HashMap<TxSignature, Confirmation>>,
    commit_lock: Mutex<()>,
}

impl LocalLedger {
    /// Catalog courses whose addresses cannot be derived are left out.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        program_id: Pubkey,
        learner: Pubkey,
        reward_mint: Pubkey,
        catalog: Vec<Course>,
    ) -> Result<Self, AddressError> {
        let deriver = AddressDeriver::new(program_id);
        let config_address = deriver.config()?;
        let reward_account = deriver.reward_account(&learner, &reward_mint)?;
        let mut entries = Vec::with_capacity(catalog.len());
        for mut course in catalog {
            let derived = deriver
                .course(&course.course_id)
                .and_then(|(address, bump)| Ok((address, bump, deriver.enrollment(&course.course_id, &learner)?)));
            match derived {
                Ok((address, bump, (enrollment, enrollment_bump))) => {
                    course.bump = bump;
                    entries.push(CatalogEntry { course, address, enrollment, enrollment_bump });
                }
                Err(e) => warn!(course_id = %course.course_id, error = %e, "skipping catalog course"),
            }
        }
        Ok(Self {
            store,
            deriver,
            learner,
            reward_mint,
            config_address,
            reward_account,
            catalog: entries,
            outcomes: Mutex::new(HashMap::new()),
            commit_lock: Mutex::new(()),
        })
    }

    pub fn learner(&self) -> Pubkey {
        self.learner
    }

    pub fn reward_mint(&self) -> Pubkey {
        self.reward_mint
    }

    fn lessons_key(&self, course_id: &str) -> String {
        format!("academy:{}:lessons:{}", self.learner, course_id)
    }

    fn xp_key(&self) -> String {
        format!("academy:{}:xp", self.learner)
    }

    /// Unreadable entries are treated as absent.
    fn load(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "local store read failed");
                None
            }
        }
    }

    fn entry_by_id(&self, course_id: &str) -> Option<&CatalogEntry> {
        self.catalog.iter().find(|e| e.course.course_id == course_id)
    }

    fn enrollment_record(&self, entry: &CatalogEntry, lessons: &LessonRecord) -> Enrollment {
        Enrollment {
            course: entry.address,
            enrolled_at: lessons.enrolled_at,
            completed_at: lessons.completed_at,
            lesson_flags: LessonBitmap::from_words(lessons.lesson_flags.clone()).to_array(),
            bump: entry.enrollment_bump,
        }
    }

    fn program_account(&self, data: Vec<u8>) -> Account {
        Account { owner: self.deriver.program_id(), lamports: SYNTHETIC_LAMPORTS, data }
    }

    fn config_account(&self) -> Result<Account, LedgerError> {
        let config = LedgerConfig {
            authority: self.learner,
            reward_mint: self.reward_mint,
            minter_authority: self.learner,
            bump: self.config_address.1,
        };
        let data = config.encode().map_err(|e| LedgerError::Malformed(e.to_string()))?;
        Ok(self.program_account(data))
    }

    fn course_account(&self, entry: &CatalogEntry) -> Result<Account, LedgerError> {
        let data = entry.course.encode().map_err(|e| LedgerError::Malformed(e.to_string()))?;
        Ok(self.program_account(data))
    }

    fn enrollment_account(&self, entry: &CatalogEntry, view: &StagedView<'_>) -> Result<Option<Account>, LedgerError> {
        let Some(lessons) = view.lessons(&entry.course.course_id) else {
            return Ok(None);
        };
        let data = self
            .enrollment_record(entry, &lessons)
            .encode()
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        Ok(Some(self.program_account(data)))
    }

    fn reward_token_account(&self, view: &StagedView<'_>) -> Option<Account> {
        let amount = view.xp()?;
        let data = TokenAccount { mint: self.reward_mint, owner: self.learner, amount }.encode();
        Some(Account { owner: TOKEN_2022_PROGRAM_ID, lamports: SYNTHETIC_LAMPORTS, data })
    }

    /// Applies one instruction to the staged view or explains why the program
    /// would refuse it.
    fn apply(&self, view: &mut StagedView<'_>, ix: &Instruction) -> Result<(), String> {
        if ix.program_id == ASSOCIATED_TOKEN_PROGRAM_ID {
            if ix.accounts.get(1).map(|m| m.pubkey) != Some(self.reward_account) {
                return Err("reward account does not belong to this learner".into());
            }
            let exists = view.xp().is_some();
            match ix.data.as_slice() {
                [] if exists => return Err("reward account already exists".into()),
                [CREATE_IDEMPOTENT] if exists => return Ok(()),
                [] | [CREATE_IDEMPOTENT] => {}
                _ => return Err("unsupported associated token instruction".into()),
            }
            view.set_xp(0);
            return Ok(());
        }
        if ix.program_id != self.deriver.program_id() {
            return Err(format!("unsupported program {}", ix.program_id));
        }
        if ix.accounts.get(2).map(|m| m.pubkey) != Some(self.learner) {
            return Err("instruction is not for this learner".into());
        }

        match AcademyInstruction::parse(&ix.data).ok_or("unrecognised instruction")? {
            AcademyInstruction::Enroll { course_id } => {
                let entry = self.entry_by_id(&course_id).ok_or("course not found")?;
                if !entry.course.is_active {
                    return Err("course is not active".into());
                }
                if ix.accounts.get(1).map(|m| m.pubkey) != Some(entry.enrollment) {
                    return Err("enrollment address mismatch".into());
                }
                if view.lessons(&course_id).is_some() {
                    return Err("already enrolled".into());
                }
                let record = LessonRecord { lesson_flags: vec![0; 4], enrolled_at: Utc::now().timestamp(), completed_at: None };
                view.set_lessons(&course_id, record);
                Ok(())
            }
            AcademyInstruction::CompleteLesson { course_id, lesson_index } => {
                let entry = self.entry_by_id(&course_id).ok_or("course not found")?;
                let course = &entry.course;
                let index = lesson_index as usize;
                if index >= course.lesson_count as usize {
                    return Err(format!("lesson {index} out of range for {} lessons", course.lesson_count));
                }
                let mut lessons = view.lessons(&course_id).ok_or("not enrolled")?;
                let bitmap = LessonBitmap::from_words(lessons.lesson_flags.clone());
                if bitmap.is_complete(index) {
                    return Err("lesson already completed".into());
                }
                let balance = view.xp().ok_or("reward account does not exist")?;
                let balance = balance
                    .checked_add(course.xp_per_lesson as u64)
                    .ok_or("reward balance overflow")?;
                let bitmap = bitmap.set_complete(index).map_err(|e| e.to_string())?;
                if bitmap.is_all_complete(course.lesson_count as usize) && lessons.completed_at.is_none() {
                    lessons.completed_at = Some(Utc::now().timestamp());
                }
                lessons.lesson_flags = bitmap.to_array().to_vec();
                view.set_lessons(&course_id, lessons);
                view.set_xp(balance);
                Ok(())
            }
        }
    }
}

/// Reads through pending writes to the store.
struct StagedView<'a> {
    ledger: &'a LocalLedger,
    writes: BTreeMap<String, Vec<u8>>,
}

impl<'a> StagedView<'a> {
    fn new(ledger: &'a LocalLedger) -> Self {
        Self { ledger, writes: BTreeMap::new() }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(value) => Some(value.clone()),
            None => self.ledger.load(key),
        }
    }

    fn lessons(&self, course_id: &str) -> Option<LessonRecord> {
        let key = self.ledger.lessons_key(course_id);
        let bytes = self.get(&key)?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable lesson record");
                None
            }
        }
    }

    fn set_lessons(&mut self, course_id: &str, record: LessonRecord) {
        let key = self.ledger.lessons_key(course_id);
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                self.writes.insert(key, bytes);
            }
            Err(e) => warn!(key, error = %e, "could not encode lesson record"),
        }
    }

    fn xp(&self) -> Option<u64> {
        let key = self.ledger.xp_key();
        let bytes = self.get(&key)?;
        match std::str::from_utf8(&bytes).ok().and_then(|s| s.trim().parse().ok()) {
            Some(balance) => Some(balance),
            None => {
                warn!(key, "ignoring unreadable reward balance");
                None
            }
        }
    }

    fn set_xp(&mut self, balance: u64) {
        self.writes.insert(self.ledger.xp_key(), balance.to_string().into_bytes());
    }
}

#[async_trait]
impl LedgerBackend for LocalLedger {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        let view = StagedView::new(self);
        if *address == self.config_address.0 {
            return self.config_account().map(Some);
        }
        if *address == self.reward_account {
            return Ok(self.reward_token_account(&view));
        }
        for entry in &self.catalog {
            if *address == entry.address {
                return self.course_account(entry).map(Some);
            }
            if *address == entry.enrollment {
                return self.enrollment_account(entry, &view);
            }
        }
        Ok(None)
    }

    async fn program_accounts(&self, program_id: &Pubkey, discriminator: [u8; 8]) -> Result<Vec<(Pubkey, Account)>, LedgerError> {
        if *program_id != self.deriver.program_id() {
            return Ok(Vec::new());
        }
        let view = StagedView::new(self);
        let mut out = Vec::new();
        if discriminator == LedgerConfig::discriminator() {
            out.push((self.config_address.0, self.config_account()?));
        } else if discriminator == Course::discriminator() {
            for entry in &self.catalog {
                out.push((entry.address, self.course_account(entry)?));
            }
        } else if discriminator == Enrollment::discriminator() {
            for entry in &self.catalog {
                if let Some(account) = self.enrollment_account(entry, &view)? {
                    out.push((entry.enrollment, account));
                }
            }
        }
        Ok(out)
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        Ok(Hash::default())
    }

    /// All instructions apply or none do. A failed store write is logged and
    /// leaves the transaction confirmed.
    async fn submit_transaction(&self, transaction: &Transaction) -> Result<TxSignature, LedgerError> {
        if !transaction.verify() {
            return Err(LedgerError::Rejected("signature verification failed".into()));
        }
        if !transaction.message.signer_keys().contains(&self.learner) {
            return Err(LedgerError::Rejected("transaction is not signed by the session learner".into()));
        }
        let instructions = transaction
            .message
            .decompile()
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;
        let signature = transaction.id();

        let _guard = self.commit_lock.lock().map_err(|_| LedgerError::Transport("local ledger lock poisoned".into()))?;
        let mut view = StagedView::new(self);
        for (i, ix) in instructions.iter().enumerate() {
            if let Err(reason) = self.apply(&mut view, ix) {
                debug!(%signature, instruction = i, %reason, "local transaction rejected");
                return Err(LedgerError::Rejected(reason));
            }
        }
        for (key, value) in &view.writes {
            if let Err(e) = self.store.set(key, value) {
                warn!(key, error = %e, "local store write failed");
            }
        }
        info!(%signature, writes = view.writes.len(), "local transaction applied");

        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.insert(signature, Confirmation::Confirmed);
        }
        Ok(signature)
    }

    /// Each outcome is reported once. Asking again, or for a signature this
    /// ledger never applied, gives `Pending`.
    async fn await_confirmation(&self, signature: &TxSignature) -> Result<Confirmation, LedgerError> {
        let mut outcomes = self.outcomes.lock().map_err(|_| LedgerError::Transport("local ledger lock poisoned".into()))?;
        Ok(outcomes.remove(signature).unwrap_or(Confirmation::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction;
    use crate::signing::{KeypairSigner, TransactionSigner};
    use crate::store::MemoryStore;
    use crate::transaction::Message;

    const MINT: Pubkey = Pubkey::new_from_array([9u8; 32]);

    fn course(id: &str, lessons: u16, active: bool) -> Course {
        Course {
            course_id: id.into(),
            creator: Pubkey::default(),
            lesson_count: lessons,
            difficulty: 1,
            xp_per_lesson: 25,
            track_id: 1,
            track_level: 1,
            is_active: active,
            created_at: 1_700_000_000,
            bump: 0,
        }
    }

    fn ledger(signer: &KeypairSigner, store: Arc<dyn KeyValueStore>) -> LocalLedger {
        LocalLedger::new(
            store,
            crate::address::ACADEMY_PROGRAM_ID,
            signer.pubkey(),
            MINT,
            vec![course("intro", 2, true), course("retired", 3, false)],
        )
        .unwrap()
    }

    async fn submit(ledger: &LocalLedger, signer: &KeypairSigner, ixs: Vec<Instruction>) -> Result<TxSignature, LedgerError> {
        let message = Message::compile(&ixs, &signer.pubkey(), Hash::default()).unwrap();
        let tx = Transaction::sign(message, &[signer as &dyn TransactionSigner]).await.unwrap();
        ledger.submit_transaction(&tx).await
    }

    #[tokio::test]
    async fn replays_enroll_and_completion() {
        let signer = KeypairSigner::from_seed([1u8; 32]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = ledger(&signer, store.clone());
        let d = AddressDeriver::default();
        let me = signer.pubkey();

        let sig = submit(&ledger, &signer, vec![instruction::enroll(&d, "intro", &me).unwrap()]).await.unwrap();
        assert_eq!(ledger.await_confirmation(&sig).await.unwrap(), Confirmation::Confirmed);
        assert_eq!(ledger.await_confirmation(&sig).await.unwrap(), Confirmation::Pending);

        let complete = vec![
            instruction::create_reward_account(&d, &me, &me, &MINT).unwrap(),
            instruction::complete_lesson(&d, "intro", 1, &me, &MINT).unwrap(),
        ];
        submit(&ledger, &signer, complete).await.unwrap();

        let (enrollment_address, _) = d.enrollment("intro", &me).unwrap();
        let account = ledger.read_account(&enrollment_address).await.unwrap().unwrap();
        let enrollment = Enrollment::decode(&account.data).unwrap();
        assert_eq!(enrollment.lesson_flags, [0b10, 0, 0, 0]);
        assert_eq!(enrollment.completed_at, None);

        let reward = ledger.read_account(&d.reward_account(&me, &MINT).unwrap()).await.unwrap().unwrap();
        assert_eq!(TokenAccount::decode(&reward.data).unwrap().amount, 25);
        assert_eq!(store.get(&format!("academy:{me}:xp")).unwrap(), Some(b"25".to_vec()));

        submit(&ledger, &signer, vec![instruction::complete_lesson(&d, "intro", 0, &me, &MINT).unwrap()]).await.unwrap();
        let account = ledger.read_account(&enrollment_address).await.unwrap().unwrap();
        assert!(Enrollment::decode(&account.data).unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn rule_violations_are_rejected_without_writes() {
        let signer = KeypairSigner::from_seed([2u8; 32]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = ledger(&signer, store.clone());
        let d = AddressDeriver::default();
        let me = signer.pubkey();

        let inactive = submit(&ledger, &signer, vec![instruction::enroll(&d, "retired", &me).unwrap()]).await;
        assert!(matches!(inactive, Err(LedgerError::Rejected(r)) if r.contains("not active")));
        let unknown = submit(&ledger, &signer, vec![instruction::enroll(&d, "nope", &me).unwrap()]).await;
        assert!(matches!(unknown, Err(LedgerError::Rejected(_))));

        // second instruction fails, so the reward account must not be created
        let batch = vec![
            instruction::create_reward_account(&d, &me, &me, &MINT).unwrap(),
            instruction::complete_lesson(&d, "intro", 0, &me, &MINT).unwrap(),
        ];
        let not_enrolled = submit(&ledger, &signer, batch).await;
        assert!(matches!(not_enrolled, Err(LedgerError::Rejected(r)) if r == "not enrolled"));
        assert_eq!(store.get(&format!("academy:{me}:xp")).unwrap(), None);

        submit(&ledger, &signer, vec![instruction::enroll(&d, "intro", &me).unwrap()]).await.unwrap();
        let again = submit(&ledger, &signer, vec![instruction::enroll(&d, "intro", &me).unwrap()]).await;
        assert!(matches!(again, Err(LedgerError::Rejected(r)) if r == "already enrolled"));

        let no_reward_account = submit(&ledger, &signer, vec![instruction::complete_lesson(&d, "intro", 0, &me, &MINT).unwrap()]).await;
        assert!(matches!(no_reward_account, Err(LedgerError::Rejected(_))));
        let out_of_range = submit(&ledger, &signer, vec![instruction::complete_lesson(&d, "intro", 2, &me, &MINT).unwrap()]).await;
        assert!(matches!(out_of_range, Err(LedgerError::Rejected(r)) if r.contains("out of range")));
    }

    #[tokio::test]
    async fn reward_account_create_variants() {
        let signer = KeypairSigner::from_seed([9u8; 32]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = ledger(&signer, store.clone());
        let d = AddressDeriver::default();
        let me = signer.pubkey();
        let idempotent = instruction::create_reward_account(&d, &me, &me, &MINT).unwrap();
        let mut strict = idempotent.clone();
        strict.data.clear();

        submit(&ledger, &signer, vec![idempotent.clone()]).await.unwrap();
        assert_eq!(store.get(&format!("academy:{me}:xp")).unwrap(), Some(b"0".to_vec()));

        // a second idempotent create is accepted and leaves the balance alone
        submit(&ledger, &signer, vec![instruction::enroll(&d, "intro", &me).unwrap()]).await.unwrap();
        submit(&ledger, &signer, vec![instruction::complete_lesson(&d, "intro", 0, &me, &MINT).unwrap()]).await.unwrap();
        submit(&ledger, &signer, vec![idempotent.clone()]).await.unwrap();
        assert_eq!(store.get(&format!("academy:{me}:xp")).unwrap(), Some(b"25".to_vec()));

        let again = submit(&ledger, &signer, vec![strict]).await;
        assert!(matches!(again, Err(LedgerError::Rejected(r)) if r == "reward account already exists"));
        let mut unknown = idempotent;
        unknown.data = vec![7];
        assert!(matches!(submit(&ledger, &signer, vec![unknown]).await, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn foreign_signer_is_rejected() {
        let learner = KeypairSigner::from_seed([3u8; 32]);
        let stranger = KeypairSigner::from_seed([4u8; 32]);
        let ledger = ledger(&learner, Arc::new(MemoryStore::new()));
        let d = AddressDeriver::default();
        let result = submit(&ledger, &stranger, vec![instruction::enroll(&d, "intro", &stranger.pubkey()).unwrap()]).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn catalog_and_config_are_listed() {
        let signer = KeypairSigner::from_seed([5u8; 32]);
        let ledger = ledger(&signer, Arc::new(MemoryStore::new()));
        let program = crate::address::ACADEMY_PROGRAM_ID;

        let courses = ledger.program_accounts(&program, Course::discriminator()).await.unwrap();
        assert_eq!(courses.len(), 2);
        let (address, account) = &courses[0];
        let decoded = Course::decode(&account.data).unwrap();
        assert_eq!(*address, AddressDeriver::default().course("intro").unwrap().0);
        assert_eq!(decoded.bump, AddressDeriver::default().course("intro").unwrap().1);

        assert!(ledger.program_accounts(&program, Enrollment::discriminator()).await.unwrap().is_empty());
        assert!(ledger.program_accounts(&Pubkey::default(), Course::discriminator()).await.unwrap().is_empty());

        let (config_address, _) = AddressDeriver::default().config().unwrap();
        let config = ledger.read_account(&config_address).await.unwrap().unwrap();
        assert_eq!(LedgerConfig::decode(&config.data).unwrap().reward_mint, MINT);
        assert_eq!(ledger.read_account(&Pubkey::new_from_array([7u8; 32])).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_entries_read_as_absent() {
        let signer = KeypairSigner::from_seed([6u8; 32]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let me = signer.pubkey();
        store.set(&format!("academy:{me}:xp"), b"lots").unwrap();
        store.set(&format!("academy:{me}:lessons:intro"), b"{").unwrap();
        let ledger = ledger(&signer, store);
        let d = AddressDeriver::default();
        assert_eq!(ledger.read_account(&d.reward_account(&me, &MINT).unwrap()).await.unwrap(), None);
        assert_eq!(ledger.read_account(&d.enrollment("intro", &me).unwrap().0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_signature_is_pending() {
        let signer = KeypairSigner::from_seed([8u8; 32]);
        let ledger = ledger(&signer, Arc::new(MemoryStore::new()));
        assert_eq!(ledger.await_confirmation(&TxSignature::default()).await.unwrap(), Confirmation::Pending);
    }
}
