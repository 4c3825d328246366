//! Enrollment, lesson completion and reward reads, composed over a
//! [`LedgerBackend`].
//!
//! Every mutating operation reads first and submits only when the target
//! state is missing, so repeating a call is safe. Conflicts come back as
//! outcome variants, not errors. No state is cached between calls; a caller
//! that caches must refresh after a mutation.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::{AddressDeriver, TOKEN_2022_PROGRAM_ID};
use crate::bitmap::{BitmapError, CAPACITY};
use crate::error::ProgressError;
use crate::instruction::{self, Instruction};
use crate::ledger::{Confirmation, LedgerBackend, LedgerError};
use crate::level::LevelSummary;
use crate::metrics::{MetricsCollector, SubmissionResult};
use crate::records::{Course, Enrollment, LedgerConfig, Record, TokenAccount};
use crate::signing::TransactionSigner;
use crate::transaction::{Message, Transaction};
use crate::types::{Pubkey, TxSignature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnrollOutcome {
    Enrolled { signature: TxSignature },
    AlreadyEnrolled,
    /// Submitted but not confirmed in time. Re-read before retrying.
    Pending { signature: TxSignature },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionOutcome {
    Completed { signature: TxSignature, reward: u32 },
    AlreadyCompleted,
    Pending { signature: TxSignature },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RewardAccountOutcome {
    Created { signature: TxSignature },
    AlreadyExists,
    Pending { signature: TxSignature },
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseProgress {
    pub course: Course,
    pub enrollment: Enrollment,
    pub completed_lessons: u32,
    pub total_lessons: u16,
    pub percent: f64,
    pub is_completed: bool,
    pub completed_indices: Vec<usize>,
}

enum Submitted {
    Confirmed(TxSignature),
    Pending(TxSignature),
    Rejected { signature: TxSignature, reason: String },
}

pub struct ProgressOrchestrator {
    ledger: Arc<dyn LedgerBackend>,
    deriver: AddressDeriver,
    metrics: Arc<MetricsCollector>,
}

impl ProgressOrchestrator {
    pub fn new(ledger: Arc<dyn LedgerBackend>, deriver: AddressDeriver) -> Self {
        Self { ledger, deriver, metrics: Arc::new(MetricsCollector::new()) }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn backend_name(&self) -> &'static str {
        self.ledger.name()
    }

    fn observe<T>(&self, operation: &str, result: Result<T, ProgressError>) -> Result<T, ProgressError> {
        if let Err(e) = &result {
            self.metrics.record_error(e.metric_type());
            warn!(operation, kind = ?e.kind(), error = %e, "operation failed");
        }
        result
    }

    pub async fn fetch_config(&self) -> Result<LedgerConfig, ProgressError> {
        let (address, _) = self.deriver.config()?;
        let account = self
            .ledger
            .read_account(&address)
            .await?
            .ok_or(ProgressError::ConfigMissing(address))?;
        Ok(LedgerConfig::decode(&account.data)?)
    }

    pub async fn get_course(&self, course_id: &str) -> Result<Option<Course>, ProgressError> {
        let (address, _) = self.deriver.course(course_id)?;
        match self.ledger.read_account(&address).await? {
            Some(account) => Ok(Some(Course::decode(&account.data)?)),
            None => Ok(None),
        }
    }

    pub async fn get_enrollment(&self, course_id: &str, learner: &Pubkey) -> Result<Option<Enrollment>, ProgressError> {
        let (address, _) = self.deriver.enrollment(course_id, learner)?;
        match self.ledger.read_account(&address).await? {
            Some(account) => Ok(Some(Enrollment::decode(&account.data)?)),
            None => Ok(None),
        }
    }

    async fn all_courses(&self) -> Result<Vec<Course>, ProgressError> {
        let program_id = self.deriver.program_id();
        let accounts = self.ledger.program_accounts(&program_id, Course::discriminator()).await?;
        let mut courses = Vec::with_capacity(accounts.len());
        for (address, account) in accounts {
            match Course::decode(&account.data) {
                Ok(course) => courses.push(course),
                Err(e) => warn!(%address, error = %e, "skipping undecodable course record"),
            }
        }
        courses.sort_by(|a, b| a.course_id.cmp(&b.course_id));
        Ok(courses)
    }

    /// Active courses ordered by id.
    pub async fn list_courses(&self) -> Result<Vec<Course>, ProgressError> {
        let mut courses = self.all_courses().await?;
        courses.retain(|c| c.is_active);
        Ok(courses)
    }

    async fn active_course(&self, course_id: &str) -> Result<Course, ProgressError> {
        let course = self
            .get_course(course_id)
            .await?
            .ok_or_else(|| ProgressError::CourseNotFound(course_id.to_string()))?;
        if !course.is_active {
            return Err(ProgressError::CourseInactive(course_id.to_string()));
        }
        Ok(course)
    }

    /// The learner's reward token account, checked against the expected
    /// owner and mint.
    async fn read_reward_account(&self, learner: &Pubkey, mint: &Pubkey) -> Result<Option<TokenAccount>, ProgressError> {
        let address = self.deriver.reward_account(learner, mint)?;
        let Some(account) = self.ledger.read_account(&address).await? else {
            return Ok(None);
        };
        let inaccessible = |reason: String| ProgressError::RewardAccountInaccessible { address, reason };
        if account.owner != TOKEN_2022_PROGRAM_ID {
            return Err(inaccessible(format!("owned by {}", account.owner)));
        }
        let token = TokenAccount::decode(&account.data).map_err(|e| inaccessible(e.to_string()))?;
        if token.mint != *mint || token.owner != *learner {
            return Err(inaccessible("mint or owner mismatch".to_string()));
        }
        Ok(Some(token))
    }

    async fn submit_and_confirm(&self, instructions: &[Instruction], signer: &dyn TransactionSigner) -> Result<Submitted, ProgressError> {
        let blockhash = self.ledger.latest_blockhash().await?;
        let message = Message::compile(instructions, &signer.pubkey(), blockhash)?;
        let transaction = Transaction::sign(message, &[signer]).await?;
        let signature = transaction.id();
        let started = Instant::now();

        let submitted = match self.ledger.submit_transaction(&transaction).await {
            Ok(signature) => match self.ledger.await_confirmation(&signature).await {
                Ok(Confirmation::Confirmed) => Submitted::Confirmed(signature),
                Ok(Confirmation::Failed(reason)) => Submitted::Rejected { signature, reason },
                Ok(Confirmation::Pending) => Submitted::Pending(signature),
                Err(e) => {
                    debug!(%signature, error = %e, "confirmation check failed");
                    Submitted::Pending(signature)
                }
            },
            Err(LedgerError::Rejected(reason)) => Submitted::Rejected { signature, reason },
            // the request may have reached the ledger
            Err(LedgerError::Timeout | LedgerError::Transport(_) | LedgerError::Malformed(_)) => Submitted::Pending(signature),
            Err(e) => return Err(e.into()),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &submitted {
            Submitted::Confirmed(signature) => {
                self.metrics.record_submission(elapsed_ms, SubmissionResult::Confirmed);
                info!(%signature, elapsed_ms, backend = self.ledger.name(), "transaction confirmed");
            }
            Submitted::Pending(signature) => {
                self.metrics.record_submission(elapsed_ms, SubmissionResult::Pending);
                warn!(%signature, elapsed_ms, "transaction not confirmed, state must be re-read");
            }
            Submitted::Rejected { signature, reason } => {
                self.metrics.record_submission(elapsed_ms, SubmissionResult::Failed);
                warn!(%signature, %reason, "transaction rejected");
            }
        }
        Ok(submitted)
    }

    pub async fn enroll(&self, course_id: &str, signer: &dyn TransactionSigner) -> Result<EnrollOutcome, ProgressError> {
        let result = self.try_enroll(course_id, signer).await;
        self.observe("enroll", result)
    }

    async fn try_enroll(&self, course_id: &str, signer: &dyn TransactionSigner) -> Result<EnrollOutcome, ProgressError> {
        let learner = signer.pubkey();
        let enroll = instruction::enroll(&self.deriver, course_id, &learner)?;
        self.active_course(course_id).await?;

        if self.get_enrollment(course_id, &learner).await?.is_some() {
            self.metrics.record_idempotent_skip();
            debug!(course_id, %learner, "already enrolled");
            return Ok(EnrollOutcome::AlreadyEnrolled);
        }

        match self.submit_and_confirm(&[enroll], signer).await? {
            Submitted::Confirmed(signature) => {
                info!(course_id, %learner, %signature, "enrolled");
                Ok(EnrollOutcome::Enrolled { signature })
            }
            Submitted::Pending(signature) => Ok(EnrollOutcome::Pending { signature }),
            Submitted::Rejected { signature, reason } => {
                if self.get_enrollment(course_id, &learner).await?.is_some() {
                    self.metrics.record_idempotent_skip();
                    return Ok(EnrollOutcome::AlreadyEnrolled);
                }
                Err(ProgressError::TransactionFailed { signature: Some(signature), reason })
            }
        }
    }

    /// Marks one lesson complete and pays its reward in a single transaction,
    /// creating the reward account first when it does not exist yet.
    pub async fn complete_lesson(
        &self,
        course_id: &str,
        lesson_index: usize,
        signer: &dyn TransactionSigner,
    ) -> Result<CompletionOutcome, ProgressError> {
        let result = self.try_complete_lesson(course_id, lesson_index, signer).await;
        self.observe("complete_lesson", result)
    }

    async fn try_complete_lesson(
        &self,
        course_id: &str,
        lesson_index: usize,
        signer: &dyn TransactionSigner,
    ) -> Result<CompletionOutcome, ProgressError> {
        if lesson_index >= CAPACITY {
            return Err(BitmapError::IndexOutOfRange { index: lesson_index }.into());
        }
        let learner = signer.pubkey();
        self.deriver.enrollment(course_id, &learner)?;

        let config = self.fetch_config().await?;
        let course = self.active_course(course_id).await?;
        if lesson_index >= course.lesson_count as usize {
            return Err(ProgressError::LessonOutOfRange {
                course_id: course_id.to_string(),
                index: lesson_index,
                lesson_count: course.lesson_count,
            });
        }
        let enrollment = self
            .get_enrollment(course_id, &learner)
            .await?
            .ok_or_else(|| ProgressError::NotEnrolled(course_id.to_string()))?;

        if enrollment.bitmap().is_complete(lesson_index) {
            self.metrics.record_idempotent_skip();
            debug!(course_id, lesson_index, %learner, "lesson already completed");
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        let mint = config.reward_mint;
        let mut instructions = Vec::with_capacity(2);
        if self.read_reward_account(&learner, &mint).await?.is_none() {
            instructions.push(instruction::create_reward_account(&self.deriver, &learner, &learner, &mint)?);
        }
        // lesson_index < lesson_count <= 256, so it fits the u8 argument
        instructions.push(instruction::complete_lesson(&self.deriver, course_id, lesson_index as u8, &learner, &mint)?);

        match self.submit_and_confirm(&instructions, signer).await? {
            Submitted::Confirmed(signature) => {
                self.metrics.record_reward(course.xp_per_lesson as u64);
                info!(course_id, lesson_index, %learner, reward = course.xp_per_lesson, %signature, "lesson completed");
                Ok(CompletionOutcome::Completed { signature, reward: course.xp_per_lesson })
            }
            Submitted::Pending(signature) => Ok(CompletionOutcome::Pending { signature }),
            Submitted::Rejected { signature, reason } => {
                let landed = self
                    .get_enrollment(course_id, &learner)
                    .await?
                    .is_some_and(|e| e.bitmap().is_complete(lesson_index));
                if landed {
                    self.metrics.record_idempotent_skip();
                    return Ok(CompletionOutcome::AlreadyCompleted);
                }
                Err(ProgressError::TransactionFailed { signature: Some(signature), reason })
            }
        }
    }

    /// Zero when the reward account does not exist yet.
    pub async fn reward_balance(&self, learner: &Pubkey) -> Result<u64, ProgressError> {
        let config = self.fetch_config().await?;
        let token = self.read_reward_account(learner, &config.reward_mint).await?;
        Ok(token.map_or(0, |t| t.amount))
    }

    pub async fn level(&self, learner: &Pubkey) -> Result<LevelSummary, ProgressError> {
        Ok(LevelSummary::for_balance(self.reward_balance(learner).await?))
    }

    /// One entry per course the learner is enrolled in, inactive courses
    /// included. Courses without an enrollment are left out.
    pub async fn progress(&self, learner: &Pubkey) -> Result<Vec<CourseProgress>, ProgressError> {
        let mut out = Vec::new();
        for course in self.all_courses().await? {
            let Some(enrollment) = self.get_enrollment(&course.course_id, learner).await? else {
                continue;
            };
            let bitmap = enrollment.bitmap();
            let lesson_count = course.lesson_count as usize;
            out.push(CourseProgress {
                completed_lessons: bitmap.count_completed(),
                total_lessons: course.lesson_count,
                percent: bitmap.progress_percent(course.lesson_count as i64),
                is_completed: enrollment.completed_at.is_some() || bitmap.is_all_complete(lesson_count),
                completed_indices: bitmap.completed_indices(lesson_count),
                course,
                enrollment,
            });
        }
        Ok(out)
    }

    pub async fn ensure_reward_account(&self, signer: &dyn TransactionSigner) -> Result<RewardAccountOutcome, ProgressError> {
        let result = self.try_ensure_reward_account(signer).await;
        self.observe("ensure_reward_account", result)
    }

    async fn try_ensure_reward_account(&self, signer: &dyn TransactionSigner) -> Result<RewardAccountOutcome, ProgressError> {
        let learner = signer.pubkey();
        let mint = self.fetch_config().await?.reward_mint;
        if self.read_reward_account(&learner, &mint).await?.is_some() {
            self.metrics.record_idempotent_skip();
            return Ok(RewardAccountOutcome::AlreadyExists);
        }

        let create = instruction::create_reward_account(&self.deriver, &learner, &learner, &mint)?;
        match self.submit_and_confirm(&[create], signer).await? {
            Submitted::Confirmed(signature) => {
                info!(%learner, %signature, "reward account created");
                Ok(RewardAccountOutcome::Created { signature })
            }
            Submitted::Pending(signature) => Ok(RewardAccountOutcome::Pending { signature }),
            Submitted::Rejected { signature, reason } => {
                if self.read_reward_account(&learner, &mint).await?.is_some() {
                    self.metrics.record_idempotent_skip();
                    return Ok(RewardAccountOutcome::AlreadyExists);
                }
                Err(ProgressError::TransactionFailed { signature: Some(signature), reason })
            }
        }
    }
}
