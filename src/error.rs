use thiserror::Error;

use crate::address::AddressError;
use crate::bitmap::BitmapError;
use crate::error_handling::Transient;
use crate::instruction::InstructionError;
use crate::ledger::LedgerError;
use crate::metrics::ErrorType;
use crate::records::RecordError;
use crate::signing::SignerError;
use crate::transaction::TransactionError;
use crate::types::{Pubkey, TxSignature};

/// How a caller should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong. Nothing was submitted.
    Validation,
    /// Worth retrying the whole operation.
    Transient,
    Fatal,
    /// The signer declined. Nothing was submitted.
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Bitmap(#[from] BitmapError),
    #[error("course {0} not found")]
    CourseNotFound(String),
    #[error("course {0} is not active")]
    CourseInactive(String),
    #[error("lesson {index} out of range for course {course_id} with {lesson_count} lessons")]
    LessonOutOfRange { course_id: String, index: usize, lesson_count: u16 },
    #[error("not enrolled in course {0}")]
    NotEnrolled(String),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("transaction {} failed: {reason}", display_signature(.signature))]
    TransactionFailed { signature: Option<TxSignature>, reason: String },
    #[error("program config account {0} does not exist")]
    ConfigMissing(Pubkey),
    #[error("reward account {address} is not usable: {reason}")]
    RewardAccountInaccessible { address: Pubkey, reason: String },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Instruction(#[from] InstructionError),
}

fn display_signature(signature: &Option<TxSignature>) -> String {
    match signature {
        Some(s) => s.to_string(),
        None => "<unsent>".to_string(),
    }
}

impl ProgressError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProgressError::Address(_)
            | ProgressError::Bitmap(_)
            | ProgressError::CourseNotFound(_)
            | ProgressError::CourseInactive(_)
            | ProgressError::LessonOutOfRange { .. }
            | ProgressError::NotEnrolled(_)
            | ProgressError::Transaction(_)
            | ProgressError::Instruction(_) => ErrorKind::Validation,
            ProgressError::Signer(SignerError::Declined(_)) => ErrorKind::Cancelled,
            ProgressError::Signer(SignerError::InvalidKey(_)) => ErrorKind::Validation,
            ProgressError::Ledger(e) if e.is_transient() => ErrorKind::Transient,
            ProgressError::Ledger(_)
            | ProgressError::TransactionFailed { .. }
            | ProgressError::ConfigMissing(_)
            | ProgressError::RewardAccountInaccessible { .. }
            | ProgressError::Record(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn metric_type(&self) -> ErrorType {
        match self.kind() {
            ErrorKind::Validation => ErrorType::Validation,
            ErrorKind::Transient => ErrorType::Transient,
            ErrorKind::Fatal => ErrorType::Fatal,
            ErrorKind::Cancelled => ErrorType::SigningDeclined,
        }
    }
}
