use borsh::BorshDeserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::address::{AddressDeriver, AddressError, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID, TOKEN_2022_PROGRAM_ID};
use crate::types::Pubkey;

/// Associated-token-program `CreateIdempotent`: succeeds when the account already exists.
pub const CREATE_IDEMPOTENT: u8 = 1;

#[derive(Error, Debug)]
pub enum InstructionError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("failed to encode instruction data: {0}")]
    Encode(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: Pubkey, is_signer: bool) -> Self {
        Self { pubkey, is_signer, is_writable: true }
    }
    pub fn readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self { pubkey, is_signer, is_writable: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn enroll_data(course_id: &str) -> Result<Vec<u8>, InstructionError> {
    let mut data = instruction_discriminator("enroll").to_vec();
    borsh::to_writer(&mut data, course_id)?;
    Ok(data)
}

fn complete_lesson_data(course_id: &str, lesson_index: u8) -> Result<Vec<u8>, InstructionError> {
    let mut data = instruction_discriminator("complete_lesson").to_vec();
    borsh::to_writer(&mut data, course_id)?;
    borsh::to_writer(&mut data, &lesson_index)?;
    Ok(data)
}

pub fn enroll(deriver: &AddressDeriver, course_id: &str, learner: &Pubkey) -> Result<Instruction, InstructionError> {
    let (course, _) = deriver.course(course_id)?;
    let (enrollment, _) = deriver.enrollment(course_id, learner)?;
    Ok(Instruction {
        program_id: deriver.program_id(),
        accounts: vec![
            AccountMeta::readonly(course, false),
            AccountMeta::writable(enrollment, false),
            AccountMeta::writable(*learner, true),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data: enroll_data(course_id)?,
    })
}

pub fn complete_lesson(
    deriver: &AddressDeriver,
    course_id: &str,
    lesson_index: u8,
    learner: &Pubkey,
    reward_mint: &Pubkey,
) -> Result<Instruction, InstructionError> {
    let (course, _) = deriver.course(course_id)?;
    let (enrollment, _) = deriver.enrollment(course_id, learner)?;
    let (minter_role, _) = deriver.minter_role(learner)?;
    let reward_account = deriver.reward_account(learner, reward_mint)?;
    Ok(Instruction {
        program_id: deriver.program_id(),
        accounts: vec![
            AccountMeta::readonly(course, false),
            AccountMeta::writable(enrollment, false),
            AccountMeta::writable(*learner, true),
            AccountMeta::readonly(minter_role, false),
            AccountMeta::writable(*reward_mint, false),
            AccountMeta::writable(reward_account, false),
            AccountMeta::readonly(TOKEN_2022_PROGRAM_ID, false),
        ],
        data: complete_lesson_data(course_id, lesson_index)?,
    })
}

/// Creates the owner's reward account, or does nothing if it already exists.
pub fn create_reward_account(deriver: &AddressDeriver, payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Result<Instruction, AddressError> {
    let account = deriver.reward_account(owner, mint)?;
    Ok(Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::writable(*payer, true),
            AccountMeta::writable(account, false),
            AccountMeta::readonly(*owner, false),
            AccountMeta::readonly(*mint, false),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::readonly(TOKEN_2022_PROGRAM_ID, false),
        ],
        data: vec![CREATE_IDEMPOTENT],
    })
}

/// Academy instructions recognised when replaying a transaction locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcademyInstruction {
    Enroll { course_id: String },
    CompleteLesson { course_id: String, lesson_index: u8 },
}

impl AcademyInstruction {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let (tag, mut rest) = data.split_at(8);
        if tag == instruction_discriminator("enroll").as_slice() {
            let course_id = String::deserialize_reader(&mut rest).ok()?;
            Some(AcademyInstruction::Enroll { course_id })
        } else if tag == instruction_discriminator("complete_lesson").as_slice() {
            let course_id = String::deserialize_reader(&mut rest).ok()?;
            let lesson_index = u8::deserialize_reader(&mut rest).ok()?;
            Some(AcademyInstruction::CompleteLesson { course_id, lesson_index })
        } else {
            None
        }
    }
}
