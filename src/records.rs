//! Account records owned by the academy program, decoded once at the ledger
//! boundary. Each record is an 8-byte discriminator followed by a Borsh body.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::bitmap::{CAPACITY, LessonBitmap, WORD_COUNT};
use crate::types::Pubkey;

/// Record layout revision these structs decode.
pub const LAYOUT_VERSION: u8 = 1;

pub const TOKEN_ACCOUNT_LEN: usize = 165;
const TOKEN_AMOUNT_OFFSET: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("{record}: account data is {len} bytes, too short")]
    Truncated { record: &'static str, len: usize },
    #[error("{record}: discriminator mismatch")]
    Discriminator { record: &'static str },
    #[error("{record}: {reason}")]
    Malformed { record: &'static str, reason: String },
}

pub fn account_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("account:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// A record type stored behind an Anchor discriminator.
pub trait Record: BorshSerialize + BorshDeserialize + Sized {
    const NAME: &'static str;

    fn discriminator() -> [u8; 8] {
        account_discriminator(Self::NAME)
    }

    fn validate(&self) -> Result<(), RecordError> {
        Ok(())
    }

    fn decode(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() < 8 {
            return Err(RecordError::Truncated { record: Self::NAME, len: data.len() });
        }
        if data[..8] != Self::discriminator() {
            return Err(RecordError::Discriminator { record: Self::NAME });
        }
        // trailing bytes are account padding
        let mut body = &data[8..];
        let record = Self::deserialize(&mut body).map_err(|e| RecordError::Malformed {
            record: Self::NAME,
            reason: e.to_string(),
        })?;
        record.validate()?;
        Ok(record)
    }

    fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let mut out = Self::discriminator().to_vec();
        self.serialize(&mut out).map_err(|e| RecordError::Malformed {
            record: Self::NAME,
            reason: e.to_string(),
        })?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Course {
    pub course_id: String,
    pub creator: Pubkey,
    pub lesson_count: u16,
    pub difficulty: u8,
    pub xp_per_lesson: u32,
    pub track_id: u16,
    pub track_level: u8,
    pub is_active: bool,
    pub created_at: i64,
    pub bump: u8,
}

impl Record for Course {
    const NAME: &'static str = "Course";

    fn validate(&self) -> Result<(), RecordError> {
        if self.lesson_count == 0 || self.lesson_count as usize > CAPACITY {
            return Err(RecordError::Malformed {
                record: Self::NAME,
                reason: format!("lesson_count {} outside 1..={CAPACITY}", self.lesson_count),
            });
        }
        Ok(())
    }
}

impl Course {
    pub fn difficulty(&self) -> Difficulty {
        Difficulty::from_tier(self.difficulty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Other(u8),
}

impl Difficulty {
    pub fn from_tier(tier: u8) -> Self {
        match tier {
            1 => Difficulty::Beginner,
            2 => Difficulty::Intermediate,
            3 => Difficulty::Advanced,
            other => Difficulty::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Enrollment {
    pub course: Pubkey,
    pub enrolled_at: i64,
    pub completed_at: Option<i64>,
    pub lesson_flags: [u64; WORD_COUNT],
    pub bump: u8,
}

impl Record for Enrollment {
    const NAME: &'static str = "Enrollment";
}

impl Enrollment {
    pub fn bitmap(&self) -> LessonBitmap {
        LessonBitmap::from_words(self.lesson_flags.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub authority: Pubkey,
    pub reward_mint: Pubkey,
    pub minter_authority: Pubkey,
    pub bump: u8,
}

impl Record for LedgerConfig {
    const NAME: &'static str = "Config";
}

/// Balance-bearing prefix of a Token-2022 account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccount {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

impl TokenAccount {
    pub fn decode(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() < TOKEN_ACCOUNT_LEN {
            return Err(RecordError::Truncated { record: "TokenAccount", len: data.len() });
        }
        let mut mint = [0u8; 32];
        mint.copy_from_slice(&data[..32]);
        let mut owner = [0u8; 32];
        owner.copy_from_slice(&data[32..64]);
        let mut amount = [0u8; 8];
        amount.copy_from_slice(&data[TOKEN_AMOUNT_OFFSET..TOKEN_AMOUNT_OFFSET + 8]);
        Ok(Self {
            mint: Pubkey::new_from_array(mint),
            owner: Pubkey::new_from_array(owner),
            amount: u64::from_le_bytes(amount),
        })
    }

    /// Initialized account with no extensions.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; TOKEN_ACCOUNT_LEN];
        out[..32].copy_from_slice(self.mint.as_bytes());
        out[32..64].copy_from_slice(self.owner.as_bytes());
        out[TOKEN_AMOUNT_OFFSET..TOKEN_AMOUNT_OFFSET + 8].copy_from_slice(&self.amount.to_le_bytes());
        // account state: initialized
        out[108] = 1;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> Course {
        Course {
            course_id: "solana-101".into(),
            creator: Pubkey::new_from_array([4u8; 32]),
            lesson_count: 5,
            difficulty: 1,
            xp_per_lesson: 50,
            track_id: 2,
            track_level: 1,
            is_active: true,
            created_at: 1_700_000_000,
            bump: 249,
        }
    }

    #[test]
    fn discriminators_follow_anchor_naming() {
        assert_eq!(Course::discriminator(), [206, 6, 78, 228, 163, 138, 241, 106]);
        assert_eq!(Enrollment::discriminator(), [249, 210, 64, 145, 197, 241, 57, 51]);
        assert_eq!(LedgerConfig::discriminator(), [155, 12, 170, 224, 30, 250, 204, 130]);
    }

    #[test]
    fn course_layout() {
        let bytes = course().encode().unwrap();
        // disc + (4 + 10) + 32 + 2 + 1 + 4 + 2 + 1 + 1 + 8 + 1
        assert_eq!(bytes.len(), 8 + 14 + 32 + 2 + 1 + 4 + 2 + 1 + 1 + 8 + 1);
        assert_eq!(&bytes[8..12], &10u32.to_le_bytes());
        assert_eq!(&bytes[12..22], b"solana-101");
        assert_eq!(Course::decode(&bytes).unwrap(), course());
    }

    #[test]
    fn decode_tolerates_trailing_padding() {
        let mut bytes = course().encode().unwrap();
        bytes.extend_from_slice(&[0u8; 40]);
        assert_eq!(Course::decode(&bytes).unwrap().course_id, "solana-101");
    }

    #[test]
    fn decode_rejects_wrong_discriminator() {
        let bytes = course().encode().unwrap();
        assert_eq!(Enrollment::decode(&bytes), Err(RecordError::Discriminator { record: "Enrollment" }));
        assert_eq!(Course::decode(&bytes[..4]), Err(RecordError::Truncated { record: "Course", len: 4 }));
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let bytes = course().encode().unwrap();
        assert!(matches!(Course::decode(&bytes[..20]), Err(RecordError::Malformed { .. })));
    }

    #[test]
    fn decode_rejects_bad_lesson_count() {
        let mut c = course();
        c.lesson_count = 0;
        let bytes = c.encode().unwrap();
        assert!(matches!(Course::decode(&bytes), Err(RecordError::Malformed { .. })));
        c.lesson_count = 257;
        let bytes = c.encode().unwrap();
        assert!(matches!(Course::decode(&bytes), Err(RecordError::Malformed { .. })));
    }

    #[test]
    fn enrollment_bitmap_view() {
        let e = Enrollment {
            course: Pubkey::default(),
            enrolled_at: 1,
            completed_at: None,
            lesson_flags: [0b101, 0, 0, 1],
            bump: 255,
        };
        let decoded = Enrollment::decode(&e.encode().unwrap()).unwrap();
        let bitmap = decoded.bitmap();
        assert!(bitmap.is_complete(0) && bitmap.is_complete(2) && bitmap.is_complete(192));
        assert_eq!(bitmap.count_completed(), 3);
    }

    #[test]
    fn token_account_amount_offset() {
        let account = TokenAccount {
            mint: Pubkey::new_from_array([1u8; 32]),
            owner: Pubkey::new_from_array([2u8; 32]),
            amount: 12_345_678_901,
        };
        let bytes = account.encode();
        assert_eq!(bytes.len(), TOKEN_ACCOUNT_LEN);
        assert_eq!(TokenAccount::decode(&bytes).unwrap(), account);
        assert!(TokenAccount::decode(&bytes[..100]).is_err());
    }

    #[test]
    fn difficulty_tiers() {
        assert_eq!(course().difficulty(), Difficulty::Beginner);
        assert_eq!(Difficulty::from_tier(9), Difficulty::Other(9));
    }
}
