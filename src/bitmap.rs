//! Lesson completion flags packed into 64-bit words.
//!
//! Every producer and consumer of enrollment state (on-chain records and the
//! local store) uses the same word width. Words missing from a short bitmap
//! read as zero.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WORD_BITS: usize = 64;
pub const WORD_COUNT: usize = 4;
pub const CAPACITY: usize = WORD_BITS * WORD_COUNT;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitmapError {
    #[error("lesson index {index} is outside the bitmap capacity {CAPACITY}")]
    IndexOutOfRange { index: usize },
    #[error("course declares {lesson_count} lessons but a bitmap holds at most {CAPACITY}")]
    CapacityExceeded { lesson_count: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonBitmap {
    words: Vec<u64>,
}

impl LessonBitmap {
    pub fn new() -> Self {
        Self { words: vec![0; WORD_COUNT] }
    }

    /// Wraps words as stored. Extra words past `WORD_COUNT` are kept but never read.
    pub fn from_words(words: Vec<u64>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Fixed-width form for the on-chain layout.
    pub fn to_array(&self) -> [u64; WORD_COUNT] {
        let mut out = [0u64; WORD_COUNT];
        for (slot, word) in out.iter_mut().zip(self.words.iter()) {
            *slot = *word;
        }
        out
    }

    fn word(&self, word_index: usize) -> u64 {
        self.words.get(word_index).copied().unwrap_or(0)
    }

    pub fn is_complete(&self, lesson_index: usize) -> bool {
        if lesson_index >= CAPACITY {
            return false;
        }
        let mask = 1u64 << (lesson_index % WORD_BITS);
        self.word(lesson_index / WORD_BITS) & mask == mask
    }

    /// Returns a copy with the lesson's bit set. Setting a set bit changes nothing;
    /// callers compare with `is_complete` first when a change must be detected.
    pub fn set_complete(&self, lesson_index: usize) -> Result<LessonBitmap, BitmapError> {
        if lesson_index >= CAPACITY {
            return Err(BitmapError::IndexOutOfRange { index: lesson_index });
        }
        let mut words = self.to_array().to_vec();
        words[lesson_index / WORD_BITS] |= 1u64 << (lesson_index % WORD_BITS);
        Ok(LessonBitmap { words })
    }

    pub fn count_completed(&self) -> u32 {
        self.words.iter().take(WORD_COUNT).map(|w| w.count_ones()).sum()
    }

    /// Percentage of `total_lessons` completed; 0 for a non-positive total.
    pub fn progress_percent(&self, total_lessons: i64) -> f64 {
        if total_lessons <= 0 {
            return 0.0;
        }
        100.0 * self.count_completed() as f64 / total_lessons as f64
    }

    pub fn completed_indices(&self, lesson_count: usize) -> Vec<usize> {
        (0..lesson_count.min(CAPACITY)).filter(|&i| self.is_complete(i)).collect()
    }

    pub fn is_all_complete(&self, lesson_count: usize) -> bool {
        lesson_count > 0
            && lesson_count <= CAPACITY
            && (0..lesson_count).all(|i| self.is_complete(i))
    }
}

/// Flags course content that can never reach 100%.
pub fn check_capacity(lesson_count: usize) -> Result<(), BitmapError> {
    if lesson_count > CAPACITY {
        return Err(BitmapError::CapacityExceeded { lesson_count });
    }
    Ok(())
}
