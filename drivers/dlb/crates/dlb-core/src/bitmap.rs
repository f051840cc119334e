//! # Bitmap Allocator
//!
//! Fixed-length bit vector used for contiguous range allocation. A set bit
//! means the slot is free.
//!
//! ```text
//!   bit   0 1 2 3 4 5 6 7 8 9
//!         1 1 0 0 1 1 1 0 1 1
//!                 └─┬─┘
//!   find_set_run(3) = 4, longest_set_run() = 3
//! ```

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

type Word = u64;
const WORD_BITS: u32 = Word::BITS;

fn word_index(bit: u32) -> usize {
    (bit / WORD_BITS) as usize
}

fn bit_mask(bit: u32) -> Word {
    1 << (bit % WORD_BITS)
}

/// Bitmap operation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapError {
    /// Range extends past the end of the bitmap
    Range,
    /// No run of the requested length
    NotFound,
}

impl fmt::Display for BitmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range => write!(f, "bit range out of bounds"),
            Self::NotFound => write!(f, "no contiguous run found"),
        }
    }
}

/// Fixed-length bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapAllocator {
    words: Vec<Word>,
    len: u32,
}

impl BitmapAllocator {
    /// Create a bitmap of `len` bits, all clear
    pub fn new(len: u32) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS) as usize],
            len,
        }
    }

    /// Number of bits
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Zero-length bitmap
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set every bit
    pub fn fill(&mut self) {
        self.words.iter_mut().for_each(|w| *w = Word::MAX);
        self.mask_tail();
    }

    fn mask_tail(&mut self) {
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= bit_mask(tail) - 1;
            }
        }
    }

    fn check_range(&self, base: u32, len: u32) -> Result<(), BitmapError> {
        match base.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(BitmapError::Range),
        }
    }

    /// Set bits `[base, base + len)`
    pub fn set_range(&mut self, base: u32, len: u32) -> Result<(), BitmapError> {
        self.check_range(base, len)?;
        for bit in base..base + len {
            self.words[word_index(bit)] |= bit_mask(bit);
        }
        Ok(())
    }

    /// Clear bits `[base, base + len)`
    pub fn clear_range(&mut self, base: u32, len: u32) -> Result<(), BitmapError> {
        self.check_range(base, len)?;
        for bit in base..base + len {
            self.words[word_index(bit)] &= !bit_mask(bit);
        }
        Ok(())
    }

    /// Whether `bit` is set; out-of-range bits read as clear
    pub fn is_set(&self, bit: u32) -> bool {
        bit < self.len && self.words[word_index(bit)] & bit_mask(bit) != 0
    }

    /// Number of set bits
    pub fn count_set(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Lowest base of `len` contiguous set bits
    pub fn find_set_run(&self, len: u32) -> Result<u32, BitmapError> {
        if len == 0 || len > self.len {
            return Err(BitmapError::NotFound);
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for bit in 0..self.len {
            if self.is_set(bit) {
                if run_len == 0 {
                    run_start = bit;
                }
                run_len += 1;
                if run_len == len {
                    return Ok(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        Err(BitmapError::NotFound)
    }

    /// Length of the longest run of set bits (0 when none)
    pub fn longest_set_run(&self) -> u32 {
        let mut longest = 0;
        let mut run_len = 0;
        for bit in 0..self.len {
            if self.is_set(bit) {
                run_len += 1;
                longest = longest.max(run_len);
            } else {
                run_len = 0;
            }
        }
        longest
    }
}
