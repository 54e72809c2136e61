//! The fixed-length language slice and its rank/unrank bijection.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::dfa::{Dfa, DEAD};
use crate::table::RankTable;
use crate::Error;

/// A regular language restricted to strings of one exact length, with the
/// counting table needed to rank and unrank them.
///
/// Construction is the expensive step (DFA build plus the table); a slice
/// is immutable afterwards and intended to be shared behind an `Arc` and
/// cached per `(pattern, max_len)` pair by callers.
///
/// Ranks are assigned in strict lexicographic order over the DFA's byte
/// alphabet with the natural byte ordering, so `rank` and `unrank` are
/// mutually inverse monotone bijections between the slice and
/// `[0, words_in_slice)`.
#[derive(Clone, Debug)]
pub struct LanguageSlice {
    dfa: Arc<Dfa>,
    max_len: usize,
    table: RankTable,
    words_in_slice: BigUint,
    words_in_language: BigUint,
    capacity: u64,
}

impl LanguageSlice {
    /// Compile `pattern` and slice its language at `max_len`.
    pub fn from_regex(pattern: &str, max_len: usize) -> Result<LanguageSlice, Error> {
        let dfa = Arc::new(Dfa::from_regex(pattern)?);
        LanguageSlice::new(dfa, max_len)
    }

    /// Slice an already-built DFA's language at `max_len`.
    ///
    /// Fails with [`Error::LanguageEmpty`] when the language has no
    /// strings of exactly `max_len` bytes.
    pub fn new(dfa: Arc<Dfa>, max_len: usize) -> Result<LanguageSlice, Error> {
        let table = RankTable::new(&dfa, max_len);

        let words_in_slice = table.count(0, max_len).clone();
        if words_in_slice.is_zero() {
            return Err(Error::LanguageEmpty);
        }
        let mut words_in_language = BigUint::zero();
        for k in 0..=max_len {
            words_in_language += table.count(0, k);
        }

        // One bit below floor(log2): the slack the covertext header needs.
        let capacity = words_in_slice.bits().saturating_sub(2);

        Ok(LanguageSlice {
            dfa,
            max_len,
            table,
            words_in_slice,
            words_in_language,
            capacity,
        })
    }

    /// The exact string length this slice ranks over.
    #[inline]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Number of strings of length exactly `max_len` in the language.
    #[inline]
    pub fn words_in_slice(&self) -> &BigUint {
        &self.words_in_slice
    }

    /// Number of strings of length at most `max_len` in the language.
    #[inline]
    pub fn words_in_language(&self) -> &BigUint {
        &self.words_in_language
    }

    /// Rank of the first length-`max_len` string among all strings of
    /// length at most `max_len`, ordered shortest first.
    pub fn offset(&self) -> BigUint {
        &self.words_in_language - &self.words_in_slice
    }

    /// Payload capacity of one slice member, in bits:
    /// `floor(log2(words_in_slice)) - 1`.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn dfa(&self) -> &Arc<Dfa> {
        &self.dfa
    }

    /// Lexicographic rank of `word` within the slice.
    ///
    /// Walks the DFA once; at every position the counts of all
    /// lexicographically-smaller live branches are accumulated. Fails with
    /// [`Error::NotInLanguage`] when `word` is not exactly `max_len` bytes,
    /// walks into the dead state, or ends in a non-accepting state.
    pub fn rank(&self, word: &[u8]) -> Result<BigUint, Error> {
        if word.len() != self.max_len {
            return Err(Error::NotInLanguage);
        }

        let dfa = &self.dfa;
        let mut rank = BigUint::zero();
        let mut state = 0u32;
        for (pos, &byte) in word.iter().enumerate() {
            let remaining = self.max_len - pos - 1;
            let sym = dfa.symbol(byte).ok_or(Error::NotInLanguage)?;
            for lower in 0..sym {
                let branch = dfa.next(state, lower);
                if branch != DEAD {
                    rank += self.table.count(branch, remaining);
                }
            }
            state = dfa.next(state, sym);
            if state == DEAD {
                return Err(Error::NotInLanguage);
            }
        }
        if !dfa.is_accept(state) {
            return Err(Error::NotInLanguage);
        }
        Ok(rank)
    }

    /// The length-`max_len` string of rank `index`; the inverse of
    /// [`rank`](Self::rank).
    ///
    /// Fails with [`Error::IntegerOutOfRange`] unless
    /// `index < words_in_slice`. Within range the walk cannot get stuck:
    /// at each position the branch counts of the current state sum to the
    /// residual's upper bound, so exactly one branch contains it.
    pub fn unrank(&self, index: &BigUint) -> Result<Vec<u8>, Error> {
        if index >= &self.words_in_slice {
            return Err(Error::IntegerOutOfRange);
        }

        let dfa = &self.dfa;
        let mut residual = index.clone();
        let mut state = 0u32;
        let mut word = Vec::with_capacity(self.max_len);
        for pos in 0..self.max_len {
            let remaining = self.max_len - pos - 1;
            let mut advanced = false;
            for sym in 0..dfa.alphabet().len() as u16 {
                let branch = dfa.next(state, sym);
                if branch == DEAD {
                    continue;
                }
                let count = self.table.count(branch, remaining);
                if &residual < count {
                    word.push(dfa.alphabet()[sym as usize]);
                    state = branch;
                    advanced = true;
                    break;
                }
                residual -= count;
            }
            debug_assert!(advanced, "rank table inconsistent with DFA");
            if !advanced {
                return Err(Error::IntegerOutOfRange);
            }
        }
        debug_assert!(residual.is_zero());
        debug_assert!(dfa.is_accept(state));
        Ok(word)
    }
}
