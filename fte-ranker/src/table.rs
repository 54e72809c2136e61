//! Per-state counts of accepted strings, by length.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::dfa::{Dfa, DEAD};

/// `T[q][k]`: the number of strings of length `k` accepted from state `q`.
///
/// Rows are built bottom-up over `k`: row 0 is the accept indicator, and
/// `T[q][k] = Σ_c T[δ(q,c)][k-1]` over the live transitions of `q`. The
/// implicit dead state has no column; its count is zero at every length.
///
/// Counts are exact [`BigUint`]s. For a byte-dense DFA and a long maximum
/// length the table dominates the memory footprint of a language, which
/// is why rows are computed in place rather than via scratch tables.
#[derive(Clone, Debug)]
pub struct RankTable {
    /// `rows[k][q]`, `0 <= k <= max_len`.
    rows: Vec<Vec<BigUint>>,
}

impl RankTable {
    pub fn new(dfa: &Dfa, max_len: usize) -> RankTable {
        let states = dfa.num_states();
        let mut rows = Vec::with_capacity(max_len + 1);

        let row0: Vec<BigUint> = (0..states as u32)
            .map(|q| {
                if dfa.is_accept(q) {
                    BigUint::from(1u8)
                } else {
                    BigUint::zero()
                }
            })
            .collect();
        rows.push(row0);

        for k in 1..=max_len {
            let prev = &rows[k - 1];
            let row: Vec<BigUint> = (0..states as u32)
                .map(|q| {
                    let mut count = BigUint::zero();
                    for sym in 0..dfa.alphabet().len() as u16 {
                        let next = dfa.next(q, sym);
                        if next != DEAD {
                            count += &prev[next as usize];
                        }
                    }
                    count
                })
                .collect();
            rows.push(row);
        }

        RankTable { rows }
    }

    /// `T[q][k]`.
    #[inline]
    pub fn count(&self, state: u32, len: usize) -> &BigUint {
        &self.rows[len][state as usize]
    }

    /// Number of lengths tabulated, i.e. `max_len + 1`.
    #[inline]
    pub fn num_lengths(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_counts_are_powers_of_two() {
        let dfa = Dfa::from_regex("^(0|1)+$").unwrap();
        let table = RankTable::new(&dfa, 16);
        assert!(table.count(0, 0).is_zero());
        for k in 1..=16usize {
            assert_eq!(table.count(0, k), &(BigUint::from(1u8) << k));
        }
    }

    #[test]
    fn lowercase_counts() {
        let dfa = Dfa::from_regex("^[a-z]+$").unwrap();
        let table = RankTable::new(&dfa, 4);
        assert_eq!(table.count(0, 1), &BigUint::from(26u8));
        assert_eq!(table.count(0, 4), &BigUint::from(456_976u32)); // 26^4
    }

    #[test]
    fn words_slice_count() {
        // Length-4 strings of `([a-z]+ )+[a-z]+`: a single space at index
        // 1 or 2, three letters. 2 * 26^3.
        let dfa = Dfa::from_regex("^([a-z]+ )+[a-z]+$").unwrap();
        let table = RankTable::new(&dfa, 4);
        assert_eq!(table.count(0, 4), &BigUint::from(2 * 26u32.pow(3)));
    }
}
