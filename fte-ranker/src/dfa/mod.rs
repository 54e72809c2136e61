/*!
Minimized byte-level DFAs and their transducer-listing interchange form.
*/

use std::collections::HashMap;
use std::fmt;

use crate::Error;

mod compile;

/// Sentinel for the implicit dead state.
///
/// The dead state is total (every unlisted transition leads to it, every
/// transition out of it loops) but is never materialised: it has no row in
/// the transition table and no entry in any rank table.
pub const DEAD: u32 = u32::MAX;

const NO_SYMBOL: u16 = u16::MAX;

/// A minimized deterministic finite automaton over a byte alphabet.
///
/// States are numbered `0..num_states` with `0` the start state. The
/// alphabet is the ascending set of byte values the pattern can consume;
/// transitions are stored densely per `(state, symbol)` pair with [`DEAD`]
/// marking the implicit dead state. Immutable after construction.
///
/// A `Dfa` is built either from a pattern ([`Dfa::from_regex`]) or from a
/// line-oriented transducer listing ([`Dfa::from_att`]). Both routes
/// produce the same renumbering: states appear in breadth-first order from
/// the start, so compilation is deterministic for a given input.
#[derive(Clone)]
pub struct Dfa {
    /// Ascending byte values with at least one live transition.
    alphabet: Vec<u8>,
    /// Byte value to alphabet index, `NO_SYMBOL` when absent.
    symbol_index: Box<[u16; 256]>,
    /// Row-major `num_states x alphabet.len()`, `DEAD` for dead moves.
    transitions: Vec<u32>,
    accept: Vec<bool>,
}

impl Dfa {
    /// Compile `pattern` into a minimized DFA.
    ///
    /// The pattern is parsed with the restricted byte-oriented syntax,
    /// determinised and minimized, rendered to the transducer listing, and
    /// the listing parsed back. The listing is the interchange point: what
    /// this returns is exactly `Dfa::from_att(&att_from_regex(pattern)?)`.
    pub fn from_regex(pattern: &str) -> Result<Dfa, Error> {
        let listing = compile::att_from_regex(pattern)?;
        Dfa::from_att(&listing)
    }

    /// Parse a line-oriented transducer listing.
    ///
    /// Two line shapes are accepted: whitespace-separated
    /// `src dst symbol symbol` for a transition (symbols are decimal byte
    /// values; input and output symbol must agree), and a bare `src` for
    /// an accepting state. The start state is the first field of the first
    /// line. Any `(state, symbol)` pair without a listed transition moves
    /// to the implicit dead state.
    ///
    /// States keep the listing's breadth-first numbering except that they
    /// are remapped to a dense `0..n` range with the start state at `0`.
    pub fn from_att(listing: &str) -> Result<Dfa, Error> {
        let mut edges: Vec<(u32, u32, u8)> = Vec::new();
        let mut accepts: Vec<u32> = Vec::new();
        let mut start: Option<u32> = None;

        for (lineno, line) in listing.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let parse_state = |field: &str| {
                field.parse::<u32>().map_err(|_| Error::InvalidListing {
                    line: lineno + 1,
                    reason: format!("bad state id {field:?}"),
                })
            };
            match *fields.as_slice() {
                [src] => {
                    let src = parse_state(src)?;
                    start.get_or_insert(src);
                    accepts.push(src);
                }
                [src, dst, input, output] => {
                    let src = parse_state(src)?;
                    let dst = parse_state(dst)?;
                    if input != output {
                        return Err(Error::InvalidListing {
                            line: lineno + 1,
                            reason: "transducer is not an acceptor".into(),
                        });
                    }
                    let symbol = input.parse::<u8>().map_err(|_| {
                        Error::InvalidListing {
                            line: lineno + 1,
                            reason: format!("bad symbol {input:?}"),
                        }
                    })?;
                    start.get_or_insert(src);
                    edges.push((src, dst, symbol));
                }
                _ => {
                    return Err(Error::InvalidListing {
                        line: lineno + 1,
                        reason: format!("expected 1 or 4 fields, got {}", fields.len()),
                    });
                }
            }
        }

        // An empty listing is the empty language: a lone, non-accepting
        // start state.
        let start = start.unwrap_or(0);
        Ok(Dfa::build(start, &edges, &accepts))
    }

    /// Assemble a `Dfa` from raw edges, renumbering states breadth-first
    /// from `start` and dropping anything unreachable.
    fn build(start: u32, edges: &[(u32, u32, u8)], accepts: &[u32]) -> Dfa {
        let mut alphabet: Vec<u8> = edges.iter().map(|&(_, _, s)| s).collect();
        alphabet.sort_unstable();
        alphabet.dedup();

        let mut symbol_index = Box::new([NO_SYMBOL; 256]);
        for (i, &byte) in alphabet.iter().enumerate() {
            symbol_index[byte as usize] = i as u16;
        }

        // Outgoing adjacency in (external id) space.
        let mut outgoing: HashMap<u32, Vec<(u16, u32)>> = HashMap::new();
        for &(src, dst, symbol) in edges {
            let sym = symbol_index[symbol as usize];
            outgoing.entry(src).or_default().push((sym, dst));
        }

        // Breadth-first renumbering, symbols in ascending order so the
        // result is independent of edge order in the listing.
        let mut renumber: HashMap<u32, u32> = HashMap::new();
        let mut order: Vec<u32> = Vec::new();
        renumber.insert(start, 0);
        order.push(start);
        let mut head = 0;
        while head < order.len() {
            let state = order[head];
            head += 1;
            let mut moves = outgoing.get(&state).cloned().unwrap_or_default();
            moves.sort_unstable();
            for (_, dst) in moves {
                if !renumber.contains_key(&dst) {
                    renumber.insert(dst, order.len() as u32);
                    order.push(dst);
                }
            }
        }

        let num_states = order.len();
        let width = alphabet.len();
        let mut transitions = vec![DEAD; num_states * width];
        for &(src, dst, symbol) in edges {
            let (Some(&src), Some(&dst)) = (renumber.get(&src), renumber.get(&dst))
            else {
                continue; // unreachable from the start state
            };
            let sym = symbol_index[symbol as usize] as usize;
            transitions[src as usize * width + sym] = dst;
        }

        let mut accept = vec![false; num_states];
        for state in accepts {
            if let Some(&state) = renumber.get(state) {
                accept[state as usize] = true;
            }
        }

        Dfa { alphabet, symbol_index, transitions, accept }
    }

    /// Render the transducer listing for this DFA.
    ///
    /// Transitions come first, grouped by source state in state order with
    /// symbols ascending; each accepting state contributes a bare line
    /// after its transitions. Dead moves are omitted. `from_att` on the
    /// output reproduces `self` exactly.
    pub fn to_att(&self) -> String {
        let mut out = String::new();
        for state in 0..self.num_states() as u32 {
            for sym in 0..self.alphabet.len() {
                let dst = self.next(state, sym as u16);
                if dst == DEAD {
                    continue;
                }
                let byte = self.alphabet[sym];
                out.push_str(&format!("{state}\t{dst}\t{byte}\t{byte}\n"));
            }
            if self.is_accept(state) {
                out.push_str(&format!("{state}\n"));
            }
        }
        out
    }

    #[inline]
    pub fn num_states(&self) -> usize {
        self.accept.len()
    }

    /// The ordered byte alphabet.
    #[inline]
    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// Alphabet index of `byte`, if the alphabet contains it.
    #[inline]
    pub fn symbol(&self, byte: u8) -> Option<u16> {
        match self.symbol_index[byte as usize] {
            NO_SYMBOL => None,
            sym => Some(sym),
        }
    }

    /// The move for `(state, symbol-index)`; [`DEAD`] if none is listed.
    #[inline]
    pub fn next(&self, state: u32, sym: u16) -> u32 {
        self.transitions[state as usize * self.alphabet.len() + sym as usize]
    }

    #[inline]
    pub fn is_accept(&self, state: u32) -> bool {
        self.accept[state as usize]
    }
}

impl fmt::Debug for Dfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dfa")
            .field("states", &self.num_states())
            .field("alphabet_len", &self.alphabet.len())
            .field("accepts", &self.accept.iter().filter(|&&a| a).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_alphabet() {
        let dfa = Dfa::from_regex("^(0|1)+$").unwrap();
        assert_eq!(dfa.alphabet(), &[b'0', b'1']);
        // one live state past the start, both symbols looping on it
        let s = dfa.next(0, 0);
        assert_ne!(s, DEAD);
        assert_eq!(dfa.next(0, 1), s);
        assert_eq!(dfa.next(s, 0), s);
        assert_eq!(dfa.next(s, 1), s);
        assert!(!dfa.is_accept(0));
        assert!(dfa.is_accept(s));
    }

    #[test]
    fn att_round_trip() {
        let dfa = Dfa::from_regex("^([a-z]+ )+[a-z]+$").unwrap();
        let listing = dfa.to_att();
        let reparsed = Dfa::from_att(&listing).unwrap();
        assert_eq!(dfa.alphabet(), reparsed.alphabet());
        assert_eq!(dfa.num_states(), reparsed.num_states());
        assert_eq!(listing, reparsed.to_att());
    }

    #[test]
    fn from_att_hand_written() {
        // (ab)* as a two-state loop; state 0 accepts.
        let listing = "0\t1\t97\t97\n0\n1\t0\t98\t98\n";
        let dfa = Dfa::from_att(listing).unwrap();
        assert_eq!(dfa.alphabet(), &[b'a', b'b']);
        assert_eq!(dfa.num_states(), 2);
        assert!(dfa.is_accept(0));
        assert!(!dfa.is_accept(1));
        assert_eq!(dfa.next(0, dfa.symbol(b'a').unwrap()), 1);
        assert_eq!(dfa.next(0, dfa.symbol(b'b').unwrap()), DEAD);
        assert_eq!(dfa.next(1, dfa.symbol(b'b').unwrap()), 0);
    }

    #[test]
    fn from_att_rejects_garbage() {
        assert!(matches!(
            Dfa::from_att("0\t1\n"),
            Err(Error::InvalidListing { line: 1, .. })
        ));
        assert!(matches!(
            Dfa::from_att("0\t1\t97\t98\n"),
            Err(Error::InvalidListing { line: 1, .. })
        ));
        assert!(matches!(
            Dfa::from_att("x\n"),
            Err(Error::InvalidListing { line: 1, .. })
        ));
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = Dfa::from_regex("^[a-c]{2,5}(x|yz)?$").unwrap().to_att();
        let b = Dfa::from_regex("^[a-c]{2,5}(x|yz)?$").unwrap().to_att();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_unsupported_looks() {
        assert!(matches!(
            Dfa::from_regex(r"^a\b$"),
            Err(Error::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn rejects_bad_syntax() {
        assert!(matches!(Dfa::from_regex("^(a$"), Err(Error::InvalidRegex(_))));
        // backreferences are a parse error in the restricted syntax
        assert!(matches!(
            Dfa::from_regex(r"^(a)\1$"),
            Err(Error::InvalidRegex(_))
        ));
    }

    #[test]
    fn empty_pattern_accepts_only_empty_string() {
        let dfa = Dfa::from_regex("^$").unwrap();
        assert!(dfa.is_accept(0));
        assert!(dfa.alphabet().is_empty());
    }
}
