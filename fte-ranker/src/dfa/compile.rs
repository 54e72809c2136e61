//! Pattern compilation: restricted syntax to a minimized anchored DFA,
//! rendered as a transducer listing.

use std::collections::HashMap;
use std::time::Instant;

use log::debug;
use regex_automata::{
    dfa::{dense, Automaton, StartKind},
    nfa::thompson::{self, WhichCaptures},
    util::start,
    Anchored, MatchKind,
};
use regex_syntax::{hir::Look, ParserBuilder};

use crate::Error;

/// Compile `pattern` and render the resulting automaton as a
/// line-oriented transducer listing.
///
/// The pipeline is parse (byte-oriented, non-Unicode), Thompson NFA,
/// anchored dense DFA with minimization, then a breadth-first walk that
/// materialises every live transition. Acceptance is full-string
/// acceptance: a state accepts iff the input consumed so far is a
/// complete match, which folds the `^`/`$` anchors into the automaton.
pub(crate) fn att_from_regex(pattern: &str) -> Result<String, Error> {
    let built = Instant::now();

    let hir = ParserBuilder::new()
        .unicode(false)
        .utf8(false)
        .build()
        .parse(pattern)
        .map_err(|err| Error::InvalidRegex(err.to_string()))?;

    // The DFA can express the outer anchors, but nothing else that peeks
    // around the current position.
    for look in hir.properties().look_set().iter() {
        match look {
            Look::Start | Look::End => {}
            _ => return Err(Error::UnsupportedConstruct("look-around assertion")),
        }
    }

    let nfa = thompson::Compiler::new()
        .configure(
            thompson::Config::new()
                .utf8(false)
                .which_captures(WhichCaptures::None),
        )
        .build_from_hir(&hir)
        .map_err(|err| Error::InvalidRegex(err.to_string()))?;

    let dfa = dense::Builder::new()
        .configure(
            dense::Config::new()
                .start_kind(StartKind::Anchored)
                .match_kind(MatchKind::All)
                .minimize(true)
                .accelerate(false),
        )
        .build_from_nfa(&nfa)
        .map_err(|err| Error::InvalidRegex(err.to_string()))?;

    let start = dfa
        .start_state(&start::Config::new().anchored(Anchored::Yes))
        .map_err(|err| Error::InvalidRegex(err.to_string()))?;

    // Breadth-first exploration from the anchored start, renumbering
    // states in discovery order. Dead moves are skipped, which both keeps
    // the listing sparse and leaves the dead state implicit.
    let mut renumber: HashMap<_, u32> = HashMap::new();
    let mut order = vec![start];
    renumber.insert(start, 0);
    let mut listing = String::new();
    let mut head = 0;
    while head < order.len() {
        let state = order[head];
        let src = head as u32;
        head += 1;
        for byte in 0..=255u8 {
            let next = dfa.next_state(state, byte);
            debug_assert!(!dfa.is_quit_state(next));
            if dfa.is_dead_state(next) {
                continue;
            }
            let dst = *renumber.entry(next).or_insert_with(|| {
                order.push(next);
                order.len() as u32 - 1
            });
            listing.push_str(&format!("{src}\t{dst}\t{byte}\t{byte}\n"));
        }
        if dfa.is_match_state(dfa.next_eoi_state(state)) {
            listing.push_str(&format!("{src}\n"));
        }
    }

    debug!(
        "compiled {:?} to {} live states in {:?}",
        pattern,
        order.len(),
        built.elapsed()
    );

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dfa;

    #[test]
    fn listing_matches_render() {
        // from_regex goes listing -> Dfa; rendering the Dfa must give the
        // listing back.
        let listing = att_from_regex("^([a-z]+ )+[a-z]+$").unwrap();
        let dfa = Dfa::from_att(&listing).unwrap();
        assert_eq!(dfa.to_att(), listing);
    }

    #[test]
    fn anchors_are_implicit() {
        // An unanchored literal and its anchored form denote the same
        // full-string language.
        let bare = att_from_regex("abc").unwrap();
        let anchored = att_from_regex("^abc$").unwrap();
        assert_eq!(bare, anchored);
    }
}
