/*!
Rank and unrank fixed-length strings of a regular language.

Given a regular expression and a length `n`, this crate builds a minimized
byte-level [DFA](dfa::Dfa), counts the strings of every length up to `n`
that the language contains, and provides an exact bijection between the
strings of length exactly `n` (the *fixed-length slice*) and the integers
`[0, count)` in lexicographic order:

```
use fte_ranker::LanguageSlice;
use num_bigint::BigUint;

let slice = LanguageSlice::from_regex("^[a-z]+$", 8)?;
let word = slice.unrank(&BigUint::from(123_456_789u32))?;
assert_eq!(word.len(), 8);
assert_eq!(slice.rank(&word)?, BigUint::from(123_456_789u32));

# Ok::<(), fte_ranker::Error>(())
```

Counts grow with the language: for byte-dense regexes and large `n` they
run to thousands of decimal digits, so all counting arithmetic is
[`BigUint`](num_bigint::BigUint).

# Syntax

Patterns use a restricted regex syntax: concatenation, alternation,
repetition (`*`, `+`, `?`, `{m,n}`), character classes, `.`, and the
anchors `^`/`$`. Patterns are compiled byte-oriented (no Unicode classes);
the alphabet of the resulting DFA is the set of byte values the pattern
can actually consume. Look-around other than the outer anchors and
backreferences are rejected with [`Error::UnsupportedConstruct`] or
[`Error::InvalidRegex`].

# Interchange listing

Compilation goes through a line-oriented transducer listing (the same
AT&T-style format emitted by re2-based DFA generators), so a DFA can also
be loaded directly from a listing produced elsewhere. See
[`Dfa::from_att`] and [`Dfa::to_att`].
*/

use thiserror::Error;

pub mod dfa;
pub mod rank;
pub mod table;

pub use dfa::Dfa;
pub use rank::LanguageSlice;
pub use table::RankTable;

/// Errors reported while compiling a pattern or ranking against it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The pattern is not a valid regular expression in the restricted
    /// syntax.
    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    /// The pattern parsed, but uses a construct with no DFA equivalent.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(&'static str),

    /// A transducer listing line could not be parsed.
    #[error("invalid transducer listing at line {line}: {reason}")]
    InvalidListing { line: usize, reason: String },

    /// The language contains no strings of the requested length.
    #[error("language contains no strings of the requested length")]
    LanguageEmpty,

    /// An integer handed to `unrank` is outside `[0, words_in_slice)`.
    #[error("integer out of range for the language slice")]
    IntegerOutOfRange,

    /// A string handed to `rank` is not a length-`n` member of the
    /// language.
    #[error("string is not in the language slice")]
    NotInLanguage,
}
