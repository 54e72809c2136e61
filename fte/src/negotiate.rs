/*!
First-cell format discovery.

A client that cannot assume the server knows its format sends, before
anything else, one fixed 64-byte cell naming the catalog release and the
language pair it will speak. The server tries each request-side language
in its catalog against the first bytes it receives; the language that
decodes the cell is the one the client is using, and the server binds its
encoder to the matching `-response` format.
*/

use std::sync::Arc;

use log::{debug, info};

use crate::crypter::Keys;
use crate::defs::Definitions;
use crate::record;
use crate::Error;

/// Negotiate cell wire size.
pub const CELL_SIZE: usize = 64;
/// Leading zero padding; also the upper bound on the content.
const PADDING_LEN: usize = 32;
/// The release identifier is a date, `YYYYMMDD`.
const DEF_FILE_LEN: usize = 8;

/// The fixed 64-byte first cell: 32 zero bytes, then the content
/// right-justified: an 8-byte definitions-file identifier followed by
/// the base language name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiateCell {
    def_file: String,
    language: String,
}

impl NegotiateCell {
    /// `def_file` must be exactly 8 bytes (a `YYYYMMDD` release);
    /// `language` is the pair's base name (`words`, not
    /// `words-request`).
    pub fn new(def_file: &str, language: &str) -> Result<NegotiateCell, Error> {
        if def_file.len() != DEF_FILE_LEN
            || language.is_empty()
            || def_file.len() + language.len() > PADDING_LEN
        {
            return Err(Error::InvalidNegotiateCell);
        }
        Ok(NegotiateCell {
            def_file: def_file.to_owned(),
            language: language.to_owned(),
        })
    }

    pub fn def_file(&self) -> &str {
        &self.def_file
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn to_bytes(&self) -> [u8; CELL_SIZE] {
        let mut cell = [0u8; CELL_SIZE];
        let content_len = self.def_file.len() + self.language.len();
        let start = CELL_SIZE - content_len;
        cell[start..start + DEF_FILE_LEN].copy_from_slice(self.def_file.as_bytes());
        cell[start + DEF_FILE_LEN..].copy_from_slice(self.language.as_bytes());
        cell
    }

    pub fn from_bytes(cell: &[u8]) -> Result<NegotiateCell, Error> {
        if cell.len() != CELL_SIZE || cell[..PADDING_LEN].iter().any(|&b| b != 0) {
            return Err(Error::InvalidNegotiateCell);
        }
        let content: Vec<u8> = cell[PADDING_LEN..]
            .iter()
            .copied()
            .skip_while(|&b| b == 0)
            .collect();
        if content.len() <= DEF_FILE_LEN {
            return Err(Error::InvalidNegotiateCell);
        }
        let def_file = std::str::from_utf8(&content[..DEF_FILE_LEN])
            .map_err(|_| Error::InvalidNegotiateCell)?;
        let language = std::str::from_utf8(&content[DEF_FILE_LEN..])
            .map_err(|_| Error::InvalidNegotiateCell)?;
        NegotiateCell::new(def_file, language)
    }
}

/// What a successful server-side negotiation binds.
#[derive(Debug)]
pub struct Negotiated {
    pub cell: NegotiateCell,
    /// Full name of the incoming (request) format.
    pub incoming: String,
    /// Full name of the outgoing (response) format.
    pub outgoing: String,
    /// Bytes past the negotiate cell; they belong to the incoming
    /// decoder.
    pub leftover: Vec<u8>,
}

/// Try to recognise the first cell of a connection.
///
/// Probes every request-side catalog language in name order. Not enough
/// data yet reads as [`Error::NegotiateFailed`]; callers accumulate more
/// bytes and retry until their own deadline expires. A cell naming a
/// language absent from the catalog is fatal
/// ([`Error::UnknownLanguage`]).
pub fn accept(
    defs: &Definitions,
    keys: &Keys,
    data: &[u8],
) -> Result<Negotiated, Error> {
    for (name, def) in defs.requests() {
        let codec = match crate::Encoder::builder()
            .regex(&def.regex)
            .fixed_slice(def.fixed_slice)
            .keys(keys.clone())
            .build()
        {
            Ok(codec) => Arc::new(codec),
            Err(err) => {
                debug!("skipping unbuildable catalog format {name}: {err}");
                continue;
            }
        };
        let mut decoder = record::Decoder::new(codec);
        decoder.push(data);
        let cell = match decoder.pop_one_cell() {
            Ok(cell) if cell.len() == CELL_SIZE => cell,
            Ok(_) | Err(_) => {
                debug!("first cell does not decode as {name}");
                continue;
            }
        };
        let Ok(cell) = NegotiateCell::from_bytes(&cell) else {
            debug!("first cell decodes under {name} but is not a negotiate cell");
            continue;
        };

        let incoming = format!("{}-request", cell.language());
        let outgoing = format!("{}-response", cell.language());
        if !defs.contains(&incoming) || !defs.contains(&outgoing) {
            return Err(Error::UnknownLanguage(cell.language().to_owned()));
        }
        info!("negotiated language {:?} via {name}", cell.language());
        return Ok(Negotiated {
            cell,
            incoming,
            outgoing,
            leftover: decoder.take_buffer(),
        });
    }
    Err(Error::NegotiateFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::DEFAULT_RELEASE;

    #[test]
    fn cell_round_trip() {
        let cell = NegotiateCell::new(DEFAULT_RELEASE, "words").unwrap();
        let bytes = cell.to_bytes();
        assert_eq!(bytes.len(), CELL_SIZE);
        assert!(bytes[..PADDING_LEN].iter().all(|&b| b == 0));
        let parsed = NegotiateCell::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, cell);
        assert_eq!(parsed.def_file(), "20131224");
        assert_eq!(parsed.language(), "words");
    }

    #[test]
    fn cell_validation() {
        assert!(NegotiateCell::new("2013", "words").is_err());
        assert!(NegotiateCell::new(DEFAULT_RELEASE, "").is_err());
        assert!(NegotiateCell::new(
            DEFAULT_RELEASE,
            "a-language-name-too-long-to-fit"
        )
        .is_err());
        // padding must be zero
        let mut bytes = NegotiateCell::new(DEFAULT_RELEASE, "words")
            .unwrap()
            .to_bytes();
        bytes[0] = 1;
        assert!(NegotiateCell::from_bytes(&bytes).is_err());
        assert!(NegotiateCell::from_bytes(&bytes[..63]).is_err());
    }

    #[test]
    fn server_recognises_the_client_language() {
        let defs = Definitions::embedded();
        let keys = Keys::default();
        let def = defs.get("words-request").unwrap();
        let codec = Arc::new(
            crate::Encoder::builder()
                .regex(&def.regex)
                .fixed_slice(def.fixed_slice)
                .keys(keys.clone())
                .build()
                .unwrap(),
        );
        // the cell is flushed as its own record cell, ahead of any data
        let mut encoder = record::Encoder::new(codec);
        encoder.push(&NegotiateCell::new(DEFAULT_RELEASE, "words").unwrap().to_bytes());
        let mut wire = encoder.pop();
        encoder.push(b"application data right behind the cell");
        wire.extend_from_slice(&encoder.pop());

        let negotiated = accept(defs, &keys, &wire).unwrap();
        assert_eq!(negotiated.incoming, "words-request");
        assert_eq!(negotiated.outgoing, "words-response");
        assert_eq!(negotiated.cell.language(), "words");

        // bytes past the cell belong to the newly bound incoming decoder
        let mut decoder = record::Decoder::new(Arc::new(
            crate::Encoder::builder()
                .regex(&def.regex)
                .fixed_slice(def.fixed_slice)
                .keys(keys.clone())
                .build()
                .unwrap(),
        ));
        decoder.push(&negotiated.leftover);
        assert_eq!(
            decoder.pop().unwrap(),
            b"application data right behind the cell"
        );
    }

    #[test]
    fn unknown_language_is_fatal() {
        let defs = Definitions::embedded();
        let keys = Keys::default();
        let def = defs.get("words-request").unwrap();
        let codec = Arc::new(
            crate::Encoder::builder()
                .regex(&def.regex)
                .fixed_slice(def.fixed_slice)
                .keys(keys.clone())
                .build()
                .unwrap(),
        );
        let mut encoder = record::Encoder::new(codec);
        encoder
            .push(&NegotiateCell::new(DEFAULT_RELEASE, "morse").unwrap().to_bytes());
        let wire = encoder.pop();

        assert!(matches!(
            accept(defs, &keys, &wire),
            Err(Error::UnknownLanguage(language)) if language == "morse"
        ));
    }

    #[test]
    fn truncated_first_cell_keeps_failing_softly() {
        let defs = Definitions::embedded();
        let keys = Keys::default();
        assert!(matches!(
            accept(defs, &keys, &[0u8; 40]),
            Err(Error::NegotiateFailed)
        ));
    }
}
