/*!
The format catalog: language names mapped to a regex and a fixed slice
length.

Catalogs ship as JSON keyed by a release identifier (`20131224.json`).
Formats come in `-request`/`-response` pairs so the two directions of a
connection can differ; negotiation names the pair by its base name.
*/

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::Error;

/// The release identifier of the embedded catalog.
pub const DEFAULT_RELEASE: &str = "20131224";

static EMBEDDED: Lazy<Definitions> = Lazy::new(|| {
    Definitions::from_json(include_str!("../defs/20131224.json"))
        .expect("embedded catalog parses")
});

/// One format: the language regex and the exact covertext prefix length.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDef {
    pub regex: String,
    pub fixed_slice: usize,
}

/// A catalog of formats, ordered by name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Definitions {
    formats: BTreeMap<String, FormatDef>,
}

impl Definitions {
    /// The catalog compiled into this crate (release
    /// [`DEFAULT_RELEASE`]).
    pub fn embedded() -> &'static Definitions {
        &EMBEDDED
    }

    pub fn from_json(json: &str) -> Result<Definitions, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `<dir>/<release>.json`.
    pub fn load(dir: &Path, release: &str) -> Result<Definitions, Error> {
        let json = fs::read_to_string(dir.join(format!("{release}.json")))?;
        Definitions::from_json(&json)
    }

    /// Look a format up by its full name (`words-request`).
    pub fn get(&self, name: &str) -> Result<&FormatDef, Error> {
        self.formats
            .get(name)
            .ok_or_else(|| Error::UnknownLanguage(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }

    /// The request-side formats, in name order. Negotiation probes these:
    /// a client's first cell is always encoded in a `-request` language.
    pub fn requests(&self) -> impl Iterator<Item = (&str, &FormatDef)> {
        self.formats
            .iter()
            .filter(|(name, _)| !name.ends_with("-response"))
            .map(|(name, def)| (name.as_str(), def))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatDef)> {
        self.formats.iter().map(|(name, def)| (name.as_str(), def))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_catalog_is_paired() {
        let defs = Definitions::embedded();
        let mut requests = 0;
        for (name, _) in defs.iter() {
            if let Some(base) = name.strip_suffix("-request") {
                requests += 1;
                assert!(defs.contains(&format!("{base}-response")), "{name}");
            } else {
                assert!(name.ends_with("-response"), "{name}");
            }
        }
        assert!(requests >= 5);
    }

    #[test]
    fn every_embedded_format_round_trips() {
        for (name, def) in Definitions::embedded().iter() {
            let codec = crate::Encoder::builder()
                .regex(&def.regex)
                .fixed_slice(def.fixed_slice)
                .build()
                .unwrap_or_else(|err| panic!("{name}: {err}"));
            let covertext = codec.encode(b"Hello, World!");
            // byte-oriented match semantics, same as the compiler's
            let matcher = regex::bytes::RegexBuilder::new(&def.regex)
                .unicode(false)
                .build()
                .unwrap();
            assert!(
                matcher.is_match(&covertext[..def.fixed_slice]),
                "{name} covertext escapes its language"
            );
            let (plaintext, remaining) = codec.decode(&covertext).unwrap();
            assert_eq!(plaintext, b"Hello, World!", "{name}");
            assert!(remaining.is_empty(), "{name}");
        }
    }

    #[test]
    fn unknown_names_are_reported() {
        let defs = Definitions::embedded();
        assert!(matches!(
            defs.get("carrier-pigeon-request"),
            Err(Error::UnknownLanguage(_))
        ));
        assert_eq!(defs.get("words-request").unwrap().fixed_slice, 256);
    }

    #[test]
    fn catalog_round_trips_through_json() {
        let defs = Definitions::embedded();
        let json = serde_json::to_string(defs).unwrap();
        let reparsed = Definitions::from_json(&json).unwrap();
        assert_eq!(
            defs.iter().collect::<Vec<_>>(),
            reparsed.iter().collect::<Vec<_>>()
        );
    }
}
