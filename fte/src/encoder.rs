/*!
The covertext codec: arbitrary bytes in, language members out.

[`RegexEncoder`] is the format layer alone: it packs bytes into the ranked
prefix of a language member (behind a 16-byte encrypted length header) and
spills whatever does not fit into a binary tail. [`Encoder`] is the cell
codec most callers want: authenticated encryption composed with the format
layer, one cell per call.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bon::bon;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};

use fte_ranker::LanguageSlice;

use crate::crypter::{Encrypter, Keys};
use crate::Error;

/// Covertext header plaintext bytes: the payload length as a big-endian
/// word.
pub const HDR_P: usize = 8;
/// Covertext header ciphertext bytes: one AES block.
pub const HDR_C: usize = 16;

/// Process-wide language-slice cache, keyed by `(pattern, max_len)`.
///
/// Building a slice means compiling a DFA and counting the language at
/// every length, which is far too expensive to repeat per connection.
/// Entries are never evicted; deployments use a small, fixed set of
/// formats.
static SLICES: Lazy<Mutex<HashMap<(String, usize), Arc<LanguageSlice>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The cached slice for `(pattern, max_len)`, building it on first use.
pub fn cached_slice(pattern: &str, max_len: usize) -> Result<Arc<LanguageSlice>, Error> {
    let mut slices = SLICES.lock().expect("slice cache poisoned");
    if let Some(slice) = slices.get(&(pattern.to_owned(), max_len)) {
        return Ok(Arc::clone(slice));
    }
    let slice = Arc::new(LanguageSlice::from_regex(pattern, max_len)?);
    slices.insert((pattern.to_owned(), max_len), Arc::clone(&slice));
    Ok(slice)
}

/// The format layer: bytes to a length-`max_len` language member plus an
/// optional binary tail, and back.
///
/// The first `capacity_bytes` worth of input (minus the header block) is
/// carried *inside* the ranked prefix; the encrypted header records how
/// much. Input beyond that rides behind the prefix verbatim, so the
/// covertext is `max_len + tail_len` bytes with `tail_len` recoverable on
/// decode.
#[derive(Clone)]
pub struct RegexEncoder {
    slice: Arc<LanguageSlice>,
    encrypter: Encrypter,
    capacity_bytes: usize,
}

impl RegexEncoder {
    /// Build the format layer for `(pattern, max_len)`, sharing the slice
    /// cache. The `encrypter` is used only for the header block.
    ///
    /// Fails with [`Error::CapacityTooSmall`] when the slice cannot hold
    /// the 16-byte header plus at least one payload byte.
    pub fn new(
        pattern: &str,
        max_len: usize,
        encrypter: Encrypter,
    ) -> Result<RegexEncoder, Error> {
        let slice = cached_slice(pattern, max_len)?;
        let capacity_bytes = (slice.capacity() / 8) as usize;
        if capacity_bytes <= HDR_C {
            return Err(Error::CapacityTooSmall { capacity_bytes });
        }
        Ok(RegexEncoder { slice, encrypter, capacity_bytes })
    }

    /// Bytes of input one covertext unit can carry inside its ranked
    /// prefix.
    #[inline]
    pub fn payload_capacity(&self) -> usize {
        self.capacity_bytes - HDR_C
    }

    #[inline]
    pub fn fixed_slice(&self) -> usize {
        self.slice.max_len()
    }

    /// Encode `data` into one covertext unit.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let carried = data.len().min(self.payload_capacity());

        // Header plaintext: 8 random bytes over the length word, so equal
        // payload lengths do not produce recognisably equal headers.
        let mut header = [0u8; HDR_C];
        OsRng.fill_bytes(&mut header[..HDR_P]);
        header[HDR_P..].copy_from_slice(&(carried as u64).to_be_bytes());
        let header = self.encrypter.encrypt_one_block(&header);

        let mut payload = Vec::with_capacity(self.capacity_bytes);
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&data[..carried]);
        let mut padding = vec![0u8; self.capacity_bytes - payload.len()];
        OsRng.fill_bytes(&mut padding);
        payload.extend_from_slice(&padding);

        // payload < 2^capacity < words_in_slice, so unrank cannot fail
        let index = BigUint::from_bytes_be(&payload);
        let mut covertext = self
            .slice
            .unrank(&index)
            .expect("covertext payload exceeds the slice");
        covertext.extend_from_slice(&data[carried..]);
        covertext
    }

    /// Decode one covertext unit sitting at the front of `covertext`.
    ///
    /// Returns the carried payload followed by *all* bytes past the
    /// ranked prefix; the caller separates this unit's tail from whatever
    /// follows (the AE header inside the payload tells it where the cell
    /// ends).
    pub fn decode(&self, covertext: &[u8]) -> Result<Vec<u8>, Error> {
        let fixed_slice = self.slice.max_len();
        if covertext.len() < fixed_slice {
            return Err(Error::ShortCovertext);
        }

        let index = self.slice.rank(&covertext[..fixed_slice])?;
        let bytes = index.to_bytes_be();
        if bytes.len() > self.capacity_bytes {
            // in the language, but above anything a conforming encoder
            // ranks
            return Err(Error::CorruptHeader);
        }
        let mut payload = vec![0u8; self.capacity_bytes];
        payload[self.capacity_bytes - bytes.len()..].copy_from_slice(&bytes);

        let header: [u8; HDR_C] =
            payload[..HDR_C].try_into().expect("capacity exceeds one block");
        let header = self.encrypter.decrypt_one_block(&header);
        let carried = u64::from_be_bytes(header[HDR_P..].try_into().expect("8 bytes"));
        if carried > self.payload_capacity() as u64 {
            return Err(Error::CorruptHeader);
        }
        let carried = carried as usize;

        let mut data = payload[HDR_C..HDR_C + carried].to_vec();
        data.extend_from_slice(&covertext[fixed_slice..]);
        Ok(data)
    }
}

/// The cell codec: authenticated encryption composed with the format
/// layer.
///
/// `encode` seals one plaintext cell and shapes it; `decode` unshapes one
/// covertext unit from the front of a buffer, finds the cell boundary
/// from the AE header, opens the cell, and hands back whatever it did not
/// consume.
#[derive(Clone)]
pub struct Encoder {
    encrypter: Encrypter,
    regex_encoder: RegexEncoder,
}

#[bon]
impl Encoder {
    /// Build a cell codec for one format.
    ///
    /// ```
    /// use fte::{Encoder, Keys};
    ///
    /// let codec = Encoder::builder()
    ///     .regex("^[0-9a-f]+$")
    ///     .fixed_slice(256)
    ///     .keys(Keys::default())
    ///     .build()?;
    /// let covertext = codec.encode(b"beneath the hex");
    /// # Ok::<(), fte::Error>(())
    /// ```
    #[builder]
    pub fn new(
        regex: &str,
        fixed_slice: usize,
        #[builder(default)] keys: Keys,
    ) -> Result<Encoder, Error> {
        let encrypter = Encrypter::new(keys);
        let regex_encoder = RegexEncoder::new(regex, fixed_slice, encrypter.clone())?;
        Ok(Encoder { encrypter, regex_encoder })
    }

    /// Seal and shape one plaintext cell.
    pub fn encode(&self, plaintext: &[u8]) -> Vec<u8> {
        self.regex_encoder.encode(&self.encrypter.encrypt(plaintext))
    }

    /// Unshape and open one cell from the front of `buffer`.
    ///
    /// Returns `(plaintext, remaining)`, where `remaining` begins with
    /// the next covertext unit (if any). Recoverable errors mean the
    /// buffer holds an incomplete unit; hold onto it and retry with more
    /// bytes.
    pub fn decode(&self, buffer: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let decoded = self.regex_encoder.decode(buffer)?;
        let cell_len = self.encrypter.ciphertext_len(&decoded)?;
        if decoded.len() < cell_len {
            return Err(Error::ShortCiphertext);
        }
        let plaintext = self.encrypter.decrypt(&decoded[..cell_len])?;
        Ok((plaintext, decoded[cell_len..].to_vec()))
    }

    #[inline]
    pub fn fixed_slice(&self) -> usize {
        self.regex_encoder.fixed_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: &str = "^([a-z]+ )+[a-z]+$";

    fn codec(regex: &str, fixed_slice: usize) -> Encoder {
        Encoder::builder()
            .regex(regex)
            .fixed_slice(fixed_slice)
            .keys(Keys::default())
            .build()
            .unwrap()
    }

    #[test]
    fn words_round_trip() {
        let codec = codec(WORDS, 256);
        let covertext = codec.encode(b"Hello, World!");
        assert!(covertext
            .iter()
            .all(|&b| b == b' ' || b.is_ascii_lowercase()));
        let (plaintext, remaining) = codec.decode(&covertext).unwrap();
        assert_eq!(plaintext, b"Hello, World!");
        assert!(remaining.is_empty());
    }

    #[test]
    fn binary_round_trip() {
        let codec = codec("^(0|1)+$", 512);
        let covertext = codec.encode(b"Hi");
        // the sealed cell fits inside the ranked prefix, so no tail
        assert_eq!(covertext.len(), 512);
        assert!(covertext.iter().all(|&b| b == b'0' || b == b'1'));
        let (plaintext, remaining) = codec.decode(&covertext).unwrap();
        assert_eq!(plaintext, b"Hi");
        assert!(remaining.is_empty());
    }

    #[test]
    fn capacity_too_small_at_tiny_slices() {
        // 2^32 length-32 strings give a 3-byte capacity, which cannot
        // hold the 16-byte covertext header.
        let err = Encoder::builder()
            .regex("^(0|1)+$")
            .fixed_slice(32)
            .keys(Keys::default())
            .build()
            .err()
            .expect("3 bytes of capacity must not build");
        assert!(matches!(err, Error::CapacityTooSmall { capacity_bytes: 3 }));
    }

    #[test]
    fn large_input_spills_into_the_tail() {
        let codec = codec(WORDS, 256);
        let plaintext = vec![b'X'; 500];
        let covertext = codec.encode(&plaintext);
        assert!(covertext.len() > 256);
        let (decoded, remaining) = codec.decode(&covertext).unwrap();
        assert_eq!(decoded, plaintext);
        assert!(remaining.is_empty());
    }

    #[test]
    fn covertext_length_is_slice_plus_tail() {
        // capacity bound: every plaintext length up to 16x the payload
        // capacity round-trips, and the covertext is exactly the fixed
        // slice plus the spilled tail
        let codec = codec(WORDS, 256);
        let payload_capacity = codec.regex_encoder.payload_capacity();
        for len in (0..16 * payload_capacity).step_by(97) {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let covertext = codec.encode(&plaintext);
            let sealed_len = plaintext.len() + crate::crypter::CTXT_EXPANSION;
            let tail_len = sealed_len.saturating_sub(payload_capacity);
            assert_eq!(covertext.len(), 256 + tail_len);
            let (decoded, remaining) = codec.decode(&covertext).unwrap();
            assert_eq!(decoded, plaintext);
            assert!(remaining.is_empty());
        }
    }

    #[test]
    fn decode_reports_trailing_bytes() {
        let codec = codec(WORDS, 256);
        let mut buffer = codec.encode(b"first");
        let second = codec.encode(b"second");
        buffer.extend_from_slice(&second);
        let (plaintext, remaining) = codec.decode(&buffer).unwrap();
        assert_eq!(plaintext, b"first");
        assert_eq!(remaining, second);
    }

    #[test]
    fn short_covertext_is_recoverable() {
        let codec = codec(WORDS, 256);
        let covertext = codec.encode(b"fragmented");
        let err = codec.decode(&covertext[..100]).unwrap_err();
        assert!(matches!(err, Error::ShortCovertext));
        assert!(err.is_recoverable());
    }

    #[test]
    fn foreign_covertext_is_rejected() {
        let codec = codec(WORDS, 256);
        let err = codec.decode(&[b'!'; 256]).unwrap_err();
        assert!(matches!(
            err,
            Error::Ranker(fte_ranker::Error::NotInLanguage)
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn slice_cache_is_shared() {
        let a = cached_slice(WORDS, 128).unwrap();
        let b = cached_slice(WORDS, 128).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
