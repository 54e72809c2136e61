/*!
The authenticated-encryption scheme underneath every covertext cell.

One ciphertext is `H || C || T`:

- `H`, 16 bytes: AES-128-ECB under K1 of `0x01 || IV(7) || len(8, BE)`.
- `C`, `len` bytes: AES-128-CTR under K1, 128-bit big-endian counter
  seeded with `0x02 || IV(7) || 0x00 * 8`.
- `T`, 16 bytes: leading half of HMAC-SHA-512 under K2 over `H || C`.

Expansion is exactly [`CTXT_EXPANSION`] bytes. The layout and the K1/K2
separation are wire-normative: peers with the same keys interoperate at
the byte level.
*/

use aes::cipher::{
    generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit,
    StreamCipher,
};
use aes::Aes128;
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Error;

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha512 = Hmac<Sha512>;

/// AE header length in bytes.
pub const HEADER_LEN: usize = 16;
/// Truncated MAC length in bytes.
pub const MAC_LEN: usize = 16;
/// Fixed ciphertext expansion: header plus tag.
pub const CTXT_EXPANSION: usize = HEADER_LEN + MAC_LEN;

/// The two 128-bit keys of the scheme: K1 for the block cipher, K2 for
/// the MAC. Zeroed on drop.
///
/// `Keys::default()` is the published test vector (K1 all `0xFF`, K2 all
/// `0x00`), kept for interoperability with reference traffic. Production
/// deployments must supply their own material, e.g. via
/// [`Keys::from_hex`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keys {
    k1: [u8; 16],
    k2: [u8; 16],
}

impl Default for Keys {
    fn default() -> Keys {
        Keys { k1: [0xFF; 16], k2: [0x00; 16] }
    }
}

impl Keys {
    pub fn new(k1: [u8; 16], k2: [u8; 16]) -> Keys {
        Keys { k1, k2 }
    }

    /// Parse 64 hex characters as K1 followed by K2.
    pub fn from_hex(hex: &str) -> Result<Keys, Error> {
        let bytes = hex::decode(hex.trim()).map_err(|_| Error::InvalidKey)?;
        if bytes.len() != 32 {
            return Err(Error::InvalidKey);
        }
        let mut keys = Keys { k1: [0; 16], k2: [0; 16] };
        keys.k1.copy_from_slice(&bytes[..16]);
        keys.k2.copy_from_slice(&bytes[16..]);
        Ok(keys)
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.write_str("Keys(..)")
    }
}

/// Stateless encrypt/decrypt under one [`Keys`] pair.
#[derive(Clone)]
pub struct Encrypter {
    block: Aes128,
    keys: Keys,
}

impl Encrypter {
    pub fn new(keys: Keys) -> Encrypter {
        let block = Aes128::new(GenericArray::from_slice(&keys.k1));
        Encrypter { block, keys }
    }

    /// Encrypt `plaintext`; output length is `plaintext.len() + 32`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; 7];
        OsRng.fill_bytes(&mut iv);

        let mut header = [0u8; HEADER_LEN];
        header[0] = 0x01;
        header[1..8].copy_from_slice(&iv);
        header[8..16].copy_from_slice(&(plaintext.len() as u64).to_be_bytes());
        let header = self.encrypt_one_block(&header);

        let mut body = plaintext.to_vec();
        self.ctr(&iv).apply_keystream(&mut body);

        let mut out = Vec::with_capacity(plaintext.len() + CTXT_EXPANSION);
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);
        out.extend_from_slice(&self.mac(&out));
        out
    }

    /// Decrypt one ciphertext that starts at `ciphertext[0]`.
    ///
    /// Trailing bytes beyond the cell boundary are ignored; use
    /// [`ciphertext_len`](Self::ciphertext_len) to find the boundary
    /// first. Short input fails with the recoverable
    /// [`Error::ShortHeader`]/[`Error::ShortCiphertext`]; failed header
    /// validation or tag mismatch is unrecoverable.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let (iv, len) = self.parse_header(ciphertext)?;
        let total = len + CTXT_EXPANSION;
        if ciphertext.len() < total {
            return Err(Error::ShortCiphertext);
        }

        let body = &ciphertext[HEADER_LEN..HEADER_LEN + len];
        let tag = &ciphertext[HEADER_LEN + len..total];
        let expected = self.mac(&ciphertext[..HEADER_LEN + len]);
        if expected[..].ct_eq(tag).unwrap_u8() != 1 {
            return Err(Error::BadMac);
        }

        let mut plaintext = body.to_vec();
        self.ctr(&iv).apply_keystream(&mut plaintext);
        Ok(plaintext)
    }

    /// Total length of the ciphertext whose first bytes are `prefix`,
    /// from the header alone. No MAC or body work.
    pub fn ciphertext_len(&self, prefix: &[u8]) -> Result<usize, Error> {
        let (_, len) = self.parse_header(prefix)?;
        Ok(len + CTXT_EXPANSION)
    }

    /// Raw single-block AES-ECB under K1. Covertext-header use only.
    pub fn encrypt_one_block(&self, block: &[u8; 16]) -> [u8; 16] {
        let mut block = GenericArray::clone_from_slice(block);
        self.block.encrypt_block(&mut block);
        block.into()
    }

    /// Inverse of [`encrypt_one_block`](Self::encrypt_one_block).
    pub fn decrypt_one_block(&self, block: &[u8; 16]) -> [u8; 16] {
        let mut block = GenericArray::clone_from_slice(block);
        self.block.decrypt_block(&mut block);
        block.into()
    }

    /// Decrypt and validate the AE header; returns the IV and body
    /// length.
    fn parse_header(&self, ciphertext: &[u8]) -> Result<([u8; 7], usize), Error> {
        if ciphertext.len() < HEADER_LEN {
            return Err(Error::ShortHeader);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&ciphertext[..HEADER_LEN]);
        let header = self.decrypt_one_block(&header);

        // type byte, then the zero padding above the 32-bit length
        if header[0] != 0x01 || header[8..12] != [0, 0, 0, 0] {
            return Err(Error::InvalidHeader);
        }
        let mut iv = [0u8; 7];
        iv.copy_from_slice(&header[1..8]);
        let len = u64::from_be_bytes(header[8..16].try_into().expect("8 bytes"));
        Ok((iv, len as usize))
    }

    fn ctr(&self, iv: &[u8; 7]) -> Aes128Ctr {
        let mut counter = [0u8; 16];
        counter[0] = 0x02;
        counter[1..8].copy_from_slice(iv);
        Aes128Ctr::new(
            GenericArray::from_slice(&self.keys.k1),
            GenericArray::from_slice(&counter),
        )
    }

    fn mac(&self, data: &[u8]) -> [u8; MAC_LEN] {
        let mut mac = <HmacSha512 as Mac>::new_from_slice(&self.keys.k2)
            .expect("HMAC accepts any key length");
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        digest[..MAC_LEN].try_into().expect("SHA-512 digest is 64 bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypter() -> Encrypter {
        Encrypter::new(Keys::default())
    }

    #[test]
    fn round_trip() {
        let crypter = encrypter();
        for len in [0usize, 1, 15, 16, 17, 1000, 65536] {
            let mut plaintext = vec![0u8; len];
            OsRng.fill_bytes(&mut plaintext);
            let ciphertext = crypter.encrypt(&plaintext);
            assert_eq!(ciphertext.len(), len + CTXT_EXPANSION);
            assert_eq!(crypter.decrypt(&ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn ciphertexts_are_randomised() {
        let crypter = encrypter();
        assert_ne!(crypter.encrypt(b"same message"), crypter.encrypt(b"same message"));
    }

    #[test]
    fn ciphertext_len_matches() {
        let crypter = encrypter();
        let ciphertext = crypter.encrypt(b"some plaintext");
        assert_eq!(crypter.ciphertext_len(&ciphertext).unwrap(), ciphertext.len());
        // a prefix is enough
        assert_eq!(
            crypter.ciphertext_len(&ciphertext[..16]).unwrap(),
            ciphertext.len()
        );
        assert!(matches!(
            crypter.ciphertext_len(&ciphertext[..15]),
            Err(Error::ShortHeader)
        ));
    }

    #[test]
    fn short_ciphertext_is_recoverable() {
        let crypter = encrypter();
        let ciphertext = crypter.encrypt(b"0123456789");
        let err = crypter.decrypt(&ciphertext[..ciphertext.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::ShortCiphertext));
        assert!(err.is_recoverable());
    }

    #[test]
    fn every_single_byte_tamper_is_caught() {
        let crypter = encrypter();
        let ciphertext = crypter.encrypt(b"attack at dawn");
        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            match crypter.decrypt(&tampered) {
                Err(Error::BadMac) | Err(Error::InvalidHeader) => {}
                // header tampering can scramble the length upward, which
                // reads as an incomplete cell rather than plaintext
                Err(Error::ShortCiphertext) => {}
                other => panic!("tampered byte {i} produced {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_keys_fail() {
        let ciphertext = encrypter().encrypt(b"sealed");
        let other = Encrypter::new(Keys::new([0xAB; 16], [0xCD; 16]));
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn one_block_round_trip() {
        let crypter = encrypter();
        let block = *b"0123456789abcdef";
        let sealed = crypter.encrypt_one_block(&block);
        assert_ne!(sealed, block);
        assert_eq!(crypter.decrypt_one_block(&sealed), block);
    }

    #[test]
    fn keys_from_hex() {
        let keys = Keys::from_hex(
            "ffffffffffffffffffffffffffffffff00000000000000000000000000000000",
        )
        .unwrap();
        assert_eq!(keys.k1, [0xFF; 16]);
        assert_eq!(keys.k2, [0x00; 16]);
        assert!(Keys::from_hex("deadbeef").is_err());
        assert!(Keys::from_hex(&"zz".repeat(32)).is_err());
    }
}
