/*!
Format-transforming encryption (FTE).

FTE makes an authenticated-encryption byte stream look, to a regex-based
protocol classifier, like traffic in a format of your choosing: every unit
put on the wire begins with a string drawn from a regular language (say,
`^([a-z]+ )+[a-z]+$`, or something HTTP-request-shaped). Underneath, the
stream is ordinary AES-CTR with an HMAC-SHA-512 tag; the format layer maps
ciphertext bytes to language members with the exact ranking machinery of
[`fte_ranker`].

## Layers

- [`crypter`]: the authenticated-encryption scheme (AES-128-ECB header,
  AES-128-CTR body, truncated HMAC-SHA-512 tag).
- [`encoder`]: the covertext codec: ciphertext bytes to language members
  and back, one cell at a time.
- [`record`]: FIFO segmentation and concatenation-safe reassembly over a
  byte stream.
- [`negotiate`]: first-cell format discovery for servers that don't know
  which format a client picked.
- [`defs`]: the format catalog (name to regex and slice length).
- [`stream`]: a blocking `send`/`recv` facade tying the layers to any
  `Read + Write` transport.

## Encode one cell

```
use fte::{Encoder, Keys};

let codec = Encoder::builder()
    .regex("^([a-z]+ )+[a-z]+$")
    .fixed_slice(256)
    .keys(Keys::default())
    .build()?;

let covertext = codec.encode(b"Hello, World!");
assert!(covertext[..256].iter().all(|&b| b == b' ' || b.is_ascii_lowercase()));

let (plaintext, remaining) = codec.decode(&covertext)?;
assert_eq!(plaintext, b"Hello, World!");
assert!(remaining.is_empty());
# Ok::<(), fte::Error>(())
```

## Wrap a stream

```no_run
use std::net::TcpStream;
use fte::{FteStream, Keys};

let transport = TcpStream::connect("127.0.0.1:8080")?;
let mut stream = FteStream::builder()
    .transport(transport)
    .upstream_format("words-request")
    .downstream_format("words-response")
    .keys(Keys::default())
    .build()?;
stream.send(b"GET / HTTP/1.1\r\n\r\n")?;
let reply = stream.recv(4096)?;
# Ok::<(), Box<dyn std::error::Error>>(())
```

The default [`Keys`] are published test vectors for interoperability with
reference traffic; production deployments must override them.
*/

use std::io;
use std::time::Duration;

use thiserror::Error;

pub mod crypter;
pub mod defs;
pub mod encoder;
pub mod negotiate;
pub mod record;
pub mod stream;

pub use crypter::{Encrypter, Keys};
pub use defs::Definitions;
pub use encoder::Encoder;
pub use negotiate::NegotiateCell;
pub use stream::FteStream;

/// Everything that can go wrong between plaintext and covertext.
///
/// The *recoverable* kinds ([`ShortHeader`](Error::ShortHeader),
/// [`ShortCiphertext`](Error::ShortCiphertext),
/// [`ShortCovertext`](Error::ShortCovertext)) mean "not enough bytes yet":
/// the record layer leaves its buffer untouched and waits for more input.
/// Every other kind invalidates the stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Fewer than the 16 header bytes of an AE ciphertext are available.
    #[error("ciphertext header incomplete")]
    ShortHeader,

    /// The AE header parsed, but the declared body has not fully arrived.
    #[error("ciphertext shorter than its declared length")]
    ShortCiphertext,

    /// The AE header failed its padding or type-byte checks.
    #[error("invalid ciphertext header")]
    InvalidHeader,

    /// The authentication tag does not match.
    #[error("message authentication failed")]
    BadMac,

    /// Fewer bytes than the language's fixed slice are available.
    #[error("covertext shorter than the fixed slice")]
    ShortCovertext,

    /// The covertext header declares a payload that cannot fit, or the
    /// ranked prefix decodes to an integer no conforming encoder
    /// produces.
    #[error("corrupt covertext header")]
    CorruptHeader,

    /// The language slice is too small to hold the encrypted covertext
    /// header plus at least one payload byte.
    #[error("language capacity ({capacity_bytes} bytes) cannot hold the covertext header")]
    CapacityTooSmall { capacity_bytes: usize },

    /// A format name is missing from the catalog.
    #[error("unknown language {0:?}")]
    UnknownLanguage(String),

    /// A 64-byte cell did not parse as a negotiate cell.
    #[error("malformed negotiate cell")]
    InvalidNegotiateCell,

    /// No catalog language decodes the client's first cell.
    #[error("negotiation failed for every catalog language")]
    NegotiateFailed,

    /// Negotiation did not complete within the wall-clock budget.
    #[error("negotiation timed out after {0:?}")]
    NegotiateTimeout(Duration),

    /// The key material is not 64 hex characters.
    #[error("key must be 64 hex characters (K1 followed by K2)")]
    InvalidKey,

    /// The stream wrapper was configured inconsistently.
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(&'static str),

    /// The definitions file could not be parsed.
    #[error("malformed definitions file: {0}")]
    InvalidDefinitions(#[from] serde_json::Error),

    #[error(transparent)]
    Ranker(#[from] fte_ranker::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the await-more-bytes kinds; the record layer stops and
    /// keeps its buffer instead of failing the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ShortHeader | Error::ShortCiphertext | Error::ShortCovertext
        )
    }
}
