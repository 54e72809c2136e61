/*!
A blocking byte-stream facade over the record layer.

`FteStream` owns a reliable ordered transport (anything `Read + Write`,
typically a `TcpStream`) and presents `send`/`recv`/`close`. All framing
state lives in the sans-I/O record layer; this module only moves bytes
between it and the transport, emits the client's negotiate cell, and runs
the server side of negotiation under its wall-clock budget.

One `FteStream` serves one logical stream and is not meant to be shared
across threads; run many streams by giving each its own wrapper. The only
cross-stream state is the process-wide language-slice cache.
*/

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bon::bon;
use log::{debug, info, warn};

use crate::crypter::Keys;
use crate::defs::{Definitions, DEFAULT_RELEASE};
use crate::negotiate::{self, NegotiateCell};
use crate::record;
use crate::Error;

const READ_CHUNK: usize = 1 << 15;

/// Default wall-clock budget for server-side negotiation.
pub const NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(5);

/// An FTE-shaped byte stream over `T`.
pub struct FteStream<T: Read + Write> {
    transport: T,
    defs: Definitions,
    keys: Keys,
    release: String,
    negotiate: bool,
    negotiate_timeout: Duration,
    /// Base language name the client announces, e.g. `words`.
    announce: Option<String>,
    encoder: Option<record::Encoder>,
    decoder: Option<record::Decoder>,
    read_buffer: Vec<u8>,
    cell_sent: bool,
}

#[bon]
impl<T: Read + Write> FteStream<T> {
    /// Wrap `transport`.
    ///
    /// A client names both directions (`upstream_format` for what it
    /// sends, `downstream_format` for what it expects back) and, unless
    /// `negotiate(false)`, announces the pair in its first cell. A server
    /// names neither: it binds both directions from the first cell it
    /// decodes, within `negotiate_timeout`.
    ///
    /// Formats are resolved against `defs` (the embedded catalog by
    /// default); `release` is the identifier announced to the server.
    #[builder]
    pub fn new(
        transport: T,
        #[builder(default)] keys: Keys,
        defs: Option<&Definitions>,
        #[builder(into)] release: Option<String>,
        upstream_format: Option<&str>,
        downstream_format: Option<&str>,
        #[builder(default = true)] negotiate: bool,
        #[builder(default = NEGOTIATE_TIMEOUT)] negotiate_timeout: Duration,
    ) -> Result<FteStream<T>, Error> {
        let defs = defs.cloned().unwrap_or_else(|| Definitions::embedded().clone());
        let release = release.unwrap_or_else(|| DEFAULT_RELEASE.to_owned());

        let mut stream = FteStream {
            transport,
            defs,
            keys,
            release,
            negotiate,
            negotiate_timeout,
            announce: None,
            encoder: None,
            decoder: None,
            read_buffer: Vec::new(),
            cell_sent: false,
        };

        match (upstream_format, downstream_format) {
            (Some(upstream), Some(downstream)) => {
                stream.bind(upstream, downstream)?;
                if stream.negotiate {
                    let base = upstream.strip_suffix("-request").ok_or(
                        Error::InvalidConfig(
                            "negotiation requires a '-request' upstream format",
                        ),
                    )?;
                    stream.announce = Some(base.to_owned());
                }
            }
            (None, None) => {
                // server: both directions bound by the first cell
                stream.negotiate = true;
                stream.cell_sent = true;
            }
            _ => {
                return Err(Error::InvalidConfig(
                    "upstream and downstream formats must be configured together",
                ))
            }
        }
        Ok(stream)
    }
}

impl<T: Read + Write> FteStream<T> {
    fn bind(&mut self, outgoing: &str, incoming: &str) -> Result<(), Error> {
        let out_def = self.defs.get(outgoing)?.clone();
        let in_def = self.defs.get(incoming)?.clone();
        let out_codec = crate::Encoder::builder()
            .regex(&out_def.regex)
            .fixed_slice(out_def.fixed_slice)
            .keys(self.keys.clone())
            .build()?;
        let in_codec = crate::Encoder::builder()
            .regex(&in_def.regex)
            .fixed_slice(in_def.fixed_slice)
            .keys(self.keys.clone())
            .build()?;
        self.encoder = Some(record::Encoder::new(Arc::new(out_codec)));
        self.decoder = Some(record::Decoder::new(Arc::new(in_codec)));
        Ok(())
    }

    /// Shape `data` and write it out. The whole input is always taken.
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.flush_negotiate_cell()?;
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(io::Error::new(
                ErrorKind::NotConnected,
                "negotiation pending; nothing to encode with",
            ));
        };
        encoder.push(data);
        let wire = encoder.pop();
        self.transport.write_all(&wire)?;
        Ok(data.len())
    }

    /// Return up to `max` decoded bytes, blocking on the transport until
    /// something arrives or it reaches end of stream.
    ///
    /// A transport read timeout (`WouldBlock`/`TimedOut`) returns
    /// whatever is already buffered, possibly nothing. End of stream with
    /// an empty buffer returns an empty vector.
    pub fn recv(&mut self, max: usize) -> io::Result<Vec<u8>> {
        // a client might recv before its first send; the negotiate cell
        // still has to be the first thing on the wire
        self.flush_negotiate_cell()?;
        loop {
            if !self.read_buffer.is_empty() {
                let take = self.read_buffer.len().min(max);
                return Ok(self.read_buffer.drain(..take).collect());
            }
            if self.decoder.is_none() {
                self.negotiate_server()?;
                continue;
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.transport.read(&mut chunk) {
                Ok(n) => n,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(Vec::new())
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if n == 0 {
                return Ok(Vec::new()); // end of stream
            }

            let decoder = self.decoder.as_mut().expect("decoder bound above");
            decoder.push(&chunk[..n]);
            match decoder.pop() {
                Ok(fragment) => self.read_buffer.extend_from_slice(&fragment),
                Err(err) => return Err(fatal(err)),
            }
        }
    }

    /// Flush anything pending and the transport itself.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            let wire = encoder.pop();
            if !wire.is_empty() {
                self.transport.write_all(&wire)?;
            }
        }
        self.transport.flush()
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Client side: put the negotiate cell on the wire, alone in its own
    /// record cell, before any other traffic.
    fn flush_negotiate_cell(&mut self) -> io::Result<()> {
        if self.cell_sent || !self.negotiate {
            self.cell_sent = true;
            return Ok(());
        }
        let base = self.announce.clone().expect("client always has a language");
        let cell = NegotiateCell::new(&self.release, &base).map_err(fatal)?;
        let encoder = self.encoder.as_mut().expect("client encoder is bound");
        encoder.push(&cell.to_bytes());
        let wire = encoder.pop();
        self.transport.write_all(&wire)?;
        self.cell_sent = true;
        debug!("announced language {base:?} (release {})", self.release);
        Ok(())
    }

    /// Server side: accumulate transport bytes until one catalog
    /// language decodes the first cell, then bind both directions.
    fn negotiate_server(&mut self) -> io::Result<()> {
        let deadline = Instant::now() + self.negotiate_timeout;
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match negotiate::accept(&self.defs, &self.keys, &pending) {
                Ok(negotiated) => {
                    self.bind(&negotiated.outgoing, &negotiated.incoming)
                        .map_err(fatal)?;
                    let decoder =
                        self.decoder.as_mut().expect("bound a moment ago");
                    decoder.push(&negotiated.leftover);
                    let fragment = decoder.pop().map_err(fatal)?;
                    self.read_buffer.extend_from_slice(&fragment);
                    info!("bound incoming {:?}", negotiated.incoming);
                    return Ok(());
                }
                Err(Error::NegotiateFailed) => {} // not enough bytes yet
                Err(err) => return Err(fatal(err)),
            }

            if Instant::now() >= deadline {
                return Err(fatal(Error::NegotiateTimeout(self.negotiate_timeout)));
            }
            let mut chunk = [0u8; READ_CHUNK];
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "transport closed during negotiation",
                    ))
                }
                Ok(n) => pending.extend_from_slice(&chunk[..n]),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock
                            | ErrorKind::TimedOut
                            | ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err),
            }
        }
    }
}

/// An unrecoverable layer error takes the stream down; log the kind (never
/// key material) and surface it as an I/O error.
fn fatal(err: Error) -> io::Error {
    warn!("closing stream: {err}");
    let kind = match err {
        Error::NegotiateTimeout(_) => ErrorKind::TimedOut,
        _ => ErrorKind::InvalidData,
    };
    io::Error::new(kind, err)
}
