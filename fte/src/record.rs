/*!
The record layer: FIFO segmentation into cells and concatenation-safe
reassembly.

Both ends are sans-I/O: `push` bytes in, `pop` bytes out, nothing blocks.
The central contract is cell-boundary invariance: however the encoder's
output is partitioned before reaching `Decoder::push`, the concatenation
of `Decoder::pop` results reproduces the pushed plaintext exactly.
*/

use std::sync::Arc;

use crate::encoder;
use crate::Error;

/// Largest plaintext cell, in bytes.
pub const MAX_CELL_SIZE: usize = 1 << 15;

/// Outbound half: segments a byte FIFO into cells and encodes each.
pub struct Encoder {
    codec: Arc<encoder::Encoder>,
    buffer: Vec<u8>,
}

impl Encoder {
    pub fn new(codec: Arc<encoder::Encoder>) -> Encoder {
        Encoder { codec, buffer: Vec::new() }
    }

    /// Append bytes to the FIFO.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Drain the FIFO: every pending byte is segmented into cells of at
    /// most [`MAX_CELL_SIZE`], each cell sealed and shaped, and the
    /// covertexts concatenated. An empty FIFO yields empty output.
    pub fn pop(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while !self.buffer.is_empty() {
            let take = self.buffer.len().min(MAX_CELL_SIZE);
            let cell: Vec<u8> = self.buffer.drain(..take).collect();
            out.extend_from_slice(&self.codec.encode(&cell));
        }
        out
    }
}

/// Inbound half: reassembles cells from arbitrarily fragmented input.
pub struct Decoder {
    codec: Arc<encoder::Encoder>,
    buffer: Vec<u8>,
}

impl Decoder {
    pub fn new(codec: Arc<encoder::Encoder>) -> Decoder {
        Decoder { codec, buffer: Vec::new() }
    }

    /// Append received bytes to the FIFO.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode as many whole cells as the FIFO holds.
    ///
    /// Stops (without error) at the first incomplete cell, leaving its
    /// bytes buffered for the next `push`. Unrecoverable kinds (a prefix
    /// that is not in the language, a failed MAC, a corrupt header)
    /// surface as errors and invalidate the stream.
    pub fn pop(&mut self) -> Result<Vec<u8>, Error> {
        self.pop_cells(usize::MAX)
    }

    /// Like [`pop`](Self::pop), but stops after one cell. Negotiation
    /// needs exactly the first cell of a connection.
    pub fn pop_one_cell(&mut self) -> Result<Vec<u8>, Error> {
        self.pop_cells(1)
    }

    fn pop_cells(&mut self, limit: usize) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        let mut cells = 0;
        while !self.buffer.is_empty() && cells < limit {
            match self.codec.decode(&self.buffer) {
                Ok((plaintext, remaining)) => {
                    out.extend_from_slice(&plaintext);
                    self.buffer = remaining;
                    cells += 1;
                }
                Err(err) if err.is_recoverable() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Hand the undecoded bytes off, e.g. to a newly negotiated decoder.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
