//! Length-delimited envelope framing over a [`ByteChannel`].

use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, trace};

use super::varint::{encode_varint, VarIntDecoder};
use crate::domain::{ConnectionError, NetworkEnvelope};
use crate::ports::ByteChannel;

/// Default size of the per-read receive buffer.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 8 * 1024;
/// Default largest envelope accepted or sent.
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 10 * 1024 * 1024;

/// Framing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Bytes requested per read. Smaller than an envelope is legal.
    pub receive_buffer_size: usize,
    pub max_envelope_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
        }
    }
}

// =============================================================================
// FRAME ASSEMBLY
// =============================================================================

/// Reassembles `[varint length][envelope bytes]` frames from arbitrary
/// chunks. State survives between calls; nothing is lost or duplicated
/// regardless of how the stream is split.
#[derive(Debug, Default)]
struct FrameAssembler {
    decoder: VarIntDecoder,
    frame_len: Option<usize>,
    frame: Vec<u8>,
    max_envelope_size: usize,
}

impl FrameAssembler {
    fn new(max_envelope_size: usize) -> Self {
        Self {
            max_envelope_size,
            ..Self::default()
        }
    }

    fn feed(
        &mut self,
        mut input: &[u8],
        out: &mut Vec<(NetworkEnvelope, usize)>,
    ) -> Result<(), ConnectionError> {
        while !input.is_empty() {
            match self.frame_len {
                None => {
                    let byte = input[0];
                    input = &input[1..];
                    if let Some(len) = self.decoder.push(byte)? {
                        let len = len as usize;
                        if len > self.max_envelope_size {
                            return Err(ConnectionError::EnvelopeTooLarge {
                                size: len,
                                max: self.max_envelope_size,
                            });
                        }
                        self.frame_len = Some(len);
                        self.frame.reserve(len);
                    }
                }
                Some(len) => {
                    let take = (len - self.frame.len()).min(input.len());
                    self.frame.extend_from_slice(&input[..take]);
                    input = &input[take..];
                }
            }
            self.complete_frame(out)?;
        }
        Ok(())
    }

    fn complete_frame(
        &mut self,
        out: &mut Vec<(NetworkEnvelope, usize)>,
    ) -> Result<(), ConnectionError> {
        match self.frame_len {
            Some(len) if self.frame.len() == len => {
                self.frame_len = None;
                let envelope = NetworkEnvelope::from_bytes(&self.frame);
                self.frame.clear();
                out.push((envelope?, len));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn in_progress(&self) -> bool {
        self.frame_len.is_some() || self.decoder.in_progress()
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.frame_len = None;
        self.frame.clear();
    }
}

// =============================================================================
// ENVELOPE CHANNEL
// =============================================================================

/// Envelope codec bound to one byte channel.
///
/// Owned by exactly one task. Reads never block: each
/// [`receive_envelopes`](Self::receive_envelopes) call performs a single
/// non-blocking read and returns every envelope that is now complete.
/// Writes are queued by [`send_envelope`](Self::send_envelope) and drained
/// by [`flush`](Self::flush) as the channel accepts them.
pub struct NetworkEnvelopeChannel<C> {
    channel: C,
    config: EnvelopeConfig,
    read_buffer: Vec<u8>,
    assembler: FrameAssembler,
    outbound: Vec<u8>,
}

impl<C: ByteChannel> NetworkEnvelopeChannel<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, EnvelopeConfig::default())
    }

    pub fn with_buffer_size(channel: C, receive_buffer_size: usize) -> Self {
        Self::with_config(
            channel,
            EnvelopeConfig {
                receive_buffer_size,
                ..EnvelopeConfig::default()
            },
        )
    }

    pub fn with_config(channel: C, config: EnvelopeConfig) -> Self {
        Self {
            channel,
            read_buffer: vec![0u8; config.receive_buffer_size.max(1)],
            assembler: FrameAssembler::new(config.max_envelope_size),
            outbound: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn close(&mut self) {
        self.channel.close();
        self.assembler.reset();
        self.outbound.clear();
    }

    /// A frame is partially buffered.
    pub fn has_partial_frame(&self) -> bool {
        self.assembler.in_progress()
    }

    // -------------------------------------------------------------------------
    // Receiving
    // -------------------------------------------------------------------------

    /// One non-blocking read; returns every envelope completed by it.
    ///
    /// Empty when nothing is complete yet, when the read would block, and at
    /// end-of-stream (which also closes the channel). Only a complete frame
    /// that fails to decode, or an oversized length prefix, is an error.
    pub fn receive_envelopes(&mut self) -> Result<Vec<NetworkEnvelope>, ConnectionError> {
        Ok(self
            .receive_sized()?
            .into_iter()
            .map(|(envelope, _)| envelope)
            .collect())
    }

    /// [`receive_envelopes`](Self::receive_envelopes) with each envelope's
    /// encoded size.
    pub(crate) fn receive_sized(
        &mut self,
    ) -> Result<Vec<(NetworkEnvelope, usize)>, ConnectionError> {
        if !self.channel.is_open() {
            return Ok(Vec::new());
        }

        let n = match self.channel.try_read(&mut self.read_buffer) {
            Ok(0) => {
                debug!("End of stream, closing channel");
                self.close();
                return Ok(Vec::new());
            }
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(Vec::new()),
            Err(e) => {
                debug!(error = %e, "Read failed, closing channel");
                self.close();
                return Ok(Vec::new());
            }
        };
        trace!(bytes = n, "Read from channel");

        let mut envelopes = Vec::new();
        if let Err(e) = self.assembler.feed(&self.read_buffer[..n], &mut envelopes) {
            self.assembler.reset();
            return Err(e);
        }
        Ok(envelopes)
    }

    /// Wait for readiness until at least one envelope arrives.
    pub async fn read_envelopes(&mut self) -> Result<Vec<NetworkEnvelope>, ConnectionError> {
        Ok(self
            .read_sized()
            .await?
            .into_iter()
            .map(|(envelope, _)| envelope)
            .collect())
    }

    pub(crate) async fn read_sized(
        &mut self,
    ) -> Result<Vec<(NetworkEnvelope, usize)>, ConnectionError> {
        loop {
            if !self.channel.is_open() {
                return Err(ConnectionError::ConnectionClosed);
            }
            self.channel.readable().await?;
            let envelopes = self.receive_sized()?;
            if !envelopes.is_empty() {
                return Ok(envelopes);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Queue a framed envelope. Returns the encoded envelope size.
    pub fn send_envelope(&mut self, envelope: &NetworkEnvelope) -> Result<usize, ConnectionError> {
        let bytes = envelope.to_bytes()?;
        let too_large = ConnectionError::EnvelopeTooLarge {
            size: bytes.len(),
            max: self.config.max_envelope_size,
        };
        if bytes.len() > self.config.max_envelope_size {
            return Err(too_large);
        }
        let len = u32::try_from(bytes.len()).map_err(|_| too_large)?;
        encode_varint(len, &mut self.outbound);
        self.outbound.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Write queued bytes until done or the channel would block.
    /// Returns `true` once everything is written.
    pub fn flush(&mut self) -> Result<bool, ConnectionError> {
        while !self.outbound.is_empty() {
            match self.channel.try_write(&self.outbound) {
                Ok(0) => return Err(ConnectionError::ConnectionClosed),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if is_transient(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Flush, waiting for writability as needed.
    pub async fn flush_all(&mut self) -> Result<(), ConnectionError> {
        while !self.flush()? {
            self.channel.writable().await?;
        }
        Ok(())
    }

    /// Queue and fully write one envelope.
    pub async fn write_envelope(&mut self, envelope: &NetworkEnvelope) -> Result<usize, ConnectionError> {
        let size = self.send_envelope(envelope)?;
        self.flush_all().await?;
        Ok(size)
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl<C> std::fmt::Debug for NetworkEnvelopeChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkEnvelopeChannel")
            .field("config", &self.config)
            .field("pending_output", &self.outbound.len())
            .finish_non_exhaustive()
    }
}
