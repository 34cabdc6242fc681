//! # Envelope Codec
//!
//! Wire format: a stream of `[varint length][bincode NetworkEnvelope]`
//! frames. The reader parses the length prefix one byte at a time, then
//! accumulates exactly that many bytes before decoding, so frames may be
//! split across any number of reads.

pub mod channel;
pub mod varint;

pub use channel::{
    EnvelopeConfig, NetworkEnvelopeChannel, DEFAULT_MAX_ENVELOPE_SIZE,
    DEFAULT_RECEIVE_BUFFER_SIZE,
};
pub use varint::{encode_varint, VarIntDecoder, MAX_VARINT_BYTES};
