//! Base-128 varint length prefix (7 data bits per byte, least significant
//! group first, high bit set on every byte but the last).

use crate::domain::ConnectionError;

/// A `u32` never needs more than five groups.
pub const MAX_VARINT_BYTES: usize = 5;

const CONTINUATION_BIT: u8 = 0x80;
const DATA_MASK: u8 = 0x7F;

/// Append the varint encoding of `value` to `out`.
pub fn encode_varint(mut value: u32, out: &mut Vec<u8>) {
    while value >= u32::from(CONTINUATION_BIT) {
        out.push((value as u8 & DATA_MASK) | CONTINUATION_BIT);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Incremental decoder fed one byte at a time, so a prefix split across
/// reads resumes where it stopped.
#[derive(Debug, Clone, Default)]
pub struct VarIntDecoder {
    value: u64,
    shift: u32,
    bytes_read: usize,
}

impl VarIntDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns the value once the terminating byte arrived.
    pub fn push(&mut self, byte: u8) -> Result<Option<u32>, ConnectionError> {
        self.value |= u64::from(byte & DATA_MASK) << self.shift;
        self.bytes_read += 1;

        if byte & CONTINUATION_BIT == 0 {
            let value = self.value;
            self.reset();
            return u32::try_from(value).map(Some).map_err(|_| {
                ConnectionError::MalformedEnvelope(format!("length prefix {} overflows u32", value))
            });
        }

        if self.bytes_read >= MAX_VARINT_BYTES {
            self.reset();
            return Err(ConnectionError::MalformedEnvelope(
                "length prefix longer than 5 bytes".to_string(),
            ));
        }
        self.shift += 7;
        Ok(None)
    }

    /// A prefix is partially decoded.
    pub fn in_progress(&self) -> bool {
        self.bytes_read > 0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
