// Slot framing: a big-endian u32 length prefix followed by the opaque payload.
use crate::core::error::{Error, ErrorKind};

pub const LEN_PREFIX_SIZE: usize = 4;

/// Payload bytes available in a slot of `record_size` bytes.
pub fn payload_capacity(record_size: u64) -> u64 {
    record_size.saturating_sub(LEN_PREFIX_SIZE as u64)
}

pub fn encode(record: &[u8], record_size: u64) -> Result<Vec<u8>, Error> {
    let capacity = payload_capacity(record_size);
    if record.len() as u64 > capacity {
        return Err(Error::new(ErrorKind::Oversized).with_message(format!(
            "record is {} bytes, slot payload capacity is {capacity}",
            record.len()
        )));
    }
    let len = u32::try_from(record.len()).map_err(|_| {
        Error::new(ErrorKind::Oversized).with_message("record exceeds u32 length")
    })?;
    let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + record.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(record);
    Ok(buf)
}

pub fn decode_length(prefix: [u8; LEN_PREFIX_SIZE]) -> u32 {
    u32::from_be_bytes(prefix)
}

/// Rejects a stored length that could not have been written into this slot.
pub fn validate_length(len: u32, record_size: u64) -> Result<(), Error> {
    if u64::from(len) > payload_capacity(record_size) {
        return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
            "slot length prefix {len} exceeds payload capacity {}",
            payload_capacity(record_size)
        )));
    }
    Ok(())
}
