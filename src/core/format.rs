//! Purpose: Define the on-disk queue header and its format versioning policy.
//! Exports: `QueueHeader`, `HEADER_SIZE`, `QUEUE_FORMAT_VERSION`, `read_header`, `write_header`.
//! Role: Header Manager; the only code that knows the byte layout of offsets 0..36.
//! Invariants: All integers are big-endian; the layout is fixed at 36 bytes.
//! Invariants: Header writes are a single positioned write and are not crash-atomic.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::core::error::{Error, ErrorKind};

pub const QUEUE_FORMAT_VERSION: u32 = 1;
pub const SUPPORTED_QUEUE_FORMAT_VERSIONS: &[u32] = &[QUEUE_FORMAT_VERSION];
pub const HEADER_SIZE: usize = 36;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueHeader {
    pub version: u32,
    pub record_count: u64,
    pub record_size: u64,
    pub first_id: u64,
    pub last_id: u64,
}

impl QueueHeader {
    pub fn new(record_count: u64, record_size: u64) -> Self {
        Self {
            version: QUEUE_FORMAT_VERSION,
            record_count,
            record_size,
            first_id: 0,
            last_id: 0,
        }
    }

    pub fn with_ids(self, first_id: u64, last_id: u64) -> Self {
        Self {
            first_id,
            last_id,
            ..self
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        write_u64(&mut buf, 4, self.record_count);
        write_u64(&mut buf, 12, self.record_size);
        write_u64(&mut buf, 20, self.first_id);
        write_u64(&mut buf, 28, self.last_id);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::new(ErrorKind::Corrupt).with_message("header too small"));
        }
        Ok(Self {
            version: u32::from_be_bytes(read_4(buf, 0)),
            record_count: read_u64(buf, 4),
            record_size: read_u64(buf, 12),
            first_id: read_u64(buf, 20),
            last_id: read_u64(buf, 28),
        })
    }

    /// Number of records in `[first_id, last_id)`.
    pub fn pending(&self) -> u64 {
        self.last_id.saturating_sub(self.first_id)
    }

    /// Total file length implied by the slot geometry.
    pub fn file_len(&self) -> Option<u64> {
        self.record_count
            .checked_mul(self.record_size)
            .and_then(|slots| slots.checked_add(HEADER_SIZE as u64))
    }

    /// Checks self-consistency of a header read from disk.
    pub fn validate(&self, actual_file_size: u64) -> Result<(), Error> {
        if !SUPPORTED_QUEUE_FORMAT_VERSIONS.contains(&self.version) {
            return Err(queue_version_error(self.version));
        }
        if self.record_count == 0 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("record count is zero"));
        }
        if self.record_size < crate::core::slot::LEN_PREFIX_SIZE as u64 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("record size smaller than length prefix"));
        }
        let expected = self.file_len().ok_or_else(|| {
            Error::new(ErrorKind::Corrupt).with_message("slot region overflows")
        })?;
        if actual_file_size < expected {
            return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                "file is {actual_file_size} bytes, header requires {expected}"
            )));
        }
        if self.first_id > self.last_id {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("first id exceeds last id"));
        }
        if self.pending() > self.record_count {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("pending records exceed record count"));
        }
        Ok(())
    }
}

pub fn queue_version_error(detected: u32) -> Error {
    let supported = SUPPORTED_QUEUE_FORMAT_VERSIONS
        .iter()
        .map(|version| version.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Error::new(ErrorKind::Usage)
        .with_message(format!(
            "unsupported queue format version {detected} (supported: {supported})"
        ))
        .with_hint("Upgrade pqueue, or drain the queue with the version that wrote it.")
}

pub fn read_header(mut file: &File, path: &Path) -> Result<QueueHeader, Error> {
    let mut buf = [0u8; HEADER_SIZE];
    file.seek(SeekFrom::Start(0))
        .map_err(|err| Error::io(path, err))?;
    file.read_exact(&mut buf)
        .map_err(|err| Error::io(path, err))?;
    QueueHeader::decode(&buf)
}

pub fn write_header(mut file: &File, header: &QueueHeader, path: &Path) -> Result<(), Error> {
    let buf = header.encode();
    file.seek(SeekFrom::Start(0))
        .map_err(|err| Error::io(path, err))?;
    file.write_all(&buf)
        .map_err(|err| Error::io(path, err))?;
    Ok(())
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes(read_8(buf, offset))
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}
