//! CRC32 checksums for persisted entries and files
//!
//! Checksums cover the compact serde_json encoding of the checksummed
//! value and are rendered as `crc32:xxxxxxxx`.

use std::io;

use crc32fast::Hasher;
use serde::Serialize;

const PREFIX: &str = "crc32:";

/// Computes a CRC32 checksum over the provided data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

struct HashWriter<'a>(&'a mut Hasher);

impl io::Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// CRC32 of the compact JSON encoding of `value`, streamed without
/// materializing the encoding.
///
/// If serialization fails part way, the checksum covers the bytes written
/// before the failure.
pub fn checksum_json<T: Serialize + ?Sized>(value: &T) -> u32 {
    let mut hasher = Hasher::new();
    if let Err(err) = serde_json::to_writer(HashWriter(&mut hasher), value) {
        tracing::debug!(error = %err, "checksum over partial serialization");
    }
    hasher.finalize()
}

pub fn format_checksum(checksum: u32) -> String {
    format!("{}{:08x}", PREFIX, checksum)
}

/// Parses `crc32:xxxxxxxx`
pub fn parse_checksum(text: &str) -> Option<u32> {
    let hex = text.strip_prefix(PREFIX)?;
    if hex.len() != 8 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}
