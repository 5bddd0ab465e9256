//! Framing for log records.
//!
//! Every record is framed as:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! and a log file starts with `[MAGIC: 4 bytes][VERSION: 1 byte]`.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

/// Magic bytes identifying a computed-value log.
pub const MAGIC: [u8; 4] = *b"MSTV";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Computed values are small; anything larger is corruption.
const MAX_FRAME_DATA: usize = 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encodes `value` into one frame.
pub fn encode_frame<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .ok()
        .filter(|&l| l as usize <= MAX_FRAME_DATA)
        .ok_or_else(|| invalid(format!("record of {} bytes is too large", data.len())))?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Reads the next frame.
///
/// Returns `Ok(None)` at a clean end of input (no bytes left). A frame cut
/// short, a bad checksum or undecodable JSON is an `InvalidData` error.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<Option<T>> {
    let mut version = [0u8; 1];
    match reader.read(&mut version)? {
        0 => return Ok(None),
        _ if version[0] != FRAME_VERSION => {
            return Err(invalid(format!(
                "unsupported frame version: {} (expected {FRAME_VERSION})",
                version[0]
            )));
        }
        _ => {}
    }

    let truncated = |e: IoError| {
        if e.kind() == ErrorKind::UnexpectedEof {
            invalid("truncated frame".to_string())
        } else {
            e
        }
    };

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).map_err(truncated)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_DATA {
        return Err(invalid(format!("frame size {len} exceeds maximum {MAX_FRAME_DATA}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(truncated)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes).map_err(truncated)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}
