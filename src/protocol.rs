//! Protocol Module
//!
//! Framing for the local transport: every frame is a 4-byte little-endian
//! length followed by a JSON-serialised [`PkiMessage`].

use anyhow::{anyhow, Context, Result};
use std::io::{ErrorKind, Read};

use crate::message::PkiMessage;

/// Serialize a message to a length-prefixed byte array
///
/// # Returns
/// * `Result<(u32, Vec<u8>)>` - Tuple of (length, bytes) where bytes includes 4-byte length prefix
pub fn serialize_message(message: &PkiMessage) -> Result<(u32, Vec<u8>)> {
    let json = serde_json::to_vec(message).context("Failed to serialize message to JSON")?;
    let length = u32::try_from(json.len())
        .map_err(|_| anyhow!("Message of {} bytes does not fit a frame", json.len()))?;

    let mut buffer = Vec::with_capacity(4 + json.len());
    buffer.extend_from_slice(&length.to_le_bytes());
    buffer.extend_from_slice(&json);

    Ok((length, buffer))
}

/// Deserialize a frame payload (without its length prefix) to a message
pub fn deserialize_message(bytes: &[u8]) -> Result<PkiMessage> {
    let json_str = std::str::from_utf8(bytes).context("Failed to decode frame bytes as UTF-8")?;

    let message: PkiMessage =
        serde_json::from_str(json_str).context("Failed to deserialize JSON to PkiMessage")?;

    Ok(message)
}

/// Read one frame payload.
///
/// Returns `Ok(None)` when the peer closed the stream before sending a
/// length prefix. Frames longer than `max_frame_size` are rejected before
/// their payload is allocated.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_size: u32) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read frame length"),
    }
    let length = u32::from_le_bytes(len_buf);
    if length > max_frame_size {
        return Err(anyhow!(
            "Frame of {} bytes exceeds the limit of {} bytes",
            length,
            max_frame_size
        ));
    }
    let mut buf = vec![0u8; length as usize];
    reader
        .read_exact(&mut buf)
        .context("Connection closed in the middle of a frame")?;
    Ok(Some(buf))
}
