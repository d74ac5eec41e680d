//! Framing: length-prefix (4 bytes LE) around a sealed bincode payload.

use crate::protocol::Message;

/// Size of the length prefix in bytes.
pub const LEN_SIZE: usize = 4;
/// Largest frame body accepted in either direction.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Serialize a message body (no length prefix; the transport seals this before framing).
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    Ok(payload)
}

/// Parse a message body produced by [`encode_message`].
pub fn decode_message(body: &[u8]) -> Result<Message, FrameDecodeError> {
    Ok(bincode::deserialize(body)?)
}

/// Prefix `body` with its length.
pub fn frame(body: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    let len = u32::try_from(body.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Read a length prefix, rejecting oversize frames before any allocation.
pub fn body_len(prefix: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
