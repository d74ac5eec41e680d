//! PrintBot wire protocol: message types and version.

use serde::{Deserialize, Serialize};

/// Current protocol version. Sent as the first handshake byte.
pub const PROTOCOL_VERSION: u8 = 1;

/// Per-peer transfer number, chosen by the sender of a file.
pub type TransferNumber = u32;

/// What an offered file is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Data,
    Avatar,
}

/// Receiver's answer to a file offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileControl {
    /// Start (or continue) sending chunks.
    Resume,
    /// Drop the transfer; no more chunks will be accepted.
    Cancel,
}

/// All messages carried inside sealed frames. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Ask to be added as a friend. The sender's key is already known from the handshake.
    FriendRequest { message: String },
    /// Announce a display name.
    Name { name: String },
    /// Chat text.
    Text { text: String },
    /// Announce an incoming file. Chunks follow only after `FileControl::Resume`.
    FileOffer {
        transfer: TransferNumber,
        kind: FileKind,
        size: u64,
        filename: String,
    },
    /// File payload at `position`; `data: None` marks the end of the file.
    FileChunk {
        transfer: TransferNumber,
        position: u64,
        data: Option<Vec<u8>>,
    },
    FileControl {
        transfer: TransferNumber,
        control: FileControl,
    },
}
