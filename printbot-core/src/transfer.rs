//! Transfer assembler: turns an ordered stream of file chunks into a spooled file.
//!
//! Chunks of one transfer arrive in order (the transport is a reliable ordered stream),
//! so a transfer is a linear append into its sink. A transfer is keyed by the sending
//! peer and that peer's transfer number.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::identity::PeerId;
use crate::protocol::TransferNumber;
use crate::queue::QueueEntry;
use crate::spool::{sanitize_filename, Spool};

/// Suffix accepted when none is configured.
pub const DEFAULT_ACCEPTED_SUFFIX: &str = ".gcode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub peer: PeerId,
    pub transfer: TransferNumber,
}

impl TransferKey {
    pub fn new(peer: PeerId, transfer: TransferNumber) -> Self {
        Self { peer, transfer }
    }
}

/// One in-flight incoming file.
struct Transfer<W> {
    filename: String,
    path: PathBuf,
    sink: W,
    announced: u64,
    written: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("rejected transfer of {filename:?}: {reason}")]
    Rejected {
        filename: String,
        reason: &'static str,
    },
    #[error("transfer number already in use for {filename:?}")]
    InUse { filename: String },
    #[error("unsupported format: {filename}")]
    UnsupportedFormat { filename: String },
    #[error("unknown transfer")]
    Unknown,
    #[error("could not write {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct Assembler<S: Spool> {
    spool: S,
    accepted_suffix: String,
    open: HashMap<TransferKey, Transfer<S::Sink>>,
}

impl<S: Spool> Assembler<S> {
    pub fn new(spool: S, accepted_suffix: impl Into<String>) -> Self {
        Self {
            spool,
            accepted_suffix: accepted_suffix.into(),
            open: HashMap::new(),
        }
    }

    pub fn accepted_suffix(&self) -> &str {
        &self.accepted_suffix
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.open.len()
    }

    /// Register an announced file and open its sink. Returns the sanitized file name.
    pub fn begin(
        &mut self,
        peer: PeerId,
        transfer: TransferNumber,
        filename: &str,
        size: u64,
    ) -> Result<String, TransferError> {
        let rejected = |reason: &'static str| TransferError::Rejected {
            filename: filename.to_string(),
            reason,
        };
        if size == 0 {
            return Err(rejected("empty file"));
        }
        let key = TransferKey::new(peer, transfer);
        if self.open.contains_key(&key) {
            return Err(TransferError::InUse {
                filename: filename.to_string(),
            });
        }
        let name = sanitize_filename(filename).ok_or_else(|| rejected("unusable file name"))?;
        let (sink, path) = self.spool.create(name).map_err(|source| TransferError::Io {
            filename: name.to_string(),
            source,
        })?;
        debug!(%peer, transfer, file = name, size, path = %path.display(), "receiving");
        self.open.insert(
            key,
            Transfer {
                filename: name.to_string(),
                path,
                sink,
                announced: size,
                written: 0,
            },
        );
        Ok(name.to_string())
    }

    /// Append one chunk. A write failure drops the transfer and its partial file.
    pub fn append(
        &mut self,
        peer: PeerId,
        transfer: TransferNumber,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), TransferError> {
        let key = TransferKey::new(peer, transfer);
        let t = self.open.get_mut(&key).ok_or(TransferError::Unknown)?;
        if offset != t.written {
            warn!(%peer, transfer, offset, expected = t.written, "chunk offset out of step, appending anyway");
        }
        match t.sink.write_all(bytes) {
            Ok(()) => {
                t.written = t.written.saturating_add(bytes.len() as u64);
                Ok(())
            }
            Err(source) => {
                let filename = t.filename.clone();
                self.drop_transfer(key);
                Err(TransferError::Io { filename, source })
            }
        }
    }

    /// Close the sink. An accepted file becomes a queue entry; anything else is discarded.
    pub fn finish(
        &mut self,
        peer: PeerId,
        transfer: TransferNumber,
    ) -> Result<QueueEntry, TransferError> {
        let key = TransferKey::new(peer, transfer);
        let Transfer {
            filename,
            path,
            mut sink,
            announced,
            written,
        } = self.open.remove(&key).ok_or(TransferError::Unknown)?;

        let flushed = sink.flush();
        drop(sink);
        if let Err(source) = flushed {
            self.discard(&path);
            return Err(TransferError::Io { filename, source });
        }
        if written != announced {
            warn!(%peer, file = %filename, announced, written, "size differs from offer");
        }
        if !filename.ends_with(&self.accepted_suffix) {
            self.discard(&path);
            return Err(TransferError::UnsupportedFormat { filename });
        }
        Ok(QueueEntry::new(peer, filename, path))
    }

    /// Drop every open transfer of a peer that went away.
    pub fn abort_peer(&mut self, peer: PeerId) -> usize {
        let keys: Vec<TransferKey> = self.open.keys().filter(|k| k.peer == peer).copied().collect();
        for key in &keys {
            self.drop_transfer(*key);
        }
        keys.len()
    }

    fn drop_transfer(&mut self, key: TransferKey) {
        if let Some(t) = self.open.remove(&key) {
            drop(t.sink);
            self.discard(&t.path);
        }
    }

    /// Remove a spooled file that is no longer needed, such as one that has been printed.
    pub(crate) fn discard(&mut self, path: &std::path::Path) {
        if let Err(e) = self.spool.discard(path) {
            warn!(path = %path.display(), "could not remove spooled file: {e}");
        }
    }
}
