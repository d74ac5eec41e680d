//! PrintBot core: receive files from peers, queue them, print them one at a time.
//! Host-driven: no network or process I/O; host passes events and receives actions.

pub mod bot;
pub mod connectivity;
pub mod identity;
pub mod job;
pub mod notify;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod spool;
pub mod transfer;
pub mod wire;

pub use bot::{Action, BotConfig, PeerEvent, PrintBot};
pub use identity::{Keypair, PeerId, PublicKey};
pub use job::{JobOutcome, JobResult, PrintJob};
pub use protocol::{FileControl, FileKind, Message, TransferNumber, PROTOCOL_VERSION};
pub use queue::{PrintQueue, QueueEntry};
pub use session::SessionState;
pub use spool::{DirSpool, Spool};
