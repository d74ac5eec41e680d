//! Host-driven API: PrintBot receives peer events, ticks and job results, returns actions.
//!
//! The bot owns the transfer assembler and the print queue. Nothing here blocks or
//! touches the network; the host executes the returned [`Action`]s in order.

use tracing::{debug, info, warn};

use crate::connectivity::{Connectivity, Transition};
use crate::identity::{PeerId, PublicKey};
use crate::job::{JobOutcome, JobResult, PrintJob};
use crate::notify;
use crate::protocol::{FileControl, FileKind, TransferNumber};
use crate::queue::PrintQueue;
use crate::spool::Spool;
use crate::transfer::{Assembler, TransferError, DEFAULT_ACCEPTED_SUFFIX};

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Files whose name ends with this are printed; anything else is refused.
    pub accepted_suffix: String,
    /// Tell the requester when the print command could not run, instead of always
    /// reporting the file as printed.
    pub report_failures: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            accepted_suffix: DEFAULT_ACCEPTED_SUFFIX.to_string(),
            report_failures: false,
        }
    }
}

/// What the peer protocol delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    FriendRequest {
        public_key: PublicKey,
        message: String,
    },
    Text {
        peer: PeerId,
        text: String,
    },
    FileOffer {
        peer: PeerId,
        transfer: TransferNumber,
        kind: FileKind,
        size: u64,
        filename: String,
    },
    /// `data: None` ends the file.
    FileChunk {
        peer: PeerId,
        transfer: TransferNumber,
        position: u64,
        data: Option<Vec<u8>>,
    },
    Disconnected {
        peer: PeerId,
    },
}

/// Action for the host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendText(PeerId, String),
    AcceptFriend(PublicKey),
    ControlFile(PeerId, TransferNumber, FileControl),
    /// Run the print command for this job off the control thread and report back
    /// through [`PrintBot::on_job_finished`].
    StartJob(PrintJob),
    /// Bootstrap again after losing connectivity.
    Reconnect,
    /// Write the session snapshot.
    SaveSnapshot,
}

pub struct PrintBot<S: Spool> {
    assembler: Assembler<S>,
    queue: PrintQueue,
    connectivity: Connectivity,
    config: BotConfig,
}

impl<S: Spool> PrintBot<S> {
    pub fn new(spool: S, config: BotConfig) -> Self {
        Self {
            assembler: Assembler::new(spool, config.accepted_suffix.clone()),
            queue: PrintQueue::new(),
            connectivity: Connectivity::default(),
            config,
        }
    }

    pub fn queue(&self) -> &PrintQueue {
        &self.queue
    }

    pub fn on_event(&mut self, event: PeerEvent) -> Vec<Action> {
        match event {
            PeerEvent::FriendRequest {
                public_key,
                message,
            } => self.on_friend_request(public_key, &message),
            PeerEvent::Text { peer, text } => self.on_text(peer, &text),
            PeerEvent::FileOffer {
                peer,
                transfer,
                kind,
                size,
                filename,
            } => self.on_file_offer(peer, transfer, kind, size, &filename),
            PeerEvent::FileChunk {
                peer,
                transfer,
                position,
                data,
            } => self.on_file_chunk(peer, transfer, position, data),
            PeerEvent::Disconnected { peer } => {
                let dropped = self.assembler.abort_peer(peer);
                if dropped > 0 {
                    info!(%peer, dropped, "peer left mid-transfer");
                }
                vec![]
            }
        }
    }

    /// Friend requests are always accepted.
    pub fn on_friend_request(&mut self, public_key: PublicKey, message: &str) -> Vec<Action> {
        let peer = public_key.peer_id();
        info!(%peer, greeting = message, "friend request accepted");
        vec![
            Action::AcceptFriend(public_key),
            Action::SendText(peer, notify::intro(self.assembler.accepted_suffix())),
            Action::SaveSnapshot,
        ]
    }

    pub fn on_text(&mut self, peer: PeerId, text: &str) -> Vec<Action> {
        if notify::is_status_command(text) {
            let report = self.status(peer);
            let reply = if report.is_empty() {
                notify::NOTHING_QUEUED.to_string()
            } else {
                report
            };
            return vec![Action::SendText(peer, reply)];
        }
        vec![Action::SendText(
            peer,
            notify::help(self.assembler.accepted_suffix()),
        )]
    }

    /// Status report for `peer`: one line per queued file, empty if none.
    pub fn status(&self, peer: PeerId) -> String {
        notify::status_report(&self.queue, peer)
    }

    pub fn on_file_offer(
        &mut self,
        peer: PeerId,
        transfer: TransferNumber,
        kind: FileKind,
        size: u64,
        filename: &str,
    ) -> Vec<Action> {
        let cancel = Action::ControlFile(peer, transfer, FileControl::Cancel);
        if kind == FileKind::Avatar {
            debug!(%peer, transfer, "ignoring avatar");
            return vec![cancel];
        }
        match self.assembler.begin(peer, transfer, filename, size) {
            Ok(_) => vec![Action::ControlFile(peer, transfer, FileControl::Resume)],
            Err(TransferError::Io { filename, source }) => {
                warn!(%peer, file = %filename, "cannot spool: {source}");
                vec![cancel, Action::SendText(peer, notify::receive_failed(&filename))]
            }
            Err(TransferError::InUse { filename }) => {
                warn!(%peer, transfer, file = %filename, "transfer number already in use");
                vec![cancel, Action::SendText(peer, notify::transfer_in_use(&filename))]
            }
            Err(e) => {
                warn!(%peer, transfer, "{e}");
                vec![cancel, Action::SendText(peer, notify::transfer_rejected(filename))]
            }
        }
    }

    pub fn on_file_chunk(
        &mut self,
        peer: PeerId,
        transfer: TransferNumber,
        position: u64,
        data: Option<Vec<u8>>,
    ) -> Vec<Action> {
        let Some(data) = data else {
            return self.on_file_finished(peer, transfer);
        };
        match self.assembler.append(peer, transfer, position, &data) {
            Ok(()) => vec![],
            Err(TransferError::Unknown) => {
                debug!(%peer, transfer, position, "chunk for unknown transfer");
                vec![]
            }
            Err(TransferError::Io { filename, source }) => {
                warn!(%peer, file = %filename, "write failed: {source}");
                vec![
                    Action::ControlFile(peer, transfer, FileControl::Cancel),
                    Action::SendText(peer, notify::receive_failed(&filename)),
                ]
            }
            Err(e) => {
                warn!(%peer, transfer, "{e}");
                vec![]
            }
        }
    }

    fn on_file_finished(&mut self, peer: PeerId, transfer: TransferNumber) -> Vec<Action> {
        match self.assembler.finish(peer, transfer) {
            Ok(entry) => {
                info!(%peer, file = %entry.filename, "finished transfer");
                let filename = entry.filename.clone();
                let position = self.queue.enqueue(entry);
                vec![
                    Action::SendText(peer, notify::received(&filename)),
                    Action::SendText(
                        peer,
                        notify::position(&filename, position, self.queue.len()),
                    ),
                ]
            }
            Err(TransferError::UnsupportedFormat { filename }) => {
                info!(%peer, file = %filename, "refused, wrong format");
                vec![Action::SendText(
                    peer,
                    notify::format_rejected(self.assembler.accepted_suffix()),
                )]
            }
            Err(TransferError::Unknown) => {
                debug!(%peer, transfer, "end of unknown transfer");
                vec![]
            }
            Err(TransferError::Io { filename, source }) => {
                warn!(%peer, file = %filename, "could not close: {source}");
                vec![Action::SendText(peer, notify::receive_failed(&filename))]
            }
            Err(e) => {
                warn!(%peer, transfer, "{e}");
                vec![]
            }
        }
    }

    /// Once per control-loop iteration: apply the connectivity probe, then start the
    /// queue head if nothing is printing and tell everyone behind it where they stand.
    pub fn tick(&mut self, healthy: bool) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.connectivity.observe(healthy) == Some(Transition::Lost) {
            actions.push(Action::Reconnect);
        }
        if self.queue.is_idle() && !self.queue.is_empty() {
            let job = PrintJob::from(self.queue.start_head());
            info!(requester = %job.requester, file = %job.filename, "starting print job");
            actions.push(Action::SendText(job.requester, notify::printing(&job.filename)));
            actions.push(Action::StartJob(job));
            let total = self.queue.len();
            actions.extend(self.queue.positions().into_iter().skip(1).map(
                |(position, entry)| {
                    Action::SendText(
                        entry.requester,
                        notify::position(&entry.filename, position, total),
                    )
                },
            ));
        }
        actions
    }

    /// The runner finished the head job. Removes it from the queue and the spool, tells
    /// its requester, and tells everyone still waiting their new position.
    pub fn on_job_finished(&mut self, result: JobResult) -> Vec<Action> {
        let is_current = !self.queue.is_idle()
            && self.queue.peek_head().map(|e| e.id) == Some(result.entry_id);
        if !is_current {
            warn!(entry = %result.entry_id, "result for a job that is not running, ignored");
            return vec![];
        }
        let (done, remaining) = self.queue.complete_head(&result.outcome);
        self.assembler.discard(&done.path);
        let reply = match &result.outcome {
            JobOutcome::Done { exit_code } => {
                info!(file = %done.filename, ?exit_code, "print job finished");
                notify::printed(&done.filename)
            }
            JobOutcome::Fault(reason) => {
                warn!(file = %done.filename, "print job fault: {reason}");
                if self.config.report_failures {
                    notify::print_failed(&done.filename)
                } else {
                    notify::printed(&done.filename)
                }
            }
        };
        let total = remaining.len();
        let mut actions = vec![Action::SendText(done.requester, reply)];
        actions.extend(remaining.into_iter().map(|(position, entry)| {
            Action::SendText(
                entry.requester,
                notify::position(&entry.filename, position, total),
            )
        }));
        actions
    }
}
