//! Print queue: FIFO of finished files with at most one active job.
//!
//! The `printing` flag is true exactly while a job runs for the current head. It is
//! set by [`PrintQueue::start_head`] and cleared by [`PrintQueue::complete_head`] in the
//! same step that removes the head, so the two never disagree.

use std::collections::VecDeque;
use std::path::PathBuf;

use uuid::Uuid;

use crate::identity::PeerId;
use crate::job::JobOutcome;

/// A completed, accepted file waiting for the printer. Its position is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: Uuid,
    pub requester: PeerId,
    pub filename: String,
    pub path: PathBuf,
}

impl QueueEntry {
    pub fn new(requester: PeerId, filename: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester,
            filename: filename.into(),
            path,
        }
    }
}

#[derive(Debug, Default)]
pub struct PrintQueue {
    entries: VecDeque<QueueEntry>,
    printing: bool,
}

impl PrintQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns the 1-based position.
    pub fn enqueue(&mut self, entry: QueueEntry) -> usize {
        self.entries.push_back(entry);
        self.entries.len()
    }

    pub fn peek_head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn is_idle(&self) -> bool {
        !self.printing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark the head as printing and return it.
    ///
    /// # Panics
    /// If a job is already running or the queue is empty. Callers check
    /// [`is_idle`](Self::is_idle) and [`peek_head`](Self::peek_head) first.
    pub fn start_head(&mut self) -> &QueueEntry {
        assert!(self.is_idle(), "start_head while a job is running");
        let head = self
            .entries
            .front()
            .unwrap_or_else(|| panic!("start_head on an empty queue"));
        self.printing = true;
        head
    }

    /// Remove the printed head and go idle. Returns every remaining entry with its new
    /// 1-based position so the caller can renotify requesters.
    ///
    /// Success and failure advance the queue the same way; `outcome` only feeds the log.
    ///
    /// # Panics
    /// If no job is running.
    pub fn complete_head(&mut self, outcome: &JobOutcome) -> (QueueEntry, Vec<(usize, QueueEntry)>) {
        assert!(self.printing, "complete_head with no job running");
        let Some(done) = self.entries.pop_front() else {
            panic!("printing flag set on an empty queue");
        };
        self.printing = false;
        tracing::debug!(file = %done.filename, fault = outcome.is_fault(), "queue head completed");
        (done, self.positions())
    }

    /// All entries with their 1-based positions, head first.
    pub fn positions(&self) -> Vec<(usize, QueueEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i + 1, e.clone()))
            .collect()
    }

    /// Positions of the entries sent by `peer`, in queue order.
    pub fn positions_of(&self, peer: PeerId) -> Vec<(usize, &QueueEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.requester == peer)
            .map(|(i, e)| (i + 1, e))
            .collect()
    }
}
