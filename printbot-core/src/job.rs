//! A print job handed to the host's runner, and what the runner reports back.

use std::path::PathBuf;

use uuid::Uuid;

use crate::identity::PeerId;
use crate::queue::QueueEntry;

/// One execution of the print command for the queue head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    /// Id of the queue entry this job prints.
    pub entry_id: Uuid,
    pub requester: PeerId,
    pub filename: String,
    /// Absolute path of the spooled file.
    pub path: PathBuf,
}

impl From<&QueueEntry> for PrintJob {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            entry_id: entry.id,
            requester: entry.requester,
            filename: entry.filename.clone(),
            path: entry.path.clone(),
        }
    }
}

/// How the print command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The command ran to completion. The exit code is recorded but not judged.
    Done { exit_code: Option<i32> },
    /// The command could not be launched or waited on.
    Fault(String),
}

impl JobOutcome {
    pub fn is_fault(&self) -> bool {
        matches!(self, JobOutcome::Fault(_))
    }
}

/// Completion report for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub entry_id: Uuid,
    pub outcome: JobOutcome,
}
