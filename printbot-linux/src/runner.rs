//! Print job runner: launches the print command off the control loop and hands the
//! result back exactly once.

use std::path::PathBuf;
use std::process::Stdio;

use printbot_core::{JobOutcome, JobResult, PrintJob};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PrintCommand;

/// The pending result of one job. Polled by the control loop each tick.
#[derive(Debug)]
pub struct JobHandle {
    entry_id: Uuid,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    /// `Some` once the job has ended. A runner that went away without reporting counts
    /// as a fault.
    pub fn poll(&mut self) -> Option<JobResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(JobResult {
                entry_id: self.entry_id,
                outcome: JobOutcome::Fault("runner dropped the job".to_string()),
            }),
        }
    }

    /// A handle for `entry_id` and the sender that completes it.
    pub fn channel(entry_id: Uuid) -> (oneshot::Sender<JobResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { entry_id, rx })
    }
}

pub trait JobRunner {
    /// Start `job` in the background.
    fn run(&mut self, job: PrintJob) -> JobHandle;
}

/// Runs `program args... <path>` with the working directory passed in an env var.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    workdir_env: String,
    workdir: PathBuf,
}

impl CommandRunner {
    pub fn new(cmd: &PrintCommand, default_workdir: PathBuf) -> Self {
        Self {
            program: cmd.program.clone(),
            args: cmd.args.clone(),
            workdir_env: cmd.workdir_env.clone(),
            workdir: cmd.workdir.clone().unwrap_or(default_workdir),
        }
    }

    fn command(&self, job: &PrintJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&job.path)
            .env(&self.workdir_env, &self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl JobRunner for CommandRunner {
    fn run(&mut self, job: PrintJob) -> JobHandle {
        let entry_id = job.entry_id;
        let (tx, handle) = JobHandle::channel(entry_id);
        let mut cmd = self.command(&job);
        let program = self.program.clone();
        tokio::spawn(async move {
            let outcome = match cmd.status().await {
                Ok(status) => {
                    info!(file = %job.filename, %status, "{program} exited");
                    JobOutcome::Done {
                        exit_code: status.code(),
                    }
                }
                Err(e) => {
                    warn!(file = %job.filename, "could not run {program}: {e}");
                    JobOutcome::Fault(e.to_string())
                }
            };
            let _ = tx.send(JobResult { entry_id, outcome });
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use printbot_core::Keypair;

    fn job(path: &str) -> PrintJob {
        PrintJob {
            entry_id: Uuid::new_v4(),
            requester: Keypair::generate().peer_id(),
            filename: "cube.gcode".to_string(),
            path: PathBuf::from(path),
        }
    }

    fn runner(program: &str, args: &[&str]) -> CommandRunner {
        let cmd = PrintCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..PrintCommand::default()
        };
        CommandRunner::new(&cmd, std::env::temp_dir())
    }

    async fn wait(handle: &mut JobHandle) -> JobResult {
        for _ in 0..500 {
            if let Some(r) = handle.poll() {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let j = job("/dev/null");
        let mut handle = runner("sh", &["-c", "exit 3", "sh"]).run(j.clone());
        let result = wait(&mut handle).await;
        assert_eq!(result.entry_id, j.entry_id);
        assert_eq!(result.outcome, JobOutcome::Done { exit_code: Some(3) });
    }

    #[tokio::test]
    async fn path_and_workdir_reach_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("seen");
        let script = format!("printf '%s %s' \"$1\" \"$PRINTBOT_WORKDIR\" > {}", out.display());
        let mut r = runner("sh", &["-c", &script, "sh"]);
        r.workdir = dir.path().to_path_buf();
        let mut handle = r.run(job("/spool/cube.gcode"));
        assert!(!wait(&mut handle).await.outcome.is_fault());
        let seen = std::fs::read_to_string(&out).unwrap();
        assert_eq!(seen, format!("/spool/cube.gcode {}", dir.path().display()));
    }

    #[tokio::test]
    async fn missing_program_is_a_fault() {
        let mut handle = runner("/nonexistent/printcore", &[]).run(job("/dev/null"));
        assert!(wait(&mut handle).await.outcome.is_fault());
    }

    #[test]
    fn dropped_sender_is_a_fault() {
        let id = Uuid::new_v4();
        let (tx, mut handle) = JobHandle::channel(id);
        assert!(handle.poll().is_none());
        drop(tx);
        let result = handle.poll().unwrap();
        assert_eq!(result.entry_id, id);
        assert!(result.outcome.is_fault());
    }
}
