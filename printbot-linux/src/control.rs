//! Control loop: owns the bot, the peer link and the pending job; drives them on a fixed tick.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use printbot_core::{Action, JobOutcome, JobResult, PrintBot, Spool};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::link::PeerLink;
use crate::runner::{JobHandle, JobRunner};
use crate::session;

pub struct ControlLoop<L, R, S: Spool> {
    bot: PrintBot<S>,
    link: L,
    runner: R,
    pending: Option<JobHandle>,
    snapshot_path: PathBuf,
    period: Duration,
}

impl<L: PeerLink, R: JobRunner, S: Spool> ControlLoop<L, R, S> {
    pub fn new(bot: PrintBot<S>, link: L, runner: R, snapshot_path: PathBuf, period: Duration) -> Self {
        Self {
            bot,
            link,
            runner,
            pending: None,
            snapshot_path,
            period,
        }
    }

    /// One iteration: collect a finished job, probe connectivity and start the next job,
    /// then hand every queued peer event to the bot.
    pub fn tick(&mut self) {
        if let Some(result) = self.pending.as_mut().and_then(JobHandle::poll) {
            self.pending = None;
            let actions = self.bot.on_job_finished(result);
            self.execute(actions);
        }
        let healthy = self.link.connection_status();
        let actions = self.bot.tick(healthy);
        self.execute(actions);
        while let Some(event) = self.link.poll_event() {
            let actions = self.bot.on_event(event);
            self.execute(actions);
        }
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SendText(peer, text) => {
                    debug!(to = %self.link.display_name(&peer), %text, "send");
                    self.link.send_text(peer, &text);
                }
                Action::AcceptFriend(key) => self.link.accept_friend(key),
                Action::ControlFile(peer, transfer, control) => {
                    self.link.control_file(peer, transfer, control)
                }
                Action::StartJob(job) => {
                    if self.pending.is_some() {
                        // Report it failed so the queue moves on.
                        warn!(file = %job.filename, "a job is already running, not starting another");
                        let result = JobResult {
                            entry_id: job.entry_id,
                            outcome: JobOutcome::Fault("another job is still running".into()),
                        };
                        let follow_up = self.bot.on_job_finished(result);
                        self.execute(follow_up);
                        continue;
                    }
                    self.pending = Some(self.runner.run(job));
                }
                Action::Reconnect => {
                    info!("connection lost, bootstrapping again");
                    self.link.bootstrap();
                }
                Action::SaveSnapshot => self.save_snapshot(),
            }
        }
    }

    fn save_snapshot(&self) {
        if let Err(e) = session::save(&self.snapshot_path, self.link.session()) {
            warn!("could not save session: {e:#}");
        }
    }

    /// Tick until `shutdown` resolves, then write a last snapshot.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        self.link.bootstrap();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => self.tick(),
            }
        }
        info!("shutting down");
        self.save_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use printbot_core::{
        BotConfig, DirSpool, FileControl, FileKind, Keypair, PeerEvent, PeerId, PrintJob,
        PublicKey, SessionState, TransferNumber,
    };
    use tokio::sync::oneshot;

    struct FakeLink {
        session: SessionState,
        healthy: bool,
        events: VecDeque<PeerEvent>,
        sent: Vec<(PeerId, String)>,
        controls: Vec<(PeerId, TransferNumber, FileControl)>,
        bootstraps: usize,
    }

    impl FakeLink {
        fn new() -> Self {
            Self {
                session: SessionState::new(&Keypair::generate(), "PrintBot"),
                healthy: true,
                events: VecDeque::new(),
                sent: Vec::new(),
                controls: Vec::new(),
                bootstraps: 0,
            }
        }

        fn texts_to(&self, peer: PeerId) -> Vec<&str> {
            self.sent
                .iter()
                .filter(|(p, _)| *p == peer)
                .map(|(_, t)| t.as_str())
                .collect()
        }
    }

    impl PeerLink for FakeLink {
        fn bootstrap(&mut self) {
            self.bootstraps += 1;
        }
        fn connection_status(&self) -> bool {
            self.healthy
        }
        fn send_text(&mut self, peer: PeerId, text: &str) {
            self.sent.push((peer, text.to_string()));
        }
        fn control_file(&mut self, peer: PeerId, transfer: TransferNumber, control: FileControl) {
            self.controls.push((peer, transfer, control));
        }
        fn accept_friend(&mut self, key: PublicKey) {
            self.session.add_friend(key);
        }
        fn poll_event(&mut self) -> Option<PeerEvent> {
            self.events.pop_front()
        }
        fn display_name(&self, peer: &PeerId) -> String {
            peer.to_string()
        }
        fn session(&self) -> &SessionState {
            &self.session
        }
    }

    /// Records each job and keeps its completion sender for the test to fire.
    #[derive(Default)]
    struct FakeRunner {
        jobs: Vec<PrintJob>,
        senders: Vec<oneshot::Sender<JobResult>>,
    }

    impl FakeRunner {
        fn finish(&mut self, outcome: JobOutcome) {
            let tx = self.senders.remove(0);
            let entry_id = self.jobs[self.jobs.len() - 1].entry_id;
            tx.send(JobResult { entry_id, outcome }).unwrap();
        }
    }

    impl JobRunner for FakeRunner {
        fn run(&mut self, job: PrintJob) -> JobHandle {
            let (tx, handle) = JobHandle::channel(job.entry_id);
            self.jobs.push(job);
            self.senders.push(tx);
            handle
        }
    }

    type Loop = ControlLoop<FakeLink, FakeRunner, DirSpool>;

    fn control(dir: &tempfile::TempDir) -> Loop {
        let spool = DirSpool::open(dir.path().join("spool")).unwrap();
        ControlLoop::new(
            PrintBot::new(spool, BotConfig::default()),
            FakeLink::new(),
            FakeRunner::default(),
            dir.path().join("printbot.data"),
            Duration::from_millis(10),
        )
    }

    fn send_file(c: &mut Loop, peer: PeerId, transfer: TransferNumber, name: &str) {
        let body = b"G28\nG1 X5 Y5\n".to_vec();
        c.link.events.extend([
            PeerEvent::FileOffer {
                peer,
                transfer,
                kind: FileKind::Data,
                size: body.len() as u64,
                filename: name.to_string(),
            },
            PeerEvent::FileChunk {
                peer,
                transfer,
                position: 0,
                data: Some(body.clone()),
            },
            PeerEvent::FileChunk {
                peer,
                transfer,
                position: body.len() as u64,
                data: None,
            },
        ]);
    }

    #[test]
    fn runner_invoked_once_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = control(&dir);
        let a = Keypair::generate().peer_id();
        send_file(&mut c, a, 0, "cube.gcode");
        send_file(&mut c, a, 1, "vase.gcode");
        for _ in 0..10 {
            c.tick();
        }
        assert_eq!(c.runner.jobs.len(), 1);
        assert_eq!(c.runner.jobs[0].filename, "cube.gcode");
        assert!(c.runner.jobs[0].path.is_absolute());

        c.runner.finish(JobOutcome::Done { exit_code: Some(0) });
        c.tick();
        assert_eq!(c.runner.jobs.len(), 2);
        assert_eq!(c.runner.jobs[1].filename, "vase.gcode");
        let texts = c.link.texts_to(a);
        assert!(texts.contains(&"I am happy to report cube.gcode is printed!"));
        assert!(texts.contains(&"vase.gcode is at position 1 of 1 in the print queue"));

        c.runner.finish(JobOutcome::Fault("printer unplugged".into()));
        for _ in 0..5 {
            c.tick();
        }
        assert_eq!(c.runner.jobs.len(), 2);
        assert!(c.bot.queue().is_empty());
        assert!(c.link.texts_to(a).contains(&"I am happy to report vase.gcode is printed!"));
    }

    #[test]
    fn start_while_busy_does_not_stall_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = control(&dir);
        let (_busy, handle) = JobHandle::channel(uuid::Uuid::new_v4());
        c.pending = Some(handle);
        let a = Keypair::generate().peer_id();
        send_file(&mut c, a, 0, "cube.gcode");
        c.tick();
        c.tick();
        assert!(c.runner.jobs.is_empty());
        assert!(c.bot.queue().is_empty());
        assert!(c.bot.queue().is_idle());
        assert!(c.link.texts_to(a).contains(&"I am happy to report cube.gcode is printed!"));
    }

    #[test]
    fn rejected_format_never_reaches_runner() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = control(&dir);
        let b = Keypair::generate().peer_id();
        send_file(&mut c, b, 0, "notes.txt");
        for _ in 0..3 {
            c.tick();
        }
        assert!(c.runner.jobs.is_empty());
        assert_eq!(c.link.controls, vec![(b, 0, FileControl::Resume)]);
        assert_eq!(c.link.texts_to(b), vec!["Sorry, I only print from .gcode files"]);
    }

    #[test]
    fn reconnects_once_per_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = control(&dir);
        for healthy in [false, true, false, false] {
            c.link.healthy = healthy;
            c.tick();
        }
        assert_eq!(c.link.bootstraps, 1);
    }

    #[test]
    fn friend_request_saves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = control(&dir);
        let friend = Keypair::generate();
        c.link.events.push_back(PeerEvent::FriendRequest {
            public_key: friend.public_key().clone(),
            message: "hi".into(),
        });
        c.tick();
        assert_eq!(c.link.texts_to(friend.peer_id()).len(), 1);
        let saved = session::load_or_create(&dir.path().join("printbot.data"), "x").unwrap();
        assert_eq!(saved.friends, vec![friend.public_key().clone()]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let c = control(&dir);
        c.run(tokio::time::sleep(Duration::from_millis(50))).await;
        assert!(dir.path().join("printbot.data").exists());
    }
}
