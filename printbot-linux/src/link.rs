//! Peer link: what the control loop needs from the network, and the TCP implementation.

use std::collections::HashMap;
use std::sync::Arc;

use printbot_core::{
    FileControl, Keypair, Message, PeerEvent, PeerId, PublicKey, SessionState, TransferNumber,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::transport::{self, ConnectionId, Inbound};

pub trait PeerLink {
    /// (Re)connect to the bootstrap node.
    fn bootstrap(&mut self);
    /// True while the bootstrap session is alive.
    fn connection_status(&self) -> bool;
    fn send_text(&mut self, peer: PeerId, text: &str);
    fn control_file(&mut self, peer: PeerId, transfer: TransferNumber, control: FileControl);
    fn accept_friend(&mut self, key: PublicKey);
    /// Next event for the bot, if any arrived. Never blocks.
    fn poll_event(&mut self) -> Option<PeerEvent>;
    /// Name the peer announced, or its short id.
    fn display_name(&self, peer: &PeerId) -> String;
    /// State to persist.
    fn session(&self) -> &SessionState;
}

struct Connection {
    id: ConnectionId,
    public_key: PublicKey,
    outbound: mpsc::UnboundedSender<Message>,
}

/// [`PeerLink`] over [`transport`]. Owned by the control loop; connection tasks reach it
/// only through the inbound channel.
pub struct NetLink {
    keypair: Arc<Keypair>,
    session: SessionState,
    bootstrap_addr: String,
    bootstrap_key: PublicKey,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    connections: HashMap<PeerId, Connection>,
    names: HashMap<PeerId, String>,
    bootstrap_task: Option<JoinHandle<()>>,
}

impl NetLink {
    pub fn new(
        keypair: Arc<Keypair>,
        session: SessionState,
        bootstrap_addr: String,
        bootstrap_key: PublicKey,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            keypair,
            session,
            bootstrap_addr,
            bootstrap_key,
            inbound_tx,
            inbound_rx,
            connections: HashMap::new(),
            names: HashMap::new(),
            bootstrap_task: None,
        }
    }

    /// Sender for the listener task.
    pub fn inbound(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbound_tx.clone()
    }

    fn is_friend(&self, peer: &PeerId) -> bool {
        self.session.friends.iter().any(|k| k.peer_id() == *peer)
    }

    fn send(&self, peer: PeerId, message: Message) {
        match self.connections.get(&peer) {
            Some(c) => {
                if c.outbound.send(message).is_err() {
                    debug!(%peer, "connection already closing, message dropped");
                }
            }
            None => debug!(%peer, "not connected, message dropped"),
        }
    }

    /// Bookkeeping for one inbound item; returns the event for the bot, if any.
    fn handle(&mut self, inbound: Inbound) -> Option<PeerEvent> {
        match inbound {
            Inbound::Connected {
                peer,
                id,
                public_key,
                outbound,
            } => {
                info!(%peer, "peer connected");
                let _ = outbound.send(Message::Name {
                    name: self.session.name.clone(),
                });
                self.connections.insert(
                    peer,
                    Connection {
                        id,
                        public_key,
                        outbound,
                    },
                );
                None
            }
            Inbound::Closed { peer, id } => {
                if self.connections.get(&peer).map(|c| c.id) != Some(id) {
                    return None;
                }
                self.connections.remove(&peer);
                info!(peer = %self.display_name(&peer), "peer disconnected");
                Some(PeerEvent::Disconnected { peer })
            }
            Inbound::Message { peer, message } => self.on_message(peer, message),
        }
    }

    fn on_message(&mut self, peer: PeerId, message: Message) -> Option<PeerEvent> {
        if let Message::FriendRequest { message } = message {
            if self.is_friend(&peer) {
                debug!(%peer, "friend request from a friend, ignored");
                return None;
            }
            let public_key = self.connections.get(&peer)?.public_key.clone();
            return Some(PeerEvent::FriendRequest {
                public_key,
                message,
            });
        }
        if !self.is_friend(&peer) {
            debug!(%peer, "message from a stranger, dropped");
            return None;
        }
        match message {
            Message::FriendRequest { .. } => None,
            Message::Name { name } => {
                debug!(%peer, %name, "peer name");
                self.names.insert(peer, name);
                None
            }
            Message::Text { text } => Some(PeerEvent::Text { peer, text }),
            Message::FileOffer {
                transfer,
                kind,
                size,
                filename,
            } => Some(PeerEvent::FileOffer {
                peer,
                transfer,
                kind,
                size,
                filename,
            }),
            Message::FileChunk {
                transfer,
                position,
                data,
            } => Some(PeerEvent::FileChunk {
                peer,
                transfer,
                position,
                data,
            }),
            Message::FileControl { transfer, control } => {
                debug!(%peer, transfer, ?control, "file control from peer, ignored");
                None
            }
        }
    }
}

impl PeerLink for NetLink {
    fn bootstrap(&mut self) {
        if let Some(task) = self.bootstrap_task.take() {
            task.abort();
        }
        self.bootstrap_task = Some(tokio::spawn(transport::run_bootstrap(
            self.bootstrap_addr.clone(),
            self.bootstrap_key.clone(),
            self.keypair.clone(),
            self.inbound_tx.clone(),
        )));
    }

    fn connection_status(&self) -> bool {
        self.connections.contains_key(&self.bootstrap_key.peer_id())
    }

    fn send_text(&mut self, peer: PeerId, text: &str) {
        self.send(
            peer,
            Message::Text {
                text: text.to_string(),
            },
        );
    }

    fn control_file(&mut self, peer: PeerId, transfer: TransferNumber, control: FileControl) {
        self.send(peer, Message::FileControl { transfer, control });
    }

    fn accept_friend(&mut self, key: PublicKey) {
        if self.session.add_friend(key.clone()) {
            info!(peer = %key.peer_id(), "friend added");
        }
    }

    fn poll_event(&mut self) -> Option<PeerEvent> {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            if let Some(event) = self.handle(inbound) {
                return Some(event);
            }
        }
        None
    }

    fn display_name(&self, peer: &PeerId) -> String {
        self.names
            .get(peer)
            .cloned()
            .unwrap_or_else(|| peer.to_string())
    }

    fn session(&self) -> &SessionState {
        &self.session
    }
}
