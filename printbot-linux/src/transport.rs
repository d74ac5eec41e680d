//! Peer transport: TCP server (incoming friends), TCP client (bootstrap node), handshake + sealed frames.
//!
//! Connection tasks never touch bot state. They report everything as [`Inbound`] on one
//! channel that the control loop drains, and they send whatever the control loop pushes
//! into the per-connection outbound channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use printbot_core::identity::{decrypt_wire, encrypt_wire, SessionKeys};
use printbot_core::wire::{self, LEN_SIZE};
use printbot_core::{Keypair, Message, PeerId, PublicKey, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const HANDSHAKE_SIZE: usize = 1 + 16 + 32; // version + peer_id + public_key
const RETRY_DELAY: Duration = Duration::from_secs(5);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(0);

/// Distinguishes a peer's current connection from one it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything connection tasks report to the control loop.
#[derive(Debug)]
pub enum Inbound {
    Connected {
        peer: PeerId,
        id: ConnectionId,
        public_key: PublicKey,
        outbound: mpsc::UnboundedSender<Message>,
    },
    Message {
        peer: PeerId,
        message: Message,
    },
    Closed {
        peer: PeerId,
        id: ConnectionId,
    },
}

/// Accept peers on `listener` until it fails.
pub async fn run_listener(
    listener: TcpListener,
    keypair: Arc<Keypair>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> std::io::Result<()> {
    loop {
        let (stream, from) = listener.accept().await?;
        let keypair = keypair.clone();
        let inbound = inbound.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, &keypair, None, inbound).await {
                debug!(%from, "connection ended: {e}");
            }
        });
    }
}

/// Connect to the bootstrap node, retrying until it answers with the expected key, then
/// serve that connection until it drops.
pub async fn run_bootstrap(
    addr: String,
    expected: PublicKey,
    keypair: Arc<Keypair>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        info!(%addr, "connecting...");
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                match serve(stream, &keypair, Some(&expected), inbound.clone()).await {
                    Ok(()) => info!(%addr, "bootstrap connection closed"),
                    Err(e) => warn!(%addr, "bootstrap connection failed: {e}"),
                }
                return;
            }
            Err(e) => {
                warn!(%addr, "cannot reach bootstrap node: {e}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Handshake, then pump frames both ways until either side closes.
async fn serve(
    mut stream: TcpStream,
    keypair: &Keypair,
    expected: Option<&PublicKey>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> std::io::Result<()> {
    let public_key = handshake(&mut stream, keypair).await?;
    if let Some(expected) = expected {
        if &public_key != expected {
            return Err(invalid_data("peer presented an unexpected public key"));
        }
    }
    let peer = public_key.peer_id();
    let id = ConnectionId::next();
    let keys = keypair.session_keys(&public_key);
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    if inbound
        .send(Inbound::Connected {
            peer,
            id,
            public_key,
            outbound: tx,
        })
        .is_err()
    {
        return Ok(());
    }
    let writer_task = tokio::spawn(write_loop(writer, keys, rx));
    let result = read_loop(reader, peer, keys, &inbound).await;
    writer_task.abort();
    let _ = inbound.send(Inbound::Closed { peer, id });
    result
}

/// Both sides send their handshake first, then read the other one.
async fn handshake(stream: &mut TcpStream, keypair: &Keypair) -> std::io::Result<PublicKey> {
    stream.write_all(&handshake_bytes(keypair)).await?;
    stream.flush().await?;
    let mut buf = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut buf).await?;
    parse_handshake(&buf)
}

fn handshake_bytes(keypair: &Keypair) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..17].copy_from_slice(keypair.peer_id().as_bytes());
    out[17..49].copy_from_slice(keypair.public_key().as_bytes());
    out
}

fn parse_handshake(buf: &[u8; HANDSHAKE_SIZE]) -> std::io::Result<PublicKey> {
    if buf[0] != PROTOCOL_VERSION {
        return Err(invalid_data("unsupported protocol version"));
    }
    let mut peer_id = [0u8; 16];
    peer_id.copy_from_slice(&buf[1..17]);
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&buf[17..49]);
    let public_key = PublicKey::from_bytes(public_key);
    if public_key.peer_id() != PeerId::from_bytes(peer_id) {
        return Err(invalid_data("peer id does not match public key"));
    }
    Ok(public_key)
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    keys: SessionKeys,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> std::io::Result<()> {
    let mut nonce: u64 = 0;
    while let Some(message) = rx.recv().await {
        let body = wire::encode_message(&message).map_err(invalid_data)?;
        let sealed = encrypt_wire(&keys.tx, nonce, &body).map_err(invalid_data)?;
        nonce = nonce.saturating_add(1);
        writer
            .write_all(&wire::frame(&sealed).map_err(invalid_data)?)
            .await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    peer: PeerId,
    keys: SessionKeys,
    inbound: &mpsc::UnboundedSender<Inbound>,
) -> std::io::Result<()> {
    let mut nonce: u64 = 0;
    loop {
        let mut prefix = [0u8; LEN_SIZE];
        match reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let len = wire::body_len(prefix).map_err(invalid_data)?;
        let mut sealed = vec![0u8; len];
        reader.read_exact(&mut sealed).await?;
        let body = decrypt_wire(&keys.rx, nonce, &sealed).map_err(invalid_data)?;
        nonce = nonce.saturating_add(1);
        let message = wire::decode_message(&body).map_err(invalid_data)?;
        if inbound.send(Inbound::Message { peer, message }).is_err() {
            return Ok(());
        }
    }
}

fn invalid_data<E>(e: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    /// Connect to a peer at `addr` and serve the connection in the background.
    async fn connect(
        addr: SocketAddr,
        keypair: Arc<Keypair>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> std::io::Result<()> {
        let stream = TcpStream::connect(addr).await?;
        tokio::spawn(async move {
            if let Err(e) = serve(stream, &keypair, None, inbound).await {
                debug!(%addr, "connection ended: {e}");
            }
        });
        Ok(())
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Inbound {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[test]
    fn handshake_rejects_mismatched_id() {
        let kp = Keypair::generate();
        let mut buf = handshake_bytes(&kp);
        assert_eq!(parse_handshake(&buf).unwrap(), *kp.public_key());
        buf[1] ^= 0xff;
        assert!(parse_handshake(&buf).is_err());
        let mut buf = handshake_bytes(&kp);
        buf[0] = PROTOCOL_VERSION + 1;
        assert!(parse_handshake(&buf).is_err());
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let bot_kp = Arc::new(Keypair::generate());
        let peer_kp = Arc::new(Keypair::generate());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (bot_tx, mut bot_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_listener(listener, bot_kp.clone(), bot_tx));
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        connect(addr, peer_kp.clone(), peer_tx).await.unwrap();

        // Bot side sees the peer, peer side sees the bot.
        let Inbound::Connected { peer, outbound: to_peer, .. } = next(&mut bot_rx).await else {
            panic!("expected Connected");
        };
        assert_eq!(peer, peer_kp.peer_id());
        let Inbound::Connected { outbound: to_bot, .. } = next(&mut peer_rx).await else {
            panic!("expected Connected");
        };

        to_bot
            .send(Message::Text {
                text: "status".into(),
            })
            .unwrap();
        match next(&mut bot_rx).await {
            Inbound::Message { peer: from, message } => {
                assert_eq!(from, peer_kp.peer_id());
                assert_eq!(message, Message::Text { text: "status".into() });
            }
            other => panic!("unexpected {other:?}"),
        }

        for i in 0..3u64 {
            to_peer
                .send(Message::FileChunk {
                    transfer: 1,
                    position: i,
                    data: Some(vec![i as u8]),
                })
                .unwrap();
        }
        for i in 0..3u64 {
            match next(&mut peer_rx).await {
                Inbound::Message {
                    message: Message::FileChunk { position, .. },
                    ..
                } => assert_eq!(position, i),
                other => panic!("unexpected {other:?}"),
            }
        }

        drop(to_bot);
        assert!(matches!(next(&mut bot_rx).await, Inbound::Closed { .. }));
    }

    #[tokio::test]
    async fn bootstrap_with_wrong_key_never_connects() {
        let node_kp = Arc::new(Keypair::generate());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (node_tx, _node_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_listener(listener, node_kp, node_tx));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let wrong = Keypair::generate().public_key().clone();
        run_bootstrap(addr.to_string(), wrong, Arc::new(Keypair::generate()), tx).await;
        assert!(rx.try_recv().is_err());
    }
}
