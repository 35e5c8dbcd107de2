//! UDP transport to the game client
//!
//! Two independent unbounded queues (game parameters, chatbox) decouple
//! callers from socket I/O; a dedicated drain task per queue performs the
//! actual sends and logs per-message failures without stalling the queue.
//! The game peer is replaced atomically whenever discovery re-resolves the
//! client, so in-flight sends against a stale peer may be dropped.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::ConfigStore;

use super::types::{self, OscArg, OscMessage};

/// Game chatbox input address. The trailing bool asks the client to send
/// the text immediately instead of populating the keyboard.
const CHATBOX_ADDRESS: &str = "/chatbox/input";
/// Message address understood by the HOSCY text relay.
const HOSCY_ADDRESS: &str = "/hoscy/message";

/// Bidirectional UDP endpoint to the game plus the one-way relay sender.
pub struct OscTransport {
    config: Arc<ConfigStore>,
    /// Local receive socket; rebound when the advertised port changes.
    local: RwLock<Option<Arc<UdpSocket>>>,
    local_port: std::sync::atomic::AtomicU16,
    /// Current game peer. `None` until discovery resolves the client.
    peer: RwLock<Option<SocketAddr>>,
    /// Always-connected secondary sender for the HOSCY relay.
    hoscy_socket: Arc<UdpSocket>,
    game_tx: mpsc::UnboundedSender<OscMessage>,
    chatbox_tx: mpsc::UnboundedSender<String>,
    game_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<OscMessage>>>,
    chatbox_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl OscTransport {
    /// Bind the local receive socket (ephemeral port) and the relay sender.
    pub async fn new(config: Arc<ConfigStore>) -> crate::error::Result<Arc<Self>> {
        let local = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let local_port = local.local_addr()?.port();
        let hoscy_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;

        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (chatbox_tx, chatbox_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            config,
            local: RwLock::new(Some(Arc::new(local))),
            local_port: std::sync::atomic::AtomicU16::new(local_port),
            peer: RwLock::new(None),
            hoscy_socket: Arc::new(hoscy_socket),
            game_tx,
            chatbox_tx,
            game_rx: std::sync::Mutex::new(Some(game_rx)),
            chatbox_rx: std::sync::Mutex::new(Some(chatbox_rx)),
        }))
    }

    /// The port the game should send avatar parameters to. Advertised over
    /// OSCQuery, stable for the process lifetime unless explicitly rebound.
    pub fn local_port(&self) -> u16 {
        self.local_port.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Atomically replace the active game peer. Rebinds the receive socket
    /// only when the requested receive port differs from the current one.
    pub async fn create_game_connection(
        &self,
        host: IpAddr,
        receive_port: u16,
        send_port: u16,
    ) -> crate::error::Result<()> {
        if receive_port != self.local_port() {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, receive_port)).await?;
            self.local_port
                .store(socket.local_addr()?.port(), std::sync::atomic::Ordering::Relaxed);
            *self.local.write().await = Some(Arc::new(socket));
        }
        let peer = SocketAddr::new(host, send_port);
        *self.peer.write().await = Some(peer);
        debug!("game connection set: peer={peer}, receive port {}", self.local_port());
        Ok(())
    }

    /// Enqueue a parameter message for the game. Never blocks.
    pub fn send_game(&self, address: impl Into<String>, args: Vec<OscArg>) {
        let _ = self.game_tx.send(OscMessage::new(address, args));
    }

    /// Enqueue a chatbox text. Routing (game chatbox vs HOSCY relay) is
    /// decided at drain time from the live config.
    pub fn send_chatbox(&self, text: String) {
        let _ = self.chatbox_tx.send(text);
    }

    /// Await the next inbound message from the game.
    ///
    /// With no connection established this keeps polling and never returns
    /// an error; the receive socket is re-checked once a second so a
    /// replaced connection is picked up.
    pub async fn receive_game_message(&self) -> OscMessage {
        let mut buf = vec![0u8; 4096];
        loop {
            let socket = match self.local.read().await.as_ref() {
                Some(s) => Arc::clone(s),
                None => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };
            let received =
                tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await;
            let (len, _from) = match received {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    debug!("OSC receive failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                // Timeout: re-check the current socket.
                Err(_) => continue,
            };
            match types::decode(&buf[..len]) {
                Ok(Some(msg)) => return msg,
                Ok(None) => continue,
                Err(e) => {
                    debug!("dropping malformed OSC packet: {e}");
                    continue;
                }
            }
        }
    }

    /// Spawn the two queue drain loops. Call once.
    pub fn spawn_senders(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let game_rx = self
            .game_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("spawn_senders called twice");
        let chatbox_rx = self
            .chatbox_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("spawn_senders called twice");

        vec![
            tokio::spawn(Arc::clone(self).drain_game_queue(game_rx, shutdown.clone())),
            tokio::spawn(Arc::clone(self).drain_chatbox_queue(chatbox_rx, shutdown)),
        ]
    }

    async fn drain_game_queue(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<OscMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let msg = tokio::select! {
                _ = shutdown.changed() => break,
                msg = rx.recv() => match msg {
                    Some(m) => m,
                    None => break,
                },
            };
            if let Err(e) = self.send_to_game(&msg).await {
                warn!("failed to send {}: {e}", msg.address);
            }
        }
    }

    async fn drain_chatbox_queue(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let text = tokio::select! {
                _ = shutdown.changed() => break,
                text = rx.recv() => match text {
                    Some(t) => t,
                    None => break,
                },
            };
            let osc = self.config.read().await.osc.clone();
            let result = if osc.hoscy {
                let msg = OscMessage::new(HOSCY_ADDRESS, vec![OscArg::String(text)]);
                self.send_to_hoscy(&msg, osc.hoscy_send_port).await
            } else {
                let msg = OscMessage::new(
                    CHATBOX_ADDRESS,
                    vec![OscArg::String(text), OscArg::Bool(true)],
                );
                self.send_to_game(&msg).await
            };
            if let Err(e) = result {
                warn!("failed to send chatbox message: {e}");
            }
        }
    }

    async fn send_to_game(&self, msg: &OscMessage) -> crate::error::Result<()> {
        let peer = match *self.peer.read().await {
            Some(p) => p,
            None => {
                trace!("no game connection, dropping {}", msg.address);
                return Ok(());
            }
        };
        let socket = match self.local.read().await.as_ref() {
            Some(s) => Arc::clone(s),
            None => return Ok(()),
        };
        let bytes = types::encode(msg)?;
        socket.send_to(&bytes, peer).await?;
        Ok(())
    }

    async fn send_to_hoscy(&self, msg: &OscMessage, port: u16) -> crate::error::Result<()> {
        let bytes = types::encode(msg)?;
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        self.hoscy_socket.send_to(&bytes, target).await?;
        Ok(())
    }
}
