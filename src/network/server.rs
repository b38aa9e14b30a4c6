//! WebSocket Host
//!
//! Accepts client connections for an online session and exposes them
//! through the [`Transport`] trait. Every connection gets a reader loop
//! and a writer task fed by a bounded queue.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, broadcast};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::state::MAX_PLAYERS;
use crate::network::protocol::{NetMessage, PeerId};
use crate::network::transport::{try_queue, Transport, TransportError, TransportEvent};

/// Host listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Outbound queue length per client.
    pub outbound_capacity: usize,
    /// Inbound event queue length.
    pub inbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            // Every slot but the host's own
            max_connections: MAX_PLAYERS as usize - 1,
            outbound_capacity: 64,
            inbound_capacity: 256,
        }
    }
}

/// Network errors.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to bind or connect.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

type PeerMap = Arc<RwLock<BTreeMap<PeerId, mpsc::Sender<String>>>>;

fn read_peers(peers: &PeerMap) -> std::sync::RwLockReadGuard<'_, BTreeMap<PeerId, mpsc::Sender<String>>> {
    peers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_peers(peers: &PeerMap) -> std::sync::RwLockWriteGuard<'_, BTreeMap<PeerId, mpsc::Sender<String>>> {
    peers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Query parameter a client uses to announce its peer id.
pub const PEER_QUERY_PARAM: &str = "peer";

/// Peer id announced in the handshake URL (`/?peer=<id>`).
fn requested_peer_id(request: &Request) -> Option<PeerId> {
    request
        .uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == PEER_QUERY_PARAM && !value.is_empty())
        .map(|(_, value)| PeerId::from(value))
}

/// Register a handshaken connection, unless the host is full.
///
/// Runs under the peer map's write lock, so concurrent handshakes cannot
/// push the map past `max_connections`. Announced ids must be unique;
/// anyone else gets a fresh one.
fn admit(
    peers: &mut BTreeMap<PeerId, mpsc::Sender<String>>,
    requested: Option<PeerId>,
    queue: mpsc::Sender<String>,
    max_connections: usize,
) -> Option<PeerId> {
    if peers.len() >= max_connections {
        return None;
    }
    let peer_id = requested
        .filter(|id| !peers.contains_key(id))
        .unwrap_or_else(PeerId::generate);
    peers.insert(peer_id.clone(), queue);
    Some(peer_id)
}

/// Listening WebSocket host.
pub struct WsHost {
    local_id: PeerId,
    local_addr: SocketAddr,
    peers: PeerMap,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsHost {
    /// Bind and start accepting connections.
    ///
    /// Returns the host and the receiver of its transport events.
    #[instrument(skip(config))]
    pub async fn bind(
        config: ServerConfig,
        local_id: PeerId,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), NetError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Host listening on {}", local_addr);

        let (events_tx, events_rx) = mpsc::channel(config.inbound_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        let peers: PeerMap = Arc::new(RwLock::new(BTreeMap::new()));

        let host = Self {
            local_id,
            local_addr,
            peers: peers.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };

        tokio::spawn(Self::accept_loop(listener, config, peers, events_tx, shutdown_tx));

        Ok((host, events_rx))
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn accept_loop(
        listener: TcpListener,
        config: ServerConfig,
        peers: PeerMap,
        events_tx: mpsc::Sender<TransportEvent>,
        shutdown_tx: broadcast::Sender<()>,
    ) {
        let mut shutdown_rx = shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connected = read_peers(&peers).len();
                            if connected >= config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            tokio::spawn(Self::handle_connection(
                                stream,
                                addr,
                                config.outbound_capacity,
                                config.max_connections,
                                peers.clone(),
                                events_tx.clone(),
                                shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Host shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one WebSocket connection until it closes.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        outbound_capacity: usize,
        max_connections: usize,
        peers: PeerMap,
        events_tx: mpsc::Sender<TransportEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut requested = None;
        let handshake = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            requested = requested_peer_id(request);
            Ok(response)
        });
        let ws_stream = match handshake.await {
            Ok(ws) => ws,
            Err(e) => {
                error!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<String>(outbound_capacity);
        let admitted = admit(&mut write_peers(&peers), requested, msg_tx, max_connections);
        let Some(peer_id) = admitted else {
            warn!("Connection limit reached after handshake, closing {}", addr);
            let _ = ws_sender.close().await;
            return;
        };
        let _ = events_tx.send(TransportEvent::Connected(peer_id.clone())).await;

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(text) = msg_rx.recv().await {
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Handle incoming messages
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    let decoded = match msg {
                        Some(Ok(Message::Text(text))) => NetMessage::from_json(&text),
                        Some(Ok(Message::Binary(data))) => NetMessage::from_slice(&data),
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Peer {} ({}) disconnected", peer_id, addr);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => continue,
                    };

                    match decoded {
                        Ok(message) => {
                            let event = TransportEvent::Message { from: peer_id.clone(), message };
                            if events_tx.send(event).await.is_err() {
                                // Nobody is listening any more
                                break;
                            }
                        }
                        Err(e) => debug!("Invalid message from {}: {}", peer_id, e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        // Cleanup: dropping the queue lets the writer close the socket
        write_peers(&peers).remove(&peer_id);
        let _ = tokio::time::timeout(std::time::Duration::from_millis(250), sender_task).await;
        let _ = events_tx.send(TransportEvent::Disconnected(peer_id.clone())).await;

        info!("Peer {} ({}) cleaned up", peer_id, addr);
    }
}

impl Drop for WsHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for WsHost {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn send_to(&self, peer: &PeerId, message: &NetMessage) -> Result<(), TransportError> {
        let sender = read_peers(&self.peers)
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
        try_queue(&sender, peer, message.to_json()?)
    }

    fn peers(&self) -> Vec<PeerId> {
        read_peers(&self.peers).keys().cloned().collect()
    }

    fn broadcast(&self, message: &NetMessage) -> Vec<(PeerId, TransportError)> {
        // Serialize once for everyone
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => return vec![(self.local_id.clone(), TransportError::Encode(e))],
        };

        read_peers(&self.peers)
            .iter()
            .filter_map(|(peer, sender)| {
                try_queue(sender, peer, text.clone()).err().map(|e| (peer.clone(), e))
            })
            .collect()
    }
}
