//! WebSocket Client
//!
//! Connects to an online host. The host is the only peer of a client.

use tokio::sync::{mpsc, broadcast};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, error, debug, instrument};

use crate::network::protocol::{NetMessage, PeerId};
use crate::network::server::{NetError, PEER_QUERY_PARAM};
use crate::network::transport::{try_queue, Transport, TransportError, TransportEvent};

/// Peer id under which a client sees its host.
pub const HOST_PEER: &str = "host";

/// Handshake URL announcing `local_id`.
///
/// A bare `ws://host:port` gets a `/` path, since a request target cannot
/// start with the query.
fn dial_url(url: &str, local_id: &PeerId) -> String {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    let (base, query) = match url.find('?') {
        Some(i) => (&url[..i], Some(&url[i + 1..])),
        None => (url, None),
    };
    let path = if base[authority_start.min(base.len())..].contains('/') { "" } else { "/" };
    match query {
        Some(query) if !query.is_empty() => {
            format!("{base}{path}?{query}&{PEER_QUERY_PARAM}={local_id}")
        }
        _ => format!("{base}{path}?{PEER_QUERY_PARAM}={local_id}"),
    }
}

/// Connected WebSocket client.
pub struct WsClient {
    local_id: PeerId,
    host_id: PeerId,
    outbound: mpsc::Sender<String>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:9000`).
    ///
    /// `local_id` is announced to the host in the handshake so lobby
    /// messages can name it. Returns the client and the receiver of its
    /// transport events. The first event is always `Connected(host)`.
    #[instrument]
    pub async fn connect(
        url: &str,
        local_id: PeerId,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), NetError> {
        let dial = dial_url(url, &local_id);
        let (ws_stream, _response) = connect_async(dial.as_str()).await?;
        info!("Connected to host at {}", url);

        let host_id = PeerId::from(HOST_PEER);
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        let _ = events_tx.send(TransportEvent::Connected(host_id.clone())).await;

        // Writer
        let mut writer_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    text = outbound_rx.recv() => {
                        let Some(text) = text else { break };
                        if ws_sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    _ = writer_shutdown.recv() => break,
                }
            }
            let _ = ws_sender.close().await;
        });

        // Reader
        let mut reader_shutdown = shutdown_tx.subscribe();
        let reader_host = host_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let decoded = match msg {
                            Some(Ok(Message::Text(text))) => NetMessage::from_json(&text),
                            Some(Ok(Message::Binary(data))) => NetMessage::from_slice(&data),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => continue,
                        };

                        match decoded {
                            Ok(message) => {
                                let event = TransportEvent::Message { from: reader_host.clone(), message };
                                if events_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("Invalid message from host: {}", e),
                        }
                    }
                    _ = reader_shutdown.recv() => break,
                }
            }
            let _ = events_tx.send(TransportEvent::Disconnected(reader_host)).await;
        });

        let client = Self {
            local_id,
            host_id,
            outbound,
            shutdown_tx,
        };
        Ok((client, events_rx))
    }

    /// Host's peer id.
    pub fn host_id(&self) -> &PeerId {
        &self.host_id
    }

    /// Close the connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for WsClient {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn send_to(&self, peer: &PeerId, message: &NetMessage) -> Result<(), TransportError> {
        if peer != &self.host_id {
            return Err(TransportError::UnknownPeer(peer.clone()));
        }
        try_queue(&self.outbound, peer, message.to_json()?)
    }

    fn peers(&self) -> Vec<PeerId> {
        if self.outbound.is_closed() {
            Vec::new()
        } else {
            vec![self.host_id.clone()]
        }
    }
}
