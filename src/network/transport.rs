//! Transport Abstraction
//!
//! Reliable, ordered, point-to-point message delivery between peers.
//! Sessions only see this trait; WebSocket and in-memory transports
//! implement it.
//!
//! Sending never blocks. Each peer has a bounded outbound queue; a full
//! queue is reported as an error and the message is dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::protocol::{NetMessage, PeerId};

/// Transport failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection to this peer.
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),

    /// Peer's queue has been closed.
    #[error("connection to {0} is closed")]
    Closed(PeerId),

    /// Peer's outbound queue is full.
    #[error("outbound queue to {0} is full")]
    Backpressure(PeerId),

    /// Message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a transport delivers to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer connected.
    Connected(PeerId),
    /// A peer sent a message.
    Message {
        /// Sender
        from: PeerId,
        /// Decoded message
        message: NetMessage,
    },
    /// A peer went away.
    Disconnected(PeerId),
}

/// Point-to-point message delivery.
pub trait Transport: Send + Sync {
    /// This endpoint's id.
    fn local_id(&self) -> &PeerId;

    /// Queue a message for one peer.
    fn send_to(&self, peer: &PeerId, message: &NetMessage) -> Result<(), TransportError>;

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerId>;

    /// Queue a message for every connected peer.
    ///
    /// Returns the peers the message could not be queued for.
    fn broadcast(&self, message: &NetMessage) -> Vec<(PeerId, TransportError)> {
        self.peers()
            .into_iter()
            .filter_map(|peer| self.send_to(&peer, message).err().map(|e| (peer, e)))
            .collect()
    }
}

/// Shared `Arc` handle used by the drivers.
pub type SharedTransport = Arc<dyn Transport>;

/// Queue one item without blocking, mapping failures to transport errors.
pub(crate) fn try_queue<T>(
    sender: &mpsc::Sender<T>,
    peer: &PeerId,
    item: T,
) -> Result<(), TransportError> {
    sender.try_send(item).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(peer.clone()),
        mpsc::error::TrySendError::Closed(_) => TransportError::Closed(peer.clone()),
    })
}

// =============================================================================
// IN-MEMORY TRANSPORT
// =============================================================================

/// In-process transport. Links endpoints through their inboxes.
///
/// Messages still go through the JSON codec so both ends see exactly
/// what a socket would carry.
#[derive(Clone)]
pub struct MemoryTransport {
    id: PeerId,
    inbox: mpsc::Sender<TransportEvent>,
    links: Arc<RwLock<BTreeMap<PeerId, mpsc::Sender<TransportEvent>>>>,
}

impl MemoryTransport {
    /// New endpoint and the receiver for its inbox.
    pub fn new(id: impl Into<PeerId>, capacity: usize) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (inbox, rx) = mpsc::channel(capacity);
        let transport = Self {
            id: id.into(),
            inbox,
            links: Arc::new(RwLock::new(BTreeMap::new())),
        };
        (transport, rx)
    }

    fn links_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<PeerId, mpsc::Sender<TransportEvent>>> {
        self.links.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn links(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PeerId, mpsc::Sender<TransportEvent>>> {
        self.links.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Link two endpoints. Both receive a `Connected` event.
    pub fn connect(a: &Self, b: &Self) {
        a.links_mut().insert(b.id.clone(), b.inbox.clone());
        b.links_mut().insert(a.id.clone(), a.inbox.clone());
        let _ = a.inbox.try_send(TransportEvent::Connected(b.id.clone()));
        let _ = b.inbox.try_send(TransportEvent::Connected(a.id.clone()));
    }

    /// Unlink two endpoints. Both receive a `Disconnected` event.
    pub fn disconnect(a: &Self, b: &Self) {
        let removed_a = a.links_mut().remove(&b.id).is_some();
        let removed_b = b.links_mut().remove(&a.id).is_some();
        if removed_a {
            let _ = a.inbox.try_send(TransportEvent::Disconnected(b.id.clone()));
        }
        if removed_b {
            let _ = b.inbox.try_send(TransportEvent::Disconnected(a.id.clone()));
        }
    }
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn send_to(&self, peer: &PeerId, message: &NetMessage) -> Result<(), TransportError> {
        let sender = self
            .links()
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;

        let text = message.to_json()?;
        let message = NetMessage::from_json(&text)?;
        debug!(from = %self.id, to = %peer, kind = message.kind(), "memory send");

        try_queue(&sender, peer, TransportEvent::Message { from: self.id.clone(), message })
    }

    fn peers(&self) -> Vec<PeerId> {
        self.links().keys().cloned().collect()
    }
}
