//! In-process targets and registry

use super::{
    DeliverRequest, DeliveryAck, DeliveryError, DeliveryFuture, DeliveryTarget, DiscoverFuture,
    TargetId, TargetRegistry,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One delivery waiting in a consumer's inbox
#[derive(Debug)]
pub struct Delivery {
    pub request: DeliverRequest,
    reply: oneshot::Sender<DeliveryAck>,
}

impl Delivery {
    pub fn ack(self, success: bool) {
        let _ = self.reply.send(DeliveryAck { success });
    }
}

/// Target backed by a bounded channel to an in-process consumer
pub struct ChannelTarget {
    id: TargetId,
    tx: mpsc::Sender<Delivery>,
}

impl ChannelTarget {
    /// Returns the target and the consumer's inbox. Dropping the inbox makes
    /// the target unavailable.
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ChannelTarget {
                id: TargetId::new(id),
                tx,
            },
            rx,
        )
    }
}

impl DeliveryTarget for ChannelTarget {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn deliver(&self, request: DeliverRequest) -> DeliveryFuture {
        let tx = self.tx.clone();
        Box::pin(async move {
            let (reply, ack_rx) = oneshot::channel();
            tx.send(Delivery { request, reply })
                .await
                .map_err(|_| DeliveryError::TargetGone)?;
            ack_rx.await.map_err(|_| DeliveryError::TargetGone)
        })
    }

    fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Registry of in-process targets
///
/// `discover` returns the targets that are registered and still available at
/// the time of the call, and forgets the ones that are not.
#[derive(Default)]
pub struct LocalRegistry {
    targets: RwLock<Vec<Arc<dyn DeliveryTarget>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any target already registered under the same id
    pub fn register(&self, target: Arc<dyn DeliveryTarget>) {
        let mut targets = self.targets.write();
        targets.retain(|t| t.id() != target.id());
        targets.push(target);
    }

    pub fn unregister(&self, id: &TargetId) -> bool {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|t| t.id() != id);
        targets.len() != before
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }
}

impl TargetRegistry for LocalRegistry {
    fn discover(&self) -> DiscoverFuture {
        let available = {
            let mut targets = self.targets.write();
            targets.retain(|t| t.is_available());
            targets.clone()
        };
        Box::pin(async move { Ok(available) })
    }
}
