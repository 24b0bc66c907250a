//! Subscriber state
//!
//! `Subscriber` is the hub's side of a connection: its channel set and the
//! sending half of its bounded outbound queue. `Subscription` is the handle
//! given to the delivery path: the receiving half plus the counters it shares
//! with the hub.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::broker::message::Message;

pub type ConnectionId = String;

/// Outcome of offering a record to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    Dropped,
    Closed,
}

#[derive(Debug)]
pub(crate) struct Subscriber {
    pub(crate) channels: HashSet<String>,
    sender: mpsc::Sender<Arc<Message>>,
    shared: Arc<SubscriberShared>,
}

#[derive(Debug, Default)]
struct SubscriberShared {
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Subscriber {
    /// Creates the hub side and the delivery handle of one connection.
    pub(crate) fn pair(
        id: ConnectionId,
        channels: HashSet<String>,
        buffer: usize,
    ) -> (Subscriber, Subscription) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let shared = Arc::new(SubscriberShared::default());

        let subscriber = Subscriber {
            channels: channels.clone(),
            sender,
            shared: shared.clone(),
        };
        let subscription = Subscription {
            id,
            channels,
            receiver,
            shared,
        };
        (subscriber, subscription)
    }

    /// Never waits: a full queue drops the record for this subscriber only.
    pub(crate) fn offer(&self, message: &Arc<Message>) -> Offer {
        match self.sender.try_send(message.clone()) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Marks the subscription closed. Dropping `self` afterwards releases the
    /// queue sender.
    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Receiving side of a registered connection.
///
/// Records arrive in ascending id order. Once the hub unregisters the
/// connection, `recv` returns `None` and anything still buffered is discarded.
#[derive(Debug)]
pub struct Subscription {
    id: ConnectionId,
    channels: HashSet<String>,
    receiver: mpsc::Receiver<Arc<Message>>,
    shared: Arc<SubscriberShared>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channels(&self) -> &HashSet<String> {
        &self.channels
    }

    /// Waits for the next record.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        if self.is_closed() {
            return None;
        }
        let message = self.receiver.recv().await?;
        (!self.is_closed()).then_some(message)
    }

    /// Takes the next record if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        if self.is_closed() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Records dropped for this connection because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
