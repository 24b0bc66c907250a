use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::broker::{Message, ReplayGap};
use crate::utils::error::ClientError;

/// Receiver of everything a [`Session`](crate::client::Session) delivers.
///
/// Callbacks run on the session's driver task while the session lock is held.
/// They must return quickly and must not call back into the session.
pub trait Consumer: Send + 'static {
    /// A record with an id above the watermark. Called in id order.
    fn on_message(&mut self, message: Message);

    /// The stream is open.
    fn on_open(&mut self) {}

    /// The server could not replay everything after the watermark.
    fn on_data_loss(&mut self, gap: &ReplayGap) {
        let _ = gap;
    }

    /// The session ended. Called at most once; the consumer is dropped right after.
    fn on_terminal(&mut self, error: &ClientError) {
        let _ = error;
    }
}

impl<F> Consumer for F
where
    F: FnMut(Message) + Send + 'static,
{
    fn on_message(&mut self, message: Message) {
        self(message)
    }
}

/// Everything a [`ChannelConsumer`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Opened,
    Message(Message),
    DataLoss(ReplayGap),
    Terminated(ClientError),
}

/// Forwards session callbacks into an unbounded channel.
///
/// The receiver yields `None` once the session has terminated.
#[derive(Debug)]
pub struct ChannelConsumer {
    sender: UnboundedSender<ClientEvent>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, UnboundedReceiver<ClientEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: ClientEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}

impl Consumer for ChannelConsumer {
    fn on_message(&mut self, message: Message) {
        self.forward(ClientEvent::Message(message));
    }

    fn on_open(&mut self) {
        self.forward(ClientEvent::Opened);
    }

    fn on_data_loss(&mut self, gap: &ReplayGap) {
        self.forward(ClientEvent::DataLoss(*gap));
    }

    fn on_terminal(&mut self, error: &ClientError) {
        self.forward(ClientEvent::Terminated(error.clone()));
    }
}
