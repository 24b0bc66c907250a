use std::collections::HashSet;

use bytes::Bytes;

/// Represents a published message in the hub.
///
/// A message is stamped exactly once, at publish time, and never changes
/// afterwards. History and subscriber queues share it behind an `Arc`.
///
/// # Fields
///
/// - `id` - Hub-wide, strictly increasing identifier. Ordering key for delivery and replay.
/// - `event_type` - Optional type tag used by consumers for routing. Empty means untyped.
/// - `targets` - The channels this message was published to. Not carried on the wire,
///   so records rebuilt by the client have no targets.
/// - `payload` - Opaque bytes, never inspected by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub event_type: String,
    pub targets: Vec<String>,
    pub payload: Bytes,
}

impl Message {
    /// Returns true if any target is in `channels`.
    pub fn is_for(&self, channels: &HashSet<String>) -> bool {
        self.targets.iter().any(|target| channels.contains(target))
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
