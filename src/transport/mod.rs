//! The `transport` module carries records between the hub and clients.
//!
//! It defines the event-stream wire encoding, the incremental parser used by
//! the client, and the HTTP server that exposes a hub.

pub mod parse;
pub mod sse;
pub mod wire;

pub use parse::{EventParser, EventStream, Frame, RawEvent};
pub use sse::{PublishRequest, PublishResponse, StreamSettings, router, serve, serve_listener};

#[cfg(test)]
mod tests;
