//! The `client` module is the consuming side of the transport.
//!
//! A [`Session`] keeps one subscription alive across connection losses,
//! retrying with capped exponential backoff and resuming from the last
//! delivered id. Records reach the application through a single registered
//! [`Consumer`].

pub mod backoff;
pub mod connector;
pub mod consumer;
pub mod options;
pub mod session;

pub use backoff::Backoff;
pub use connector::{Connector, FrameStream, HttpConnector};
pub use consumer::{ChannelConsumer, ClientEvent, Consumer};
pub use options::ClientConfig;
pub use session::{ConnectionState, Session};
