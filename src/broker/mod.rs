//! The `broker` module is the server side of the transport: a broadcast hub
//! that stamps records, keeps a bounded replay history and fans records out to
//! subscribers grouped by channel.

pub mod engine;
pub mod history;
pub mod message;
pub mod resolver;
pub mod subscriber;

pub use engine::{Hub, HubConfig, HubStats, LifecycleHook, Replay, ReplayGap};
pub use message::Message;
pub use resolver::{ChannelResolver, ConnectContext, QueryChannelResolver, StaticChannelResolver};
pub use subscriber::{ConnectionId, Subscription};
