//! Hub engine
//!
//! This module contains the broadcast hub responsible for:
//! - stamping published records with hub-wide, strictly increasing ids
//! - keeping the bounded replay history
//! - tracking registered subscribers and their channel sets
//! - fanning records out to matching subscribers without ever waiting on one
//!
//! Concurrency and usage notes:
//! - The hub is internally synchronized; share it as `Arc<Hub>`.
//! - The id counter and the history sit behind one mutex (`log`). The registry
//!   sits behind a read/write lock. `publish` takes the registry read lock while
//!   still holding `log`, so every queue sees records in id order even with
//!   concurrent publishers. `register`/`unregister` only touch the registry.
//! - A full subscriber queue drops the record for that subscriber and bumps its
//!   drop counter; the publisher is never blocked.
//! - Connect and disconnect hooks run after the registry lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::history::History;
use crate::broker::message::Message;
use crate::broker::resolver::{ChannelResolver, ConnectContext};
use crate::broker::subscriber::{ConnectionId, Offer, Subscriber, Subscription};
use crate::utils::error::HubError;

/// Tunables for a [`Hub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue. `0` is treated as `1`.
    pub client_buffer: usize,
    /// Number of records kept for replay. `0` disables replay.
    pub history_size: usize,
    /// Maximum live subscribers. `0` means unlimited.
    pub max_subscribers: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: 64,
            history_size: 256,
            max_subscribers: 1000,
        }
    }
}

/// Signal that a replay request could not be honoured.
///
/// Either records `requested + 1 .. oldest` (or up to `latest` when nothing is
/// retained) are gone for good, or the watermark is stale: it lies beyond
/// `latest`, typically because the hub restarted and its ids began again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayGap {
    pub requested: u64,
    pub oldest: Option<u64>,
    pub latest: u64,
}

impl ReplayGap {
    /// The watermark is ahead of anything this hub has published.
    pub fn is_stale(&self) -> bool {
        self.requested > self.latest
    }

    /// Number of records the requester will never see.
    ///
    /// For a stale watermark that is everything up to `latest`.
    pub fn missed(&self) -> u64 {
        if self.is_stale() {
            return self.latest;
        }
        let first_kept = self.oldest.unwrap_or(self.latest + 1);
        first_kept.saturating_sub(self.requested + 1)
    }
}

/// Answer to a replay request.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Records after the watermark, ascending. Empty when `gap` is set.
    pub records: Vec<Arc<Message>>,
    pub gap: Option<ReplayGap>,
}

impl Replay {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.records.iter().map(|m| m.id).collect()
    }
}

/// Point-in-time counters, suitable for a status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub last_id: u64,
    pub history_len: usize,
    pub history_capacity: usize,
    pub dropped_total: u64,
}

/// Callback receiving a connection id.
pub type LifecycleHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug)]
struct Log {
    last_id: u64,
    history: History,
}

pub struct Hub {
    config: HubConfig,
    log: Mutex<Log>,
    subscribers: RwLock<HashMap<ConnectionId, Subscriber>>,
    resolver: Option<Arc<dyn ChannelResolver>>,
    on_connect: Option<LifecycleHook>,
    on_disconnect: Option<LifecycleHook>,
    dropped_total: AtomicU64,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("resolver", &self.resolver.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    /// Creates a hub without a channel resolver; only [`Hub::register`] works.
    pub fn new(config: HubConfig) -> Self {
        Self {
            log: Mutex::new(Log {
                last_id: 0,
                history: History::new(config.history_size),
            }),
            subscribers: RwLock::new(HashMap::new()),
            resolver: None,
            on_connect: None,
            on_disconnect: None,
            dropped_total: AtomicU64::new(0),
            config,
        }
    }

    pub fn with_resolver(config: HubConfig, resolver: impl ChannelResolver) -> Self {
        Self {
            resolver: Some(Arc::new(resolver)),
            ..Self::new(config)
        }
    }

    /// Runs `hook` with the connection id after each successful registration.
    #[must_use]
    pub fn on_connect(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Runs `hook` with the connection id each time a subscriber is removed.
    #[must_use]
    pub fn on_disconnect(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Fresh identifier for an inbound connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        format!("conn-{}", Uuid::new_v4())
    }

    /// Resolves the connection's channels and registers it.
    ///
    /// The resolver is invoked exactly once. Failures stop here and never
    /// affect connected subscribers.
    pub fn connect(&self, ctx: &ConnectContext) -> Result<Subscription, HubError> {
        let resolver = self.resolver.as_ref().ok_or(HubError::NoResolver)?;
        let channels = resolver.resolve(ctx).map_err(|e| {
            warn!(connection_id = %ctx.connection_id, error = %e, "channel resolution failed");
            HubError::from(e)
        })?;
        self.register(ctx.connection_id.clone(), channels)
    }

    /// Registers a connection for the given channels.
    pub fn register<I, S>(
        &self,
        connection_id: impl Into<ConnectionId>,
        channels: I,
    ) -> Result<Subscription, HubError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let connection_id = connection_id.into();
        let channels: HashSet<String> = channels.into_iter().map(Into::into).collect();
        if channels.is_empty() {
            return Err(HubError::NoChannels(connection_id));
        }

        let subscription = {
            let mut subscribers = self.subscribers.write();
            if subscribers.contains_key(&connection_id) {
                return Err(HubError::DuplicateConnection(connection_id));
            }
            if self.config.max_subscribers > 0 && subscribers.len() >= self.config.max_subscribers
            {
                return Err(HubError::TooManySubscribers(self.config.max_subscribers));
            }

            let (subscriber, subscription) = Subscriber::pair(
                connection_id.clone(),
                channels,
                self.config.client_buffer,
            );
            info!(
                connection_id = %connection_id,
                channels = ?subscriber.channels,
                "subscriber registered"
            );
            subscribers.insert(connection_id.clone(), subscriber);
            subscription
        };

        if let Some(hook) = &self.on_connect {
            hook(&connection_id);
        }
        Ok(subscription)
    }

    /// Removes a connection. Unknown ids are ignored.
    ///
    /// The subscription is closed before removal, so once this returns its
    /// delivery path sees no further records.
    pub fn unregister(&self, connection_id: &str) {
        let removed = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(connection_id);
            if let Some(subscriber) = &removed {
                subscriber.close();
            }
            removed
        };

        if let Some(subscriber) = removed {
            info!(
                connection_id = %connection_id,
                dropped = subscriber.dropped(),
                "subscriber unregistered"
            );
            if let Some(hook) = &self.on_disconnect {
                hook(connection_id);
            }
        }
    }

    /// Publishes an untyped record. See [`Hub::publish_event`].
    pub fn publish<I, S>(&self, payload: impl Into<Bytes>, channels: I) -> Result<u64, HubError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish_event(payload, channels, "")
    }

    /// Stamps, records and fans out one record; returns its id.
    ///
    /// Id assignment and the history append happen before this returns;
    /// delivery to each subscriber is whatever its queue accepts right now.
    pub fn publish_event<I, S>(
        &self,
        payload: impl Into<Bytes>,
        channels: I,
        event_type: &str,
    ) -> Result<u64, HubError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if event_type.contains(['\r', '\n']) {
            return Err(HubError::InvalidEventType(event_type.to_string()));
        }

        let mut log = self.log.lock();
        log.last_id += 1;
        let message = Arc::new(Message {
            id: log.last_id,
            event_type: event_type.to_string(),
            targets: channels.into_iter().map(Into::into).collect(),
            payload: payload.into(),
        });
        log.history.push(message.clone());

        let subscribers = self.subscribers.read();
        let mut delivered = 0usize;
        for (connection_id, subscriber) in subscribers.iter() {
            if !message.is_for(&subscriber.channels) {
                continue;
            }
            match subscriber.offer(&message) {
                Offer::Queued => delivered += 1,
                Offer::Dropped => {
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        connection_id = %connection_id,
                        id = message.id,
                        dropped = subscriber.dropped(),
                        "subscriber queue full, record dropped"
                    );
                }
                Offer::Closed => {
                    debug!(connection_id = %connection_id, id = message.id, "subscriber queue closed");
                }
            }
        }

        debug!(
            id = message.id,
            targets = ?message.targets,
            delivered,
            "record published"
        );
        Ok(message.id)
    }

    /// Records published after `watermark`.
    ///
    /// An absent or zero watermark means a fresh connection: nothing is
    /// replayed. If records after the watermark have already been evicted, or
    /// the watermark is beyond the last id, the replay is empty and `gap` says
    /// what was lost.
    pub fn replay_since(&self, watermark: Option<u64>) -> Replay {
        let Some(watermark) = watermark.filter(|w| *w > 0) else {
            return Replay::default();
        };

        let log = self.log.lock();
        if watermark == log.last_id {
            return Replay::default();
        }

        if watermark > log.last_id || !log.history.contains(watermark + 1) {
            let gap = ReplayGap {
                requested: watermark,
                oldest: log.history.oldest_id(),
                latest: log.last_id,
            };
            warn!(
                requested = gap.requested,
                oldest = ?gap.oldest,
                latest = gap.latest,
                missed = gap.missed(),
                stale = gap.is_stale(),
                "replay window exceeded"
            );
            return Replay {
                records: Vec::new(),
                gap: Some(gap),
            };
        }

        Replay {
            records: log.history.since(watermark),
            gap: None,
        }
    }

    /// Records dropped for a connection, if it is registered.
    pub fn dropped(&self, connection_id: &str) -> Option<u64> {
        self.subscribers
            .read()
            .get(connection_id)
            .map(Subscriber::dropped)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn subscriber_ids(&self) -> Vec<ConnectionId> {
        self.subscribers.read().keys().cloned().collect()
    }

    pub fn last_id(&self) -> u64 {
        self.log.lock().last_id
    }

    /// Ids currently retained for replay, oldest first.
    pub fn history_ids(&self) -> Vec<u64> {
        self.log.lock().history.ids()
    }

    pub fn stats(&self) -> HubStats {
        let (last_id, history_len, history_capacity) = {
            let log = self.log.lock();
            (log.last_id, log.history.len(), log.history.capacity())
        };
        HubStats {
            subscribers: self.subscriber_count(),
            last_id,
            history_len,
            history_capacity,
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
        }
    }
}
