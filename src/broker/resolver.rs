//! Channel resolution.
//!
//! A resolver maps an inbound connection to the channels it may receive. The
//! hub calls it exactly once per connection, before the subscriber exists.

use std::collections::{HashMap, HashSet};

use crate::utils::error::ResolveError;

/// Identifying context of an inbound connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectContext {
    pub connection_id: String,
    /// Transport parameters (for HTTP: the query string).
    pub params: HashMap<String, String>,
    pub last_event_id: Option<u64>,
}

impl ConnectContext {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

pub trait ChannelResolver: Send + Sync + 'static {
    fn resolve(&self, ctx: &ConnectContext) -> Result<Vec<String>, ResolveError>;
}

impl<F> ChannelResolver for F
where
    F: Fn(&ConnectContext) -> Result<Vec<String>, ResolveError> + Send + Sync + 'static,
{
    fn resolve(&self, ctx: &ConnectContext) -> Result<Vec<String>, ResolveError> {
        self(ctx)
    }
}

/// Reads a comma-separated `channels` parameter.
///
/// With an allow-list, channels outside it are dropped; a request left with
/// nothing is denied.
#[derive(Debug, Clone, Default)]
pub struct QueryChannelResolver {
    allowed: Option<HashSet<String>>,
}

impl QueryChannelResolver {
    pub const PARAM: &'static str = "channels";

    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts resolution to `allowed`. An empty list means no restriction.
    pub fn allow<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: HashSet<String> = allowed.into_iter().map(Into::into).collect();
        Self {
            allowed: (!allowed.is_empty()).then_some(allowed),
        }
    }
}

impl ChannelResolver for QueryChannelResolver {
    fn resolve(&self, ctx: &ConnectContext) -> Result<Vec<String>, ResolveError> {
        let raw = ctx
            .params
            .get(Self::PARAM)
            .ok_or_else(|| ResolveError::MissingParameter(Self::PARAM.to_string()))?;

        let requested: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        let Some(allowed) = &self.allowed else {
            return Ok(requested);
        };

        let granted: Vec<String> = requested
            .into_iter()
            .filter(|c| allowed.contains(c))
            .collect();
        if granted.is_empty() {
            return Err(ResolveError::Denied(format!(
                "none of the requested channels are allowed: {raw}"
            )));
        }
        Ok(granted)
    }
}

/// Grants every connection the same channels.
#[derive(Debug, Clone)]
pub struct StaticChannelResolver(pub Vec<String>);

impl ChannelResolver for StaticChannelResolver {
    fn resolve(&self, _ctx: &ConnectContext) -> Result<Vec<String>, ResolveError> {
        Ok(self.0.clone())
    }
}
