//! # Identifiers and Polling Policy
//!
//! This module defines the small value types that flow through every layer of
//! the relay: the client-facing [`Key`], the opaque [`ProducerId`] naming a
//! backend worker, and the per-request [`CorrelationId`] that ties a request
//! message to its stream of reply fragments.
//!
//! It also defines [`PollPolicy`], the bounded wait used while a request is
//! waiting for its next fragment on a shared reply channel.

use crate::common::error::{Error, Result};
use core::{borrow::Borrow, fmt, time::Duration};
use serde::{Deserialize, Serialize};

/// Marker character reserved for relay-internal routes such as `_probe`.
pub const RESERVED_KEY_MARKER: char = '_';

/// A claimable, client-chosen resource namespace.
///
/// Keys are opaque UTF-8 strings. Empty keys and keys beginning with
/// [`RESERVED_KEY_MARKER`] can never be constructed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Validates `raw` and wraps it as a [`Key`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedClaim`] if `raw` is empty or starts with the
    /// reserved marker.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();

        if raw.is_empty() {
            return Err(Error::MalformedClaim {
                reason: "missing/empty key".to_string(),
            });
        }

        if raw.starts_with(RESERVED_KEY_MARKER) {
            return Err(Error::MalformedClaim {
                reason: format!("key {raw:?} uses the reserved `{RESERVED_KEY_MARKER}` prefix"),
            });
        }

        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Opaque name of a backend producer process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(String);

impl ProducerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier of one outbound request message.
///
/// Every reply fragment carries the id of the request that triggered it as
/// its parent reference. Ids are random (v4) and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Generates a fresh, random correlation id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bounded wait applied while a request awaits its next reply fragment.
///
/// Each empty `interval` spent on the shared reply channel consumes one
/// attempt; exhausting `max_attempts` ends the request with
/// [`Error::ReplyTimeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on how long a silent producer can hold a request.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 30)
    }
}
