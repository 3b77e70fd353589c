//! Error types for the relay.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure in the correlation and reassembly layer.
//! It implements [`IntoResponse`] so that request handlers can surface errors
//! to HTTP clients with the appropriate status code and a plain-text body.
//!
//! ## Error Cases
//! - `UnknownKey`: No producer has claimed the requested key (404).
//! - `ProducerUnavailable`: The producer directory cannot resolve a live
//!   handle for the requested key (404).
//! - `BackendError`: A reply fragment reported a non-ok status (500, body is
//!   the producer's error text).
//! - `ReplyTimeout`: The poll budget ran out before a fragment arrived (500).
//! - `ChannelError`: A transport channel was closed or refused a send (500).
//! - `MalformedClaim`: Logged and dropped by the registry; never reaches an
//!   HTTP caller.
//! - `MalformedReply`: Fragment 0 has a missing or invalid `http_status`
//!   (500). Fragments without a parent are logged and dropped by the dispatcher.
//! - `ServiceShutdown`: A request arrived while the relay was shutting down
//!   (503).

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the relay.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The key was never claimed (or its claim was retracted).
    #[error("unrecognized WWTKDR key {key:?}")]
    UnknownKey { key: String },

    /// The producer behind a key cannot be reached.
    ///
    /// The directory layer does not know which key led to `producer`, so
    /// `key` is filled in by the relay through [`Error::for_key`].
    #[error("could not get producer for WWTKDR key {} ({producer}): {reason}", quoted_key(.key))]
    ProducerUnavailable {
        key: Option<String>,
        producer: String,
        reason: String,
    },

    /// The producer reported a failure while serving the request.
    #[error("{message}")]
    BackendError { message: String },

    /// No matching reply fragment arrived within the poll budget.
    #[error("incomplete or missing response from producer ({attempts} empty polls)")]
    ReplyTimeout { attempts: u32 },

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A claim announcement carried no usable key.
    #[error("Malformed claim: {reason}")]
    MalformedClaim { reason: String },

    /// A reply fragment lacked a parent reference or sequence number.
    #[error("Malformed reply: {reason}")]
    MalformedReply { reason: String },

    /// The relay is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// HTTP status code reported to clients for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UnknownKey { .. } | Error::ProducerUnavailable { .. } => StatusCode::NOT_FOUND,
            Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::BackendError { .. }
            | Error::ReplyTimeout { .. }
            | Error::ChannelError { .. }
            | Error::MalformedClaim { .. }
            | Error::MalformedReply { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Error {
    /// Records `key` on a [`Error::ProducerUnavailable`] that has none.
    #[must_use]
    pub fn for_key(self, key: &str) -> Self {
        match self {
            Error::ProducerUnavailable {
                key: None,
                producer,
                reason,
            } => Error::ProducerUnavailable {
                key: Some(key.to_string()),
                producer,
                reason,
            },
            other => other,
        }
    }
}

fn quoted_key(key: &Option<String>) -> String {
    match key {
        Some(key) => format!("{key:?}"),
        None => "<unknown>".to_string(),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
