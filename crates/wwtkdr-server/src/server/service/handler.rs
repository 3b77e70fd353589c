//! HTTP handlers for the relay.
//!
//! This module defines [`RelayService`], the shared state behind every route,
//! and the two handlers it serves:
//!
//! - `GET {base}wwtkdr/_probe` answers `{"status": "ok"}` to authenticated
//!   callers.
//! - `GET {base}wwtkdr/{key}/{entry...}` relays the request to the producer
//!   that claimed `key` and streams its reply back.
//!
//! ## Responsibilities
//!
//! - Build the `resource_request` payload from the HTTP request.
//! - Translate relay errors into HTTP responses.
//! - Track in-flight relays so shutdown can drain them, and refuse new ones
//!   once shutdown has started.

use super::auth::Authenticated;
use crate::server::{
    config::ServerConfig,
    telemetry::{
        decrement_relays_inflight, increment_bytes_relayed, increment_relay_errors,
        increment_relay_requests, increment_relays_inflight, record_relay_duration,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{OriginalUri, Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use core::time::Duration;
use futures::StreamExt;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{sync::Arc, time::Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use wwtkdr_core::{
    Error, Relay, RelayResponse, directory::ProducerDirectory, proto::ResourceRequest,
};

/// Shared state of the HTTP front end.
///
/// Cheap to clone; every clone refers to the same relay and counters.
#[derive(Clone)]
pub struct RelayService {
    relay: Arc<Relay>,
    auth_token: Option<Arc<str>>,
    inflight: Arc<AtomicUsize>,
    shutting_down: Arc<AtomicBool>,
    shutdown_timeout: Duration,
    // Cancelled at the end of shutdown to stop background tasks such as the
    // demo producer.
    shutdown_token: CancellationToken,
}

impl RelayService {
    pub fn new(directory: Arc<dyn ProducerDirectory>, config: &ServerConfig) -> Self {
        Self {
            relay: Arc::new(Relay::new(directory, config.poll_policy)),
            auth_token: config.auth_token.as_deref().map(Arc::from),
            inflight: Arc::new(AtomicUsize::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_timeout: config.shutdown_timeout,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stops accepting relays and waits (up to the configured timeout) for
    /// the ones still streaming to finish.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new relays");
        self.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight relays to drain ===
        tracing::info!("Draining in-flight relays ({} active)", self.inflight());
        let drained = timeout(self.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight relays drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} relays still active)",
                self.inflight()
            ),
        }

        // === Phase 2: Stop background tasks ===
        self.shutdown_token.cancel();
        tracing::info!("Relay shutdown complete");
    }

    fn track(&self) -> InflightGuard {
        self.inflight.fetch_add(1, Ordering::Relaxed);
        increment_relays_inflight();
        InflightGuard {
            inflight: Arc::clone(&self.inflight),
            start: Instant::now(),
        }
    }
}

/// Counts one relay as in flight until dropped.
///
/// Travels with the response body so a relay stays counted while its body
/// is still streaming.
struct InflightGuard {
    inflight: Arc<AtomicUsize>,
    start: Instant,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        decrement_relays_inflight();
        record_relay_duration(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

pub async fn probe(Authenticated(authenticated): Authenticated) -> Response {
    if !authenticated {
        return (StatusCode::FORBIDDEN, "authentication required").into_response();
    }

    Json(serde_json::json!({ "status": "ok" })).into_response()
}

pub async fn relay_entry(
    State(service): State<RelayService>,
    Authenticated(authenticated): Authenticated,
    OriginalUri(uri): OriginalUri,
    Path((key, entry)): Path<(String, String)>,
) -> Response {
    relay(service, authenticated, &uri, key, entry).await
}

/// `{key}/` with nothing after the slash.
pub async fn relay_root(
    State(service): State<RelayService>,
    Authenticated(authenticated): Authenticated,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
) -> Response {
    relay(service, authenticated, &uri, key, String::new()).await
}

#[tracing::instrument(skip_all, fields(%key, %entry, authenticated = authenticated))]
async fn relay(
    service: RelayService,
    authenticated: bool,
    uri: &Uri,
    key: String,
    entry: String,
) -> Response {
    if service.is_shutting_down() {
        return error_response(Error::ServiceShutdown);
    }

    increment_relay_requests();
    let guard = service.track();

    let request = ResourceRequest {
        method: "GET".to_string(),
        url: uri.to_string(),
        authenticated,
        key,
        entry,
        context: serde_json::Map::new(),
    };

    match service.relay.fetch(request).await {
        Ok(response) => stream_response(response, guard),
        Err(e) => error_response(e),
    }
}

fn error_response(e: Error) -> Response {
    let status = e.status_code();
    match status {
        StatusCode::NOT_FOUND => tracing::debug!("{e}"),
        _ => tracing::warn!("{e}"),
    }
    increment_relay_errors(status.as_u16());
    e.into_response()
}

fn stream_response(response: RelayResponse, guard: InflightGuard) -> Response {
    let RelayResponse {
        status,
        headers,
        body,
    } = response;

    let body = body.map(move |chunk| {
        match &chunk {
            Ok(bytes) => increment_bytes_relayed(bytes.len() as u64),
            Err(e) => {
                // Headers are already out; all that is left is to cut the body.
                increment_relay_errors(e.status_code().as_u16());
                tracing::debug!(elapsed = ?guard.start.elapsed(), "aborting response body");
            }
        }
        chunk
    });

    (status, headers, Body::from_stream(body)).into_response()
}
