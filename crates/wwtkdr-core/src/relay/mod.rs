//! Per-request orchestration.
//!
//! [`Relay`] turns one HTTP-shaped [`ResourceRequest`] into a
//! [`RelayResponse`]:
//!
//! 1. **Sending** - resolve the key through the [`KeyRegistry`], get a
//!    handle from the [`DirectoryCache`], and send the request under a fresh
//!    correlation id.
//! 2. **Awaiting first** - wait for fragment 0. A non-ok status becomes
//!    [`Error::BackendError`]; otherwise its HTTP status and headers shape the
//!    response and its chunks start the body.
//! 3. **Streaming** - the returned [`RelayBody`] keeps pulling fragments
//!    while the last one said `more` and carried at least one chunk.
//!
//! The request's reassembly buffer is released exactly once on every exit
//! path, including the body being dropped early by a disconnecting client.

mod response;

#[cfg(test)]
mod tests;

pub use response::{RelayBody, RelayResponse};

use crate::{
    common::{
        error::{Error, Result},
        types::{CorrelationId, PollPolicy},
    },
    directory::{DirectoryCache, ProducerDirectory},
    dispatch::ProducerHandle,
    proto::{ReplyFragment, RequestMessage, ResourceRequest},
    registry::KeyRegistry,
};
use std::sync::Arc;

/// Correlation and reassembly front door used by the HTTP layer.
pub struct Relay {
    registry: KeyRegistry,
    directory: DirectoryCache,
}

impl Relay {
    /// Creates a relay over `directory` and subscribes its key registry to
    /// producer start notifications.
    pub fn new(directory: Arc<dyn ProducerDirectory>, policy: PollPolicy) -> Self {
        let registry = KeyRegistry::new();
        directory.subscribe(Arc::new(registry.clone()));

        Self {
            registry,
            directory: DirectoryCache::new(directory, policy),
        }
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &DirectoryCache {
        &self.directory
    }

    /// Relays `request` to the producer that claimed `request.key`.
    ///
    /// Returns once the first reply fragment is in; the remaining fragments
    /// are pulled lazily by the response body.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownKey`] / [`Error::ProducerUnavailable`] before
    ///   anything is sent.
    /// - [`Error::BackendError`], [`Error::ReplyTimeout`] or
    ///   [`Error::ChannelError`] while awaiting the first fragment.
    /// - [`Error::MalformedReply`] if the first fragment has no usable
    ///   `http_status`.
    #[tracing::instrument(skip_all, fields(key = %request.key, entry = %request.entry))]
    pub async fn fetch(&self, request: ResourceRequest) -> Result<RelayResponse> {
        let producer = self.registry.lookup(&request.key)?;
        let handle = self
            .directory
            .get_handle(&producer)
            .map_err(|e| e.for_key(&request.key))?;

        tracing::debug!(
            %producer,
            authenticated = request.authenticated,
            "relaying {} {}",
            request.method,
            request.url
        );

        let message = RequestMessage::resource_request(request);
        let pending = PendingReply::new(handle, message.msg_id);
        pending.handle.send(message).await?;

        let first = pending.next().await?;
        RelayResponse::from_first(first, pending)
    }
}

/// Outstanding request on a producer handle.
///
/// Registers the request's reassembly buffer on creation, owns the right to
/// pull its fragments, and releases the buffer when dropped.
pub(crate) struct PendingReply {
    handle: Arc<ProducerHandle>,
    id: CorrelationId,
}

impl PendingReply {
    fn new(handle: Arc<ProducerHandle>, id: CorrelationId) -> Self {
        handle.begin(id);
        Self { handle, id }
    }

    /// Pulls the next in-order fragment, failing on a non-ok status.
    pub(crate) async fn next(&self) -> Result<ReplyFragment> {
        let fragment = self.handle.next_reply(self.id).await?;

        if !fragment.is_ok() {
            let message = fragment
                .content
                .evalue
                .unwrap_or_else(|| "unspecified producer error".to_string());
            tracing::debug!(id = %self.id, status = %fragment.content.status, "producer reported an error");
            return Err(Error::BackendError { message });
        }

        Ok(fragment)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.handle.finish_buffering(self.id);
    }
}
