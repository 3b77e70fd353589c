use super::PendingReply;
use crate::{
    common::error::{Error, Result},
    proto::ReplyFragment,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use core::pin::Pin;
use futures::{Stream, TryStreamExt, stream};
use std::collections::VecDeque;

/// Body chunks of a relayed response, in fragment order.
///
/// Ends with an error item if a later fragment reports a failure or never
/// arrives.
pub type RelayBody = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// HTTP-shaped response reconstructed from a producer's reply fragments.
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl RelayResponse {
    /// Builds the response from fragment 0 and hands the rest of the stream
    /// to the body.
    pub(crate) fn from_first(first: ReplyFragment, pending: PendingReply) -> Result<Self> {
        let status = match first.content.http_status {
            Some(code) => StatusCode::from_u16(code).map_err(|_| Error::MalformedReply {
                reason: format!("invalid http_status {code}"),
            })?,
            None => {
                return Err(Error::MalformedReply {
                    reason: "first reply fragment has no http_status".to_string(),
                });
            }
        };

        let mut headers = HeaderMap::new();
        for (name, value) in first.content.http_headers.iter().flatten() {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(%name, "dropping invalid header from producer"),
            }
        }

        let pending = first.continues().then_some(pending);
        let body = BodyState {
            queued: first.buffers.into(),
            pending,
        };

        Ok(Self {
            status,
            headers,
            body: Box::pin(stream::unfold(body, BodyState::advance)),
        })
    }

    /// Drains the body into a single buffer.
    ///
    /// # Errors
    ///
    /// Returns the first error the body yields.
    pub async fn collect(self) -> Result<Bytes> {
        let buf = self
            .body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}

struct BodyState {
    queued: VecDeque<Bytes>,
    // `None` once the stream is complete; dropping it releases the buffer.
    pending: Option<PendingReply>,
}

impl BodyState {
    async fn advance(mut self) -> Option<(Result<Bytes>, Self)> {
        loop {
            if let Some(chunk) = self.queued.pop_front() {
                return Some((Ok(chunk), self));
            }

            let pending = self.pending.as_ref()?;
            match pending.next().await {
                Ok(fragment) => {
                    if !fragment.continues() {
                        self.pending = None;
                    }
                    self.queued.extend(fragment.buffers);
                }
                Err(e) => {
                    tracing::warn!("relay aborted mid-stream: {e}");
                    self.pending = None;
                    return Some((Err(e), self));
                }
            }
        }
    }
}
