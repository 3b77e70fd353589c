use super::ReplyDispatcher;
use crate::{
    common::{
        error::{Error, Result},
        types::{CorrelationId, PollPolicy, ProducerId},
    },
    directory::Connection,
    proto::{ReplyFragment, RequestMessage},
};
use tokio::sync::mpsc;

/// Open communication handle to one producer.
///
/// Pairs the producer's request channel with the [`ReplyDispatcher`] that
/// owns its shared reply channel. Handles are expensive to create and are
/// shared by every concurrent request to the same producer.
pub struct ProducerHandle {
    producer: ProducerId,
    requests: mpsc::Sender<RequestMessage>,
    dispatcher: ReplyDispatcher,
}

impl ProducerHandle {
    pub fn new(producer: ProducerId, connection: Connection, policy: PollPolicy) -> Self {
        let Connection { requests, replies } = connection;
        Self {
            producer,
            requests,
            dispatcher: ReplyDispatcher::new(replies, policy),
        }
    }

    pub fn producer(&self) -> &ProducerId {
        &self.producer
    }

    /// Sends `message` to the producer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the producer's request channel is
    /// closed.
    pub async fn send(&self, message: RequestMessage) -> Result<()> {
        self.requests
            .send(message)
            .await
            .map_err(|e| Error::ChannelError {
                context: format!("failed to send request to producer {}: {e}", self.producer),
            })
    }

    /// See [`ReplyDispatcher::next_reply`].
    pub async fn next_reply(&self, id: CorrelationId) -> Result<ReplyFragment> {
        self.dispatcher.next_reply(id).await
    }

    /// See [`ReplyDispatcher::begin`].
    pub fn begin(&self, id: CorrelationId) {
        self.dispatcher.begin(id);
    }

    /// See [`ReplyDispatcher::finish_buffering`].
    pub fn finish_buffering(&self, id: CorrelationId) {
        self.dispatcher.finish_buffering(id);
    }

    pub fn dispatcher(&self) -> &ReplyDispatcher {
        &self.dispatcher
    }

    /// Whether the producer side of the request channel has gone away.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}
