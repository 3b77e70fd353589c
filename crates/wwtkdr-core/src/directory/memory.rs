//! In-process producer directory and message transport.
//!
//! [`MemoryDirectory`] plays the role of the producer lifecycle manager and
//! the transport at once: producers are spawned into it, every
//! [`ProducerDirectory::connect`] hands the producer a fresh
//! [`MemorySession`], and announcements travel over a tokio broadcast
//! channel.
//!
//! Spawning notifies observers, which may spawn tasks, so producers must be
//! spawned from within a Tokio runtime.

use super::{Connection, ProducerDirectory, ProducerObserver};
use crate::{
    common::{
        error::{Error, Result},
        types::ProducerId,
    },
    proto::{Announcement, ReplyFragment, RequestMessage},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, mpsc};

const ANNOUNCEMENT_CAPACITY: usize = 64;
const DEFAULT_SESSION_BUFFER: usize = 32;

struct ProducerEntry {
    generation: u64,
    announcements: broadcast::Sender<Announcement>,
    sessions: mpsc::UnboundedSender<MemorySession>,
}

#[derive(Default)]
struct Inner {
    producers: HashMap<ProducerId, ProducerEntry>,
    generation: u64,
    observers: Vec<Arc<dyn ProducerObserver>>,
}

/// Shared, cloneable in-memory producer directory.
#[derive(Clone)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<Inner>>,
    session_buffer: usize,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::with_session_buffer(DEFAULT_SESSION_BUFFER)
    }

    /// Uses `session_buffer` as the capacity of each session's request and
    /// reply channels.
    pub fn with_session_buffer(session_buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            session_buffer: session_buffer.max(1),
        }
    }

    /// Starts watching a new producer and notifies every observer.
    ///
    /// Spawning an id that is already live replaces it.
    pub fn spawn(&self, id: impl Into<ProducerId>) -> MemoryProducer {
        let id = id.into();
        let (announcements, _) = broadcast::channel(ANNOUNCEMENT_CAPACITY);
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();

        let (generation, observers) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let generation = inner.generation;
            inner.producers.insert(
                id.clone(),
                ProducerEntry {
                    generation,
                    announcements: announcements.clone(),
                    sessions: sessions_tx,
                },
            );
            (generation, inner.observers.clone())
        };

        tracing::debug!(producer = %id, "watching producer");
        for observer in observers {
            observer.producer_started(id.clone(), announcements.subscribe());
        }

        MemoryProducer {
            id,
            generation,
            announcements,
            sessions: sessions_rx,
            directory: self.clone(),
        }
    }

    /// Makes `id` unresolvable. Its announcement channel closes once the
    /// producer itself is dropped.
    pub fn kill(&self, id: &ProducerId) {
        if self.inner.lock().producers.remove(id).is_some() {
            tracing::debug!(producer = %id, "producer removed");
        }
    }

    pub fn is_live(&self, id: &ProducerId) -> bool {
        self.inner
            .lock()
            .producers
            .get(id)
            .is_some_and(|entry| !entry.sessions.is_closed())
    }
}

impl ProducerDirectory for MemoryDirectory {
    fn resolve(&self, producer: &ProducerId) -> Result<()> {
        if self.is_live(producer) {
            Ok(())
        } else {
            Err(unavailable(producer, "no such producer"))
        }
    }

    fn connect(&self, producer: &ProducerId) -> Result<Connection> {
        let (requests_tx, requests_rx) = mpsc::channel(self.session_buffer);
        let (replies_tx, replies_rx) = mpsc::channel(self.session_buffer);

        let inner = self.inner.lock();
        let entry = inner
            .producers
            .get(producer)
            .ok_or_else(|| unavailable(producer, "no such producer"))?;

        entry
            .sessions
            .send(MemorySession {
                requests: requests_rx,
                replies: replies_tx,
            })
            .map_err(|_| unavailable(producer, "producer stopped accepting sessions"))?;

        Ok(Connection {
            requests: requests_tx,
            replies: replies_rx,
        })
    }

    fn subscribe(&self, observer: Arc<dyn ProducerObserver>) {
        let existing: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.observers.push(Arc::clone(&observer));
            inner
                .producers
                .iter()
                .map(|(id, entry)| (id.clone(), entry.announcements.subscribe()))
                .collect()
        };

        // Late subscribers still learn about producers that are already up.
        for (id, announcements) in existing {
            observer.producer_started(id, announcements);
        }
    }
}

fn unavailable(producer: &ProducerId, reason: &str) -> Error {
    Error::ProducerUnavailable {
        key: None,
        producer: producer.to_string(),
        reason: reason.to_string(),
    }
}

/// Producer side of a [`MemoryDirectory`] registration.
///
/// Dropping it removes the producer from the directory.
pub struct MemoryProducer {
    id: ProducerId,
    generation: u64,
    announcements: broadcast::Sender<Announcement>,
    sessions: mpsc::UnboundedReceiver<MemorySession>,
    directory: MemoryDirectory,
}

impl MemoryProducer {
    pub fn id(&self) -> &ProducerId {
        &self.id
    }

    /// Publishes `announcement` on the producer's broadcast channel.
    ///
    /// Returns the number of observers that received it.
    pub fn announce(&self, announcement: Announcement) -> usize {
        self.announcements.send(announcement).unwrap_or(0)
    }

    /// Announces a claim on `key`.
    pub fn claim_key(&self, key: impl Into<String>) -> usize {
        self.announce(Announcement::claim_key(key))
    }

    /// Waits for the relay to open the next session.
    pub async fn accept(&mut self) -> Option<MemorySession> {
        self.sessions.recv().await
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        let mut inner = self.directory.inner.lock();
        // A respawn under the same id owns the entry now.
        if inner
            .producers
            .get(&self.id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            inner.producers.remove(&self.id);
        }
    }
}

/// One relay session as seen by a producer.
pub struct MemorySession {
    pub requests: mpsc::Receiver<RequestMessage>,
    pub replies: mpsc::Sender<ReplyFragment>,
}

impl MemorySession {
    pub async fn next_request(&mut self) -> Option<RequestMessage> {
        self.requests.recv().await
    }

    /// Sends `fragment` on the shared reply channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the relay dropped the session.
    pub async fn reply(&self, fragment: ReplyFragment) -> Result<()> {
        self.replies
            .send(fragment)
            .await
            .map_err(|e| Error::ChannelError {
                context: format!("failed to send reply: {e}"),
            })
    }
}
