//! Producer directory abstraction and handle cache.
//!
//! The relay never starts or stops producers itself. It talks to an external
//! *producer directory* that can tell whether a producer is alive, open a new
//! communication [`Connection`] to it, and announce newly started producers to
//! registered [`ProducerObserver`]s.
//!
//! ## Structure
//!
//! - [`cache`] - [`DirectoryCache`], which amortizes connection setup across
//!   requests and evicts handles of dead producers.
//! - [`memory`] - An in-process directory and transport, used by the demo
//!   producer and by tests.

pub mod cache;
pub mod memory;

pub use cache::DirectoryCache;
pub use memory::{MemoryDirectory, MemoryProducer, MemorySession};

use crate::{
    common::{error::Result, types::ProducerId},
    proto::{Announcement, ReplyFragment, RequestMessage},
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Channels of one open session with a producer.
///
/// `requests` carries outbound request messages. `replies` is the single
/// reply channel shared by every request sent over this session.
pub struct Connection {
    pub requests: mpsc::Sender<RequestMessage>,
    pub replies: mpsc::Receiver<ReplyFragment>,
}

/// Notified when the directory starts watching a new producer.
pub trait ProducerObserver: Send + Sync {
    /// `announcements` is the producer's broadcast channel. It closes when
    /// the producer goes away.
    fn producer_started(&self, producer: ProducerId, announcements: broadcast::Receiver<Announcement>);
}

/// Lookup from producer identity to a live communication handle.
pub trait ProducerDirectory: Send + Sync {
    /// Checks that `producer` is still resolvable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProducerUnavailable`] if it is not.
    ///
    /// [`Error::ProducerUnavailable`]: crate::Error::ProducerUnavailable
    fn resolve(&self, producer: &ProducerId) -> Result<()>;

    /// Opens a new session with `producer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProducerUnavailable`] if no session can be opened.
    ///
    /// [`Error::ProducerUnavailable`]: crate::Error::ProducerUnavailable
    fn connect(&self, producer: &ProducerId) -> Result<Connection>;

    /// Registers `observer` for producer start notifications.
    fn subscribe(&self, observer: Arc<dyn ProducerObserver>);
}
