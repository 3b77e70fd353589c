//! Registry of keys claimed by producers.
//!
//! Producers claim keys by broadcasting a [`CLAIM_KEY`] announcement. The
//! registry watches every producer's broadcast channel (it is registered as a
//! [`ProducerObserver`]) and records the latest claim for each key. The last
//! claim wins; there is no conflict detection.
//!
//! Once a producer's announcement channel closes, the keys it still holds are
//! retracted. Until then, a key pointing at a dead producer keeps resolving
//! and the failure surfaces at the directory layer instead.

use crate::{
    common::{
        error::{Error, Result},
        types::{Key, ProducerId},
    },
    directory::ProducerObserver,
    proto::{Announcement, CLAIM_KEY, ClaimKey},
};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::broadcast::{self, error::RecvError};

/// Mapping from claimed [`Key`]s to the producer that claimed them last.
#[derive(Clone, Default)]
pub struct KeyRegistry {
    keys: Arc<RwLock<HashMap<Key, ProducerId>>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `producer` as the owner of `raw_key`.
    ///
    /// Empty keys and keys with the reserved prefix are logged and ignored.
    /// Returns `true` if the claim was recorded.
    pub fn claim(&self, producer: &ProducerId, raw_key: &str) -> bool {
        match Key::parse(raw_key) {
            Ok(key) => {
                tracing::debug!(%key, %producer, "key claimed");
                self.keys.write().insert(key, producer.clone());
                true
            }
            Err(e) => {
                tracing::warn!(%producer, "ignoring claim: {e}");
                false
            }
        }
    }

    /// Returns the producer that last claimed `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKey`] if nobody holds `key`.
    pub fn lookup(&self, key: &str) -> Result<ProducerId> {
        self.keys
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownKey {
                key: key.to_string(),
            })
    }

    /// Drops every key currently held by `producer`. Returns how many were
    /// removed.
    pub fn release_producer(&self, producer: &ProducerId) -> usize {
        let mut keys = self.keys.write();
        let before = keys.len();
        keys.retain(|_, owner| owner != producer);
        before - keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Applies one announcement from `producer`'s broadcast channel.
    ///
    /// Anything other than [`CLAIM_KEY`] is ignored.
    pub fn observe(&self, producer: &ProducerId, announcement: &Announcement) {
        if announcement.msg_type != CLAIM_KEY {
            return;
        }

        let claim: ClaimKey = serde_json::from_value(announcement.content.clone()).unwrap_or_default();
        match claim.key {
            Some(key) => {
                self.claim(producer, &key);
            }
            None => {
                tracing::warn!(
                    %producer,
                    "{}",
                    Error::MalformedClaim {
                        reason: "missing/empty key".to_string()
                    }
                );
            }
        }
    }

    async fn watch(self, producer: ProducerId, mut announcements: broadcast::Receiver<Announcement>) {
        tracing::debug!(%producer, "watching announcements");

        loop {
            match announcements.recv().await {
                Ok(announcement) => self.observe(&producer, &announcement),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%producer, skipped, "announcement watcher lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }

        let released = self.release_producer(&producer);
        tracing::debug!(%producer, released, "producer gone; released its keys");
    }
}

impl ProducerObserver for KeyRegistry {
    fn producer_started(&self, producer: ProducerId, announcements: broadcast::Receiver<Announcement>) {
        tokio::spawn(self.clone().watch(producer, announcements));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, ProducerDirectory};
    use core::time::Duration;

    #[test]
    fn claim_then_lookup() {
        let registry = KeyRegistry::new();
        let p1 = ProducerId::new("p1");
        let p2 = ProducerId::new("p2");

        assert!(registry.claim(&p1, "tiles"));
        assert_eq!(registry.lookup("tiles").unwrap(), p1);

        // Last claim wins.
        assert!(registry.claim(&p2, "tiles"));
        assert_eq!(registry.lookup("tiles").unwrap(), p2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_keys_never_resolve() {
        let registry = KeyRegistry::new();
        let p1 = ProducerId::new("p1");

        assert!(!registry.claim(&p1, ""));
        assert!(!registry.claim(&p1, "_probe"));
        assert!(registry.is_empty());
        assert_eq!(
            registry.lookup("_probe").unwrap_err(),
            Error::UnknownKey {
                key: "_probe".to_string()
            }
        );
        assert!(registry.lookup("").is_err());
    }

    #[test]
    fn observe_ignores_other_messages_and_bad_claims() {
        let registry = KeyRegistry::new();
        let p1 = ProducerId::new("p1");

        registry.observe(
            &p1,
            &Announcement {
                msg_type: "status".to_string(),
                content: serde_json::json!({ "key": "tiles" }),
            },
        );
        registry.observe(
            &p1,
            &Announcement {
                msg_type: CLAIM_KEY.to_string(),
                content: serde_json::json!({}),
            },
        );
        registry.observe(
            &p1,
            &Announcement {
                msg_type: CLAIM_KEY.to_string(),
                content: serde_json::json!("not an object"),
            },
        );
        assert!(registry.is_empty());

        registry.observe(&p1, &Announcement::claim_key("tiles"));
        assert_eq!(registry.lookup("tiles").unwrap(), p1);
    }

    #[test]
    fn release_only_touches_owner() {
        let registry = KeyRegistry::new();
        let p1 = ProducerId::new("p1");
        let p2 = ProducerId::new("p2");

        registry.claim(&p1, "a");
        registry.claim(&p1, "b");
        registry.claim(&p2, "c");

        assert_eq!(registry.release_producer(&p1), 2);
        assert!(registry.lookup("a").is_err());
        assert_eq!(registry.lookup("c").unwrap(), p2);
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn watches_producer_announcements() {
        let directory = MemoryDirectory::new();
        let registry = KeyRegistry::new();
        directory.subscribe(Arc::new(registry.clone()));

        let producer = directory.spawn("p1");
        producer.claim_key("tiles");
        producer.claim_key("_hidden");

        wait_for(|| registry.lookup("tiles").is_ok()).await;
        assert_eq!(registry.lookup("tiles").unwrap(), *producer.id());
        assert!(registry.lookup("_hidden").is_err());

        drop(producer);
        wait_for(|| registry.is_empty()).await;
    }

    #[tokio::test]
    async fn late_subscriber_sees_running_producers() {
        let directory = MemoryDirectory::new();
        let producer = directory.spawn("p1");

        let registry = KeyRegistry::new();
        directory.subscribe(Arc::new(registry.clone()));
        producer.claim_key("late");

        wait_for(|| registry.lookup("late").is_ok()).await;
    }
}
