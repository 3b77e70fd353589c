use super::ProducerDirectory;
use crate::{
    common::{
        error::Result,
        types::{PollPolicy, ProducerId},
    },
    dispatch::ProducerHandle,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Caches one [`ProducerHandle`] per producer.
///
/// Opening a session is expensive, so handles are reused by every request to
/// the same producer. Staleness is handled lazily: each lookup first asks the
/// directory whether the producer is still alive and evicts the cached handle
/// if it is not.
pub struct DirectoryCache {
    directory: Arc<dyn ProducerDirectory>,
    handles: Mutex<HashMap<ProducerId, Arc<ProducerHandle>>>,
    policy: PollPolicy,
}

impl DirectoryCache {
    pub fn new(directory: Arc<dyn ProducerDirectory>, policy: PollPolicy) -> Self {
        Self {
            directory,
            handles: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn directory(&self) -> &Arc<dyn ProducerDirectory> {
        &self.directory
    }

    /// Returns a live handle for `producer`, opening one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProducerUnavailable`] if the directory can no longer
    /// resolve the producer or refuses to open a session.
    ///
    /// [`Error::ProducerUnavailable`]: crate::Error::ProducerUnavailable
    pub fn get_handle(&self, producer: &ProducerId) -> Result<Arc<ProducerHandle>> {
        if let Err(e) = self.directory.resolve(producer) {
            self.evict(producer);
            return Err(e);
        }

        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(producer) {
            if !handle.is_closed() {
                return Ok(Arc::clone(handle));
            }
            tracing::debug!(%producer, "cached handle closed; reconnecting");
        }

        let connection = self.directory.connect(producer)?;
        let handle = Arc::new(ProducerHandle::new(producer.clone(), connection, self.policy));
        handles.insert(producer.clone(), Arc::clone(&handle));
        tracing::debug!(%producer, "opened producer handle");

        Ok(handle)
    }

    /// Drops any cached handle for `producer`.
    pub fn evict(&self, producer: &ProducerId) {
        if self.handles.lock().remove(producer).is_some() {
            tracing::debug!(%producer, "evicted handle of unresolvable producer");
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}
