//! Target-to-backend table with lock-free lookups.

use crate::contract::{arc_address, DataAccess};
use crate::error::RelayError;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type Targets = HashMap<String, Arc<dyn DataAccess>>;

/// Readers load a snapshot; writers are serialised and publish a new map.
pub(crate) struct TargetTable {
    current: ArcSwap<Targets>,
    writer: Mutex<()>,
}

impl TargetTable {
    pub(crate) fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub(crate) fn get(&self, target: &str) -> Option<Arc<dyn DataAccess>> {
        self.current.load().get(target).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.current.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) async fn insert(
        &self,
        target: &str,
        backend: Arc<dyn DataAccess>,
    ) -> Result<(), RelayError> {
        let _writer = self.writer.lock().await;
        let snapshot = self.current.load_full();
        if snapshot.contains_key(target) {
            return Err(RelayError::TargetAlreadyRegistered {
                target: target.to_string(),
            });
        }

        let mut next = Targets::clone(&snapshot);
        next.insert(target.to_string(), backend);
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Removes `target` only if it is registered to this exact backend.
    pub(crate) async fn remove(
        &self,
        target: &str,
        backend: &Arc<dyn DataAccess>,
    ) -> Result<(), RelayError> {
        let _writer = self.writer.lock().await;
        let snapshot = self.current.load_full();
        let Some(registered) = snapshot.get(target) else {
            return Err(RelayError::TargetNotRegistered {
                target: target.to_string(),
            });
        };
        if arc_address(registered) != arc_address(backend) {
            return Err(RelayError::BackendMismatch {
                target: target.to_string(),
            });
        }

        let mut next = Targets::clone(&snapshot);
        next.remove(target);
        self.current.store(Arc::new(next));
        Ok(())
    }
}
