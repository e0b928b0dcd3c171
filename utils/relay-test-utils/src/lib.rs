/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Shared fixtures for `tag-relay` integration tests and benches.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tag_relay::{ListenerError, OperationalGate, RelayError, TagValue, ValueListener};
use tokio::sync::watch;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub use tag_relay::DataAccess;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`; repeated calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Recorded {
    listeners: HashMap<String, Vec<Arc<dyn ValueListener>>>,
    subscribe_calls: HashMap<String, usize>,
    unsubscribe_calls: HashMap<String, usize>,
    read_calls: HashMap<String, usize>,
    writes: Vec<(String, TagValue)>,
    values: HashMap<String, TagValue>,
    types: HashMap<String, String>,
    failing_subscribes: HashSet<String>,
    failing_reads: HashSet<String>,
}

/// Terminal backend standing in for a device driver.
///
/// Records every contract call, pushes values on demand and exposes the
/// connection liveness through an [`OperationalGate`].
pub struct RecordingUpstream {
    name: String,
    recorded: Mutex<Recorded>,
    write_count: watch::Sender<usize>,
    gate: OperationalGate,
}

impl RecordingUpstream {
    pub fn new(name: &str) -> Arc<Self> {
        let (write_count, _) = watch::channel(0);
        Arc::new(Self {
            name: name.to_string(),
            recorded: Mutex::new(Recorded::default()),
            write_count,
            gate: OperationalGate::new(name),
        })
    }

    pub fn gate(&self) -> &OperationalGate {
        &self.gate
    }

    /// Value returned by subsequent reads of `id`.
    pub fn set_value(&self, id: &str, value: TagValue) {
        lock(&self.recorded).values.insert(id.to_string(), value);
    }

    pub fn set_type(&self, id: &str, type_name: &str) {
        lock(&self.recorded)
            .types
            .insert(id.to_string(), type_name.to_string());
    }

    pub fn fail_subscribes_for(&self, id: &str) {
        lock(&self.recorded)
            .failing_subscribes
            .insert(id.to_string());
    }

    pub fn fail_reads_for(&self, id: &str) {
        lock(&self.recorded).failing_reads.insert(id.to_string());
    }

    /// Delivers `value` to every listener currently subscribed to `id`.
    ///
    /// Listener errors are ignored, as a driver would.
    pub async fn push(&self, id: &str, value: TagValue) {
        let listeners = {
            let mut recorded = lock(&self.recorded);
            recorded.values.insert(id.to_string(), value.clone());
            recorded.listeners.get(id).cloned().unwrap_or_default()
        };
        debug!(
            upstream = %self.name,
            id,
            listeners = listeners.len(),
            "pushing value"
        );
        for listener in listeners {
            let _ = listener.on_value(value.clone()).await;
        }
    }

    pub fn subscribe_calls(&self, id: &str) -> usize {
        lock(&self.recorded)
            .subscribe_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn unsubscribe_calls(&self, id: &str) -> usize {
        lock(&self.recorded)
            .unsubscribe_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn read_calls(&self, id: &str) -> usize {
        lock(&self.recorded).read_calls.get(id).copied().unwrap_or(0)
    }

    pub fn listener_count(&self, id: &str) -> usize {
        lock(&self.recorded).listeners.get(id).map_or(0, Vec::len)
    }

    pub fn writes(&self) -> Vec<(String, TagValue)> {
        lock(&self.recorded).writes.clone()
    }

    /// Waits until at least `count` writes arrived, or fails after `limit`.
    pub async fn wait_for_writes(&self, count: usize, limit: Duration) -> bool {
        let mut receiver = self.write_count.subscribe();
        tokio::time::timeout(limit, receiver.wait_for(|seen| *seen >= count))
            .await
            .is_ok_and(|outcome| outcome.is_ok())
    }
}

#[async_trait]
impl DataAccess for RecordingUpstream {
    async fn subscribe(&self, id: &str, listener: Arc<dyn ValueListener>) -> Result<(), RelayError> {
        let mut recorded = lock(&self.recorded);
        *recorded.subscribe_calls.entry(id.to_string()).or_default() += 1;
        if recorded.failing_subscribes.contains(id) {
            return Err(RelayError::upstream(id, "subscription refused"));
        }
        recorded
            .listeners
            .entry(id.to_string())
            .or_default()
            .push(listener);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        let mut recorded = lock(&self.recorded);
        *recorded.unsubscribe_calls.entry(id.to_string()).or_default() += 1;
        let listeners = recorded.listeners.entry(id.to_string()).or_default();
        let before = listeners.len();
        let target = Arc::as_ptr(&listener) as *const ();
        listeners.retain(|attached| Arc::as_ptr(attached) as *const () != target);
        if listeners.len() == before {
            return Err(RelayError::UnknownSubscriber { id: id.to_string() });
        }
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<TagValue, RelayError> {
        let mut recorded = lock(&self.recorded);
        *recorded.read_calls.entry(id.to_string()).or_default() += 1;
        if recorded.failing_reads.contains(id) {
            return Err(RelayError::upstream(id, "device unreachable"));
        }
        Ok(recorded.values.get(id).cloned().unwrap_or(TagValue::Null))
    }

    async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
        let written = {
            let mut recorded = lock(&self.recorded);
            recorded.values.insert(id.to_string(), value.clone());
            recorded.writes.push((id.to_string(), value));
            recorded.writes.len()
        };
        self.write_count.send_replace(written);
        Ok(())
    }

    async fn get_type(&self, id: &str) -> Result<String, RelayError> {
        lock(&self.recorded)
            .types
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::Unsupported {
                operation: "get_type".to_string(),
                id: id.to_string(),
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    Accept,
    Fail,
    Panic,
}

/// Listener that keeps every value it is handed.
pub struct RecordingListener {
    behavior: Behavior,
    values: Mutex<Vec<TagValue>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(Behavior::Accept)
    }

    /// Records the value, then reports a failure.
    pub fn failing() -> Arc<Self> {
        Self::with_behavior(Behavior::Fail)
    }

    /// Records the value, then panics.
    pub fn panicking() -> Arc<Self> {
        Self::with_behavior(Behavior::Panic)
    }

    fn with_behavior(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            values: Mutex::new(Vec::new()),
        })
    }

    pub fn values(&self) -> Vec<TagValue> {
        lock(&self.values).clone()
    }
}

/// Same allocation as `listener`, typed for the contract.
pub fn as_listener(listener: &Arc<RecordingListener>) -> Arc<dyn ValueListener> {
    listener.clone()
}

#[async_trait]
impl ValueListener for RecordingListener {
    async fn on_value(&self, value: TagValue) -> Result<(), ListenerError> {
        lock(&self.values).push(value);
        match self.behavior {
            Behavior::Accept => Ok(()),
            Behavior::Fail => Err(ListenerError::new("listener rejected value")),
            Behavior::Panic => panic!("listener panicked"),
        }
    }
}
