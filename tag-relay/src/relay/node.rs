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

//! Per-identifier relay state.

use crate::contract::{ComparableListener, TagValue, ValueListener};
use crate::error::ListenerError;
use crate::relay::notify::Notifier;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A scheduled upstream unsubscription. The node owns at most one.
pub(crate) struct PendingUnsubscribe {
    pub(crate) generation: u64,
    handle: JoinHandle<()>,
}

impl PendingUnsubscribe {
    pub(crate) fn new(generation: u64, handle: JoinHandle<()>) -> Self {
        Self { generation, handle }
    }

    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Default)]
pub(crate) struct NodeState {
    pub(crate) cached_value: Option<TagValue>,
    pub(crate) subscribers: Vec<ComparableListener>,
    pub(crate) pending_unsubscribe: Option<PendingUnsubscribe>,
    pub(crate) upstream_active: bool,
    pub(crate) evicted: bool,
    last_generation: u64,
}

impl NodeState {
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    /// True when nothing keeps the node linked upstream.
    pub(crate) fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.pending_unsubscribe.is_none() && !self.upstream_active
    }
}

/// Value changes waiting to be delivered, in cache-update order.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<(TagValue, Vec<ComparableListener>)>,
    draining: bool,
}

/// Releases the drain role if the draining future is dropped mid-delivery.
struct DrainGuard<'a> {
    outbox: &'a SyncMutex<Outbox>,
    armed: bool,
}

impl DrainGuard<'_> {
    /// Next queued delivery, or `None` after giving up the drain role.
    fn next(&mut self) -> Option<(TagValue, Vec<ComparableListener>)> {
        let mut outbox = lock_outbox(self.outbox);
        let next = outbox.queue.pop_front();
        if next.is_none() {
            outbox.draining = false;
            self.armed = false;
        }
        next
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_outbox(self.outbox).draining = false;
        }
    }
}

fn lock_outbox(outbox: &SyncMutex<Outbox>) -> MutexGuard<'_, Outbox> {
    outbox.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct RelayNode {
    pub(crate) id: String,
    pub(crate) state: Mutex<NodeState>,
    /// Serialises upstream subscribe/unsubscribe transitions for this id.
    pub(crate) link: Mutex<()>,
    outbox: SyncMutex<Outbox>,
    forwarder: Arc<NodeForwarder>,
}

impl RelayNode {
    pub(crate) fn new(id: &str, notifier: Arc<Notifier>) -> Arc<Self> {
        Arc::new_cyclic(|node| RelayNode {
            id: id.to_string(),
            state: Mutex::new(NodeState::default()),
            link: Mutex::new(()),
            outbox: SyncMutex::new(Outbox::default()),
            forwarder: Arc::new(NodeForwarder {
                node: node.clone(),
                notifier,
            }),
        })
    }

    /// The listener this node registers upstream. Always the same allocation,
    /// so it can be presented again on unsubscribe.
    pub(crate) fn forwarder(&self) -> Arc<dyn ValueListener> {
        self.forwarder.clone()
    }

    /// Stores `value` and notifies the subscribers registered at that moment.
    ///
    /// Deliveries for one node never overlap and follow cache-update order.
    /// Whoever finds the outbox idle drains it; a concurrent or reentrant call
    /// (a listener writing the id it is being notified for) only queues its
    /// value and returns, and the value is delivered after the current one.
    pub(crate) async fn set_value(&self, value: TagValue, notifier: &Notifier) {
        {
            let mut state = self.state.lock().await;
            if notifier.is_unchanged(&value, state.cached_value.as_ref()) {
                return;
            }
            state.cached_value = Some(value.clone());
            let mut outbox = lock_outbox(&self.outbox);
            outbox.queue.push_back((value, state.subscribers.clone()));
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        let mut drain = DrainGuard {
            outbox: &self.outbox,
            armed: true,
        };
        while let Some((value, subscribers)) = drain.next() {
            notifier.deliver(&self.id, &value, subscribers).await;
        }
    }
}

struct NodeForwarder {
    node: Weak<RelayNode>,
    notifier: Arc<Notifier>,
}

#[async_trait]
impl ValueListener for NodeForwarder {
    async fn on_value(&self, value: TagValue) -> Result<(), ListenerError> {
        if let Some(node) = self.node.upgrade() {
            node.set_value(value, &self.notifier).await;
        }
        Ok(())
    }
}
