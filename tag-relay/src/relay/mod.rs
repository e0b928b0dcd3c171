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

//! Fan-in subscription relay.
//!
//! A [`Relay`] multiplexes any number of downstream listeners onto at most one
//! upstream subscription per identifier, caches the last value seen for each
//! identifier and only notifies listeners when that value changes. It consumes
//! and exposes the same [`DataAccess`] contract, so relays stack.
//!
//! ```text
//!   listeners ──► Relay (ui) ──► Relay (edge, 500ms delay) ──► Router ──► backends
//! ```
//!
//! Listeners are invoked from a snapshot of the subscriber list taken when the
//! value changes: a listener added during delivery does not see that value, a
//! listener removed during delivery still does. Deliveries for one identifier
//! never overlap and arrive in the order the cache was updated; a value set
//! from inside a listener is delivered once the current delivery finishes.

pub(crate) mod config;
pub(crate) mod node;
pub(crate) mod notify;
pub(crate) mod write_worker;

use crate::contract::{ComparableListener, DataAccess, TagValue, ValueListener};
use crate::error::RelayError;
use crate::observability::events;
use crate::relay::config::{EvictionPolicy, RelayConfig};
use crate::relay::node::{NodeState, PendingUnsubscribe, RelayNode};
use crate::relay::notify::{default_error_hook, Notifier};
use crate::relay::write_worker::WriteForwarder;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "relay";

#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    name: String,
    upstream: Arc<dyn DataAccess>,
    notifier: Arc<Notifier>,
    unsubscribe_delay: Duration,
    eviction: EvictionPolicy,
    nodes: Mutex<HashMap<String, Arc<RelayNode>>>,
    writes: WriteForwarder,
}

impl Relay {
    /// Builds a relay from a finished configuration.
    ///
    /// Must be called from within a Tokio runtime: the relay spawns the worker
    /// that forwards writes upstream.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let RelayConfig {
            name,
            upstream,
            equal,
            on_error,
            unsubscribe_delay,
            eviction,
        } = config;

        let name = name.unwrap_or_else(|| format!("relay-{}", Uuid::new_v4()));
        let on_error = on_error.unwrap_or_else(|| default_error_hook(&name));
        let notifier = Arc::new(Notifier::new(&name, equal, on_error));
        let writes = WriteForwarder::spawn(&name, upstream.clone(), notifier.clone());

        info!(
            event = events::RELAY_CREATED,
            component = COMPONENT,
            relay = %name,
            unsubscribe_delay_ms = unsubscribe_delay.as_millis() as u64,
            eviction = ?eviction,
            "relay created"
        );

        Ok(Self {
            inner: Arc::new(RelayInner {
                name,
                upstream,
                notifier,
                unsubscribe_delay,
                eviction,
                nodes: Mutex::new(HashMap::new()),
                writes,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Last value observed for `id`, if any.
    pub async fn cached_value(&self, id: &str) -> Option<TagValue> {
        let node = self.inner.existing_node(id).await?;
        let state = node.state.lock().await;
        state.cached_value.clone()
    }

    pub async fn subscriber_count(&self, id: &str) -> usize {
        match self.inner.existing_node(id).await {
            Some(node) => node.state.lock().await.subscribers.len(),
            None => 0,
        }
    }

    pub async fn node_count(&self) -> usize {
        self.inner.nodes.lock().await.len()
    }
}

impl RelayInner {
    async fn node(&self, id: &str) -> Arc<RelayNode> {
        let mut nodes = self.nodes.lock().await;
        nodes
            .entry(id.to_string())
            .or_insert_with(|| RelayNode::new(id, self.notifier.clone()))
            .clone()
    }

    async fn existing_node(&self, id: &str) -> Option<Arc<RelayNode>> {
        self.nodes.lock().await.get(id).cloned()
    }

    /// Node whose cache a read or write should refresh.
    async fn node_for_value(&self, id: &str) -> Option<Arc<RelayNode>> {
        match self.eviction {
            EvictionPolicy::Retain => Some(self.node(id).await),
            EvictionPolicy::EvictWhenIdle => self.existing_node(id).await,
        }
    }

    async fn subscribe(&self, id: &str, listener: Arc<dyn ValueListener>) -> Result<(), RelayError> {
        let key = ComparableListener::new(listener);

        loop {
            let node = self.node(id).await;

            {
                let mut state = node.state.lock().await;
                if state.evicted {
                    continue;
                }
                if state.subscribers.contains(&key) {
                    return Err(RelayError::DuplicateSubscription { id: id.to_string() });
                }
                // Only a live upstream link may be joined without the link lock.
                if state.upstream_active {
                    state.subscribers.push(key);
                    if let Some(pending) = state.pending_unsubscribe.take() {
                        pending.cancel();
                        self.log_reused(id);
                    }
                    return Ok(());
                }
            }

            let _link = node.link.lock().await;
            let mut state = node.state.lock().await;
            if state.evicted {
                continue;
            }
            if state.subscribers.contains(&key) {
                return Err(RelayError::DuplicateSubscription { id: id.to_string() });
            }
            state.subscribers.push(key.clone());
            if let Some(pending) = state.pending_unsubscribe.take() {
                pending.cancel();
                self.log_reused(id);
                return Ok(());
            }
            if state.upstream_active {
                return Ok(());
            }
            drop(state);

            debug!(
                event = events::RELAY_UPSTREAM_SUBSCRIBE,
                component = COMPONENT,
                relay = %self.name,
                id,
                "subscribing upstream"
            );
            return match self.upstream.subscribe(id, node.forwarder()).await {
                Ok(()) => {
                    node.state.lock().await.upstream_active = true;
                    Ok(())
                }
                Err(err) => {
                    warn!(
                        event = events::RELAY_UPSTREAM_SUBSCRIBE_FAILED,
                        component = COMPONENT,
                        relay = %self.name,
                        id,
                        err = %err,
                        "upstream subscribe failed, rolling back registration"
                    );
                    node.state
                        .lock()
                        .await
                        .subscribers
                        .retain(|subscriber| subscriber != &key);
                    self.evict_if_idle(&node).await;
                    Err(err)
                }
            };
        }
    }

    fn log_reused(&self, id: &str) {
        debug!(
            event = events::RELAY_UPSTREAM_REUSED,
            component = COMPONENT,
            relay = %self.name,
            id,
            "cancelled pending unsubscribe, reusing upstream subscription"
        );
    }

    async fn unsubscribe(
        self: &Arc<Self>,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        let key = ComparableListener::new(listener);
        let node = self
            .existing_node(id)
            .await
            .ok_or_else(|| RelayError::UnknownTag { id: id.to_string() })?;

        {
            let mut state = node.state.lock().await;
            let Some(position) = state
                .subscribers
                .iter()
                .position(|subscriber| subscriber == &key)
            else {
                return Err(RelayError::UnknownSubscriber { id: id.to_string() });
            };
            state.subscribers.remove(position);
            if !state.subscribers.is_empty() {
                return Ok(());
            }
            if !self.unsubscribe_delay.is_zero() {
                self.schedule_unsubscribe(&node, &mut state);
                return Ok(());
            }
        }

        // The link is held while an upstream subscribe for this id is in
        // flight, possibly by the very call that delivered to this listener.
        let Ok(link) = node.link.try_lock() else {
            self.defer_detach(&node);
            return Ok(());
        };
        self.detach_linked(&node, None, link).await
    }

    fn defer_detach(self: &Arc<Self>, node: &Arc<RelayNode>) {
        debug!(
            event = events::RELAY_UNSUBSCRIBE_SCHEDULED,
            component = COMPONENT,
            relay = %self.name,
            id = %node.id,
            delay_ms = 0u64,
            "upstream link busy, unsubscribe deferred"
        );

        let relay = Arc::clone(self);
        let node = Arc::clone(node);
        tokio::spawn(async move {
            if let Err(err) = relay.detach_upstream(&node, None).await {
                relay.notifier.report(&err);
            }
        });
    }

    fn schedule_unsubscribe(self: &Arc<Self>, node: &Arc<RelayNode>, state: &mut NodeState) {
        let generation = state.next_generation();
        if let Some(previous) = state.pending_unsubscribe.take() {
            previous.cancel();
        }

        let relay = Arc::clone(self);
        let timer_node = Arc::clone(node);
        let delay = self.unsubscribe_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = relay.detach_upstream(&timer_node, Some(generation)).await {
                relay.notifier.report(&err);
            }
        });
        state.pending_unsubscribe = Some(PendingUnsubscribe::new(generation, handle));

        debug!(
            event = events::RELAY_UNSUBSCRIBE_SCHEDULED,
            component = COMPONENT,
            relay = %self.name,
            id = %node.id,
            delay_ms = delay.as_millis() as u64,
            "upstream unsubscribe scheduled"
        );
    }

    /// Releases the upstream subscription if nothing needs it any more.
    ///
    /// `generation` identifies the debounce timer calling in; a timer whose
    /// generation no longer matches the pending one was superseded and does
    /// nothing.
    async fn detach_upstream(
        &self,
        node: &Arc<RelayNode>,
        generation: Option<u64>,
    ) -> Result<(), RelayError> {
        let link = node.link.lock().await;
        self.detach_linked(node, generation, link).await
    }

    async fn detach_linked(
        &self,
        node: &Arc<RelayNode>,
        generation: Option<u64>,
        _link: MutexGuard<'_, ()>,
    ) -> Result<(), RelayError> {
        {
            let mut state = node.state.lock().await;
            if let Some(generation) = generation {
                match &state.pending_unsubscribe {
                    Some(pending) if pending.generation == generation => {
                        state.pending_unsubscribe = None;
                    }
                    _ => return Ok(()),
                }
            }
            if !state.subscribers.is_empty()
                || state.pending_unsubscribe.is_some()
                || !state.upstream_active
            {
                return Ok(());
            }
            state.upstream_active = false;
        }

        debug!(
            event = events::RELAY_UPSTREAM_UNSUBSCRIBE,
            component = COMPONENT,
            relay = %self.name,
            id = %node.id,
            "unsubscribing upstream"
        );
        let result = self.upstream.unsubscribe(&node.id, node.forwarder()).await;
        if let Err(err) = &result {
            warn!(
                event = events::RELAY_UPSTREAM_UNSUBSCRIBE_FAILED,
                component = COMPONENT,
                relay = %self.name,
                id = %node.id,
                err = %err,
                "upstream unsubscribe failed"
            );
        }

        self.evict_if_idle(node).await;
        result
    }

    async fn evict_if_idle(&self, node: &Arc<RelayNode>) {
        if self.eviction != EvictionPolicy::EvictWhenIdle {
            return;
        }

        let mut nodes = self.nodes.lock().await;
        let mut state = node.state.lock().await;
        if !state.is_idle() {
            return;
        }
        if nodes
            .get(&node.id)
            .is_some_and(|current| Arc::ptr_eq(current, node))
        {
            nodes.remove(&node.id);
        }
        state.evicted = true;

        debug!(
            event = events::RELAY_NODE_EVICTED,
            component = COMPONENT,
            relay = %self.name,
            id = %node.id,
            "idle node evicted"
        );
    }

    async fn read(&self, id: &str) -> Result<TagValue, RelayError> {
        let value = self.upstream.read(id).await?;
        if let Some(node) = self.node_for_value(id).await {
            node.set_value(value.clone(), &self.notifier).await;
        }
        Ok(value)
    }

    async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
        self.writes.enqueue(id, value.clone())?;
        if let Some(node) = self.node_for_value(id).await {
            node.set_value(value, &self.notifier).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DataAccess for Relay {
    /// Registers `listener` for `id`. Only the first listener of an id causes an
    /// upstream subscription; no cached value is replayed to the new listener.
    async fn subscribe(&self, id: &str, listener: Arc<dyn ValueListener>) -> Result<(), RelayError> {
        self.inner.subscribe(id, listener).await
    }

    async fn unsubscribe(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        self.inner.unsubscribe(id, listener).await
    }

    /// Always reads upstream. The result also refreshes the cache, so current
    /// subscribers are notified when the value changed.
    async fn read(&self, id: &str) -> Result<TagValue, RelayError> {
        self.inner.read(id).await
    }

    /// Queues the write upstream and applies it locally right away.
    async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
        self.inner.write(id, value).await
    }

    async fn get_type(&self, id: &str) -> Result<String, RelayError> {
        self.inner.upstream.get_type(id).await
    }
}
