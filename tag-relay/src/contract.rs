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

//! The data access contract implemented by every layer of the tree.
//!
//! Relays, routers and terminal backends all implement [`DataAccess`], which is
//! what allows them to be stacked in any order.

use crate::error::{ListenerError, RelayError};
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Value of a single data point.
pub type TagValue = serde_json::Value;

/// Receives values pushed for a subscribed identifier.
///
/// The identity of a listener is the identity of its `Arc` allocation: the same
/// `Arc` (or a clone of it) must be passed to `unsubscribe`.
#[async_trait]
pub trait ValueListener: Send + Sync {
    async fn on_value(&self, value: TagValue) -> Result<(), ListenerError>;
}

#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Starts delivering values for `id` to `listener`.
    ///
    /// A backend may invoke `listener` before returning, for example with the
    /// current value. A [`Relay`](crate::Relay) sitting on top keeps its
    /// upstream link for `id` locked until this call returns, so an
    /// unsubscribe triggered from such an inline value cannot release the
    /// link right away: the relay answers it immediately and unsubscribes
    /// upstream as soon as this call completes. Backends that run listeners
    /// inline must not wait on anything the listener itself waits on.
    async fn subscribe(&self, id: &str, listener: Arc<dyn ValueListener>)
        -> Result<(), RelayError>;

    async fn unsubscribe(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError>;

    async fn read(&self, id: &str) -> Result<TagValue, RelayError>;

    /// `Ok` means the write was accepted, not that the backend acknowledged it.
    async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError>;

    async fn get_type(&self, id: &str) -> Result<String, RelayError> {
        Err(RelayError::Unsupported {
            operation: "get_type".to_string(),
            id: id.to_string(),
        })
    }

    async fn subscribe_event(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        self.subscribe(id, listener).await
    }

    async fn unsubscribe_event(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        self.unsubscribe(id, listener).await
    }
}

struct FnListener<F> {
    callback: F,
}

#[async_trait]
impl<F> ValueListener for FnListener<F>
where
    F: Fn(TagValue) -> Result<(), ListenerError> + Send + Sync,
{
    async fn on_value(&self, value: TagValue) -> Result<(), ListenerError> {
        (self.callback)(value)
    }
}

/// Wraps a closure into a listener.
pub fn listener_fn<F>(callback: F) -> Arc<dyn ValueListener>
where
    F: Fn(TagValue) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(FnListener { callback })
}

/// Thin data pointer of a trait object, ignoring the vtable.
#[inline(always)]
pub(crate) fn arc_address<T: ?Sized>(arc: &Arc<T>) -> *const () {
    Arc::as_ptr(arc) as *const ()
}

/// Listener keyed by allocation identity.
#[derive(Clone)]
pub struct ComparableListener {
    listener: Arc<dyn ValueListener>,
}

impl ComparableListener {
    pub fn new(listener: Arc<dyn ValueListener>) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> Arc<dyn ValueListener> {
        self.listener.clone()
    }
}

impl Hash for ComparableListener {
    fn hash<H: Hasher>(&self, state: &mut H) {
        arc_address(&self.listener).hash(state);
    }
}

impl PartialEq for ComparableListener {
    fn eq(&self, other: &Self) -> bool {
        arc_address(&self.listener) == arc_address(&other.listener)
    }
}

impl Eq for ComparableListener {}

impl Debug for ComparableListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparableListener")
            .field("address", &arc_address(&self.listener))
            .finish()
    }
}
