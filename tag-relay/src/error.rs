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

//! Error types shared by every layer of the relay tree.

use thiserror::Error;

/// Coarse classification of a [`RelayError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller broke the contract synchronously. Not retried.
    ContractViolation,
    /// A backend or channel failed to serve a request.
    Channel,
    /// A listener failed while a value was being delivered to it.
    Notification,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("listener is already subscribed to '{id}'")]
    DuplicateSubscription { id: String },

    #[error("no subscriptions exist for '{id}'")]
    UnknownTag { id: String },

    #[error("listener is not subscribed to '{id}'")]
    UnknownSubscriber { id: String },

    #[error("invalid router target '{target}'")]
    InvalidTarget { target: String },

    #[error("router target '{target}' is already registered")]
    TargetAlreadyRegistered { target: String },

    #[error("router target '{target}' is not registered")]
    TargetNotRegistered { target: String },

    #[error("router target '{target}' is registered to a different backend")]
    BackendMismatch { target: String },

    #[error("{}", unroutable_message(.id, .target.as_deref()))]
    UnroutableId { id: String, target: Option<String> },

    #[error("operational state '{gate}' already has a listener attached")]
    OperationalListenerAttached { gate: String },

    #[error("listener is not attached to operational state '{gate}'")]
    OperationalListenerMismatch { gate: String },

    #[error("invalid relay configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("upstream failed for '{id}': {reason}")]
    Upstream { id: String, reason: String },

    #[error("{operation} is not supported for '{id}'")]
    Unsupported { operation: String, id: String },

    #[error("write queue is closed, dropping write for '{id}'")]
    WriteQueueClosed { id: String },

    #[error("listener for '{id}' failed: {reason}")]
    Notification { id: String, reason: String },
}

fn unroutable_message(id: &str, target: Option<&str>) -> String {
    match target {
        Some(target) => format!("no backend registered for target '{target}' (id '{id}')"),
        None => format!("id '{id}' has no target prefix"),
    }
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Upstream { .. }
            | RelayError::Unsupported { .. }
            | RelayError::WriteQueueClosed { .. } => ErrorKind::Channel,
            RelayError::Notification { .. } => ErrorKind::Notification,
            _ => ErrorKind::ContractViolation,
        }
    }

    /// Convenience for backends rejecting a request.
    pub fn upstream(id: &str, reason: impl Into<String>) -> Self {
        RelayError::Upstream {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Error returned by a listener callback.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<&str> for ListenerError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for ListenerError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}
